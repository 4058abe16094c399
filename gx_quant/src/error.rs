use std::{fmt, io};

use thiserror::Error;

/// Number of rejected lines reported individually before going quiet
const MAX_REPORTED: usize = 10;

#[derive(Debug, Error)]
pub enum ExprError {
    #[error("I/O error")]
    Io(#[from] io::Error),
    #[error("line {line}: malformed alignment record - {reason}")]
    MalformedRecord { line: usize, reason: String },
    #[error("line {line}: malformed annotation - {reason}")]
    MalformedAnnotation { line: usize, reason: String },
    #[error("line {line}: invalid interval for {gene} - end ({end}) <= start ({start})")]
    InvalidInterval {
        line: usize,
        gene: String,
        start: u64,
        end: u64,
    },
    #[error("gene {0} not found in annotation")]
    UnknownGene(String),
    #[error("no reads assigned to any gene; library scale factor is undefined")]
    EmptyLibrary,
}

impl ExprError {
    /// Line level errors can be skipped; everything else aborts the run
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::MalformedRecord { .. }
                | Self::MalformedAnnotation { .. }
                | Self::InvalidInterval { .. }
        )
    }
}

/// What to do with a line that fails to parse
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ParsePolicy {
    #[default]
    Skip,
    FailFast,
}

impl fmt::Display for ParsePolicy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Skip => write!(f, "skip"),
            Self::FailFast => write!(f, "fail-fast"),
        }
    }
}

/// Keeps count of lines rejected while reading one input file.
///
/// Invalid intervals are always dropped; malformed lines only when the policy is Skip.
#[derive(Debug)]
pub struct SkipCounter {
    policy: ParsePolicy,
    source: String,
    skipped: usize,
}

impl SkipCounter {
    pub fn new<S: AsRef<str>>(policy: ParsePolicy, source: S) -> Self {
        Self {
            policy,
            source: source.as_ref().to_owned(),
            skipped: 0,
        }
    }

    /// Swallow e if it may be skipped, otherwise hand it back
    pub fn handle(&mut self, e: ExprError) -> Result<(), ExprError> {
        let skip = match e {
            ExprError::InvalidInterval { .. } => true,
            _ => self.policy == ParsePolicy::Skip && e.is_recoverable(),
        };
        if !skip {
            return Err(e);
        }
        self.skipped += 1;
        if self.skipped <= MAX_REPORTED {
            warn!("{}: {} (skipped)", self.source, e)
        } else if self.skipped == MAX_REPORTED + 1 {
            warn!("{}: further skipped lines will not be reported", self.source)
        }
        Ok(())
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn report(&self) {
        if self.skipped > 0 {
            info!("{}: {} lines skipped", self.source, self.skipped)
        }
    }
}
