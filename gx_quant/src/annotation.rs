use std::{fmt, io::BufRead, path::Path, sync::Arc};

use anyhow::Context;
use compress_io::compress::CompressIo;
use regex::Regex;
use utils::get_next_line;

use crate::error::ExprError;

// Column positions in a GTF/GFF style data line
const SEQ_FIELD: usize = 0;
const TYPE_FIELD: usize = 2;
const START_FIELD: usize = 3;
const END_FIELD: usize = 4;
const STRAND_FIELD: usize = 6;
const ATTR_FIELD: usize = 8;

pub const DEFAULT_FEATURE_TYPE: &str = "gene";

/// Strand of an annotated feature or an aligned read
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Strand {
    Forward,
    Reverse,
    #[default]
    Unknown,
}

impl Strand {
    /// Annotation strand column: '+', '-', anything else is unknown
    pub fn from_annotation(s: &str) -> Self {
        match s {
            "+" => Self::Forward,
            "-" => Self::Reverse,
            _ => Self::Unknown,
        }
    }

    pub fn flip(self) -> Self {
        match self {
            Self::Forward => Self::Reverse,
            Self::Reverse => Self::Forward,
            Self::Unknown => Self::Unknown,
        }
    }

    /// Unknown matches either strand
    pub fn compatible(self, other: Self) -> bool {
        self == Self::Unknown || other == Self::Unknown || self == other
    }
}

impl fmt::Display for Strand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Forward => write!(f, "+"),
            Self::Reverse => write!(f, "-"),
            Self::Unknown => write!(f, "."),
        }
    }
}

/// GeneInterval
///
/// Half open interval [start, end) on a reference sequence annotated as belonging to
/// gene_name.  Construction guarantees end > start, so length() is never zero.
///
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneInterval {
    gene_name: Arc<str>,
    reference: Arc<str>,
    start: u64,
    end: u64,
    strand: Strand,
}

impl GeneInterval {
    /// Returns None if the interval would be empty
    pub fn new(gene_name: &str, reference: &str, start: u64, end: u64) -> Option<Self> {
        if end > start {
            Some(Self {
                gene_name: Arc::from(gene_name),
                reference: Arc::from(reference),
                start,
                end,
                strand: Strand::Unknown,
            })
        } else {
            None
        }
    }

    pub fn with_strand(mut self, strand: Strand) -> Self {
        self.strand = strand;
        self
    }

    pub fn gene_name(&self) -> &Arc<str> {
        &self.gene_name
    }

    pub fn reference(&self) -> &Arc<str> {
        &self.reference
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    pub fn strand(&self) -> Strand {
        self.strand
    }

    pub fn length(&self) -> u64 {
        self.end - self.start
    }

    pub fn contains(&self, x: u64) -> bool {
        x >= self.start && x < self.end
    }
}

/// Which annotation lines are genes, and how they are named
///
/// feature_type - the value of column 3 that marks a line to keep
/// id - if set, the attribute key (i.e., gene_id, ID, Name) giving the gene name.
///      Otherwise the first column is used as the name.
#[derive(Debug, Clone)]
pub struct FeatureSpec {
    feature_type: String,
    id: Option<(String, Regex)>,
}

impl Default for FeatureSpec {
    fn default() -> Self {
        Self {
            feature_type: DEFAULT_FEATURE_TYPE.to_owned(),
            id: None,
        }
    }
}

impl FeatureSpec {
    pub fn new(feature_type: &str, id: Option<&str>) -> anyhow::Result<Self> {
        let id = match id {
            Some(key) => {
                // Matches both GTF (key "value";) and GFF3 (key=value;) attributes
                let reg = Regex::new(&format!(
                    r#"(?:^|;)\s*{}(?:\s+|=)"?([^";]+)"?"#,
                    regex::escape(key)
                ))
                .with_context(|| format!("Illegal attribute key {}", key))?;
                Some((key.to_owned(), reg))
            }
            None => None,
        };
        Ok(Self {
            feature_type: feature_type.to_owned(),
            id,
        })
    }

    pub fn feature_type(&self) -> &str {
        &self.feature_type
    }

    pub fn id_key(&self) -> Option<&str> {
        self.id.as_ref().map(|(k, _)| k.as_str())
    }

    fn gene_name(&self, fields: &[&str], line: usize) -> Result<String, ExprError> {
        match &self.id {
            None => Ok(fields[SEQ_FIELD].to_owned()),
            Some((key, reg)) => {
                let attr = fields.get(ATTR_FIELD..).unwrap_or(&[]).join(" ");
                reg.captures(&attr)
                    .and_then(|c| c.get(1))
                    .map(|m| m.as_str().trim().to_owned())
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| ExprError::MalformedAnnotation {
                        line,
                        reason: format!("attribute {} not found", key),
                    })
            }
        }
    }

    fn parse_fields(
        &self,
        fields: &[&str],
        line: usize,
    ) -> Option<Result<GeneInterval, ExprError>> {
        let malformed = |reason: String| ExprError::MalformedAnnotation { line, reason };

        match fields.get(TYPE_FIELD) {
            None => {
                return Some(Err(malformed(format!(
                    "expected at least {} fields, found {}",
                    END_FIELD + 1,
                    fields.len()
                ))))
            }
            Some(t) if *t != self.feature_type => return None,
            _ => (),
        }
        if fields.len() <= END_FIELD {
            return Some(Err(malformed(format!(
                "expected at least {} fields, found {}",
                END_FIELD + 1,
                fields.len()
            ))));
        }
        let coord = |ix: usize, what: &str| {
            fields[ix]
                .parse::<u64>()
                .map_err(|_| malformed(format!("invalid {} coordinate '{}'", what, fields[ix])))
        };
        let res = coord(START_FIELD, "start").and_then(|start| {
            let end = coord(END_FIELD, "end")?;
            let name = self.gene_name(fields, line)?;
            let strand = fields
                .get(STRAND_FIELD)
                .map(|s| Strand::from_annotation(s))
                .unwrap_or_default();
            GeneInterval::new(&name, fields[SEQ_FIELD], start, end)
                .map(|iv| iv.with_strand(strand))
                .ok_or(ExprError::InvalidInterval {
                    line,
                    gene: name,
                    start,
                    end,
                })
        });
        Some(res)
    }
}

/// Lazy reader of gene intervals from a GTF/GFF style file.
///
/// Comment lines ('#'), blank lines and lines for other feature types are passed over.
pub struct AnnotationReader<R> {
    rdr: R,
    buf: Vec<u8>,
    line: usize,
    spec: FeatureSpec,
}

impl<R: BufRead> AnnotationReader<R> {
    pub fn new(rdr: R, spec: FeatureSpec) -> Self {
        Self {
            rdr,
            buf: Vec::new(),
            line: 0,
            spec,
        }
    }

    pub fn lines_read(&self) -> usize {
        self.line
    }
}

impl<R: BufRead> Iterator for AnnotationReader<R> {
    type Item = Result<GeneInterval, ExprError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let res = match get_next_line(&mut self.rdr, &mut self.buf) {
                Ok(Some(r)) => r,
                Ok(None) => return None,
                Err(e) => return Some(Err(e.into())),
            };
            self.line += 1;
            let fields = match res {
                Ok(f) => f,
                Err(e) => {
                    return Some(Err(ExprError::MalformedAnnotation {
                        line: self.line,
                        reason: format!("invalid UTF-8 ({})", e),
                    }))
                }
            };
            if fields.first().map(|s| s.starts_with('#')).unwrap_or(true) {
                continue;
            }
            if let Some(res) = self.spec.parse_fields(&fields, self.line) {
                return Some(res);
            }
        }
    }
}

/// Open (possibly compressed) annotation file for reading
pub fn open_annotation_file<P: AsRef<Path>>(
    fname: P,
    spec: FeatureSpec,
) -> anyhow::Result<AnnotationReader<impl BufRead>> {
    let fname = fname.as_ref();
    debug!(
        "Opening annotation file {} (feature type: {})",
        fname.display(),
        spec.feature_type()
    );
    let rdr = CompressIo::new()
        .path(fname)
        .bufreader()
        .with_context(|| format!("Error opening annotation file {}", fname.display()))?;
    Ok(AnnotationReader::new(rdr, spec))
}
