use std::path::{Path, PathBuf};

use crate::{
    annotation::FeatureSpec,
    assign::{ReadFilter, StrandSpec},
    error::ParsePolicy,
    normalize::Method,
};

/// Config
///
/// Configuration info for the program
/// This is generated from the command line arguments
/// Once set it is read only
///
/// alignment_file - SAM style alignment input
/// annotation_file - GTF/GFF style annotation input
/// feature_spec - which annotation lines to use, and how genes are named
/// output_file - destination for expression table (stdout if None)
/// counts_file - optional destination for raw counts
/// filter - which alignments are counted
/// strand - strandedness of the library
/// method - normalization method
/// policy - handling of malformed input lines
/// threads - number of assignment threads
///
pub struct Config {
    alignment_file: PathBuf,
    annotation_file: PathBuf,
    feature_spec: FeatureSpec,
    output_file: Option<PathBuf>,
    counts_file: Option<PathBuf>,
    filter: ReadFilter,
    strand: StrandSpec,
    method: Method,
    policy: ParsePolicy,
    threads: usize,
}

impl Config {
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(alignment_file: P, annotation_file: Q) -> Self {
        Self {
            alignment_file: alignment_file.as_ref().to_owned(),
            annotation_file: annotation_file.as_ref().to_owned(),
            feature_spec: FeatureSpec::default(),
            output_file: None,
            counts_file: None,
            filter: ReadFilter::default(),
            strand: StrandSpec::default(),
            method: Method::default(),
            policy: ParsePolicy::default(),
            threads: 1,
        }
    }

    pub fn set_feature_spec(&mut self, spec: FeatureSpec) {
        self.feature_spec = spec
    }

    pub fn set_output_file<P: AsRef<Path>>(&mut self, p: P) {
        self.output_file = Some(p.as_ref().to_owned())
    }

    pub fn set_counts_file<P: AsRef<Path>>(&mut self, p: P) {
        self.counts_file = Some(p.as_ref().to_owned())
    }

    pub fn set_filter(&mut self, f: ReadFilter) {
        self.filter = f
    }

    pub fn set_strand(&mut self, s: StrandSpec) {
        self.strand = s
    }

    pub fn set_method(&mut self, m: Method) {
        self.method = m
    }

    pub fn set_policy(&mut self, p: ParsePolicy) {
        self.policy = p
    }

    pub fn set_threads(&mut self, x: usize) {
        self.threads = x.max(1)
    }

    pub fn alignment_file(&self) -> &Path {
        &self.alignment_file
    }

    pub fn annotation_file(&self) -> &Path {
        &self.annotation_file
    }

    pub fn feature_spec(&self) -> &FeatureSpec {
        &self.feature_spec
    }

    pub fn output_file(&self) -> Option<&Path> {
        self.output_file.as_deref()
    }

    pub fn counts_file(&self) -> Option<&Path> {
        self.counts_file.as_deref()
    }

    pub fn filter(&self) -> &ReadFilter {
        &self.filter
    }

    pub fn strand(&self) -> StrandSpec {
        self.strand
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn policy(&self) -> ParsePolicy {
        self.policy
    }

    pub fn threads(&self) -> usize {
        self.threads
    }
}
