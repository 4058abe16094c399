use anyhow::Context;

use crate::{
    alignment::open_alignment_file,
    annotation::{open_annotation_file, GeneInterval},
    assign::{assign_reads, Assigner, RawCounts},
    config::Config,
    error::SkipCounter,
    index::AnnotationIndex,
    normalize::{normalize, ExpressionTable},
    output,
};

/// Everything produced by a successful run
#[derive(Debug)]
pub struct Summary {
    pub index: AnnotationIndex,
    pub counts: RawCounts,
    pub table: ExpressionTable,
    pub skipped_alignments: usize,
    pub skipped_annotations: usize,
}

/// Read in annotation file and build index
pub fn build_index(cfg: &Config) -> anyhow::Result<(AnnotationIndex, usize)> {
    let fname = cfg.annotation_file();
    let mut skips = SkipCounter::new(cfg.policy(), fname.display().to_string());
    let mut rdr = open_annotation_file(fname, cfg.feature_spec().clone())?;

    let mut v: Vec<GeneInterval> = Vec::new();
    for r in rdr.by_ref() {
        match r {
            Ok(iv) => v.push(iv),
            Err(e) => skips
                .handle(e)
                .with_context(|| format!("Error reading annotation from {}", fname.display()))?,
        }
    }
    debug!(
        "Finished reading {} lines from {}; found {} intervals",
        rdr.lines_read(),
        fname.display(),
        v.len()
    );
    skips.report();
    if v.is_empty() {
        warn!(
            "No '{}' features found in {}",
            cfg.feature_spec().feature_type(),
            fname.display()
        )
    }
    Ok((AnnotationIndex::new(v), skips.skipped()))
}

/// Read alignment file and count reads per gene
pub fn count_reads(
    cfg: &Config,
    index: &AnnotationIndex,
) -> anyhow::Result<(RawCounts, usize)> {
    let fname = cfg.alignment_file();
    let mut skips = SkipCounter::new(cfg.policy(), fname.display().to_string());
    let rdr = open_alignment_file(fname)?;
    let asg = Assigner::new(index)
        .with_filter(*cfg.filter())
        .with_strand(cfg.strand());
    let counts = assign_reads(&asg, rdr, &mut skips, cfg.threads())
        .with_context(|| format!("Error reading alignments from {}", fname.display()))?;
    skips.report();
    let stats = counts.stats();
    info!(
        "{} reads assigned to genes; {} unassigned ({} no feature, {} ambiguous, {} unmapped, {} filtered)",
        counts.assigned(),
        stats.unassigned(),
        stats.no_feature,
        stats.ambiguous,
        stats.unmapped,
        stats.filtered()
    );
    Ok((counts, skips.skipped()))
}

/// Run the full pipeline without writing any output
pub fn quantify(cfg: &Config) -> anyhow::Result<Summary> {
    let (index, skipped_annotations) = build_index(cfg)?;
    let (counts, skipped_alignments) = count_reads(cfg, &index)?;
    let table = normalize(&counts, &index, cfg.method())
        .with_context(|| "Could not calculate expression values")?;
    Ok(Summary {
        index,
        counts,
        table,
        skipped_alignments,
        skipped_annotations,
    })
}

/// Strategy
///
/// Build the annotation index from the complete annotation file, then stream the
/// alignments through the assignment threads.  Normalization happens before any output
/// is opened so that a failed run (i.e., with no reads assigned) leaves no output behind.
pub fn process(cfg: &Config) -> anyhow::Result<()> {
    debug!("Starting processing");
    let s = quantify(cfg)?;
    if let Some(p) = cfg.counts_file() {
        output::output_counts(p, &s.index, &s.counts, s.skipped_alignments)?
    }
    output::output_expression(cfg.output_file(), &s.table)
}
