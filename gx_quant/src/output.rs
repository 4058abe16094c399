use std::{io::Write, path::Path};

use anyhow::Context;
use compress_io::compress::CompressIo;

use crate::{assign::RawCounts, index::AnnotationIndex, normalize::ExpressionTable};

/// Write expression table as tab separated (gene, value) lines preceded by a header
pub fn write_expression_table<W: Write>(
    wrt: &mut W,
    table: &ExpressionTable,
) -> anyhow::Result<()> {
    writeln!(wrt, "gene\t{}", table.method())?;
    for (g, x) in table.iter() {
        writeln!(wrt, "{}\t{:.6}", g, x)?
    }
    Ok(())
}

/// Write raw counts for all annotated genes followed by assignment statistics
pub fn write_count_table<W: Write>(
    wrt: &mut W,
    index: &AnnotationIndex,
    counts: &RawCounts,
    skipped: usize,
) -> anyhow::Result<()> {
    for (g, _) in index.genes() {
        writeln!(wrt, "{}\t{}", g, counts.get(g))?
    }
    let stats = counts.stats();
    writeln!(wrt, "__no_feature\t{}", stats.no_feature)?;
    writeln!(wrt, "__ambiguous\t{}", stats.ambiguous)?;
    writeln!(wrt, "__too_low_aqual\t{}", stats.low_quality)?;
    writeln!(wrt, "__alignment_not_unique\t{}", stats.nonunique)?;
    writeln!(wrt, "__skipped_secondary\t{}", stats.secondary)?;
    writeln!(wrt, "__unmapped\t{}", stats.unmapped)?;
    writeln!(wrt, "__skipped\t{}", skipped)?;
    Ok(())
}

/// Output expression table to file (or stdout if path is None)
pub fn output_expression(path: Option<&Path>, table: &ExpressionTable) -> anyhow::Result<()> {
    let desc = path
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "<stdout>".to_owned());
    debug!("Writing expression values for {} genes to {}", table.len(), desc);
    let mut wrt = CompressIo::new()
        .opt_path(path)
        .bufwriter()
        .with_context(|| format!("Failed to open output file {}", desc))?;
    write_expression_table(&mut wrt, table)
        .and_then(|_| wrt.flush().map_err(anyhow::Error::from))
        .with_context(|| format!("Error writing expression values to {}", desc))
}

pub fn output_counts(
    path: &Path,
    index: &AnnotationIndex,
    counts: &RawCounts,
    skipped: usize,
) -> anyhow::Result<()> {
    debug!("Writing raw counts to {}", path.display());
    let mut wrt = CompressIo::new()
        .path(path)
        .bufwriter()
        .with_context(|| format!("Failed to open count file {}", path.display()))?;
    write_count_table(&mut wrt, index, counts, skipped)
        .and_then(|_| wrt.flush().map_err(anyhow::Error::from))
        .with_context(|| format!("Error writing counts to {}", path.display()))
}
