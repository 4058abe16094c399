use std::{collections::BTreeMap, fmt, str::FromStr, sync::Arc};

use crate::{assign::RawCounts, error::ExprError, index::AnnotationIndex};

const PER_MILLION: f64 = 1_000_000.0;
const PER_KB: f64 = 1_000.0;

/// Normalization method
///
/// Tpm - reads per kilobase, scaled so that the values sum to one million
/// Fpkm - reads per kilobase per million assigned reads
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Method {
    #[default]
    Tpm,
    Fpkm,
}

impl FromStr for Method {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tpm" => Ok(Self::Tpm),
            "fpkm" | "rpkm" => Ok(Self::Fpkm),
            _ => Err("no match"),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Tpm => write!(f, "tpm"),
            Self::Fpkm => write!(f, "fpkm"),
        }
    }
}

/// Normalized expression value for every gene in the annotation, in gene name order
#[derive(Debug, Clone, PartialEq)]
pub struct ExpressionTable {
    method: Method,
    values: BTreeMap<Arc<str>, f64>,
}

impl ExpressionTable {
    pub fn method(&self) -> Method {
        self.method
    }

    pub fn get(&self, gene: &str) -> Option<f64> {
        self.values.get(gene).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Arc<str>, f64)> {
        self.values.iter().map(|(g, x)| (g, *x))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

// Every counted gene must be in the index, otherwise the counting and annotation
// stages disagree and nothing downstream can be trusted
fn check_genes(counts: &RawCounts, index: &AnnotationIndex) -> Result<(), ExprError> {
    match counts.iter().find(|(g, _)| !index.contains_gene(g)) {
        Some((g, _)) => Err(ExprError::UnknownGene(g.to_string())),
        None => Ok(()),
    }
}

/// Reads per kilobase for all annotated genes (zero for genes without reads)
pub fn rpk(
    counts: &RawCounts,
    index: &AnnotationIndex,
) -> Result<BTreeMap<Arc<str>, f64>, ExprError> {
    check_genes(counts, index)?;
    Ok(index
        .genes()
        .map(|(g, len)| {
            let n = counts.get(g) as f64;
            (Arc::clone(g), n / (len as f64 / PER_KB))
        })
        .collect())
}

/// Library scale factor: sum of RPK values divided by one million
pub fn scale_factor(rpk: &BTreeMap<Arc<str>, f64>) -> Result<f64, ExprError> {
    let s: f64 = rpk.values().sum();
    if s > 0.0 {
        Ok(s / PER_MILLION)
    } else {
        Err(ExprError::EmptyLibrary)
    }
}

fn tpm(
    counts: &RawCounts,
    index: &AnnotationIndex,
) -> Result<BTreeMap<Arc<str>, f64>, ExprError> {
    let mut values = rpk(counts, index)?;
    let scale = scale_factor(&values)?;
    trace!("TPM scale factor: {}", scale);
    for x in values.values_mut() {
        *x /= scale
    }
    Ok(values)
}

fn fpkm(
    counts: &RawCounts,
    index: &AnnotationIndex,
) -> Result<BTreeMap<Arc<str>, f64>, ExprError> {
    check_genes(counts, index)?;
    let total = counts.assigned();
    if total == 0 {
        return Err(ExprError::EmptyLibrary);
    }
    let millions = total as f64 / PER_MILLION;
    Ok(index
        .genes()
        .map(|(g, len)| {
            let n = counts.get(g) as f64;
            (Arc::clone(g), n / (len as f64 / PER_KB) / millions)
        })
        .collect())
}

/// Normalize raw counts for gene length and library size.
///
/// The returned table has one entry per annotated gene.  Fails with EmptyLibrary if no
/// reads were assigned, or UnknownGene if counts refer to a gene missing from the index.
pub fn normalize(
    counts: &RawCounts,
    index: &AnnotationIndex,
    method: Method,
) -> Result<ExpressionTable, ExprError> {
    debug!("Calculating {} values for {} genes", method, index.n_genes());
    let values = match method {
        Method::Tpm => tpm(counts, index)?,
        Method::Fpkm => fpkm(counts, index)?,
    };
    Ok(ExpressionTable { method, values })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{alignment::AlignmentRecord, annotation::GeneInterval, assign::Assigner};

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-9 * a.abs().max(b.abs()).max(1.0)
    }

    fn index(genes: &[(&str, u64, u64)]) -> AnnotationIndex {
        AnnotationIndex::new(
            genes
                .iter()
                .map(|(g, a, b)| GeneInterval::new(g, "chr1", *a, *b).unwrap())
                .collect(),
        )
    }

    fn counts_at(idx: &AnnotationIndex, pos: &[(u64, usize)]) -> RawCounts {
        let asg = Assigner::new(idx);
        let mut rc = RawCounts::new();
        for (x, n) in pos {
            for _ in 0..*n {
                rc.add_record(&asg, &AlignmentRecord::new("chr1", *x))
            }
        }
        rc
    }

    #[test]
    fn single_gene() {
        let idx = index(&[("geneA", 0, 1000)]);
        let rc = counts_at(&idx, &[(10, 2), (500, 3)]);
        assert_eq!(rc.get("geneA"), 5);
        let r = rpk(&rc, &idx).unwrap();
        assert!(close(r["geneA"], 5.0));
        assert!(close(scale_factor(&r).unwrap(), 5.0e-6));
        let t = normalize(&rc, &idx, Method::Tpm).unwrap();
        assert!(close(t.get("geneA").unwrap(), 1_000_000.0));
        assert_eq!(t.method(), Method::Tpm);
    }

    #[test]
    fn ratio_between_genes() {
        let idx = index(&[("geneA", 0, 1000), ("geneB", 2000, 4500)]);
        let rc = counts_at(&idx, &[(100, 3), (3000, 7)]);
        let t = normalize(&rc, &idx, Method::Tpm).unwrap();
        let (a, b) = (t.get("geneA").unwrap(), t.get("geneB").unwrap());
        assert!(close(a / b, (3.0 / 1000.0) / (7.0 / 2500.0)));
        assert!(close(a + b, 1_000_000.0));
    }

    #[test]
    fn zero_count_genes_present() {
        let idx = index(&[
            ("geneA", 0, 1000),
            ("geneB", 2000, 3000),
            ("geneC", 5000, 5100),
        ]);
        let rc = counts_at(&idx, &[(100, 4)]);
        for m in [Method::Tpm, Method::Fpkm] {
            let t = normalize(&rc, &idx, m).unwrap();
            assert_eq!(t.len(), 3);
            assert_eq!(t.get("geneB"), Some(0.0));
            assert_eq!(t.get("geneC"), Some(0.0));
            assert!(t.iter().all(|(_, x)| x.is_finite() && x >= 0.0));
        }
    }

    #[test]
    fn empty_library() {
        let idx = index(&[("geneA", 0, 1000)]);
        let mut rc = RawCounts::new();
        // Reads outside all genes give no signal
        rc.add_record(&Assigner::new(&idx), &AlignmentRecord::new("chr1", 5000));
        for m in [Method::Tpm, Method::Fpkm] {
            assert!(matches!(
                normalize(&rc, &idx, m),
                Err(ExprError::EmptyLibrary)
            ));
        }
    }

    #[test]
    fn unknown_gene() {
        let idx = index(&[("geneA", 0, 1000)]);
        let mut rc = counts_at(&idx, &[(1, 1)]);
        rc.add_count(&Arc::from("geneZ"), 3);
        assert!(matches!(
            normalize(&rc, &idx, Method::Tpm),
            Err(ExprError::UnknownGene(g)) if g == "geneZ"
        ));
    }

    #[test]
    fn fpkm_values() {
        let idx = index(&[("geneA", 0, 2000), ("geneB", 3000, 3500)]);
        let rc = counts_at(&idx, &[(1, 6), (3100, 4)]);
        let t = normalize(&rc, &idx, Method::Fpkm).unwrap();
        // 6 reads / 2kb / 1e-5 million reads
        assert!(close(t.get("geneA").unwrap(), 300_000.0));
        assert!(close(t.get("geneB").unwrap(), 800_000.0));
    }

    #[test]
    fn method_from_str() {
        assert_eq!("TPM".parse::<Method>(), Ok(Method::Tpm));
        assert_eq!("rpkm".parse::<Method>(), Ok(Method::Fpkm));
        assert!("cpm".parse::<Method>().is_err());
        assert_eq!(Method::Fpkm.to_string(), "fpkm");
    }
}
