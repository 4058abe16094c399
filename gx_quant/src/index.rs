use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use crate::{
    annotation::{GeneInterval, Strand},
    error::ExprError,
};

/// Result of looking up a position in the index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hit<'a> {
    Gene(&'a Arc<str>),
    NoFeature,
    Ambiguous,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    start: u64,
    end: u64,
    gene_ix: usize,
    strand: Strand,
}

/// Intervals for one reference sequence, sorted on start.
///
/// max_end[i] is the largest end coordinate of entries[0..=i], so a backwards scan
/// from the last interval starting at or before x can stop as soon as max_end <= x
#[derive(Debug, Default)]
struct RefIntervals {
    entries: Vec<Entry>,
    max_end: Vec<u64>,
}

impl RefIntervals {
    fn finish(&mut self) {
        self.entries
            .sort_unstable_by_key(|e| (e.start, e.end, e.gene_ix));
        let mut m = 0;
        self.max_end = self
            .entries
            .iter()
            .map(|e| {
                m = m.max(e.end);
                m
            })
            .collect();
    }

    /// Indices of genes whose intervals contain x.  Stops early once two distinct genes are seen.
    /// If strand is set, intervals on the other strand are passed over
    fn find(&self, x: u64, strand: Option<Strand>) -> Found {
        let n = self.entries.partition_point(|e| e.start <= x);
        let mut found = None;
        for i in (0..n).rev() {
            if self.max_end[i] <= x {
                break;
            }
            let e = &self.entries[i];
            if x < e.end && strand.map(|s| s.compatible(e.strand)).unwrap_or(true) {
                match found {
                    None => found = Some(e.gene_ix),
                    Some(g) if g == e.gene_ix => (),
                    Some(_) => return Found::Ambiguous,
                }
            }
        }
        found.map(Found::Gene).unwrap_or(Found::NoFeature)
    }
}

// Gene index based version of Hit
enum Found {
    Gene(usize),
    NoFeature,
    Ambiguous,
}

/// AnnotationIndex
///
/// Built once from the complete set of gene intervals and read only afterwards, so it
/// can be shared between threads without locking.
///
/// genes - gene names in sorted order
/// lengths - bases covered by each gene (union of its intervals)
/// gene_hash - gene name to index in genes
/// ref_hash - per reference sequence interval lists
///
#[derive(Debug)]
pub struct AnnotationIndex {
    genes: Vec<Arc<str>>,
    lengths: Vec<u64>,
    gene_hash: HashMap<Arc<str>, usize>,
    ref_hash: HashMap<Arc<str>, RefIntervals>,
    n_intervals: usize,
}

impl AnnotationIndex {
    pub fn new(intervals: Vec<GeneInterval>) -> Self {
        let n_intervals = intervals.len();

        // Group intervals by gene, giving genes indices in name order
        let mut by_gene: BTreeMap<Arc<str>, Vec<GeneInterval>> = BTreeMap::new();
        for iv in intervals {
            by_gene.entry(Arc::clone(iv.gene_name())).or_default().push(iv);
        }

        let mut genes = Vec::with_capacity(by_gene.len());
        let mut lengths = Vec::with_capacity(by_gene.len());
        let mut gene_hash = HashMap::with_capacity(by_gene.len());
        let mut ref_hash: HashMap<Arc<str>, RefIntervals> = HashMap::new();

        for (gene_ix, (name, mut ivs)) in by_gene.into_iter().enumerate() {
            lengths.push(union_length(&mut ivs));
            for iv in ivs.iter() {
                ref_hash
                    .entry(Arc::clone(iv.reference()))
                    .or_default()
                    .entries
                    .push(Entry {
                        start: iv.start(),
                        end: iv.end(),
                        gene_ix,
                        strand: iv.strand(),
                    })
            }
            gene_hash.insert(Arc::clone(&name), gene_ix);
            genes.push(name);
        }
        for ri in ref_hash.values_mut() {
            ri.finish()
        }

        debug!(
            "Annotation index: {} genes, {} intervals on {} reference sequences",
            genes.len(),
            n_intervals,
            ref_hash.len()
        );

        Self {
            genes,
            lengths,
            gene_hash,
            ref_hash,
            n_intervals,
        }
    }

    /// Find the gene overlapping position x on reference.
    pub fn classify(&self, reference: &str, x: u64) -> Hit<'_> {
        self.classify_stranded(reference, x, None)
    }

    /// As classify(), but when strand is given only genes on a compatible strand
    /// (or with unknown strand) are considered
    pub fn classify_stranded(
        &self,
        reference: &str,
        x: u64,
        strand: Option<Strand>,
    ) -> Hit<'_> {
        match self.ref_hash.get(reference).map(|ri| ri.find(x, strand)) {
            Some(Found::Gene(ix)) => Hit::Gene(&self.genes[ix]),
            Some(Found::Ambiguous) => Hit::Ambiguous,
            Some(Found::NoFeature) | None => Hit::NoFeature,
        }
    }

    /// The single gene containing x, or None if there are none or more than one
    pub fn lookup_gene_at(&self, reference: &str, x: u64) -> Option<&Arc<str>> {
        match self.classify(reference, x) {
            Hit::Gene(g) => Some(g),
            _ => None,
        }
    }

    pub fn length_of(&self, gene: &str) -> Result<u64, ExprError> {
        self.gene_hash
            .get(gene)
            .map(|ix| self.lengths[*ix])
            .ok_or_else(|| ExprError::UnknownGene(gene.to_owned()))
    }

    pub fn contains_gene(&self, gene: &str) -> bool {
        self.gene_hash.contains_key(gene)
    }

    /// Iterate over (gene, length) pairs in gene name order
    pub fn genes(&self) -> impl Iterator<Item = (&Arc<str>, u64)> {
        self.genes.iter().zip(self.lengths.iter().copied())
    }

    pub fn n_genes(&self) -> usize {
        self.genes.len()
    }

    pub fn n_intervals(&self) -> usize {
        self.n_intervals
    }
}

/// Number of bases covered by a set of intervals for one gene.
/// Overlapping or abutting intervals on the same reference are merged.
fn union_length(ivs: &mut [GeneInterval]) -> u64 {
    ivs.sort_unstable_by(|a, b| {
        a.reference()
            .cmp(b.reference())
            .then(a.start().cmp(&b.start()))
    });
    let mut tot = 0;
    let mut prev: Option<(&Arc<str>, u64, u64)> = None;
    for iv in ivs.iter() {
        prev = match prev {
            Some((r, a, b)) if r == iv.reference() && iv.start() <= b => {
                Some((r, a, b.max(iv.end())))
            }
            p => {
                if let Some((_, a, b)) = p {
                    tot += b - a
                }
                Some((iv.reference(), iv.start(), iv.end()))
            }
        }
    }
    if let Some((_, a, b)) = prev {
        tot += b - a
    }
    tot
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iv(gene: &str, reference: &str, start: u64, end: u64) -> GeneInterval {
        GeneInterval::new(gene, reference, start, end).unwrap()
    }

    fn test_index() -> AnnotationIndex {
        AnnotationIndex::new(vec![
            iv("geneB", "chr1", 2000, 3000),
            iv("geneA", "chr1", 0, 1000),
            iv("geneC", "chr1", 2500, 4000),
            iv("geneD", "chr2", 100, 200),
            iv("geneD", "chr2", 150, 300),
            iv("geneD", "chr2", 500, 600),
        ])
    }

    #[test]
    fn half_open_containment() {
        let idx = test_index();
        assert_eq!(idx.lookup_gene_at("chr1", 0).unwrap().as_ref(), "geneA");
        assert_eq!(idx.lookup_gene_at("chr1", 999).unwrap().as_ref(), "geneA");
        assert!(idx.lookup_gene_at("chr1", 1000).is_none());
        assert_eq!(idx.lookup_gene_at("chr1", 2000).unwrap().as_ref(), "geneB");
        assert_eq!(idx.lookup_gene_at("chr1", 3999).unwrap().as_ref(), "geneC");
        assert!(idx.lookup_gene_at("chr1", 4000).is_none());
    }

    #[test]
    fn overlapping_genes_are_ambiguous() {
        let idx = test_index();
        assert_eq!(idx.classify("chr1", 2600), Hit::Ambiguous);
        assert!(idx.lookup_gene_at("chr1", 2600).is_none());
        assert_eq!(idx.classify("chr1", 1500), Hit::NoFeature);
    }

    #[test]
    fn overlapping_intervals_of_one_gene_are_not_ambiguous() {
        let idx = test_index();
        assert_eq!(idx.lookup_gene_at("chr2", 175).unwrap().as_ref(), "geneD");
        assert_eq!(idx.lookup_gene_at("chr2", 550).unwrap().as_ref(), "geneD");
        assert!(idx.lookup_gene_at("chr2", 400).is_none());
    }

    #[test]
    fn unknown_reference() {
        let idx = test_index();
        assert_eq!(idx.classify("chrX", 10), Hit::NoFeature);
        assert_eq!(idx.classify("*", 0), Hit::NoFeature);
    }

    #[test]
    fn long_interval_found_past_short_ones() {
        // The long interval starts first, so the scan must look past geneS* to reach it
        let idx = AnnotationIndex::new(vec![
            iv("geneL", "c", 0, 10_000),
            iv("geneS1", "c", 100, 200),
            iv("geneS2", "c", 300, 400),
        ]);
        assert_eq!(idx.lookup_gene_at("c", 5000).unwrap().as_ref(), "geneL");
        assert_eq!(idx.classify("c", 350), Hit::Ambiguous);
    }

    #[test]
    fn stranded_lookup() {
        let idx = AnnotationIndex::new(vec![
            iv("gF", "c", 0, 1000).with_strand(Strand::Forward),
            iv("gR", "c", 500, 1500).with_strand(Strand::Reverse),
            iv("gU", "c", 2000, 3000),
        ]);
        let g = |h: Hit| match h {
            Hit::Gene(g) => g.to_string(),
            h => format!("{:?}", h),
        };
        assert_eq!(idx.classify("c", 700), Hit::Ambiguous);
        assert_eq!(g(idx.classify_stranded("c", 700, Some(Strand::Forward))), "gF");
        assert_eq!(g(idx.classify_stranded("c", 700, Some(Strand::Reverse))), "gR");
        assert_eq!(
            idx.classify_stranded("c", 100, Some(Strand::Reverse)),
            Hit::NoFeature
        );
        // Unstranded genes match reads from either strand
        assert_eq!(g(idx.classify_stranded("c", 2500, Some(Strand::Reverse))), "gU");
    }

    #[test]
    fn lengths() {
        let idx = test_index();
        assert_eq!(idx.length_of("geneA").unwrap(), 1000);
        assert_eq!(idx.length_of("geneC").unwrap(), 1500);
        // [100,300) merged plus [500,600)
        assert_eq!(idx.length_of("geneD").unwrap(), 300);
        assert!(matches!(
            idx.length_of("geneZ"),
            Err(ExprError::UnknownGene(g)) if g == "geneZ"
        ));
    }

    #[test]
    fn genes_sorted_by_name() {
        let idx = test_index();
        let names: Vec<&str> = idx.genes().map(|(g, _)| g.as_ref()).collect();
        assert_eq!(names, vec!["geneA", "geneB", "geneC", "geneD"]);
        assert_eq!(idx.n_genes(), 4);
        assert_eq!(idx.n_intervals(), 6);
        assert!(idx.contains_gene("geneB"));
        assert!(!idx.contains_gene("chr1"));
    }

    #[test]
    fn same_name_on_two_references() {
        let idx = AnnotationIndex::new(vec![iv("g", "r1", 0, 100), iv("g", "r2", 0, 100)]);
        assert_eq!(idx.length_of("g").unwrap(), 200);
        assert_eq!(idx.lookup_gene_at("r2", 50).unwrap().as_ref(), "g");
    }
}
