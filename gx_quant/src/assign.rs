use std::{
    collections::{hash_map, HashMap},
    fmt,
    str::FromStr,
    sync::Arc,
    thread,
};

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::{
    alignment::AlignmentRecord,
    annotation::Strand,
    error::{ExprError, SkipCounter},
    index::{AnnotationIndex, Hit},
};

/// Number of records sent to a worker thread in one message
const BATCH_SIZE: usize = 4096;

/// Default minimum mapping quality for a read to be counted
pub const DEFAULT_MIN_MAPQ: u8 = 10;

/// ReadFilter
///
/// Which alignments take part in counting.  Reads without a MAPQ value always pass
/// the quality check.
///
/// min_mapq - minimum mapping quality
/// with_secondary - count secondary alignments (flag 0x100)
/// with_supplementary - count supplementary alignments (flag 0x800)
/// with_nonunique - count reads with NH > 1
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadFilter {
    min_mapq: u8,
    with_secondary: bool,
    with_supplementary: bool,
    with_nonunique: bool,
}

impl Default for ReadFilter {
    fn default() -> Self {
        Self {
            min_mapq: DEFAULT_MIN_MAPQ,
            with_secondary: false,
            with_supplementary: false,
            with_nonunique: false,
        }
    }
}

impl ReadFilter {
    pub fn new(
        min_mapq: u8,
        with_secondary: bool,
        with_supplementary: bool,
        with_nonunique: bool,
    ) -> Self {
        Self {
            min_mapq,
            with_secondary,
            with_supplementary,
            with_nonunique,
        }
    }

    /// Passes everything that is mapped
    pub fn accept_all() -> Self {
        Self::new(0, true, true, true)
    }

    pub fn min_mapq(&self) -> u8 {
        self.min_mapq
    }

    /// Reason the record is rejected, if it is
    fn check(&self, rec: &AlignmentRecord) -> Option<Unassigned> {
        if rec.is_unmapped() {
            Some(Unassigned::Unmapped)
        } else if (!self.with_secondary && rec.is_secondary())
            || (!self.with_supplementary && rec.is_supplementary())
        {
            Some(Unassigned::Secondary)
        } else if !self.with_nonunique && rec.is_nonunique() {
            Some(Unassigned::NonUnique)
        } else if rec.mapq().map(|q| q < self.min_mapq).unwrap_or(false) {
            Some(Unassigned::LowQuality)
        } else {
            None
        }
    }
}

/// Strandedness of the library
///
/// None - reads count towards genes on either strand
/// Forward - reads come from the same strand as the gene
/// Reverse - reads come from the opposite strand to the gene
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StrandSpec {
    #[default]
    None,
    Forward,
    Reverse,
}

impl FromStr for StrandSpec {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(Self::None),
            "forward" => Ok(Self::Forward),
            "reverse" => Ok(Self::Reverse),
            _ => Err("no match"),
        }
    }
}

impl fmt::Display for StrandSpec {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Forward => write!(f, "forward"),
            Self::Reverse => write!(f, "reverse"),
        }
    }
}

impl StrandSpec {
    /// Strand of the transcript a read came from, or None if strand is ignored
    fn transcript_strand(&self, rec: &AlignmentRecord) -> Option<Strand> {
        let s = if rec.is_reverse() {
            Strand::Reverse
        } else {
            Strand::Forward
        };
        match self {
            Self::None => None,
            Self::Forward => Some(s),
            Self::Reverse => Some(s.flip()),
        }
    }
}

/// Reason a read was not assigned to a gene
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unassigned {
    NoFeature,
    Ambiguous,
    Unmapped,
    LowQuality,
    NonUnique,
    Secondary,
}

/// Reads that were not assigned to a gene, by reason
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AssignStats {
    pub no_feature: u64,
    pub ambiguous: u64,
    pub unmapped: u64,
    pub low_quality: u64,
    pub nonunique: u64,
    pub secondary: u64,
}

impl AssignStats {
    pub fn unassigned(&self) -> u64 {
        self.no_feature
            + self.ambiguous
            + self.unmapped
            + self.low_quality
            + self.nonunique
            + self.secondary
    }

    /// Reads rejected by the ReadFilter (other than unmapped reads)
    pub fn filtered(&self) -> u64 {
        self.low_quality + self.nonunique + self.secondary
    }

    fn add(&mut self, u: Unassigned) {
        let c = match u {
            Unassigned::NoFeature => &mut self.no_feature,
            Unassigned::Ambiguous => &mut self.ambiguous,
            Unassigned::Unmapped => &mut self.unmapped,
            Unassigned::LowQuality => &mut self.low_quality,
            Unassigned::NonUnique => &mut self.nonunique,
            Unassigned::Secondary => &mut self.secondary,
        };
        *c += 1
    }

    fn merge(&mut self, other: &Self) {
        self.no_feature += other.no_feature;
        self.ambiguous += other.ambiguous;
        self.unmapped += other.unmapped;
        self.low_quality += other.low_quality;
        self.nonunique += other.nonunique;
        self.secondary += other.secondary;
    }
}

/// Assigner
///
/// Everything needed to decide which gene (if any) a read belongs to.  Shared read
/// only between the assignment threads.
///
#[derive(Debug, Clone, Copy)]
pub struct Assigner<'a> {
    index: &'a AnnotationIndex,
    filter: ReadFilter,
    strand: StrandSpec,
}

impl<'a> Assigner<'a> {
    /// Default filter, strand ignored
    pub fn new(index: &'a AnnotationIndex) -> Self {
        Self {
            index,
            filter: ReadFilter::default(),
            strand: StrandSpec::default(),
        }
    }

    pub fn with_filter(mut self, filter: ReadFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_strand(mut self, strand: StrandSpec) -> Self {
        self.strand = strand;
        self
    }

    pub fn assign(&self, rec: &AlignmentRecord) -> Result<&'a Arc<str>, Unassigned> {
        if let Some(u) = self.filter.check(rec) {
            return Err(u);
        }
        let strand = self.strand.transcript_strand(rec);
        match self
            .index
            .classify_stranded(rec.reference_name(), rec.position(), strand)
        {
            Hit::Gene(g) => Ok(g),
            Hit::NoFeature => Err(Unassigned::NoFeature),
            Hit::Ambiguous => Err(Unassigned::Ambiguous),
        }
    }
}

/// RawCounts
///
/// Assigned read count per gene plus statistics on unassigned reads.  Counts only ever
/// go up; partial counts from different threads are combined with merge().
///
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RawCounts {
    counts: HashMap<Arc<str>, u64>,
    stats: AssignStats,
}

impl RawCounts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign one record to a gene (if possible)
    pub fn add_record(&mut self, asg: &Assigner, rec: &AlignmentRecord) {
        match asg.assign(rec) {
            Ok(g) => self.add_count(g, 1),
            Err(u) => self.stats.add(u),
        }
    }

    pub fn add_count(&mut self, gene: &Arc<str>, n: u64) {
        if let Some(c) = self.counts.get_mut(gene) {
            *c += n
        } else {
            self.counts.insert(Arc::clone(gene), n);
        }
    }

    /// Combine counts from another (disjoint) set of records
    pub fn merge(&mut self, other: RawCounts) {
        for (g, n) in other.counts {
            match self.counts.entry(g) {
                hash_map::Entry::Occupied(mut e) => *e.get_mut() += n,
                hash_map::Entry::Vacant(e) => {
                    e.insert(n);
                }
            }
        }
        self.stats.merge(&other.stats)
    }

    pub fn get(&self, gene: &str) -> u64 {
        self.counts.get(gene).copied().unwrap_or(0)
    }

    /// Genes with at least one assigned read (in no particular order)
    pub fn iter(&self) -> impl Iterator<Item = (&Arc<str>, u64)> {
        self.counts.iter().map(|(g, n)| (g, *n))
    }

    pub fn assigned(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn stats(&self) -> &AssignStats {
        &self.stats
    }

    /// Total number of records seen (assigned or not)
    pub fn n_records(&self) -> u64 {
        self.assigned() + self.stats.unassigned()
    }
}

/// Assign alignment records to genes using nt threads.
///
/// Parse errors from the record stream are handled by skips; any that can not be skipped
/// stop the run.  With more than one thread, the calling thread reads records and sends them
/// in batches to the workers, each of which keeps its own counts until the input is exhausted.
pub fn assign_reads<I>(
    asg: &Assigner,
    records: I,
    skips: &mut SkipCounter,
    nt: usize,
) -> anyhow::Result<RawCounts>
where
    I: Iterator<Item = Result<AlignmentRecord, ExprError>>,
{
    let rc = if nt <= 1 {
        single_threaded_assign(asg, records, skips)?
    } else {
        multi_threaded_assign(asg, records, skips, nt)?
    };
    debug!(
        "Processed {} records: {} assigned, {} unassigned",
        rc.n_records(),
        rc.assigned(),
        rc.stats().unassigned()
    );
    Ok(rc)
}

fn single_threaded_assign<I>(
    asg: &Assigner,
    records: I,
    skips: &mut SkipCounter,
) -> Result<RawCounts, ExprError>
where
    I: Iterator<Item = Result<AlignmentRecord, ExprError>>,
{
    let mut rc = RawCounts::new();
    for r in records {
        match r {
            Ok(rec) => rc.add_record(asg, &rec),
            Err(e) => skips.handle(e)?,
        }
    }
    Ok(rc)
}

fn multi_threaded_assign<I>(
    asg: &Assigner,
    records: I,
    skips: &mut SkipCounter,
    nt: usize,
) -> anyhow::Result<RawCounts>
where
    I: Iterator<Item = Result<AlignmentRecord, ExprError>>,
{
    let mut v = Vec::with_capacity(nt);

    // Everything runs within a scope so that we can pass references to the threads
    let send_res = thread::scope(|sc| {
        trace!("Spawning {} assignment threads", nt);
        let (snd, rcv) = bounded(nt * 4);
        let jobs: Vec<_> = (0..nt)
            .map(|i| {
                let r = rcv.clone();
                sc.spawn(move || worker(asg, i + 1, r))
            })
            .collect();
        drop(rcv);

        let res = send_batches(records, skips, &snd);

        // Closing the channel tells the workers to finish
        drop(snd);
        for jh in jobs {
            v.push(jh.join())
        }
        res
    });

    trace!("Collecting results from assignment threads");
    let mut rc = RawCounts::new();
    for (ix, res) in v.drain(..).enumerate() {
        match res {
            Ok(c) => rc.merge(c),
            Err(_) => return Err(anyhow!("Error joining assignment thread {}", ix + 1)),
        }
    }
    send_res?;
    Ok(rc)
}

fn send_batches<I>(
    records: I,
    skips: &mut SkipCounter,
    snd: &Sender<Vec<AlignmentRecord>>,
) -> anyhow::Result<()>
where
    I: Iterator<Item = Result<AlignmentRecord, ExprError>>,
{
    let mut batch = Vec::with_capacity(BATCH_SIZE);
    for r in records {
        match r {
            Ok(rec) => {
                batch.push(rec);
                if batch.len() == BATCH_SIZE {
                    let b = std::mem::replace(&mut batch, Vec::with_capacity(BATCH_SIZE));
                    snd.send(b)
                        .map_err(|_| anyhow!("Error sending records to assignment threads"))?;
                }
            }
            Err(e) => skips.handle(e)?,
        }
    }
    if !batch.is_empty() {
        snd.send(batch)
            .map_err(|_| anyhow!("Error sending records to assignment threads"))?;
    }
    Ok(())
}

fn worker(asg: &Assigner, ix: usize, r: Receiver<Vec<AlignmentRecord>>) -> RawCounts {
    trace!("Starting up assignment thread {}", ix);
    let mut rc = RawCounts::new();
    while let Ok(batch) = r.recv() {
        for rec in batch.iter() {
            rc.add_record(asg, rec)
        }
    }
    trace!(
        "Closing down assignment thread {} ({} records)",
        ix,
        rc.n_records()
    );
    rc
}
