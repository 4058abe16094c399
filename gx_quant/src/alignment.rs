use std::{io::BufRead, path::Path};

use anyhow::Context;
use compress_io::compress::CompressIo;
use utils::get_next_line;

use crate::error::ExprError;

// Column positions in a SAM style data line
const FLAG_FIELD: usize = 1;
const REF_FIELD: usize = 2;
const POS_FIELD: usize = 3;
const MAPQ_FIELD: usize = 4;
const TAG_FIELD: usize = 11;

// SAM flag bits
pub const FLAG_UNMAPPED: u16 = 0x4;
pub const FLAG_REVERSE: u16 = 0x10;
pub const FLAG_SECONDARY: u16 = 0x100;
pub const FLAG_SUPPLEMENTARY: u16 = 0x800;

/// Reference name used by SAM for unplaced reads
pub const UNMAPPED_REF: &str = "*";

/// MAPQ value meaning the mapping quality is not available
const MAPQ_MISSING: u8 = 255;

const HIT_COUNT_TAG: &str = "NH:i:";

/// AlignmentRecord
///
/// Where a read lies plus what is needed to filter it.  Only the reference name and
/// position are required; flag, mapq and hits are taken from the FLAG and MAPQ columns
/// and the NH tag when present.
///
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignmentRecord {
    reference_name: String,
    position: u64,
    flag: u16,
    mapq: Option<u8>,
    hits: Option<u32>,
}

impl AlignmentRecord {
    pub fn new<S: Into<String>>(reference_name: S, position: u64) -> Self {
        Self {
            reference_name: reference_name.into(),
            position,
            flag: 0,
            mapq: None,
            hits: None,
        }
    }

    pub fn with_flag(mut self, flag: u16) -> Self {
        self.flag = flag;
        self
    }

    pub fn with_mapq(mut self, mapq: u8) -> Self {
        self.mapq = Some(mapq).filter(|q| *q != MAPQ_MISSING);
        self
    }

    pub fn with_hits(mut self, hits: u32) -> Self {
        self.hits = Some(hits);
        self
    }

    fn from_fields(fields: &[&str], line: usize) -> Result<Self, ExprError> {
        if fields.len() <= POS_FIELD {
            return Err(ExprError::MalformedRecord {
                line,
                reason: format!(
                    "expected at least {} fields, found {}",
                    POS_FIELD + 1,
                    fields.len()
                ),
            });
        }
        let position = fields[POS_FIELD]
            .parse::<u64>()
            .map_err(|_| ExprError::MalformedRecord {
                line,
                reason: format!("invalid position '{}'", fields[POS_FIELD]),
            })?;
        let mut rec = Self::new(fields[REF_FIELD], position);

        // Optional columns; anything that does not parse is treated as absent
        if let Ok(flag) = fields[FLAG_FIELD].parse::<u16>() {
            rec = rec.with_flag(flag)
        }
        if let Some(q) = fields.get(MAPQ_FIELD).and_then(|s| s.parse::<u8>().ok()) {
            rec = rec.with_mapq(q)
        }
        if let Some(n) = fields
            .get(TAG_FIELD..)
            .unwrap_or(&[])
            .iter()
            .find_map(|s| s.strip_prefix(HIT_COUNT_TAG))
            .and_then(|s| s.parse::<u32>().ok())
        {
            rec = rec.with_hits(n)
        }
        Ok(rec)
    }

    pub fn reference_name(&self) -> &str {
        &self.reference_name
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn flag(&self) -> u16 {
        self.flag
    }

    /// None if the MAPQ column is absent or 255
    pub fn mapq(&self) -> Option<u8> {
        self.mapq
    }

    pub fn is_unmapped(&self) -> bool {
        self.reference_name == UNMAPPED_REF || (self.flag & FLAG_UNMAPPED) != 0
    }

    pub fn is_reverse(&self) -> bool {
        (self.flag & FLAG_REVERSE) != 0
    }

    pub fn is_secondary(&self) -> bool {
        (self.flag & FLAG_SECONDARY) != 0
    }

    pub fn is_supplementary(&self) -> bool {
        (self.flag & FLAG_SUPPLEMENTARY) != 0
    }

    /// Read aligns to more than one place (NH tag > 1)
    pub fn is_nonunique(&self) -> bool {
        self.hits.map(|n| n > 1).unwrap_or(false)
    }
}

/// Lazy reader of alignment records.
///
/// Header lines (starting with '@') and blank lines are passed over.  Each data line
/// gives either a record or a MalformedRecord error; the caller decides whether to
/// carry on.  Read errors are returned as ExprError::Io.
pub struct AlignmentReader<R> {
    rdr: R,
    buf: Vec<u8>,
    line: usize,
}

impl<R: BufRead> AlignmentReader<R> {
    pub fn new(rdr: R) -> Self {
        Self {
            rdr,
            buf: Vec::new(),
            line: 0,
        }
    }

    /// Number of lines (of any type) read so far
    pub fn lines_read(&self) -> usize {
        self.line
    }
}

impl<R: BufRead> Iterator for AlignmentReader<R> {
    type Item = Result<AlignmentRecord, ExprError>;

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
                    return Some(Err(ExprError::MalformedRecord {
                        line: self.line,
                        reason: format!("invalid UTF-8 ({})", e),
                    }))
                }
            };
            match fields.first() {
                None => continue,
                Some(s) if s.starts_with('@') => continue,
                Some(_) => return Some(AlignmentRecord::from_fields(&fields, self.line)),
            }
        }
    }
}

/// Open (possibly compressed) alignment file for reading
pub fn open_alignment_file<P: AsRef<Path>>(
    fname: P,
) -> anyhow::Result<AlignmentReader<impl BufRead>> {
    let fname = fname.as_ref();
    debug!("Opening alignment file {}", fname.display());
    let rdr = CompressIo::new()
        .path(fname)
        .bufreader()
        .with_context(|| format!("Error opening alignment file {}", fname.display()))?;
    Ok(AlignmentReader::new(rdr))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAM: &str = "@HD\tVN:1.6\tSO:unsorted
@SQ\tSN:chr1\tLN:5000
r1\t0\tchr1\t100\t60\t50M\t*\t0\t0\tACGT\tIIII
r2\t16\tchr2\t2500\t60\t50M\t*\t0\t0\tACGT\tIIII

r3\t4\t*\t0\t0\t*\t*\t0\t0\tACGT\tIIII
";

    #[test]
    fn headers_and_blank_lines_skipped() {
        let recs: Vec<_> = AlignmentReader::new(SAM.as_bytes())
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(
            recs,
            vec![
                AlignmentRecord::new("chr1", 100).with_mapq(60),
                AlignmentRecord::new("chr2", 2500)
                    .with_flag(16)
                    .with_mapq(60),
                AlignmentRecord::new("*", 0).with_flag(4).with_mapq(0),
            ]
        );
        assert!(recs[2].is_unmapped());
        assert!(!recs[0].is_unmapped());
        assert!(recs[1].is_reverse());
    }

    #[test]
    fn flags_mapq_and_hit_count() {
        let input = "r1\t256\tchr1\t10\t255\t50M\t*\t0\t0\tACGT\tIIII\tNM:i:0\tNH:i:3
r2\t2048\tchr1\t20\t7\t50M\t*\t0\t0\tACGT\tIIII\tNH:i:1
r3\t4\tchr1\t30\t0\t*\t*\t0\t0\tACGT\tIIII
";
        let recs: Vec<_> = AlignmentReader::new(input.as_bytes())
            .collect::<Result<_, _>>()
            .unwrap();
        assert!(recs[0].is_secondary());
        assert_eq!(recs[0].mapq(), None);
        assert!(recs[0].is_nonunique());
        assert!(recs[1].is_supplementary());
        assert_eq!(recs[1].mapq(), Some(7));
        assert!(!recs[1].is_nonunique());
        // Placed on a reference but flagged unmapped
        assert!(recs[2].is_unmapped());
        assert_eq!(recs[2].reference_name(), "chr1");
    }

    #[test]
    fn non_numeric_flag_is_ignored() {
        let mut rdr = AlignmentReader::new("read1 x geneX 42\n".as_bytes());
        let rec = rdr.next().unwrap().unwrap();
        assert_eq!(rec.flag(), 0);
        assert_eq!(rec.mapq(), None);
        assert!(!rec.is_unmapped());
    }

    #[test]
    fn invalid_utf8_is_malformed() {
        let input: &[u8] = b"r1\t0\tchr\xff\t10\nr2\t0\tchr1\t20\n";
        let res: Vec<_> = AlignmentReader::new(input).collect();
        assert_eq!(res.len(), 2);
        assert!(matches!(
            res[0],
            Err(ExprError::MalformedRecord { line: 1, .. })
        ));
        assert_eq!(res[1].as_ref().unwrap(), &AlignmentRecord::new("chr1", 20));
    }

    #[test]
    fn space_delimited_lines() {
        let mut rdr = AlignmentReader::new("read1 0 geneX 42\n".as_bytes());
        let rec = rdr.next().unwrap().unwrap();
        assert_eq!(rec.reference_name(), "geneX");
        assert_eq!(rec.position(), 42);
        assert!(rdr.next().is_none());
        assert_eq!(rdr.lines_read(), 1);
    }

    #[test]
    fn short_line_is_malformed() {
        let mut rdr = AlignmentReader::new("@HD\nr1\t0\tchr1\n".as_bytes());
        match rdr.next() {
            Some(Err(ExprError::MalformedRecord { line, .. })) => assert_eq!(line, 2),
            x => panic!("unexpected result {:?}", x),
        }
        assert!(rdr.next().is_none());
    }

    #[test]
    fn bad_position_is_malformed_and_reading_continues() {
        let input = "r1\t0\tchr1\t-5\nr2\t0\tchr1\tabc\nr3\t0\tchr1\t7\n";
        let res: Vec<_> = AlignmentReader::new(input.as_bytes()).collect();
        assert_eq!(res.len(), 3);
        assert!(matches!(
            res[0],
            Err(ExprError::MalformedRecord { line: 1, .. })
        ));
        assert!(matches!(
            res[1],
            Err(ExprError::MalformedRecord { line: 2, .. })
        ));
        assert_eq!(
            res[2].as_ref().unwrap(),
            &AlignmentRecord::new("chr1", 7)
        );
    }

    #[test]
    fn header_only_input_is_empty() {
        let mut rdr = AlignmentReader::new("@HD\tVN:1.6\n@PG\tID:x\n".as_bytes());
        assert!(rdr.next().is_none());
    }
}
