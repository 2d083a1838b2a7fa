//! Literal databases over an Aho-Corasick automaton.

use aho_corasick::{AhoCorasick, MatchKind};
use log::debug;

use crate::{
    serial::{DbKind, Reader, Writer},
    BuildError, LoadError, ScanError,
};

/// A group of raw byte strings compiled for overlapping scans.
///
/// Reported ids are `base_id + index`, so a literal group can share one
/// id space with a regex group compiled separately (regex ids first,
/// then literals).
pub struct LiteralDb {
    ac: AhoCorasick,
    patterns: Vec<Vec<u8>>,
    base_id: u32,
}

impl LiteralDb {
    /// Compile a non-empty pattern group.
    pub fn compile(patterns: &[Vec<u8>], base_id: u32) -> Result<Self, BuildError> {
        let ac = AhoCorasick::builder()
            .match_kind(MatchKind::Standard)
            .build(patterns)?;
        debug!(
            "compiled literal db: {} patterns, base id {}",
            patterns.len(),
            base_id
        );
        Ok(Self {
            ac,
            patterns: patterns.to_vec(),
            base_id,
        })
    }

    pub fn pattern_count(&self) -> u32 {
        self.patterns.len() as u32
    }

    pub fn base_id(&self) -> u32 {
        self.base_id
    }

    /// Scan `data`, invoking `on_match(id, from, to)` for every
    /// occurrence of every pattern, overlaps included.
    pub fn scan(
        &self,
        data: &[u8],
        mut on_match: impl FnMut(u32, u64, u64),
    ) -> Result<(), ScanError> {
        for m in self.ac.find_overlapping_iter(data) {
            on_match(
                self.base_id + m.pattern().as_usize() as u32,
                m.start() as u64,
                m.end() as u64,
            );
        }
        Ok(())
    }

    /// The container stores the pattern bytes themselves; the automaton
    /// is rebuilt at load time.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = Writer::new(DbKind::Literal, self.pattern_count(), self.base_id);
        for pattern in &self.patterns {
            w.put_block(pattern);
        }
        w.finish()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LoadError> {
        let (mut r, header) = Reader::new(bytes, DbKind::Literal)?;
        let mut patterns = Vec::with_capacity(header.pattern_count as usize);
        for _ in 0..header.pattern_count {
            patterns.push(r.block()?.to_vec());
        }
        let ac = AhoCorasick::builder()
            .match_kind(MatchKind::Standard)
            .build(&patterns)?;
        Ok(Self {
            ac,
            patterns,
            base_id: header.base_id,
        })
    }

    pub fn save(&self, path: &std::path::Path) -> Result<(), std::io::Error> {
        std::fs::write(path, self.to_bytes())
    }

    pub fn load(path: &std::path::Path) -> Result<Self, LoadError> {
        Self::from_bytes(&std::fs::read(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(db: &LiteralDb, data: &[u8]) -> Vec<(u32, u64, u64)> {
        let mut out = Vec::new();
        db.scan(data, |id, from, to| out.push((id, from, to))).unwrap();
        out.sort_unstable();
        out
    }

    #[test]
    fn base_id_offsets_ids() {
        let db = LiteralDb::compile(&[b"abc".to_vec(), b"bcd".to_vec()], 5).unwrap();
        let got = collect(&db, b"abcd");
        assert_eq!(got, vec![(5, 0, 3), (6, 1, 4)]);
    }

    #[test]
    fn every_occurrence_reported() {
        let db = LiteralDb::compile(&[b"aa".to_vec()], 0).unwrap();
        assert_eq!(collect(&db, b"aaa"), vec![(0, 0, 2), (0, 1, 3)]);
    }

    #[test]
    fn raw_byte_patterns() {
        let db = LiteralDb::compile(&[vec![0x00, 0xAB]], 0).unwrap();
        assert_eq!(collect(&db, &[0xFF, 0x00, 0xAB]), vec![(0, 1, 3)]);
    }

    #[test]
    fn round_trip() {
        let db = LiteralDb::compile(&[b"abc".to_vec(), vec![0xAB]], 3).unwrap();
        let restored = LiteralDb::from_bytes(&db.to_bytes()).unwrap();
        assert_eq!(restored.base_id(), 3);
        assert_eq!(restored.pattern_count(), 2);
        assert_eq!(collect(&restored, b"abc\xAB"), collect(&db, b"abc\xAB"));
    }
}
