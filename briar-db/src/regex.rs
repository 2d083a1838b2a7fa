//! Regex databases over dense DFAs.
//!
//! The forward DFA runs an overlapping search to report a match of
//! every pattern at every end offset; the reverse DFA, anchored to the
//! reported pattern, walks back from the end offset to recover the
//! leftmost start. This is the same forward/reverse pairing
//! `regex-automata` uses for its own start-of-match reporting, built
//! here with all-match semantics so overlapping hits of different
//! patterns are not suppressed.

use log::debug;
use regex_automata::{
    dfa::{dense, Automaton, OverlappingState, StartKind},
    nfa::thompson,
    util::syntax,
    Anchored, Input, MatchKind, PatternSet,
};

use crate::{
    serial::{self, DbKind, Reader, Writer},
    BuildError, LoadError, ScanError,
};

fn syntax_config(multi_line: bool) -> syntax::Config {
    // Byte-oriented: `\xHH` escapes must match raw bytes in binary
    // buffers, and `.` must match any byte (except `\n` in multi-line
    // mutex databases).
    syntax::Config::new()
        .unicode(false)
        .utf8(false)
        .dot_matches_new_line(!multi_line)
        .multi_line(multi_line)
}

fn forward_config() -> dense::Config {
    dense::Config::new()
        .match_kind(MatchKind::All)
        .start_kind(StartKind::Unanchored)
}

fn reverse_config() -> dense::Config {
    dense::Config::new()
        .match_kind(MatchKind::All)
        .start_kind(StartKind::Anchored)
        .starts_for_each_pattern(true)
        .specialize_start_states(false)
}

fn build_forward(patterns: &[&str], multi_line: bool) -> Result<dense::DFA<Vec<u32>>, BuildError> {
    Ok(dense::Builder::new()
        .configure(forward_config())
        .syntax(syntax_config(multi_line))
        .thompson(thompson::Config::new().utf8(false))
        .build_many(patterns)?)
}

fn build_reverse(patterns: &[&str], multi_line: bool) -> Result<dense::DFA<Vec<u32>>, BuildError> {
    Ok(dense::Builder::new()
        .configure(reverse_config())
        .syntax(syntax_config(multi_line))
        .thompson(thompson::Config::new().utf8(false).reverse(true))
        .build_many(patterns)?)
}

/// A group of regexes compiled for overlapping start-of-match scans.
pub struct RegexDb {
    fwd: dense::DFA<Vec<u32>>,
    rev: dense::DFA<Vec<u32>>,
    pattern_count: u32,
}

/// Reusable per-scanner search state for one [`RegexDb`].
pub struct RegexScratch {
    state: OverlappingState,
}

impl RegexDb {
    /// Compile a non-empty pattern group. Pattern ids are the indices
    /// into `patterns`.
    pub fn compile(patterns: &[&str]) -> Result<Self, BuildError> {
        let fwd = build_forward(patterns, false)?;
        let rev = build_reverse(patterns, false)?;
        debug!("compiled regex db: {} patterns", patterns.len());
        Ok(Self {
            fwd,
            rev,
            pattern_count: patterns.len() as u32,
        })
    }

    pub fn pattern_count(&self) -> u32 {
        self.pattern_count
    }

    pub fn new_scratch(&self) -> RegexScratch {
        RegexScratch {
            state: OverlappingState::start(),
        }
    }

    /// Scan `data`, invoking `on_match(id, from, to)` for every
    /// overlapping match of every pattern.
    pub fn scan(
        &self,
        data: &[u8],
        scratch: &mut RegexScratch,
        mut on_match: impl FnMut(u32, u64, u64),
    ) -> Result<(), ScanError> {
        let input = Input::new(data);
        scratch.state = OverlappingState::start();
        loop {
            self.fwd
                .try_search_overlapping_fwd(&input, &mut scratch.state)?;
            let Some(end) = scratch.state.get_match() else {
                return Ok(());
            };
            let rev_input = Input::new(data)
                .range(..end.offset())
                .anchored(Anchored::Pattern(end.pattern()));
            let start = self
                .rev
                .try_search_rev(&rev_input)?
                .ok_or_else(|| ScanError::LostStart(end.pattern().as_usize() as u32))?;
            on_match(
                end.pattern().as_usize() as u32,
                start.offset() as u64,
                end.offset() as u64,
            );
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = Writer::new(DbKind::Regex, self.pattern_count, 0);
        w.put_block(&serial::dump_dense(&self.fwd));
        w.put_block(&serial::dump_dense(&self.rev));
        w.finish()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LoadError> {
        let (mut r, header) = Reader::new(bytes, DbKind::Regex)?;
        let fwd = serial::load_dense(r.block()?)?;
        let rev = serial::load_dense(r.block()?)?;
        Ok(Self {
            fwd,
            rev,
            pattern_count: header.pattern_count,
        })
    }

    pub fn save(&self, path: &std::path::Path) -> Result<(), std::io::Error> {
        std::fs::write(path, self.to_bytes())
    }

    pub fn load(path: &std::path::Path) -> Result<Self, LoadError> {
        Self::from_bytes(&std::fs::read(path)?)
    }
}

/// A group of regexes compiled for existence-only scans against
/// line-oriented auxiliary input.
pub struct MutexDb {
    fwd: dense::DFA<Vec<u32>>,
    pattern_count: u32,
}

/// Reusable per-scanner search state for one [`MutexDb`].
pub struct MutexScratch {
    patset: PatternSet,
    pattern_count: usize,
}

impl MutexScratch {
    fn reset(&mut self) {
        self.patset = PatternSet::new(self.pattern_count);
    }
}

impl MutexDb {
    /// Compile a non-empty pattern group with multi-line anchors, so
    /// `^`/`$` match at the `\n` separators of the synthesized input.
    pub fn compile(patterns: &[&str]) -> Result<Self, BuildError> {
        let fwd = build_forward(patterns, true)?;
        debug!("compiled mutex db: {} patterns", patterns.len());
        Ok(Self {
            fwd,
            pattern_count: patterns.len() as u32,
        })
    }

    pub fn pattern_count(&self) -> u32 {
        self.pattern_count
    }

    pub fn new_scratch(&self) -> MutexScratch {
        MutexScratch {
            patset: PatternSet::new(self.pattern_count as usize),
            pattern_count: self.pattern_count as usize,
        }
    }

    /// Scan `data`, invoking `on_match(id)` once per pattern with at
    /// least one match.
    pub fn scan(
        &self,
        data: &[u8],
        scratch: &mut MutexScratch,
        mut on_match: impl FnMut(u32),
    ) -> Result<(), ScanError> {
        scratch.reset();
        self.fwd
            .try_which_overlapping_matches(&Input::new(data), &mut scratch.patset)?;
        for pid in scratch.patset.iter() {
            on_match(pid.as_usize() as u32);
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = Writer::new(DbKind::Mutex, self.pattern_count, 0);
        w.put_block(&serial::dump_dense(&self.fwd));
        w.finish()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LoadError> {
        let (mut r, header) = Reader::new(bytes, DbKind::Mutex)?;
        let fwd = serial::load_dense(r.block()?)?;
        Ok(Self {
            fwd,
            pattern_count: header.pattern_count,
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

    fn collect(db: &RegexDb, data: &[u8]) -> Vec<(u32, u64, u64)> {
        let mut scratch = db.new_scratch();
        let mut out = Vec::new();
        db.scan(data, &mut scratch, |id, from, to| out.push((id, from, to)))
            .unwrap();
        out.sort_unstable();
        out
    }

    #[test]
    fn reports_start_offsets() {
        let db = RegexDb::compile(&["ab+", "bc"]).unwrap();
        let got = collect(&db, b"xabbc");
        // "ab+" matches ending at 3 and 4, "bc" ends at 5.
        assert!(got.contains(&(0, 1, 3)));
        assert!(got.contains(&(0, 1, 4)));
        assert!(got.contains(&(1, 3, 5)));
    }

    #[test]
    fn overlapping_patterns_all_reported() {
        let db = RegexDb::compile(&["abc", "b"]).unwrap();
        let got = collect(&db, b"abc");
        assert!(got.contains(&(0, 0, 3)));
        assert!(got.contains(&(1, 1, 2)));
    }

    #[test]
    fn dot_matches_newline() {
        let db = RegexDb::compile(&["a.c"]).unwrap();
        assert_eq!(collect(&db, b"a\nc"), vec![(0, 0, 3)]);
    }

    #[test]
    fn byte_escapes_match_raw_bytes() {
        let db = RegexDb::compile(&[r"\xAB.\xCD"]).unwrap();
        assert_eq!(collect(&db, &[0x00, 0xAB, 0xFF, 0xCD]), vec![(0, 1, 4)]);
    }

    #[test]
    fn regex_db_round_trip() {
        let db = RegexDb::compile(&["ab", "cd"]).unwrap();
        let restored = RegexDb::from_bytes(&db.to_bytes()).unwrap();
        assert_eq!(restored.pattern_count(), 2);
        assert_eq!(collect(&restored, b"abcd"), collect(&db, b"abcd"));
    }

    #[test]
    fn mutex_existence_only() {
        let db = MutexDb::compile(&["^mutex_[0-9]+$", "other"]).unwrap();
        let mut scratch = db.new_scratch();
        let mut hits = Vec::new();
        db.scan(b"foo\nmutex_12\nbar\n", &mut scratch, |id| hits.push(id))
            .unwrap();
        assert_eq!(hits, vec![0]);

        // Scratch state does not leak into the next scan.
        let mut hits = Vec::new();
        db.scan(b"nothing here\n", &mut scratch, |id| hits.push(id))
            .unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn mutex_db_round_trip() {
        let db = MutexDb::compile(&["^m$"]).unwrap();
        let restored = MutexDb::from_bytes(&db.to_bytes()).unwrap();
        let mut scratch = restored.new_scratch();
        let mut hits = Vec::new();
        restored
            .scan(b"a\nm\n", &mut scratch, |id| hits.push(id))
            .unwrap();
        assert_eq!(hits, vec![0]);
    }

    #[test]
    fn bad_pattern_is_a_build_error() {
        assert!(RegexDb::compile(&["("]).is_err());
    }
}
