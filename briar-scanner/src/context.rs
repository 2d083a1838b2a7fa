//! Per-scan state: match tables and rule states.

use briar_rules::UNDEFINED;

/// Evaluation state of one rule within one scan. Transitions once,
/// from `NotEvaluated` to a terminal value, and is only reset at the
/// start of the next scan.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RuleState {
    NotEvaluated,
    Hit,
    NoHit,
}

/// Matches of one pattern: a count plus offset/length lists aligned by
/// index, in engine-callback arrival order (not necessarily sorted).
#[derive(Clone, Debug, Default)]
pub struct MatchRecord {
    pub count: u32,
    pub offsets: Vec<u64>,
    pub lengths: Vec<u32>,
}

impl MatchRecord {
    fn clear(&mut self) {
        self.count = 0;
        self.offsets.clear();
        self.lengths.clear();
    }

    /// Offset of the `index`-th match, `UNDEFINED` past the end.
    pub fn offset(&self, index: u64) -> u64 {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.offsets.get(i))
            .copied()
            .unwrap_or(UNDEFINED)
    }

    /// Length of the `index`-th match, `UNDEFINED` past the end.
    pub fn length(&self, index: u64) -> u64 {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.lengths.get(i))
            .map(|&len| u64::from(len))
            .unwrap_or(UNDEFINED)
    }
}

/// The transient state of one scan, re-used across scans by its
/// owning scanner.
#[derive(Debug)]
pub struct ScanContext {
    pub(crate) matches: Vec<MatchRecord>,
    pub(crate) mutex_matches: Vec<u64>,
    pub(crate) states: Vec<RuleState>,
}

impl ScanContext {
    pub(crate) fn new(pattern_count: usize, mutex_pattern_count: usize, rule_count: usize) -> Self {
        Self {
            matches: vec![MatchRecord::default(); pattern_count],
            mutex_matches: vec![0; mutex_pattern_count],
            states: vec![RuleState::NotEvaluated; rule_count],
        }
    }

    pub(crate) fn reset(&mut self) {
        for record in &mut self.matches {
            record.clear();
        }
        self.mutex_matches.fill(0);
        self.states.fill(RuleState::NotEvaluated);
    }

    /// Record one engine match callback. Ids outside the program's
    /// tables are ignored.
    pub(crate) fn add_match(&mut self, id: u32, from: u64, to: u64) {
        if let Some(record) = self.matches.get_mut(id as usize) {
            record.count += 1;
            record.offsets.push(from);
            record.lengths.push((to - from) as u32);
        }
    }

    pub(crate) fn add_mutex_match(&mut self, id: u32) {
        if let Some(count) = self.mutex_matches.get_mut(id as usize) {
            *count += 1;
        }
    }
}
