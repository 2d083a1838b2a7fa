/*!
Multi-pattern match databases for the briar rule engine.

A *database* compiles a group of patterns into one automaton that scans
a byte buffer in a single pass and reports matches through a callback
carrying the pattern's numeric id together with the match span. Three
kinds exist, matching the three pattern groups a compiled rule set
produces:

- [`RegexDb`]: regular expressions, byte-oriented with `.` matching any
  byte. Reports every overlapping match with its start offset (a forward
  DFA finds the end, an anchored reverse DFA recovers the start).
- [`LiteralDb`]: raw byte strings over an Aho-Corasick automaton, also
  reporting every overlapping occurrence. Carries a `base_id` so its ids
  can be placed after another database's in a shared address space.
- [`MutexDb`]: regular expressions with multi-line anchors, answering
  only *which* patterns matched (existence, not positions).

Databases serialize to a small versioned container (see [`save`] /
[`load`] on each type) so they can be compiled once and shipped next to
the rule program that references their ids. The DFA bytes inside the
container are the automaton's own little-endian wire format; literal
sets store their pattern bytes and rebuild the automaton at load time.

Scanning needs a per-scanner scratch value ([`RegexScratch`],
[`MutexScratch`]) so one database can be shared read-only across any
number of scanners.

[`save`]: RegexDb::save
[`load`]: RegexDb::load
*/

use thiserror::Error;

mod literal;
mod regex;
mod serial;

pub use literal::LiteralDb;
pub use regex::{MutexDb, MutexScratch, RegexDb, RegexScratch};
pub use serial::DbKind;

/// A pattern group was rejected at compile time.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("regex pattern set rejected: {0}")]
    Regex(#[from] regex_automata::dfa::dense::BuildError),
    #[error("literal pattern set rejected: {0}")]
    Literal(#[from] aho_corasick::BuildError),
}

/// A database container could not be read back.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read database file: {0}")]
    Io(#[from] std::io::Error),
    #[error("not a briar database file")]
    BadMagic,
    #[error("unsupported database version {0}")]
    Version(u16),
    #[error("wrong database kind: expected {expected:?}, got {got}")]
    Kind { expected: DbKind, got: u8 },
    #[error("truncated database file")]
    Truncated,
    #[error("malformed automaton: {0}")]
    Automaton(#[from] regex_automata::util::wire::DeserializeError),
    #[error("literal pattern set rejected: {0}")]
    Literal(#[from] aho_corasick::BuildError),
}

/// The engine failed mid-scan. The scan's partial results must be
/// discarded; the database itself stays usable.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("scan failed: {0}")]
    Engine(#[from] regex_automata::MatchError),
    #[error("reverse scan lost the start of a match of pattern {0}")]
    LostStart(u32),
}
