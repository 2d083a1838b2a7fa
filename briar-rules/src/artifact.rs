//! Locations of the compiler's output files relative to a rule file.
//!
//! The compiler writes everything into the rule file's directory; the
//! scanner derives the same paths from the same rule-file path, so the
//! two sides never exchange anything but that one path.

use std::path::{Path, PathBuf};

/// The full artifact set for one rule file. Database files are only
/// written (and expected) when their pattern group is non-empty.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArtifactPaths {
    /// Human-readable pattern table, `patterns.txt`.
    pub patterns: PathBuf,
    /// The rule program, `rules.def`.
    pub program: PathBuf,
    /// `<rulefile>.regex.db`
    pub regex_db: PathBuf,
    /// `<rulefile>.literal.db`
    pub literal_db: PathBuf,
    /// `<rulefile>.mutex.db`
    pub mutex_db: PathBuf,
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

impl ArtifactPaths {
    pub fn for_rule_file(rule_file: &Path) -> Self {
        let dir = rule_file.parent().unwrap_or(Path::new(""));
        Self {
            patterns: dir.join("patterns.txt"),
            program: dir.join("rules.def"),
            regex_db: with_suffix(rule_file, ".regex.db"),
            literal_db: with_suffix(rule_file, ".literal.db"),
            mutex_db: with_suffix(rule_file, ".mutex.db"),
        }
    }
}
