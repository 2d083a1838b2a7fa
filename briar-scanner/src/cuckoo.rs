//! Mutex auxiliary input.
//!
//! The host may hand `scan_data` a behavioral report in JSON form;
//! only `behavior.summary.mutexes` is read. The names are joined with
//! `\n` terminators into one buffer for the mutex database, whose
//! patterns use multi-line anchors to match individual names.

use std::{fs, path::Path};

use serde::Deserialize;

use crate::ScanError;

#[derive(Debug, Default, Deserialize)]
struct Report {
    #[serde(default)]
    behavior: Behavior,
}

#[derive(Debug, Default, Deserialize)]
struct Behavior {
    #[serde(default)]
    summary: Summary,
}

#[derive(Debug, Default, Deserialize)]
struct Summary {
    #[serde(default)]
    mutexes: Vec<String>,
}

/// Read a report file and synthesize the newline-terminated mutex-name
/// buffer. A report without the mutex array yields an empty buffer.
pub(crate) fn mutex_buffer(path: &Path) -> Result<Vec<u8>, ScanError> {
    let report: Report = serde_json::from_slice(&fs::read(path)?)?;
    let mut buffer = Vec::new();
    for name in &report.behavior.summary.mutexes {
        buffer.extend_from_slice(name.as_bytes());
        buffer.push(b'\n');
    }
    Ok(buffer)
}
