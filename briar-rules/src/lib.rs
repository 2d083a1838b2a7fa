/*!
The rule program shared between the briar compiler and the briar scanner.

A *rule program* is the compiler's executable output: one lowered
condition per rule ([`Expr`]), the rule table with names and visibility,
and the pattern-table sizes the scan context is laid out with. The
compiler serializes it to `rules.def` next to the pattern databases; the
scanner deserializes it and interprets the conditions against the match
tables produced by the databases.

The representation is a closed sum type rather than generated source
code, so the same artifact can be interpreted, translated or compiled
further without a host-language toolchain.
*/

use std::{fs, io, path::Path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod artifact;
mod expr;

pub use artifact::ArtifactPaths;
pub use expr::{ArithOp, CmpOp, Expr, Quant, ReadWidth, StrRef};

/// Sentinel for absent offsets/lengths and out-of-range integer reads.
///
/// Conditions propagate it as an opaque very-large value; rule authors
/// guard with explicit bounds checks.
pub const UNDEFINED: u64 = 0xFFFA_BADA_FABA_DAFF;

/// Whether a rule hit is reported to the host.
///
/// Private rules exist only to be referenced from other rules'
/// conditions; they never fire the match callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Visibility {
    Public,
    Private,
}

/// One rule of the program. The position in [`Program::rules`] is the
/// rule's global index, which cross-rule [`Expr::Rule`] references use.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RuleDef {
    pub name: String,
    pub visibility: Visibility,
    pub condition: Expr,
}

/// A compiled rule program.
///
/// `pattern_count` is the combined size of the regex + literal pattern
/// address space (regex ids in `[0, R)`, literal ids in `[R, R+L)`);
/// `mutex_pattern_count` sizes the separate mutex namespace. The scan
/// context allocates its match tables from these two numbers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub pattern_count: u32,
    pub mutex_pattern_count: u32,
    pub rules: Vec<RuleDef>,
}

#[derive(Debug, Error)]
pub enum ProgramError {
    #[error("failed to read/write rule program: {0}")]
    Io(#[from] io::Error),
    #[error("malformed rule program: {0}")]
    Json(#[from] serde_json::Error),
}

impl Program {
    pub fn to_json(&self) -> Result<String, ProgramError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, ProgramError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), ProgramError> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ProgramError> {
        Self::from_json(&fs::read_to_string(path)?)
    }
}
