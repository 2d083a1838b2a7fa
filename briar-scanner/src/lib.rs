/*!
The briar runtime: load a compiled rule program and scan buffers with
it.

A [`RuleProgram`] owns the deserialized artifacts of one rule file (the
rule program plus up to three pattern databases) and is shared
read-only by any number of [`Scanner`]s. A scanner owns the transient
state of a scan: the per-pattern match tables, the per-rule memoization
states and the per-database scratch areas. One scanner serves one task
at a time; concurrent scans take one scanner each.

A scan runs the full lifecycle synchronously: reset the context, drive
the pattern databases over the input (and, when a mutex report is
supplied, the mutex database over the synthesized name list), then
evaluate every rule in definition order. The match callback fires once
per *public* rule that hits, with the caller's `user_data` passed
back.

```no_run
use briar_scanner::{RuleProgram, Scanner};
use std::path::Path;

let program = RuleProgram::load(Path::new("rules/ruleset.yar")).unwrap();
let mut scanner = Scanner::builder(&program)
    .on_match(|rule: &str, file: &&str| println!("{file}: {rule}"))
    .build();
scanner
    .scan_data(b"some bytes", None, &"sample.bin")
    .unwrap();
```
*/

use std::path::Path;

use bon::bon;
use briar_db::{LiteralDb, MutexDb, MutexScratch, RegexDb, RegexScratch};
use briar_rules::{ArtifactPaths, Program};
use log::{debug, trace};
use thiserror::Error;

mod context;
mod cuckoo;
mod eval;

pub use briar_rules::UNDEFINED;
pub use context::{MatchRecord, RuleState, ScanContext};

/// The rule program failed to load.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Program(#[from] briar_rules::ProgramError),
    #[error(transparent)]
    Db(#[from] briar_db::LoadError),
    #[error("databases hold {found} patterns but the rule program expects {expected}")]
    PatternCountMismatch { expected: u32, found: u32 },
    #[error("literal ids start at {base} but {regex} regex patterns come first")]
    BaseIdMismatch { base: u32, regex: u32 },
    #[error("mutex database holds {found} patterns but the rule program expects {expected}")]
    MutexCountMismatch { expected: u32, found: u32 },
}

/// One `scan_data` call failed. The scanner stays usable; the next
/// scan starts from a fresh state anyway.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error(transparent)]
    Db(#[from] briar_db::ScanError),
    #[error("failed to read mutex input: {0}")]
    MutexInput(#[from] std::io::Error),
    #[error("malformed mutex input: {0}")]
    MutexJson(#[from] serde_json::Error),
}

/// The deserialized artifacts of one compiled rule file, shared
/// read-only across scanners.
pub struct RuleProgram {
    program: Program,
    regex_db: Option<RegexDb>,
    literal_db: Option<LiteralDb>,
    mutex_db: Option<MutexDb>,
}

impl RuleProgram {
    /// Load the artifact set the compiler wrote for `rule_file`.
    /// Database files are optional on disk but must agree with the
    /// program's pattern counts.
    pub fn load(rule_file: &Path) -> Result<Self, LoadError> {
        let paths = ArtifactPaths::for_rule_file(rule_file);
        let program = Program::load(&paths.program)?;
        let regex_db = match paths.regex_db.exists() {
            true => Some(RegexDb::load(&paths.regex_db)?),
            false => None,
        };
        let literal_db = match paths.literal_db.exists() {
            true => Some(LiteralDb::load(&paths.literal_db)?),
            false => None,
        };
        let mutex_db = match paths.mutex_db.exists() {
            true => Some(MutexDb::load(&paths.mutex_db)?),
            false => None,
        };

        let regex_count = regex_db.as_ref().map_or(0, RegexDb::pattern_count);
        let literal_count = literal_db.as_ref().map_or(0, LiteralDb::pattern_count);
        if regex_count + literal_count != program.pattern_count {
            return Err(LoadError::PatternCountMismatch {
                expected: program.pattern_count,
                found: regex_count + literal_count,
            });
        }
        if let Some(db) = &literal_db {
            if db.base_id() != regex_count {
                return Err(LoadError::BaseIdMismatch {
                    base: db.base_id(),
                    regex: regex_count,
                });
            }
        }
        let mutex_count = mutex_db.as_ref().map_or(0, MutexDb::pattern_count);
        if mutex_count != program.mutex_pattern_count {
            return Err(LoadError::MutexCountMismatch {
                expected: program.mutex_pattern_count,
                found: mutex_count,
            });
        }

        debug!(
            "loaded rule program: {} rules, {} patterns, {} mutex patterns",
            program.rules.len(),
            program.pattern_count,
            program.mutex_pattern_count
        );
        Ok(Self {
            program,
            regex_db,
            literal_db,
            mutex_db,
        })
    }

    pub fn program(&self) -> &Program {
        &self.program
    }
}

/// One scanning task over a shared [`RuleProgram`].
///
/// `T` is the per-scan user data handed back to the match callback.
pub struct Scanner<'p, T = ()> {
    program: &'p RuleProgram,
    on_match: Box<dyn FnMut(&str, &T) + 'p>,
    ctx: ScanContext,
    regex_scratch: Option<RegexScratch>,
    mutex_scratch: Option<MutexScratch>,
}

#[bon]
impl<'p, T> Scanner<'p, T> {
    /// Build a scanner with its scan context and per-database scratch
    /// areas sized for `program`.
    #[builder]
    pub fn new(
        #[builder(start_fn)] program: &'p RuleProgram,
        /// Called once per public rule that hits, with the rule name
        /// and the `user_data` of the current scan.
        on_match: impl FnMut(&str, &T) + 'p,
    ) -> Self {
        Self {
            program,
            on_match: Box::new(on_match),
            ctx: ScanContext::new(
                program.program.pattern_count as usize,
                program.program.mutex_pattern_count as usize,
                program.program.rules.len(),
            ),
            regex_scratch: program.regex_db.as_ref().map(RegexDb::new_scratch),
            mutex_scratch: program.mutex_db.as_ref().map(MutexDb::new_scratch),
        }
    }

    /// Run one full scan: reset, populate the match tables from the
    /// databases, evaluate every rule, fire the callback per public
    /// hit.
    ///
    /// `mutex_input` is an optional behavioral report for the mutex
    /// database; leaving it out is equivalent to all-zero mutex
    /// counts.
    pub fn scan_data(
        &mut self,
        data: &[u8],
        mutex_input: Option<&Path>,
        user_data: &T,
    ) -> Result<(), ScanError> {
        self.ctx.reset();

        if let Some(db) = &self.program.literal_db {
            let ctx = &mut self.ctx;
            db.scan(data, |id, from, to| ctx.add_match(id, from, to))?;
        }
        if let (Some(db), Some(scratch)) = (&self.program.regex_db, self.regex_scratch.as_mut()) {
            let ctx = &mut self.ctx;
            db.scan(data, scratch, |id, from, to| ctx.add_match(id, from, to))?;
        }
        match mutex_input {
            Some(path) => {
                if let (Some(db), Some(scratch)) =
                    (&self.program.mutex_db, self.mutex_scratch.as_mut())
                {
                    let names = cuckoo::mutex_buffer(path)?;
                    trace!("scanning {} bytes of mutex names", names.len());
                    let ctx = &mut self.ctx;
                    db.scan(&names, scratch, |id| ctx.add_mutex_match(id))?;
                }
            }
            None => {
                if self.program.mutex_db.is_some() {
                    trace!("rule program references mutexes but no mutex input was supplied");
                }
            }
        }

        let on_match = &mut self.on_match;
        eval::run(&self.program.program, &mut self.ctx, data, &mut |rule| {
            on_match(rule, user_data)
        });
        Ok(())
    }
}
