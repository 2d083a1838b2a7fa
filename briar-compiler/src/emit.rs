//! The back end: lower every rule, compile the pattern databases and
//! write the artifact set next to the rule file.

use std::{fmt::Write as _, fs, path::Path};

use briar_db::{LiteralDb, MutexDb, RegexDb};
use briar_rules::{ArtifactPaths, Program, RuleDef, Visibility};
use log::debug;

use crate::{
    ast::RuleFile,
    extract::{extract, Extraction},
    hex, lower, CompileError,
};

/// Everything one rule file compiles into. Databases are `None` when
/// their pattern group is empty, and their files are then not written.
pub struct Compilation {
    pub program: Program,
    pub extraction: Extraction,
    pub regex_db: Option<RegexDb>,
    pub literal_db: Option<LiteralDb>,
    pub mutex_db: Option<MutexDb>,
}

/// Compile a parsed rule file.
pub fn compile(file: &RuleFile) -> Result<Compilation, CompileError> {
    let extraction = extract(file);

    let mut rules = Vec::with_capacity(file.rules.len());
    for (index, rule) in file.rules.iter().enumerate() {
        let condition = lower::lower_rule(&extraction, rule, index as u32)?;
        rules.push(RuleDef {
            name: rule.name.clone(),
            visibility: if rule.private {
                Visibility::Private
            } else {
                Visibility::Public
            },
            condition,
        });
    }

    let program = Program {
        pattern_count: extraction.pattern_count(),
        mutex_pattern_count: extraction.mutex_patterns.len() as u32,
        rules,
    };

    let regex_db = if extraction.regex_patterns.is_empty() {
        None
    } else {
        let patterns: Vec<&str> = extraction
            .regex_patterns
            .iter()
            .map(|p| p.expression.as_str())
            .collect();
        Some(RegexDb::compile(&patterns)?)
    };
    let literal_db = if extraction.literal_patterns.is_empty() {
        None
    } else {
        let patterns: Vec<Vec<u8>> = extraction
            .literal_patterns
            .iter()
            .map(|p| p.expression.clone())
            .collect();
        Some(LiteralDb::compile(
            &patterns,
            extraction.regex_patterns.len() as u32,
        )?)
    };
    let mutex_db = if extraction.mutex_patterns.is_empty() {
        None
    } else {
        let patterns: Vec<&str> = extraction
            .mutex_patterns
            .iter()
            .map(|p| p.expression.as_str())
            .collect();
        Some(MutexDb::compile(&patterns)?)
    };

    debug!(
        "compiled {} rules into {} patterns + {} mutex patterns",
        program.rules.len(),
        program.pattern_count,
        program.mutex_pattern_count
    );
    Ok(Compilation {
        program,
        extraction,
        regex_db,
        literal_db,
        mutex_db,
    })
}

impl Compilation {
    /// The `patterns.txt` listing: regex patterns first, then literals
    /// continuing the same numbering, then mutex patterns numbered from
    /// zero again. Literal bytes are printed in their escaped text
    /// form.
    pub fn patterns_txt(&self) -> String {
        let mut out = String::new();
        let regex_count = self.extraction.regex_patterns.len();
        for (id, pattern) in self.extraction.regex_patterns.iter().enumerate() {
            let _ = writeln!(
                out,
                "{} {}:{} R {}",
                id, pattern.rule, pattern.identifier, pattern.expression
            );
        }
        for (i, pattern) in self.extraction.literal_patterns.iter().enumerate() {
            let _ = writeln!(
                out,
                "{} {}:{} R {}",
                regex_count + i,
                pattern.rule,
                pattern.identifier,
                hex::escape_bytes(&pattern.expression)
            );
        }
        for (id, pattern) in self.extraction.mutex_patterns.iter().enumerate() {
            let _ = writeln!(
                out,
                "{} {}:{} R {}",
                id, pattern.rule, pattern.identifier, pattern.expression
            );
        }
        out
    }

    /// Write the artifact set into the rule file's directory and return
    /// the paths written.
    pub fn save(&self, rule_file: &Path) -> Result<ArtifactPaths, CompileError> {
        let paths = ArtifactPaths::for_rule_file(rule_file);
        fs::write(&paths.patterns, self.patterns_txt())?;
        self.program.save(&paths.program)?;
        if let Some(db) = &self.regex_db {
            db.save(&paths.regex_db)?;
        }
        if let Some(db) = &self.literal_db {
            db.save(&paths.literal_db)?;
        }
        if let Some(db) = &self.mutex_db {
            db.save(&paths.mutex_db)?;
        }
        Ok(paths)
    }
}
