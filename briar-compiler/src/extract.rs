//! Pattern extraction: walk every rule, classify its strings into the
//! literal and regex buckets, collect `cuckoo.sync.mutex` regexes from
//! conditions, deduplicate globally and assign the numeric ids the
//! emitted program and the databases share.
//!
//! Ids are first-seen order per bucket. After the walk every literal id
//! is shifted by the final regex count, so regex ids occupy `[0, R)`
//! and literal ids `[R, R+L)` of one flat address space; mutex ids are
//! a separate namespace starting at 0. The walk order is fixed, which
//! makes extraction deterministic: compiling the same file twice yields
//! bitwise-identical tables.

use std::collections::HashMap;

use log::debug;

use crate::{
    ast::{Expression, IntIterable, RuleFile, StringValue},
    hex,
};

/// The module function whose regex argument becomes a mutex pattern.
pub(crate) const MUTEX_FUNCTION: &str = "cuckoo.sync.mutex";

/// One extracted pattern: the expression (regex text or raw literal
/// bytes) plus the rule and string identifier it first came from.
#[derive(Clone, Debug)]
pub struct Pattern<E> {
    pub expression: E,
    pub rule: String,
    pub identifier: String,
}

/// Per-rule view of the extraction: which global id every string
/// identifier and mutex pattern of the rule resolves to.
#[derive(Debug, Default)]
pub struct RuleInfo {
    pub index: u32,
    pub name: String,
    literal_ids: HashMap<String, u32>,
    regex_ids: HashMap<String, u32>,
    mutex_ids: HashMap<String, u32>,
    declared: Vec<String>,
}

impl RuleInfo {
    /// Resolve a `$`-prefixed string identifier to its global pattern
    /// id (post-shift: regex ids `< R`, literal ids `>= R`).
    pub fn string_id(&self, identifier: &str) -> Option<u32> {
        self.literal_ids
            .get(identifier)
            .or_else(|| self.regex_ids.get(identifier))
            .copied()
    }

    pub fn mutex_id(&self, pattern: &str) -> Option<u32> {
        self.mutex_ids.get(pattern).copied()
    }

    /// String identifiers in declaration order (`them` expands to
    /// these).
    pub fn declared(&self) -> &[String] {
        &self.declared
    }

    /// Expand a trailing-`*` wildcard over the rule's identifiers, in
    /// declaration order.
    pub fn wildcard_ids(&self, wildcard: &str) -> Vec<u32> {
        let prefix = &wildcard[..wildcard.len() - 1];
        self.declared
            .iter()
            .filter(|id| id.starts_with(prefix))
            .filter_map(|id| self.string_id(id))
            .collect()
    }
}

/// The global pattern tables plus the per-rule id maps.
#[derive(Debug, Default)]
pub struct Extraction {
    pub regex_patterns: Vec<Pattern<String>>,
    pub literal_patterns: Vec<Pattern<Vec<u8>>>,
    pub mutex_patterns: Vec<Pattern<String>>,
    pub rules: Vec<RuleInfo>,
    rule_index: HashMap<String, u32>,
}

impl Extraction {
    /// Size of the shared regex + literal id space.
    pub fn pattern_count(&self) -> u32 {
        (self.regex_patterns.len() + self.literal_patterns.len()) as u32
    }

    pub fn rule_index(&self, name: &str) -> Option<u32> {
        self.rule_index.get(name).copied()
    }
}

fn intern<E: Clone + std::hash::Hash + Eq>(
    cache: &mut HashMap<E, u32>,
    patterns: &mut Vec<Pattern<E>>,
    expression: E,
    rule: &str,
    identifier: &str,
) -> u32 {
    if let Some(&id) = cache.get(&expression) {
        return id;
    }
    let id = patterns.len() as u32;
    patterns.push(Pattern {
        expression: expression.clone(),
        rule: rule.to_string(),
        identifier: identifier.to_string(),
    });
    cache.insert(expression, id);
    id
}

/// Walk a rule file and build the pattern tables. Infallible; unknown
/// identifiers only surface later, when conditions are lowered.
pub fn extract(file: &RuleFile) -> Extraction {
    let mut out = Extraction::default();
    let mut literal_cache: HashMap<Vec<u8>, u32> = HashMap::new();
    let mut regex_cache: HashMap<String, u32> = HashMap::new();
    let mut mutex_cache: HashMap<String, u32> = HashMap::new();

    for (index, rule) in file.rules.iter().enumerate() {
        let mut info = RuleInfo {
            index: index as u32,
            name: rule.name.clone(),
            ..RuleInfo::default()
        };

        for string in &rule.strings {
            info.declared.push(string.identifier.clone());
            match &string.value {
                StringValue::Plain(bytes) => {
                    let id = intern(
                        &mut literal_cache,
                        &mut out.literal_patterns,
                        bytes.clone(),
                        &rule.name,
                        &string.identifier,
                    );
                    info.literal_ids.insert(string.identifier.clone(), id);
                }
                StringValue::Regex(text) => {
                    let id = intern(
                        &mut regex_cache,
                        &mut out.regex_patterns,
                        text.clone(),
                        &rule.name,
                        &string.identifier,
                    );
                    info.regex_ids.insert(string.identifier.clone(), id);
                }
                StringValue::Hex(units) => {
                    let lowered = hex::lower(units);
                    if lowered.literal_only {
                        let id = intern(
                            &mut literal_cache,
                            &mut out.literal_patterns,
                            hex::decode_literal(&lowered.text),
                            &rule.name,
                            &string.identifier,
                        );
                        info.literal_ids.insert(string.identifier.clone(), id);
                    } else {
                        let id = intern(
                            &mut regex_cache,
                            &mut out.regex_patterns,
                            lowered.text,
                            &rule.name,
                            &string.identifier,
                        );
                        info.regex_ids.insert(string.identifier.clone(), id);
                    }
                }
            }
        }

        collect_mutexes(&rule.condition, &mut |pattern| {
            let id = intern(
                &mut mutex_cache,
                &mut out.mutex_patterns,
                pattern.to_string(),
                &rule.name,
                pattern,
            );
            info.mutex_ids.insert(pattern.to_string(), id);
        });

        out.rule_index.insert(rule.name.clone(), index as u32);
        out.rules.push(info);
    }

    // Move the literal ids behind the regex ids: one flat address
    // space, usable directly as match-table indices.
    let regex_count = out.regex_patterns.len() as u32;
    for info in &mut out.rules {
        for id in info.literal_ids.values_mut() {
            *id += regex_count;
        }
    }

    debug!(
        "extracted {} regex, {} literal, {} mutex patterns from {} rules",
        out.regex_patterns.len(),
        out.literal_patterns.len(),
        out.mutex_patterns.len(),
        out.rules.len()
    );
    out
}

/// Find every `cuckoo.sync.mutex(/re/)` call in a condition.
fn collect_mutexes(expr: &Expression, found: &mut impl FnMut(&str)) {
    match expr {
        Expression::Call { function, args } => {
            if function == MUTEX_FUNCTION {
                if let Some(Expression::Regex(pattern)) = args.first() {
                    found(pattern);
                    return;
                }
            }
            for arg in args {
                collect_mutexes(arg, found);
            }
        }
        Expression::Paren(inner) | Expression::Not(inner) => collect_mutexes(inner, found),
        Expression::And(lhs, rhs) | Expression::Or(lhs, rhs) => {
            collect_mutexes(lhs, found);
            collect_mutexes(rhs, found);
        }
        Expression::Cmp { lhs, rhs, .. } | Expression::Arith { lhs, rhs, .. } => {
            collect_mutexes(lhs, found);
            collect_mutexes(rhs, found);
        }
        Expression::StrAt { at, .. } => collect_mutexes(at, found),
        Expression::StrIn { low, high, .. } => {
            collect_mutexes(low, found);
            collect_mutexes(high, found);
        }
        Expression::StrOffset { index, .. } | Expression::StrLength { index, .. } => {
            if let Some(index) = index {
                collect_mutexes(index, found);
            }
        }
        Expression::Read { at, .. } => collect_mutexes(at, found),
        Expression::ForStrings { body, .. } => collect_mutexes(body, found),
        Expression::ForInts { iter, body, .. } => {
            match iter {
                IntIterable::Values(items) => {
                    for item in items {
                        collect_mutexes(item, found);
                    }
                }
                IntIterable::Range { low, high } => {
                    collect_mutexes(low, found);
                    collect_mutexes(high, found);
                }
            }
            collect_mutexes(body, found);
        }
        Expression::Bool(_)
        | Expression::Int(_)
        | Expression::Filesize
        | Expression::Str(_)
        | Expression::StrCount(_)
        | Expression::Ident(_)
        | Expression::Regex(_)
        | Expression::Of { .. } => {}
    }
}
