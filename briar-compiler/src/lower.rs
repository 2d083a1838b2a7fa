//! Condition lowering: one rule condition AST in, one executable
//! expression tree out.
//!
//! Lowering resolves every name to a number fixed at compile time:
//! string identifiers become global pattern ids, mutex regexes become
//! mutex ids, rule names become rule indices, loop variables become
//! positions in the evaluator's scope stack. Name lookup order is loop
//! variables (innermost first), then rule names; a rule can only
//! reference rules defined before it, which rules out reference cycles
//! by construction.

use briar_rules::{Expr, StrRef};

use crate::{
    ast::{self, Expression, IntIterable, StringSet},
    extract::{Extraction, RuleInfo, MUTEX_FUNCTION},
    CompileError,
};

pub(crate) fn lower_rule(
    extraction: &Extraction,
    rule: &ast::Rule,
    index: u32,
) -> Result<Expr, CompileError> {
    let mut lowerer = Lowerer {
        extraction,
        info: &extraction.rules[index as usize],
        rule_name: &rule.name,
        index,
        loop_vars: Vec::new(),
        string_loop_depth: 0,
    };
    lowerer.lower(&rule.condition)
}

struct Lowerer<'a> {
    extraction: &'a Extraction,
    info: &'a RuleInfo,
    rule_name: &'a str,
    index: u32,
    /// Integer loop variables, outermost first; a reference stores its
    /// position here.
    loop_vars: Vec<String>,
    /// Depth of enclosing string loops, gating the bare `$` forms.
    string_loop_depth: u32,
}

impl Lowerer<'_> {
    fn lower(&mut self, expr: &Expression) -> Result<Expr, CompileError> {
        Ok(match expr {
            Expression::Bool(value) => Expr::Bool(*value),
            Expression::Int(value) => Expr::Int(*value),
            Expression::Filesize => Expr::Filesize,
            Expression::Str(id) => Expr::Match(self.str_ref(id)?),
            Expression::StrCount(id) => Expr::Count(self.str_ref(id)?),
            Expression::StrOffset { id, index } => Expr::Offset {
                s: self.str_ref(id)?,
                index: self.lower_opt(index)?,
            },
            Expression::StrLength { id, index } => Expr::Length {
                s: self.str_ref(id)?,
                index: self.lower_opt(index)?,
            },
            Expression::StrAt { id, at } => Expr::MatchAt {
                s: self.str_ref(id)?,
                at: self.lower(at)?.boxed(),
            },
            Expression::StrIn { id, low, high } => Expr::MatchIn {
                s: self.str_ref(id)?,
                low: self.lower(low)?.boxed(),
                high: self.lower(high)?.boxed(),
            },
            Expression::Ident(name) => self.ident(name)?,
            Expression::Paren(inner) => self.lower(inner)?,
            Expression::Not(inner) => Expr::Not(self.lower(inner)?.boxed()),
            Expression::And(lhs, rhs) => {
                Expr::And(self.lower(lhs)?.boxed(), self.lower(rhs)?.boxed())
            }
            Expression::Or(lhs, rhs) => {
                Expr::Or(self.lower(lhs)?.boxed(), self.lower(rhs)?.boxed())
            }
            Expression::Cmp { op, lhs, rhs } => {
                let lhs = self.lower(lhs)?;
                let rhs = self.lower(rhs)?;
                let signed = is_signed(&lhs) || is_signed(&rhs);
                Expr::Cmp {
                    op: *op,
                    signed,
                    lhs: lhs.boxed(),
                    rhs: rhs.boxed(),
                }
            }
            Expression::Arith { op, lhs, rhs } => Expr::Arith {
                op: *op,
                lhs: self.lower(lhs)?.boxed(),
                rhs: self.lower(rhs)?.boxed(),
            },
            Expression::Read {
                width,
                signed,
                big_endian,
                at,
            } => Expr::Read {
                width: *width,
                signed: *signed,
                big_endian: *big_endian,
                at: self.lower(at)?.boxed(),
            },
            Expression::Of { quant, set } => {
                let ids = self.expand_set(set)?;
                Expr::Of {
                    needed: quant.needed(ids.len() as u64),
                    ids,
                }
            }
            Expression::ForStrings { quant, set, body } => {
                let ids = self.expand_set(set)?;
                self.string_loop_depth += 1;
                let body = self.lower(body);
                self.string_loop_depth -= 1;
                Expr::ForStrings {
                    needed: quant.needed(ids.len() as u64),
                    ids,
                    body: body?.boxed(),
                }
            }
            Expression::ForInts { quant, var, iter, body } => match iter {
                IntIterable::Values(values) => {
                    let items = values
                        .iter()
                        .map(|item| self.lower(item))
                        .collect::<Result<Vec<_>, _>>()?;
                    let body = self.in_var_scope(var, body)?;
                    Expr::ForInts {
                        needed: quant.needed(items.len() as u64),
                        items,
                        body: body.boxed(),
                    }
                }
                IntIterable::Range { low, high } => {
                    let low = self.lower(low)?;
                    let high = self.lower(high)?;
                    let body = self.in_var_scope(var, body)?;
                    Expr::ForRange {
                        quant: *quant,
                        low: low.boxed(),
                        high: high.boxed(),
                        body: body.boxed(),
                    }
                }
            },
            Expression::Call { function, args } => self.call(function, args)?,
            Expression::Regex(_) => {
                return Err(CompileError::StrayRegex {
                    rule: self.rule_name.to_string(),
                })
            }
        })
    }

    fn lower_opt(
        &mut self,
        index: &Option<Box<Expression>>,
    ) -> Result<Option<Box<Expr>>, CompileError> {
        index
            .as_ref()
            .map(|expr| self.lower(expr).map(Expr::boxed))
            .transpose()
    }

    fn in_var_scope(&mut self, var: &str, body: &Expression) -> Result<Expr, CompileError> {
        self.loop_vars.push(var.to_string());
        let result = self.lower(body);
        self.loop_vars.pop();
        result
    }

    fn str_ref(&self, id: &str) -> Result<StrRef, CompileError> {
        if matches!(id, "$" | "#" | "@" | "!") {
            if self.string_loop_depth == 0 {
                return Err(CompileError::UnknownString {
                    rule: self.rule_name.to_string(),
                    identifier: id.to_string(),
                });
            }
            return Ok(StrRef::Current);
        }
        self.resolve(id).map(StrRef::Id)
    }

    fn resolve(&self, identifier: &str) -> Result<u32, CompileError> {
        self.info
            .string_id(identifier)
            .ok_or_else(|| CompileError::UnknownString {
                rule: self.rule_name.to_string(),
                identifier: identifier.to_string(),
            })
    }

    /// Plain identifiers: loop variables shadow rule names.
    fn ident(&mut self, name: &str) -> Result<Expr, CompileError> {
        if let Some(depth) = self.loop_vars.iter().rposition(|var| var == name) {
            return Ok(Expr::Var(depth as u32));
        }
        if let Some(target) = self.extraction.rule_index(name) {
            if target < self.index {
                return Ok(Expr::Rule(target));
            }
            return Err(CompileError::ForwardReference {
                rule: self.rule_name.to_string(),
                name: name.to_string(),
            });
        }
        Err(CompileError::UnknownIdentifier {
            rule: self.rule_name.to_string(),
            name: name.to_string(),
        })
    }

    fn expand_set(&self, set: &StringSet) -> Result<Vec<u32>, CompileError> {
        let ids = match set {
            StringSet::Them => self
                .info
                .declared()
                .iter()
                .map(|id| self.resolve(id))
                .collect::<Result<Vec<_>, _>>()?,
            StringSet::Ids(entries) => {
                let mut ids = Vec::new();
                for entry in entries {
                    if entry.ends_with('*') {
                        ids.extend(self.info.wildcard_ids(entry));
                    } else {
                        ids.push(self.resolve(entry)?);
                    }
                }
                ids
            }
        };
        if ids.is_empty() {
            return Err(CompileError::EmptyStringSet {
                rule: self.rule_name.to_string(),
            });
        }
        Ok(ids)
    }

    fn call(&mut self, function: &str, args: &[Expression]) -> Result<Expr, CompileError> {
        if function == MUTEX_FUNCTION {
            if let [Expression::Regex(pattern)] = args {
                let id = self
                    .info
                    .mutex_id(pattern)
                    .ok_or_else(|| CompileError::UnknownMutex {
                        rule: self.rule_name.to_string(),
                        pattern: pattern.clone(),
                    })?;
                return Ok(Expr::MutexMatch(id));
            }
        }
        Err(CompileError::UnsupportedCall {
            rule: self.rule_name.to_string(),
            function: function.to_string(),
        })
    }
}

fn is_signed(expr: &Expr) -> bool {
    match expr {
        Expr::Read { signed, .. } => *signed,
        Expr::Arith { lhs, rhs, .. } => is_signed(lhs) || is_signed(rhs),
        _ => false,
    }
}
