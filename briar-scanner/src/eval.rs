//! The condition interpreter.
//!
//! Every expression evaluates to a 64-bit unsigned value; booleans are
//! `0`/`1` and anything non-zero is truthy, so the `UNDEFINED` sentinel
//! flows through arithmetic and comparisons as an opaque very-large
//! number. Loop variables live on an explicit scope stack indexed by
//! the positions fixed at lowering time; string loops keep their own
//! stack for the bare `$` forms. Cross-rule references go through
//! [`Evaluator::evaluate_rule`], which memoizes each rule's outcome in
//! the scan context and fires the host callback on a public rule's
//! first (and only) transition to a hit.

use briar_rules::{ArithOp, CmpOp, Expr, Program, ReadWidth, StrRef, Visibility, UNDEFINED};

use crate::context::{RuleState, ScanContext};

/// Evaluate every rule of `program` in global-index order.
pub(crate) fn run(
    program: &Program,
    ctx: &mut ScanContext,
    data: &[u8],
    on_hit: &mut dyn FnMut(&str),
) {
    let mut eval = Evaluator {
        program,
        ctx,
        data,
        on_hit,
        vars: Vec::new(),
        strings: Vec::new(),
    };
    for index in 0..program.rules.len() {
        eval.evaluate_rule(index);
    }
}

struct Evaluator<'a> {
    program: &'a Program,
    ctx: &'a mut ScanContext,
    data: &'a [u8],
    on_hit: &'a mut dyn FnMut(&str),
    /// Integer loop variables, outermost first.
    vars: Vec<u64>,
    /// Pattern ids bound by enclosing string loops, innermost last.
    strings: Vec<u32>,
}

impl Evaluator<'_> {
    fn evaluate_rule(&mut self, index: usize) -> bool {
        match self.ctx.states[index] {
            RuleState::Hit => true,
            RuleState::NoHit => false,
            RuleState::NotEvaluated => {
                let program = self.program;
                let rule = &program.rules[index];
                // A referenced rule evaluates in its own scope, not the
                // caller's.
                let vars = std::mem::take(&mut self.vars);
                let strings = std::mem::take(&mut self.strings);
                let hit = truthy(self.eval(&rule.condition));
                self.vars = vars;
                self.strings = strings;

                self.ctx.states[index] = if hit { RuleState::Hit } else { RuleState::NoHit };
                if hit && rule.visibility == Visibility::Public {
                    (self.on_hit)(&rule.name);
                }
                hit
            }
        }
    }

    fn eval(&mut self, expr: &Expr) -> u64 {
        match expr {
            Expr::Bool(value) => *value as u64,
            Expr::Int(value) => *value,
            Expr::Filesize => self.data.len() as u64,
            Expr::Match(s) => (self.match_count(*s) > 0) as u64,
            Expr::Count(s) => self.match_count(*s),
            Expr::Offset { s, index } => {
                let index = self.index_arg(index);
                self.record(*s).map_or(UNDEFINED, |r| r.offset(index))
            }
            Expr::Length { s, index } => {
                let index = self.index_arg(index);
                self.record(*s).map_or(UNDEFINED, |r| r.length(index))
            }
            Expr::MatchAt { s, at } => {
                let at = self.eval(at);
                self.offsets(*s).iter().any(|&offset| offset == at) as u64
            }
            Expr::MatchIn { s, low, high } => {
                let low = self.eval(low);
                let high = self.eval(high);
                self.offsets(*s)
                    .iter()
                    .any(|&offset| low <= offset && offset < high) as u64
            }
            Expr::MutexMatch(id) => self
                .ctx
                .mutex_matches
                .get(*id as usize)
                .map_or(0, |&count| (count > 0) as u64),
            Expr::Rule(index) => self.evaluate_rule(*index as usize) as u64,
            Expr::Var(depth) => self
                .vars
                .get(*depth as usize)
                .copied()
                .unwrap_or(UNDEFINED),
            Expr::Read {
                width,
                signed,
                big_endian,
                at,
            } => {
                let at = self.eval(at);
                read_data(self.data, *width, *signed, *big_endian, at)
            }
            Expr::Not(inner) => (!truthy(self.eval(inner))) as u64,
            Expr::And(lhs, rhs) => (truthy(self.eval(lhs)) && truthy(self.eval(rhs))) as u64,
            Expr::Or(lhs, rhs) => (truthy(self.eval(lhs)) || truthy(self.eval(rhs))) as u64,
            Expr::Cmp {
                op,
                signed,
                lhs,
                rhs,
            } => {
                let lhs = self.eval(lhs);
                let rhs = self.eval(rhs);
                compare(*op, *signed, lhs, rhs) as u64
            }
            Expr::Arith { op, lhs, rhs } => {
                let lhs = self.eval(lhs);
                let rhs = self.eval(rhs);
                arith(*op, lhs, rhs)
            }
            Expr::Of { needed, ids } => {
                count_with_tolerance(*needed, ids.len() as u64, |i| {
                    self.match_count(StrRef::Id(ids[i as usize])) > 0
                }) as u64
            }
            Expr::ForStrings { needed, ids, body } => {
                count_with_tolerance(*needed, ids.len() as u64, |i| {
                    self.strings.push(ids[i as usize]);
                    let ok = truthy(self.eval(body));
                    self.strings.pop();
                    ok
                }) as u64
            }
            Expr::ForInts {
                needed,
                items,
                body,
            } => {
                let values: Vec<u64> = items.iter().map(|item| self.eval(item)).collect();
                count_with_tolerance(*needed, values.len() as u64, |i| {
                    self.vars.push(values[i as usize]);
                    let ok = truthy(self.eval(body));
                    self.vars.pop();
                    ok
                }) as u64
            }
            Expr::ForRange {
                quant,
                low,
                high,
                body,
            } => {
                let low = self.eval(low);
                let high = self.eval(high);
                if low == UNDEFINED || high == UNDEFINED {
                    return 0;
                }
                let n = high.saturating_sub(low);
                let needed = quant.needed(n);
                count_with_tolerance(needed, n, |i| {
                    self.vars.push(low + i);
                    let ok = truthy(self.eval(body));
                    self.vars.pop();
                    ok
                }) as u64
            }
        }
    }

    fn index_arg(&mut self, index: &Option<Box<Expr>>) -> u64 {
        match index {
            // 1-based in the source, defaulting to the first match.
            Some(expr) => self.eval(expr).wrapping_sub(1),
            None => 0,
        }
    }

    fn str_id(&self, s: StrRef) -> Option<u32> {
        match s {
            StrRef::Id(id) => Some(id),
            StrRef::Current => self.strings.last().copied(),
        }
    }

    fn record(&self, s: StrRef) -> Option<&crate::context::MatchRecord> {
        self.str_id(s)
            .and_then(|id| self.ctx.matches.get(id as usize))
    }

    fn match_count(&self, s: StrRef) -> u64 {
        self.record(s).map_or(0, |record| u64::from(record.count))
    }

    fn offsets(&self, s: StrRef) -> &[u64] {
        self.record(s)
            .map_or(&[], |record| record.offsets.as_slice())
    }
}

fn truthy(value: u64) -> bool {
    value != 0
}

/// The shared counting loop of `of` and the `for` forms: succeed as
/// soon as `needed` iterations hit, fail as soon as the remaining
/// iterations cannot reach `needed` anymore.
fn count_with_tolerance(needed: u64, total: u64, mut hit_at: impl FnMut(u64) -> bool) -> bool {
    if needed > total {
        return false;
    }
    let tolerance = total - needed;
    let mut hits = 0u64;
    for index in 0..total {
        if index - hits > tolerance {
            return false;
        }
        if hit_at(index) {
            hits += 1;
            if hits == needed {
                return true;
            }
        }
    }
    false
}

fn compare(op: CmpOp, signed: bool, lhs: u64, rhs: u64) -> bool {
    if signed {
        let (lhs, rhs) = (lhs as i64, rhs as i64);
        match op {
            CmpOp::Eq => lhs == rhs,
            CmpOp::Ne => lhs != rhs,
            CmpOp::Lt => lhs < rhs,
            CmpOp::Le => lhs <= rhs,
            CmpOp::Gt => lhs > rhs,
            CmpOp::Ge => lhs >= rhs,
        }
    } else {
        match op {
            CmpOp::Eq => lhs == rhs,
            CmpOp::Ne => lhs != rhs,
            CmpOp::Lt => lhs < rhs,
            CmpOp::Le => lhs <= rhs,
            CmpOp::Gt => lhs > rhs,
            CmpOp::Ge => lhs >= rhs,
        }
    }
}

fn arith(op: ArithOp, lhs: u64, rhs: u64) -> u64 {
    match op {
        ArithOp::Add => lhs.wrapping_add(rhs),
        ArithOp::Sub => lhs.wrapping_sub(rhs),
        ArithOp::Mul => lhs.wrapping_mul(rhs),
        ArithOp::Mod => {
            if rhs == 0 {
                UNDEFINED
            } else {
                lhs % rhs
            }
        }
        ArithOp::BitAnd => lhs & rhs,
        ArithOp::BitXor => lhs ^ rhs,
    }
}

/// Bounds-checked little/big-endian integer read; out-of-range yields
/// `UNDEFINED`, signed values sign-extend into 64 bits.
fn read_data(data: &[u8], width: ReadWidth, signed: bool, big_endian: bool, offset: u64) -> u64 {
    let Some(end) = offset.checked_add(width.bytes()) else {
        return UNDEFINED;
    };
    if end > data.len() as u64 {
        return UNDEFINED;
    }
    let bytes = &data[offset as usize..end as usize];
    let raw = match width {
        ReadWidth::W8 => u64::from(bytes[0]),
        ReadWidth::W16 => {
            let bytes = [bytes[0], bytes[1]];
            u64::from(if big_endian {
                u16::from_be_bytes(bytes)
            } else {
                u16::from_le_bytes(bytes)
            })
        }
        ReadWidth::W32 => {
            let bytes = [bytes[0], bytes[1], bytes[2], bytes[3]];
            u64::from(if big_endian {
                u32::from_be_bytes(bytes)
            } else {
                u32::from_le_bytes(bytes)
            })
        }
    };
    if signed {
        match width {
            ReadWidth::W8 => raw as u8 as i8 as i64 as u64,
            ReadWidth::W16 => raw as u16 as i16 as i64 as u64,
            ReadWidth::W32 => raw as u32 as i32 as i64 as u64,
        }
    } else {
        raw
    }
}
