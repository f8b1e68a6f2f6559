//! A tree-walking interpreter for lowered IR.
//!
//! Exists to validate the numeric semantics of what the lowering pass emits:
//! `ParRange` loops run sequentially (their declared reductions then work as
//! plain accumulator updates), and the elementwise primitives (`IsNan`,
//! `Select`, `StrContains`, timestamp parsing) execute for real. Calls are
//! not executable; leftover `Global`/`MakeFunction` bindings are dead after
//! lowering and evaluate to `Unit`.

use std::collections::HashMap;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use regex::Regex;

use crate::error::InterpError;
use crate::ir::block::Label;
use crate::ir::function::FuncIr;
use crate::ir::instr::{BinOp, Const, Expr, Instr};
use crate::ir::types::DType;

/// Hard cap on executed instructions, so malformed control flow cannot spin
/// the test suite forever.
pub const MAX_STEPS: usize = 1_000_000;

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// A runtime value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    /// Nanoseconds since the epoch.
    Timestamp(i64),
    Arr(Vec<Value>),
    Shape(Vec<i64>),
    Unit,
}

impl Value {
    pub fn float_array(xs: &[f64]) -> Value {
        Value::Arr(xs.iter().map(|x| Value::Float(*x)).collect())
    }

    pub fn int_array(xs: &[i64]) -> Value {
        Value::Arr(xs.iter().map(|x| Value::Int(*x)).collect())
    }

    pub fn bool_array(xs: &[bool]) -> Value {
        Value::Arr(xs.iter().map(|x| Value::Bool(*x)).collect())
    }

    pub fn str_array(xs: &[&str]) -> Value {
        Value::Arr(xs.iter().map(|x| Value::Str((*x).to_string())).collect())
    }

    fn as_int(&self) -> Result<i64, InterpError> {
        match self {
            Value::Int(n) => Ok(*n),
            other => Err(type_error(format!("expected an integer, got {:?}", other))),
        }
    }

    fn as_bool(&self) -> Result<bool, InterpError> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(type_error(format!("expected a bool, got {:?}", other))),
        }
    }

    fn as_f64(&self) -> Result<f64, InterpError> {
        match self {
            Value::Int(n) => Ok(*n as f64),
            Value::Float(x) => Ok(*x),
            Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
            other => Err(type_error(format!("expected a number, got {:?}", other))),
        }
    }
}

fn type_error(detail: String) -> InterpError {
    InterpError::TypeError { detail }
}

/// The result of executing a function: the returned value (if any) plus the
/// final variable bindings, so callers can inspect output arrays written by
/// side-effect-only programs.
#[derive(Debug)]
pub struct Outcome {
    pub result: Option<Value>,
    pub env: HashMap<String, Value>,
}

/// Executes `func` from its entry block with the given initial bindings.
pub fn run(
    func: &FuncIr,
    inputs: Vec<(String, Value)>,
) -> Result<Outcome, InterpError> {
    let mut interp = Interp {
        func,
        env: inputs.into_iter().collect(),
        regexes: HashMap::new(),
        steps: 0,
    };
    let result = interp.exec()?;
    Ok(Outcome {
        result,
        env: interp.env,
    })
}

struct Interp<'a> {
    func: &'a FuncIr,
    env: HashMap<String, Value>,
    regexes: HashMap<String, Regex>,
    steps: usize,
}

enum Flow {
    Next,
    Goto(Label),
    Done(Option<Value>),
}

impl<'a> Interp<'a> {
    fn exec(&mut self) -> Result<Option<Value>, InterpError> {
        let mut label = self.func.entry;
        loop {
            let block = self
                .func
                .block(label)
                .ok_or(InterpError::UnknownBlock { label: label.0 })?;
            let mut flow = Flow::Next;
            for instr in &block.instrs {
                flow = self.step(instr)?;
                if !matches!(flow, Flow::Next) {
                    break;
                }
            }
            match flow {
                Flow::Goto(next) => label = next,
                Flow::Done(value) => return Ok(value),
                Flow::Next => {
                    return Err(InterpError::Unsupported {
                        detail: format!("block {} ended without a terminator", label),
                    })
                }
            }
        }
    }

    fn step(&mut self, instr: &Instr) -> Result<Flow, InterpError> {
        self.steps += 1;
        if self.steps > MAX_STEPS {
            return Err(InterpError::StepLimit { limit: MAX_STEPS });
        }
        match instr {
            Instr::Assign { target, value } => {
                let value = self.eval(value)?;
                self.env.insert(target.clone(), value);
                Ok(Flow::Next)
            }
            Instr::SetItem {
                array,
                index,
                value,
                ..
            } => {
                let idx = self.lookup(index)?.as_int()?;
                let value = self.lookup(value)?.clone();
                let arr = match self.env.get_mut(array) {
                    Some(Value::Arr(items)) => items,
                    Some(other) => {
                        return Err(type_error(format!(
                            "indexed store into a non-array: {:?}",
                            other
                        )))
                    }
                    None => {
                        return Err(InterpError::UndefinedVar {
                            name: array.clone(),
                        })
                    }
                };
                let len = arr.len();
                let slot = usize::try_from(idx)
                    .ok()
                    .and_then(|i| arr.get_mut(i))
                    .ok_or(InterpError::IndexOutOfBounds { idx, len })?;
                *slot = value;
                Ok(Flow::Next)
            }
            Instr::ParRange {
                index, len, body, ..
            } => {
                // Sequential simulation; the declared reductions behave as
                // ordinary accumulator updates.
                let n = self.lookup(len)?.as_int()?;
                for i in 0..n {
                    self.env.insert(index.clone(), Value::Int(i));
                    for instr in body {
                        self.step(instr)?;
                    }
                }
                Ok(Flow::Next)
            }
            Instr::Jump { target } => Ok(Flow::Goto(*target)),
            Instr::Branch {
                cond,
                if_true,
                if_false,
            } => {
                let cond = self.lookup(cond)?.as_bool()?;
                Ok(Flow::Goto(if cond { *if_true } else { *if_false }))
            }
            Instr::Return { value } => {
                let value = match value {
                    Some(name) => Some(self.lookup(name)?.clone()),
                    None => None,
                };
                Ok(Flow::Done(value))
            }
        }
    }

    fn lookup(&self, name: &str) -> Result<&Value, InterpError> {
        self.env.get(name).ok_or_else(|| InterpError::UndefinedVar {
            name: name.to_string(),
        })
    }

    fn eval(&mut self, expr: &Expr) -> Result<Value, InterpError> {
        match expr {
            Expr::Var(name) => Ok(self.lookup(name)?.clone()),
            Expr::Const(c) => Ok(match c {
                Const::Int(n) => Value::Int(*n),
                Const::Float(x) => Value::Float(*x),
                Const::Bool(b) => Value::Bool(*b),
                Const::Str(s) => Value::Str(s.clone()),
            }),
            // Dead after lowering; bind Unit rather than fail the program.
            Expr::Global { .. } | Expr::MakeFunction => Ok(Value::Unit),
            Expr::Call { callee, .. } => Err(InterpError::Unsupported {
                detail: format!("unlowered call to '{}'", callee),
            }),
            Expr::BinOp { op, lhs, rhs } => {
                let lhs = self.lookup(lhs)?.clone();
                let rhs = self.lookup(rhs)?.clone();
                binop(*op, &lhs, &rhs)
            }
            Expr::Getitem { value, index } => {
                let idx = self.lookup(index)?.as_int()?;
                match self.lookup(value)? {
                    Value::Arr(items) => {
                        let len = items.len();
                        usize::try_from(idx)
                            .ok()
                            .and_then(|i| items.get(i))
                            .cloned()
                            .ok_or(InterpError::IndexOutOfBounds { idx, len })
                    }
                    other => Err(type_error(format!("indexed a non-array: {:?}", other))),
                }
            }
            Expr::Len { array } => match self.lookup(array)? {
                Value::Arr(items) => Ok(Value::Int(items.len() as i64)),
                other => Err(type_error(format!("len of a non-array: {:?}", other))),
            },
            Expr::Shape { array } => match self.lookup(array)? {
                Value::Arr(items) => Ok(Value::Shape(vec![items.len() as i64])),
                other => Err(type_error(format!("shape of a non-array: {:?}", other))),
            },
            Expr::Alloc { size, dtype } => {
                let n = self.lookup(size)?.as_int()?;
                Ok(alloc(n, *dtype))
            }
            Expr::AllocShaped { shape, dtype } => match self.lookup(shape)? {
                Value::Shape(dims) => {
                    let n: i64 = dims.iter().product();
                    Ok(alloc(n, *dtype))
                }
                other => Err(type_error(format!(
                    "alloc_shaped needs a shape tuple, got {:?}",
                    other
                ))),
            },
            Expr::IsNan { value } => Ok(Value::Bool(match self.lookup(value)? {
                Value::Float(x) => x.is_nan(),
                _ => false,
            })),
            Expr::Select {
                cond,
                if_true,
                if_false,
            } => {
                let cond = self.lookup(cond)?.as_bool()?;
                let picked = if cond { if_true } else { if_false };
                Ok(self.lookup(picked)?.clone())
            }
            Expr::Cast { value, dtype } => {
                let value = self.lookup(value)?;
                cast(value, *dtype)
            }
            Expr::StrContains {
                value,
                pattern,
                regex,
            } => {
                let text = match self.lookup(value)? {
                    Value::Str(s) => s.clone(),
                    other => {
                        return Err(type_error(format!(
                            "string match over a non-string: {:?}",
                            other
                        )))
                    }
                };
                let pattern = match self.lookup(pattern)? {
                    Value::Str(s) => s.clone(),
                    other => {
                        return Err(type_error(format!(
                            "match pattern is not a string: {:?}",
                            other
                        )))
                    }
                };
                if *regex {
                    let re = self.regex_for(&pattern)?;
                    Ok(Value::Bool(re.is_match(&text)))
                } else {
                    Ok(Value::Bool(text.contains(&pattern)))
                }
            }
            Expr::ParseTimestamp { value } => match self.lookup(value)? {
                Value::Str(s) => parse_timestamp(s),
                other => Err(type_error(format!(
                    "timestamp parse of a non-string: {:?}",
                    other
                ))),
            },
            Expr::TimestampOf { value } => {
                let raw = self.lookup(value)?.as_int()?;
                Ok(Value::Timestamp(raw))
            }
        }
    }

    fn regex_for(&mut self, pattern: &str) -> Result<&Regex, InterpError> {
        if !self.regexes.contains_key(pattern) {
            let re = Regex::new(pattern).map_err(|e| InterpError::BadPattern {
                pattern: pattern.to_string(),
                detail: e.to_string(),
            })?;
            self.regexes.insert(pattern.to_string(), re);
        }
        Ok(&self.regexes[pattern])
    }
}

/// A freshly allocated array. Contents are unconstrained for consumers of
/// the lowered IR; here floats start as NaN and everything else as zero so
/// that reading an unwritten slot is conspicuous.
fn alloc(n: i64, dtype: DType) -> Value {
    let n = usize::try_from(n).unwrap_or(0);
    let fill = match dtype {
        DType::Bool => Value::Bool(false),
        DType::I64 | DType::DateTime64 => Value::Int(0),
        DType::F64 => Value::Float(f64::NAN),
    };
    Value::Arr(vec![fill; n])
}

fn cast(value: &Value, dtype: DType) -> Result<Value, InterpError> {
    match dtype {
        DType::F64 => Ok(Value::Float(value.as_f64()?)),
        DType::I64 | DType::DateTime64 => match value {
            Value::Int(n) => Ok(Value::Int(*n)),
            Value::Float(x) => Ok(Value::Int(*x as i64)),
            Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
            Value::Timestamp(n) => Ok(Value::Int(*n)),
            other => Err(type_error(format!("cannot cast {:?} to i64", other))),
        },
        DType::Bool => match value {
            Value::Bool(b) => Ok(Value::Bool(*b)),
            Value::Int(n) => Ok(Value::Bool(*n != 0)),
            other => Err(type_error(format!("cannot cast {:?} to bool", other))),
        },
    }
}

/// Accepts `YYYY-MM-DD` and `YYYY-MM-DD HH:MM:SS` literals; produces
/// nanoseconds since the epoch.
fn parse_timestamp(text: &str) -> Result<Value, InterpError> {
    let dt = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d").map(|d| d.and_time(NaiveTime::MIN))
        })
        .map_err(|_| InterpError::BadTimestamp {
            text: text.to_string(),
        })?;
    let utc = dt.and_utc();
    let nanos = utc.timestamp() * NANOS_PER_SEC + i64::from(utc.timestamp_subsec_nanos());
    Ok(Value::Timestamp(nanos))
}

/// Binary operations with numeric promotion. Division always produces a
/// float, so the reductions' `x / 0` edge cases yield inf/NaN instead of
/// trapping; comparisons with NaN are false, matching the missing-value
/// sentinel semantics.
fn binop(op: BinOp, lhs: &Value, rhs: &Value) -> Result<Value, InterpError> {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) if !matches!(op, BinOp::Div) => Ok(match op {
            BinOp::Add => Value::Int(a + b),
            BinOp::Sub => Value::Int(a - b),
            BinOp::Mul => Value::Int(a * b),
            BinOp::CmpEq => Value::Bool(a == b),
            BinOp::CmpNe => Value::Bool(a != b),
            BinOp::CmpLt => Value::Bool(a < b),
            BinOp::CmpLe => Value::Bool(a <= b),
            BinOp::CmpGt => Value::Bool(a > b),
            BinOp::CmpGe => Value::Bool(a >= b),
            BinOp::Div => unreachable!(),
        }),
        (Value::Str(a), Value::Str(b)) => cmp_only(op, a.partial_cmp(b), "strings"),
        (Value::Timestamp(a), Value::Timestamp(b)) => {
            cmp_only(op, a.partial_cmp(b), "timestamps")
        }
        (Value::Bool(a), Value::Bool(b)) => match op {
            BinOp::CmpEq => Ok(Value::Bool(a == b)),
            BinOp::CmpNe => Ok(Value::Bool(a != b)),
            _ => Err(type_error(format!("operator '{}' on bools", op))),
        },
        _ => {
            let a = lhs.as_f64()?;
            let b = rhs.as_f64()?;
            Ok(match op {
                BinOp::Add => Value::Float(a + b),
                BinOp::Sub => Value::Float(a - b),
                BinOp::Mul => Value::Float(a * b),
                BinOp::Div => Value::Float(a / b),
                BinOp::CmpEq => Value::Bool(a == b),
                BinOp::CmpNe => Value::Bool(a != b),
                BinOp::CmpLt => Value::Bool(a < b),
                BinOp::CmpLe => Value::Bool(a <= b),
                BinOp::CmpGt => Value::Bool(a > b),
                BinOp::CmpGe => Value::Bool(a >= b),
            })
        }
    }
}

fn cmp_only(
    op: BinOp,
    ord: Option<std::cmp::Ordering>,
    what: &str,
) -> Result<Value, InterpError> {
    use std::cmp::Ordering;
    if !op.is_cmp() {
        return Err(type_error(format!("operator '{}' on {}", op, what)));
    }
    let ord = ord.ok_or_else(|| type_error(format!("incomparable {}", what)))?;
    Ok(Value::Bool(match op {
        BinOp::CmpEq => ord == Ordering::Equal,
        BinOp::CmpNe => ord != Ordering::Equal,
        BinOp::CmpLt => ord == Ordering::Less,
        BinOp::CmpLe => ord != Ordering::Greater,
        BinOp::CmpGt => ord == Ordering::Greater,
        BinOp::CmpGe => ord != Ordering::Less,
        _ => unreachable!(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::block::Label;

    #[test]
    fn int_division_is_float() {
        let v = binop(BinOp::Div, &Value::Int(4), &Value::Int(0)).unwrap();
        assert_eq!(v, Value::Float(f64::INFINITY));
    }

    #[test]
    fn nan_compares_false() {
        let nan = Value::Float(f64::NAN);
        assert_eq!(binop(BinOp::CmpEq, &nan, &nan).unwrap(), Value::Bool(false));
        assert_eq!(binop(BinOp::CmpLt, &nan, &Value::Float(1.0)).unwrap(), Value::Bool(false));
    }

    #[test]
    fn parse_timestamp_date_and_datetime() {
        let day = parse_timestamp("1970-01-02").unwrap();
        assert_eq!(day, Value::Timestamp(86_400 * NANOS_PER_SEC));
        let later = parse_timestamp("1970-01-02 00:00:01").unwrap();
        assert_eq!(later, Value::Timestamp(86_401 * NANOS_PER_SEC));
        assert!(parse_timestamp("not a date").is_err());
    }

    #[test]
    fn par_range_runs_sequentially() {
        let mut f = FuncIr::new("t");
        let entry = f.entry;
        f.push(
            entry,
            Instr::Assign {
                target: "n".into(),
                value: Expr::Const(Const::Int(3)),
            },
        );
        f.push(
            entry,
            Instr::Assign {
                target: "acc".into(),
                value: Expr::Const(Const::Int(0)),
            },
        );
        f.push(
            entry,
            Instr::ParRange {
                index: "i".into(),
                len: "n".into(),
                body: vec![Instr::Assign {
                    target: "acc".into(),
                    value: Expr::BinOp {
                        op: BinOp::Add,
                        lhs: "acc".into(),
                        rhs: "i".into(),
                    },
                }],
                reduce: vec![],
            },
        );
        f.push(
            entry,
            Instr::Return {
                value: Some("acc".into()),
            },
        );

        let outcome = run(&f, vec![]).unwrap();
        assert_eq!(outcome.result, Some(Value::Int(3)));
    }

    #[test]
    fn unknown_jump_target_is_reported() {
        let mut f = FuncIr::new("t");
        let entry = f.entry;
        f.push(entry, Instr::Jump { target: Label(99) });
        let err = run(&f, vec![]).unwrap_err();
        assert!(matches!(err, InterpError::UnknownBlock { label: 99 }));
    }
}
