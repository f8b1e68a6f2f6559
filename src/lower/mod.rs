//! The column-lowering pass.
//!
//! Walks a typed function in topological block order and rewrites high-level
//! column operations into explicit parallel-range loops and scalar reductions
//! over the backing arrays. Dispatch is an ordered table of handlers; each
//! handler either replaces an assignment with a flat instruction list or
//! splices a multi-block [`Fragment`] into the host graph and continues in
//! the returned continuation block. A final reconciliation sweep erases every
//! remaining `Column` type from the type environment and call signatures.

pub mod fragment;
pub mod resolve;
pub mod templates;

use std::collections::{HashSet, VecDeque};
use std::mem;

use crate::error::LowerError;
use crate::ir::analysis::topo_order;
use crate::ir::block::Label;
use crate::ir::function::FuncIr;
use crate::ir::instr::{BinOp, Const, Expr, Instr};
use crate::ir::types::{column_to_array_ty, CallSigs, DType, Ty, TypeEnv};
use crate::lower::fragment::{include_fragment, Fragment, FragmentBuilder};
use crate::lower::resolve::{find_const, resolve_call, Resolution};

/// A non-fatal diagnostic emitted during lowering. Collected on the pass and
/// surfaced to the embedding pipeline after the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LowerWarning {
    pub func: String,
    pub message: String,
}

impl std::fmt::Display for LowerWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.func, self.message)
    }
}

/// What the boolean column filter writes into rejected positions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RejectFill {
    /// The floating missing-value sentinel.
    Nan,
    /// An explicit fill value, for destinations where NaN is not
    /// representable.
    Value(f64),
}

impl RejectFill {
    fn as_f64(self) -> f64 {
        match self {
            RejectFill::Nan => f64::NAN,
            RejectFill::Value(v) => v,
        }
    }
}

/// Pass configuration, passed explicitly by the embedding pipeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LowerOptions {
    /// Fill policy for positions the boolean column filter rejects.
    pub filter_fill: RejectFill,
}

impl Default for LowerOptions {
    fn default() -> Self {
        Self {
            filter_fill: RejectFill::Nan,
        }
    }
}

/// What a handler decided to do with a matched assignment.
#[derive(Debug)]
enum Rewrite {
    /// Replace the assignment with these instructions, staying in the
    /// current block.
    Replace(Vec<Instr>),
    /// Splice the fragment at this point and continue in the continuation
    /// block with `after`.
    Splice { frag: Fragment, after: Vec<Instr> },
}

/// A matched call site handed to a handler: the assignment target and the
/// call's argument variables.
struct CallSite<'i> {
    target: &'i str,
    args: &'i [String],
}

type BuildFn = for<'a, 'b, 'c, 'd> fn(
    &'a mut ColumnLowering<'b>,
    &'c CallSite<'d>,
) -> Result<Option<Rewrite>, LowerError>;

struct HandlerEntry {
    name: &'static str,
    origin: &'static str,
    arity: usize,
    build: BuildFn,
}

/// The ordered dispatch table for resolved runtime-primitive calls.
/// First match wins. The extremum reductions have builders in
/// [`templates`] but no entry here.
const HANDLERS: &[HandlerEntry] = &[
    HandlerEntry {
        name: "as_column",
        origin: "tablo.frame",
        arity: 1,
        build: h_passthrough,
    },
    HandlerEntry {
        name: "as_array",
        origin: "tablo.frame",
        arity: 1,
        build: h_as_array,
    },
    HandlerEntry {
        name: "as_rolling_array",
        origin: "tablo.frame",
        arity: 1,
        build: h_rolling,
    },
    HandlerEntry {
        name: "empty_like",
        origin: "tablo.arrays",
        arity: 1,
        build: h_empty_like,
    },
    HandlerEntry {
        name: "count",
        origin: "tablo.frame",
        arity: 1,
        build: h_count,
    },
    HandlerEntry {
        name: "fillna",
        origin: "tablo.frame",
        arity: 3,
        build: h_fillna,
    },
    HandlerEntry {
        name: "column_sum",
        origin: "tablo.frame",
        arity: 1,
        build: h_sum,
    },
    HandlerEntry {
        name: "mean",
        origin: "tablo.frame",
        arity: 1,
        build: h_mean,
    },
    HandlerEntry {
        name: "var",
        origin: "tablo.frame",
        arity: 1,
        build: h_var,
    },
    HandlerEntry {
        name: "timestamp_getitem",
        origin: "tablo.time",
        arity: 2,
        build: h_timestamp_getitem,
    },
    HandlerEntry {
        name: "timestamp_cmp",
        origin: "tablo.time",
        arity: 3,
        build: h_timestamp_cmp,
    },
    HandlerEntry {
        name: "contains_regex",
        origin: "tablo.strings",
        arity: 2,
        build: h_contains_regex,
    },
    HandlerEntry {
        name: "contains_literal",
        origin: "tablo.strings",
        arity: 2,
        build: h_contains_literal,
    },
];

/// The column-lowering pass over one function. Owns the typing context for
/// the duration of its run; the column-origin set is read-only.
pub struct ColumnLowering<'a> {
    func: &'a mut FuncIr,
    types: &'a mut TypeEnv,
    sigs: &'a mut CallSigs,
    col_origins: &'a HashSet<String>,
    options: LowerOptions,
    warnings: Vec<LowerWarning>,
}

impl<'a> ColumnLowering<'a> {
    pub fn new(
        func: &'a mut FuncIr,
        types: &'a mut TypeEnv,
        sigs: &'a mut CallSigs,
        col_origins: &'a HashSet<String>,
        options: LowerOptions,
    ) -> Self {
        Self {
            func,
            types,
            sigs,
            col_origins,
            options,
            warnings: Vec::new(),
        }
    }

    /// Runs the pass: rewrite every block in topological order, then
    /// reconcile the typing context and refresh the definition index.
    pub fn run(&mut self) -> Result<(), LowerError> {
        self.func.rebuild_definitions();
        for label in topo_order(self.func) {
            self.rewrite_block(label)?;
        }
        self.reconcile_types();
        self.func.rebuild_definitions();
        Ok(())
    }

    pub fn warnings(&self) -> &[LowerWarning] {
        &self.warnings
    }

    pub fn into_warnings(self) -> Vec<LowerWarning> {
        self.warnings
    }

    /// Rewrites one block. Splices move the insertion point to the
    /// continuation block; the remainder of the original instruction list
    /// (terminator included) keeps draining there, so fragment-internal
    /// blocks are never themselves re-scanned.
    fn rewrite_block(&mut self, label: Label) -> Result<(), LowerError> {
        let mut pending: VecDeque<Instr> = match self.func.block_mut(label) {
            Some(block) => mem::take(&mut block.instrs).into(),
            None => return Ok(()),
        };
        let mut cur = label;
        let mut done: Vec<Instr> = Vec::new();

        while let Some(instr) = pending.pop_front() {
            match &instr {
                Instr::Assign { .. } => match self.rewrite_assign(&instr)? {
                    Some(Rewrite::Replace(instrs)) => done.extend(instrs),
                    Some(Rewrite::Splice { frag, after }) => {
                        let prefix = mem::take(&mut done);
                        cur = include_fragment(self.func, cur, prefix, frag);
                        done.extend(after);
                    }
                    None => done.push(instr),
                },
                Instr::SetItem { call, .. } => {
                    let sig = self.sigs.get_mut(*call).ok_or(LowerError::MissingSignature {
                        func: self.func.name.clone(),
                        call: *call,
                    })?;
                    if let Some(first) = sig.arg_tys.first_mut() {
                        if first.is_column() {
                            *first = column_to_array_ty(first);
                        }
                    }
                    done.push(instr);
                }
                _ => done.push(instr),
            }
        }

        if let Some(block) = self.func.block_mut(cur) {
            block.instrs = done;
        }
        Ok(())
    }

    /// Dispatches one assignment through the handler chain. `None` means no
    /// handler matched and the instruction stays untouched.
    fn rewrite_assign(&mut self, instr: &Instr) -> Result<Option<Rewrite>, LowerError> {
        let (target, value) = match instr {
            Instr::Assign { target, value } => (target, value),
            _ => return Ok(None),
        };

        match value {
            Expr::BinOp { op, lhs, rhs } if op.is_cmp() => self.rewrite_text_cmp(target, *op, lhs, rhs),
            Expr::Getitem { value, index } => self.rewrite_column_filter(target, value, index),
            Expr::Call { callee, args, .. } => {
                match resolve_call(self.func, callee) {
                    Resolution::Known { name, origin } => {
                        for entry in HANDLERS {
                            if entry.name == name && entry.origin == origin {
                                if args.len() != entry.arity {
                                    return Err(LowerError::BadArity {
                                        func: self.func.name.clone(),
                                        name,
                                        expected: entry.arity,
                                        got: args.len(),
                                    });
                                }
                                let site = CallSite {
                                    target: target.as_str(),
                                    args: args.as_slice(),
                                };
                                return (entry.build)(self, &site);
                            }
                        }
                        // A resolved global with no handler is some other
                        // runtime function; not ours to rewrite.
                        Ok(None)
                    }
                    Resolution::Opaque => Ok(None),
                    Resolution::Unknown => {
                        self.warnings.push(LowerWarning {
                            func: self.func.name.clone(),
                            message: format!(
                                "call target '{}' could not be resolved; instruction left unchanged",
                                callee
                            ),
                        });
                        Ok(None)
                    }
                }
            }
            _ => Ok(None),
        }
    }

    /// Relational comparison with at least one text-array operand becomes an
    /// elementwise boolean loop.
    fn rewrite_text_cmp(
        &mut self,
        target: &str,
        op: BinOp,
        lhs: &str,
        rhs: &str,
    ) -> Result<Option<Rewrite>, LowerError> {
        let lhs_is_array = self.ty_of(lhs)?.is_text_array();
        let rhs_is_array = self.ty_of(rhs)?.is_text_array();
        if !lhs_is_array && !rhs_is_array {
            return Ok(None);
        }
        self.types.set(target, Ty::array(DType::Bool));
        let fb = self.builder();
        let frag = templates::text_cmp(fb, op, lhs, lhs_is_array, rhs, rhs_is_array)?;
        Ok(Some(self.splice_with_result(target, frag)?))
    }

    /// The boolean column filter: `target = source[mask]` where target and
    /// source both come from column accesses and the index is boolean.
    fn rewrite_column_filter(
        &mut self,
        target: &str,
        source: &str,
        index: &str,
    ) -> Result<Option<Rewrite>, LowerError> {
        if !self.col_origins.contains(target) || !self.col_origins.contains(source) {
            return Ok(None);
        }
        let mask_ty = match self.types.get(index) {
            Some(ty) => ty,
            None => return Ok(None),
        };
        if !mask_ty.is_bool_array() {
            return Ok(None);
        }
        let dtype = match self.ty_of(source)?.dtype() {
            Some(d) => d,
            None => return Ok(None),
        };
        let fill = self.options.filter_fill.as_f64();
        let fb = self.builder();
        let frag = templates::column_filter(fb, target, source, index, dtype, fill)?;
        Ok(Some(Rewrite::Splice {
            frag,
            after: vec![],
        }))
    }

    fn builder(&mut self) -> FragmentBuilder<'_> {
        FragmentBuilder::new(self.func, self.types, self.sigs)
    }

    fn ty_of(&self, name: &str) -> Result<Ty, LowerError> {
        self.types
            .get(name)
            .cloned()
            .ok_or_else(|| LowerError::MissingType {
                func: self.func.name.clone(),
                var: name.into(),
            })
    }

    /// Wraps a value-producing fragment: the original assignment target is
    /// bound to the fragment's result in the continuation block. A fragment
    /// without a result temporary here is an invariant violation.
    fn splice_with_result(&self, target: &str, frag: Fragment) -> Result<Rewrite, LowerError> {
        let result = frag
            .result
            .clone()
            .ok_or_else(|| LowerError::MissingFragmentResult {
                func: self.func.name.clone(),
            })?;
        Ok(Rewrite::Splice {
            after: vec![Instr::Assign {
                target: target.to_owned(),
                value: Expr::Var(result),
            }],
            frag,
        })
    }

    /// Erases every remaining column type: the type environment and every
    /// call signature (arguments and return) get the backing array type.
    fn reconcile_types(&mut self) {
        for ty in self.types.values_mut() {
            *ty = column_to_array_ty(ty);
        }
        for sig in self.sigs.values_mut() {
            for ty in sig.arg_tys.iter_mut() {
                *ty = column_to_array_ty(ty);
            }
            sig.ret_ty = column_to_array_ty(&sig.ret_ty);
        }
    }
}

/// Runs column lowering over one function and returns the warnings it
/// collected.
pub fn lower_columns(
    func: &mut FuncIr,
    types: &mut TypeEnv,
    sigs: &mut CallSigs,
    col_origins: &HashSet<String>,
    options: LowerOptions,
) -> Result<Vec<LowerWarning>, LowerError> {
    let mut pass = ColumnLowering::new(func, types, sigs, col_origins, options);
    pass.run()?;
    Ok(pass.into_warnings())
}

// Handlers. Each corresponds to one resolved primitive in `HANDLERS`.

/// The identity wrap: the target simply aliases the original argument.
fn h_passthrough(
    _pass: &mut ColumnLowering<'_>,
    site: &CallSite<'_>,
) -> Result<Option<Rewrite>, LowerError> {
    Ok(Some(Rewrite::Replace(vec![Instr::Assign {
        target: site.target.to_owned(),
        value: Expr::Var(site.args[0].clone()),
    }])))
}

/// Array coercion: a no-op when the argument is already array-backed.
fn h_as_array(
    pass: &mut ColumnLowering<'_>,
    site: &CallSite<'_>,
) -> Result<Option<Rewrite>, LowerError> {
    let ty = pass.ty_of(&site.args[0])?;
    if matches!(ty, Ty::Array { .. } | Ty::StrArray) || ty.is_column() {
        h_passthrough(pass, site)
    } else {
        Ok(None)
    }
}

/// Rolling-window coercion: floating input passes through, anything else is
/// cast to float64 elementwise.
fn h_rolling(
    pass: &mut ColumnLowering<'_>,
    site: &CallSite<'_>,
) -> Result<Option<Rewrite>, LowerError> {
    let arg = &site.args[0];
    let dtype = match pass.ty_of(arg)?.dtype() {
        Some(d) => d,
        None => return Ok(None),
    };
    if dtype.is_float() {
        return h_passthrough(pass, site);
    }
    let fb = pass.builder();
    let frag = templates::cast_to_float(fb, arg, dtype)?;
    Ok(Some(pass.splice_with_result(site.target, frag)?))
}

/// Allocation shaped like another array: length (1-D) or shape (N-D) of the
/// source, same dtype, contents uninitialized.
fn h_empty_like(
    pass: &mut ColumnLowering<'_>,
    site: &CallSite<'_>,
) -> Result<Option<Rewrite>, LowerError> {
    let src = &site.args[0];
    let (dtype, ndim) = match pass.ty_of(src)? {
        Ty::Array { dtype, ndim } => (dtype, ndim),
        Ty::Column(dtype) => (dtype, 1),
        _ => return Ok(None),
    };
    let mut instrs = Vec::new();
    let value = if ndim == 1 {
        let len = pass.func.fresh_temp("len");
        pass.types.set(len.clone(), Ty::Scalar(DType::I64));
        instrs.push(Instr::Assign {
            target: len.clone(),
            value: Expr::Len { array: src.clone() },
        });
        Expr::Alloc { size: len, dtype }
    } else {
        let shape = pass.func.fresh_temp("shape");
        pass.types.set(shape.clone(), Ty::Shape(ndim));
        instrs.push(Instr::Assign {
            target: shape.clone(),
            value: Expr::Shape { array: src.clone() },
        });
        Expr::AllocShaped { shape, dtype }
    };
    pass.types.set(site.target, Ty::Array { dtype, ndim });
    instrs.push(Instr::Assign {
        target: site.target.to_owned(),
        value,
    });
    Ok(Some(Rewrite::Replace(instrs)))
}

fn h_count(
    pass: &mut ColumnLowering<'_>,
    site: &CallSite<'_>,
) -> Result<Option<Rewrite>, LowerError> {
    let fb = pass.builder();
    let frag = templates::count_reduction(fb, &site.args[0])?;
    Ok(Some(pass.splice_with_result(site.target, frag)?))
}

/// `fillna(out, in, fill)` is side-effect-only: the call's own target is
/// dropped along with the call.
fn h_fillna(
    pass: &mut ColumnLowering<'_>,
    site: &CallSite<'_>,
) -> Result<Option<Rewrite>, LowerError> {
    let fb = pass.builder();
    let frag = templates::fillna(fb, &site.args[0], &site.args[1], &site.args[2])?;
    Ok(Some(Rewrite::Splice {
        frag,
        after: vec![],
    }))
}

fn h_sum(
    pass: &mut ColumnLowering<'_>,
    site: &CallSite<'_>,
) -> Result<Option<Rewrite>, LowerError> {
    let fb = pass.builder();
    let frag = templates::sum_reduction(fb, &site.args[0])?;
    Ok(Some(pass.splice_with_result(site.target, frag)?))
}

fn h_mean(
    pass: &mut ColumnLowering<'_>,
    site: &CallSite<'_>,
) -> Result<Option<Rewrite>, LowerError> {
    let fb = pass.builder();
    let frag = templates::mean_reduction(fb, &site.args[0])?;
    Ok(Some(pass.splice_with_result(site.target, frag)?))
}

fn h_var(
    pass: &mut ColumnLowering<'_>,
    site: &CallSite<'_>,
) -> Result<Option<Rewrite>, LowerError> {
    let fb = pass.builder();
    let frag = templates::var_reduction(fb, &site.args[0])?;
    Ok(Some(pass.splice_with_result(site.target, frag)?))
}

/// Timestamp element read: raw element, reinterpreted as i64, converted to
/// the domain timestamp representation. Flat, stays in the current block.
fn h_timestamp_getitem(
    pass: &mut ColumnLowering<'_>,
    site: &CallSite<'_>,
) -> Result<Option<Rewrite>, LowerError> {
    let (arr, idx) = (&site.args[0], &site.args[1]);
    let elem = pass.func.fresh_temp("e");
    pass.types.set(elem.clone(), Ty::Scalar(DType::DateTime64));
    let raw = pass.func.fresh_temp("raw");
    pass.types.set(raw.clone(), Ty::Scalar(DType::I64));
    pass.types.set(site.target, Ty::Timestamp);
    Ok(Some(Rewrite::Replace(vec![
        Instr::Assign {
            target: elem.clone(),
            value: Expr::Getitem {
                value: arr.clone(),
                index: idx.clone(),
            },
        },
        Instr::Assign {
            target: raw.clone(),
            value: Expr::Cast {
                value: elem,
                dtype: DType::I64,
            },
        },
        Instr::Assign {
            target: site.target.to_owned(),
            value: Expr::TimestampOf { value: raw },
        },
    ])))
}

/// The comparison wrapper `timestamp_cmp(op, lhs, rhs)`: the operator must
/// be a compile-time string constant, and exactly one of the operands is a
/// datetime array, the other a text literal parsed once outside the loop.
fn h_timestamp_cmp(
    pass: &mut ColumnLowering<'_>,
    site: &CallSite<'_>,
) -> Result<Option<Rewrite>, LowerError> {
    let op_var = &site.args[0];
    let op = match find_const(pass.func, op_var) {
        Some(Const::Str(text)) => BinOp::parse_cmp(text),
        _ => None,
    };
    let op = op.ok_or_else(|| LowerError::UnresolvedCmpOperator {
        func: pass.func.name.clone(),
        var: op_var.clone(),
    })?;

    let (lhs, rhs) = (&site.args[1], &site.args[2]);
    let lhs_is_ts = pass.ty_of(lhs)?.dtype() == Some(DType::DateTime64);
    let rhs_is_ts = pass.ty_of(rhs)?.dtype() == Some(DType::DateTime64);
    let (op, arr, text) = match (lhs_is_ts, rhs_is_ts) {
        (true, false) => (op, lhs, rhs),
        // Array on the right: mirror the operator so the template can keep
        // the array element on the left.
        (false, true) => (mirror_cmp(op), rhs, lhs),
        _ => return Ok(None),
    };
    pass.types.set(site.target, Ty::array(DType::Bool));
    let fb = pass.builder();
    let frag = templates::timestamp_cmp(fb, op, arr, text)?;
    Ok(Some(pass.splice_with_result(site.target, frag)?))
}

fn h_contains_regex(
    pass: &mut ColumnLowering<'_>,
    site: &CallSite<'_>,
) -> Result<Option<Rewrite>, LowerError> {
    h_contains(pass, site, true)
}

fn h_contains_literal(
    pass: &mut ColumnLowering<'_>,
    site: &CallSite<'_>,
) -> Result<Option<Rewrite>, LowerError> {
    h_contains(pass, site, false)
}

fn h_contains(
    pass: &mut ColumnLowering<'_>,
    site: &CallSite<'_>,
    regex: bool,
) -> Result<Option<Rewrite>, LowerError> {
    let (arr, pattern) = (&site.args[0], &site.args[1]);
    if !pass.ty_of(arr)?.is_text_array() {
        return Ok(None);
    }
    pass.types.set(site.target, Ty::array(DType::Bool));
    let fb = pass.builder();
    let frag = templates::str_contains(fb, arr, pattern, regex)?;
    Ok(Some(pass.splice_with_result(site.target, frag)?))
}

/// The operator that gives the same result with its operands swapped.
fn mirror_cmp(op: BinOp) -> BinOp {
    match op {
        BinOp::CmpLt => BinOp::CmpGt,
        BinOp::CmpLe => BinOp::CmpGe,
        BinOp::CmpGt => BinOp::CmpLt,
        BinOp::CmpGe => BinOp::CmpLe,
        other => other,
    }
}
