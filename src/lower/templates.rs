//! The fragment-builder catalogue: one parametrized builder per rewrite
//! template, each a pure function from call-site variables and their types
//! to a typed [`Fragment`].
//!
//! Conventions shared by every builder:
//! - one block per phase (setup, loop, combine), so each parallel loop is a
//!   region of its own;
//! - NaN-skipping reductions accumulate a valid-value count alongside the
//!   main accumulator and route the empty case through a NaN result;
//! - loop bodies touch only their own index of any array plus the declared
//!   reduction accumulators.

use crate::error::LowerError;
use crate::ir::instr::{BinOp, Expr, ReduceOp, Reduction};
use crate::ir::types::{DType, Ty};
use crate::lower::fragment::{Fragment, FragmentBuilder};

fn getitem(array: &str, index: &str) -> Expr {
    Expr::Getitem {
        value: array.into(),
        index: index.into(),
    }
}

fn binop(op: BinOp, lhs: &str, rhs: &str) -> Expr {
    Expr::BinOp {
        op,
        lhs: lhs.into(),
        rhs: rhs.into(),
    }
}

fn select(cond: &str, if_true: &str, if_false: &str) -> Expr {
    Expr::Select {
        cond: cond.into(),
        if_true: if_true.into(),
        if_false: if_false.into(),
    }
}

/// `res = select(count == 0, NaN, value)` — the shared empty-input policy
/// of the NaN-skipping reductions.
fn guard_empty(fb: &mut FragmentBuilder<'_>, value: &str, count: &str) -> String {
    let zero = fb.const_int("zero", 0);
    let empty = fb.emit("empty", binop(BinOp::CmpEq, count, &zero), Ty::Scalar(DType::Bool));
    let nan = fb.const_float("nan", f64::NAN);
    fb.emit("res", select(&empty, &nan, value), Ty::Scalar(DType::F64))
}

/// Per-iteration `count += isnan(val) ? 0 : 1`.
fn count_valid(fb: &mut FragmentBuilder<'_>, count: &str, nan: &str) {
    let zero = fb.const_int("zero", 0);
    let one = fb.const_int("one", 1);
    let inc = fb.emit("inc", select(nan, &zero, &one), Ty::Scalar(DType::I64));
    fb.assign(count, binop(BinOp::Add, count, &inc));
}

/// Elementwise relational comparison where at least one operand is a text
/// array. The non-array operand is treated as a per-iteration scalar.
/// Produces a boolean array.
pub fn text_cmp(
    mut fb: FragmentBuilder<'_>,
    op: BinOp,
    lhs: &str,
    lhs_is_array: bool,
    rhs: &str,
    rhs_is_array: bool,
) -> Result<Fragment, LowerError> {
    let len_of = if lhs_is_array { lhs } else { rhs };
    let len = fb.emit("len", Expr::Len { array: len_of.into() }, Ty::Scalar(DType::I64));
    let out = fb.emit(
        "out",
        Expr::Alloc {
            size: len.clone(),
            dtype: DType::Bool,
        },
        Ty::array(DType::Bool),
    );
    fb.next_block();
    fb.par_range(&len, vec![], |fb, i| {
        let a = if lhs_is_array {
            fb.emit("a", getitem(lhs, i), Ty::Str)
        } else {
            lhs.to_owned()
        };
        let b = if rhs_is_array {
            fb.emit("b", getitem(rhs, i), Ty::Str)
        } else {
            rhs.to_owned()
        };
        let cmp = fb.emit("cmp", binop(op, &a, &b), Ty::Scalar(DType::Bool));
        fb.set_item(&out, i, &cmp)
    })?;
    fb.next_block();
    Ok(fb.finish(Some(out)))
}

/// Elementwise cast of a non-floating array to float64.
pub fn cast_to_float(
    mut fb: FragmentBuilder<'_>,
    arr: &str,
    elem: DType,
) -> Result<Fragment, LowerError> {
    let len = fb.emit("len", Expr::Len { array: arr.into() }, Ty::Scalar(DType::I64));
    let out = fb.emit(
        "out",
        Expr::Alloc {
            size: len.clone(),
            dtype: DType::F64,
        },
        Ty::array(DType::F64),
    );
    fb.next_block();
    fb.par_range(&len, vec![], |fb, i| {
        let v = fb.emit("v", getitem(arr, i), Ty::Scalar(elem));
        let c = fb.emit(
            "c",
            Expr::Cast {
                value: v,
                dtype: DType::F64,
            },
            Ty::Scalar(DType::F64),
        );
        fb.set_item(&out, i, &c)
    })?;
    fb.next_block();
    Ok(fb.finish(Some(out)))
}

/// Column boolean filter: allocate `target` shaped like `source`, then
/// `target[i] = mask[i] ? source[i] : fill` elementwise. Columns share one
/// length, so rejected positions are filled rather than compacted.
///
/// Side-effect-only: `target` already exists in the host function.
pub fn column_filter(
    mut fb: FragmentBuilder<'_>,
    target: &str,
    source: &str,
    mask: &str,
    dtype: DType,
    fill: f64,
) -> Result<Fragment, LowerError> {
    let len = fb.emit(
        "len",
        Expr::Len {
            array: source.into(),
        },
        Ty::Scalar(DType::I64),
    );
    fb.assign(
        target,
        Expr::Alloc {
            size: len.clone(),
            dtype,
        },
    );
    fb.next_block();
    fb.par_range(&len, vec![], |fb, i| {
        let keep = fb.emit("keep", getitem(mask, i), Ty::Scalar(DType::Bool));
        let v = fb.emit("v", getitem(source, i), Ty::Scalar(dtype));
        let fl = fb.const_float("fill", fill);
        let s = fb.emit("s", select(&keep, &v, &fl), Ty::Scalar(dtype));
        fb.set_item(target, i, &s)
    })?;
    fb.next_block();
    Ok(fb.finish(None))
}

/// NaN-skipping count: the number of non-missing elements, as an integer.
pub fn count_reduction(mut fb: FragmentBuilder<'_>, arr: &str) -> Result<Fragment, LowerError> {
    let count = fb.const_int("count", 0);
    let len = fb.emit("len", Expr::Len { array: arr.into() }, Ty::Scalar(DType::I64));
    fb.next_block();
    fb.par_range(
        &len,
        vec![Reduction {
            var: count.clone(),
            op: ReduceOp::Sum,
        }],
        |fb, i| {
            let val = fb.emit("val", getitem(arr, i), Ty::Scalar(DType::F64));
            let nan = fb.emit("nan", Expr::IsNan { value: val }, Ty::Scalar(DType::Bool));
            count_valid(fb, &count, &nan);
            Ok(())
        },
    )?;
    fb.next_block();
    let res = fb.emit("res", Expr::Var(count), Ty::Scalar(DType::I64));
    Ok(fb.finish(Some(res)))
}

/// NaN-skipping sum. Zero valid values yield NaN.
pub fn sum_reduction(mut fb: FragmentBuilder<'_>, arr: &str) -> Result<Fragment, LowerError> {
    let acc = fb.const_float("s", 0.0);
    let count = fb.const_int("count", 0);
    let len = fb.emit("len", Expr::Len { array: arr.into() }, Ty::Scalar(DType::I64));
    fb.next_block();
    fb.par_range(
        &len,
        vec![
            Reduction {
                var: acc.clone(),
                op: ReduceOp::Sum,
            },
            Reduction {
                var: count.clone(),
                op: ReduceOp::Sum,
            },
        ],
        |fb, i| {
            let val = fb.emit("val", getitem(arr, i), Ty::Scalar(DType::F64));
            let nan = fb.emit("nan", Expr::IsNan { value: val.clone() }, Ty::Scalar(DType::Bool));
            let zero = fb.const_float("fzero", 0.0);
            let add = fb.emit("add", select(&nan, &zero, &val), Ty::Scalar(DType::F64));
            fb.assign(&acc, binop(BinOp::Add, &acc, &add));
            count_valid(fb, &count, &nan);
            Ok(())
        },
    )?;
    fb.next_block();
    let res = guard_empty(&mut fb, &acc, &count);
    Ok(fb.finish(Some(res)))
}

/// NaN-skipping mean: `sum / count`, NaN when no valid values.
pub fn mean_reduction(mut fb: FragmentBuilder<'_>, arr: &str) -> Result<Fragment, LowerError> {
    let acc = fb.const_float("s", 0.0);
    let count = fb.const_int("count", 0);
    let len = fb.emit("len", Expr::Len { array: arr.into() }, Ty::Scalar(DType::I64));
    fb.next_block();
    fb.par_range(
        &len,
        vec![
            Reduction {
                var: acc.clone(),
                op: ReduceOp::Sum,
            },
            Reduction {
                var: count.clone(),
                op: ReduceOp::Sum,
            },
        ],
        |fb, i| {
            let val = fb.emit("val", getitem(arr, i), Ty::Scalar(DType::F64));
            let nan = fb.emit("nan", Expr::IsNan { value: val.clone() }, Ty::Scalar(DType::Bool));
            let zero = fb.const_float("fzero", 0.0);
            let add = fb.emit("add", select(&nan, &zero, &val), Ty::Scalar(DType::F64));
            fb.assign(&acc, binop(BinOp::Add, &acc, &add));
            count_valid(fb, &count, &nan);
            Ok(())
        },
    )?;
    fb.next_block();
    let mean = fb.emit("mean", binop(BinOp::Div, &acc, &count), Ty::Scalar(DType::F64));
    let res = guard_empty(&mut fb, &mean, &count);
    Ok(fb.finish(Some(res)))
}

/// Two-pass NaN-skipping sample variance: pass 1 computes the mean, pass 2
/// sums squared deviations. Denominator is `count - 1`; fewer than two
/// valid values yield NaN.
pub fn var_reduction(mut fb: FragmentBuilder<'_>, arr: &str) -> Result<Fragment, LowerError> {
    let m = fb.const_float("m", 0.0);
    let count_m = fb.const_int("count_m", 0);
    let len = fb.emit("len", Expr::Len { array: arr.into() }, Ty::Scalar(DType::I64));
    fb.next_block();
    fb.par_range(
        &len,
        vec![
            Reduction {
                var: m.clone(),
                op: ReduceOp::Sum,
            },
            Reduction {
                var: count_m.clone(),
                op: ReduceOp::Sum,
            },
        ],
        |fb, i| {
            let val = fb.emit("val", getitem(arr, i), Ty::Scalar(DType::F64));
            let nan = fb.emit("nan", Expr::IsNan { value: val.clone() }, Ty::Scalar(DType::Bool));
            let zero = fb.const_float("fzero", 0.0);
            let add = fb.emit("add", select(&nan, &zero, &val), Ty::Scalar(DType::F64));
            fb.assign(&m, binop(BinOp::Add, &m, &add));
            count_valid(fb, &count_m, &nan);
            Ok(())
        },
    )?;
    fb.next_block();

    let q = fb.emit("q", binop(BinOp::Div, &m, &count_m), Ty::Scalar(DType::F64));
    let mean = guard_empty(&mut fb, &q, &count_m);
    let acc = fb.const_float("sq", 0.0);
    let count = fb.const_int("count", 0);
    fb.next_block();
    fb.par_range(
        &len,
        vec![
            Reduction {
                var: acc.clone(),
                op: ReduceOp::Sum,
            },
            Reduction {
                var: count.clone(),
                op: ReduceOp::Sum,
            },
        ],
        |fb, i| {
            let val = fb.emit("val", getitem(arr, i), Ty::Scalar(DType::F64));
            let nan = fb.emit("nan", Expr::IsNan { value: val.clone() }, Ty::Scalar(DType::Bool));
            let d = fb.emit("d", binop(BinOp::Sub, &val, &mean), Ty::Scalar(DType::F64));
            let sq = fb.emit("dsq", binop(BinOp::Mul, &d, &d), Ty::Scalar(DType::F64));
            let zero = fb.const_float("fzero", 0.0);
            let add = fb.emit("add", select(&nan, &zero, &sq), Ty::Scalar(DType::F64));
            fb.assign(&acc, binop(BinOp::Add, &acc, &add));
            count_valid(fb, &count, &nan);
            Ok(())
        },
    )?;
    fb.next_block();

    let one = fb.const_int("one", 1);
    let few = fb.emit("few", binop(BinOp::CmpLe, &count, &one), Ty::Scalar(DType::Bool));
    let denom = fb.emit("denom", binop(BinOp::Sub, &count, &one), Ty::Scalar(DType::I64));
    let q2 = fb.emit("q", binop(BinOp::Div, &acc, &denom), Ty::Scalar(DType::F64));
    let nan = fb.const_float("nan", f64::NAN);
    let res = fb.emit("res", select(&few, &nan, &q2), Ty::Scalar(DType::F64));
    Ok(fb.finish(Some(res)))
}

/// In-place fill of missing values: `out[i] = isnan(in[i]) ? fill : in[i]`.
/// Produces no result.
pub fn fillna(
    mut fb: FragmentBuilder<'_>,
    out: &str,
    input: &str,
    fill: &str,
) -> Result<Fragment, LowerError> {
    let len = fb.emit(
        "len",
        Expr::Len { array: out.into() },
        Ty::Scalar(DType::I64),
    );
    fb.next_block();
    fb.par_range(&len, vec![], |fb, i| {
        let s = fb.emit("s", getitem(input, i), Ty::Scalar(DType::F64));
        let nan = fb.emit("nan", Expr::IsNan { value: s.clone() }, Ty::Scalar(DType::Bool));
        let v = fb.emit("v", select(&nan, fill, &s), Ty::Scalar(DType::F64));
        fb.set_item(out, i, &v)
    })?;
    fb.next_block();
    Ok(fb.finish(None))
}

/// NaN-skipping minimum, seeded with the dtype's maximum representable
/// value. An all-missing input routes through the same empty guard as sum.
///
/// Available as a builder but not wired into the dispatch table.
pub fn min_reduction(
    fb: FragmentBuilder<'_>,
    arr: &str,
    dtype: DType,
) -> Result<Fragment, LowerError> {
    extremum_reduction(fb, arr, dtype, ReduceOp::Min)
}

/// NaN-skipping maximum, seeded with the dtype's minimum representable
/// value. See [`min_reduction`].
pub fn max_reduction(
    fb: FragmentBuilder<'_>,
    arr: &str,
    dtype: DType,
) -> Result<Fragment, LowerError> {
    extremum_reduction(fb, arr, dtype, ReduceOp::Max)
}

fn extremum_reduction(
    mut fb: FragmentBuilder<'_>,
    arr: &str,
    dtype: DType,
    op: ReduceOp,
) -> Result<Fragment, LowerError> {
    let seed = match (dtype, op) {
        (DType::I64, ReduceOp::Min) => fb.const_int("s", i64::MAX),
        (DType::I64, ReduceOp::Max) => fb.const_int("s", i64::MIN),
        (_, ReduceOp::Min) => fb.const_float("s", f64::MAX),
        _ => fb.const_float("s", f64::MIN),
    };
    let count = fb.const_int("count", 0);
    let len = fb.emit("len", Expr::Len { array: arr.into() }, Ty::Scalar(DType::I64));
    fb.next_block();
    let better = match op {
        ReduceOp::Min => BinOp::CmpLt,
        _ => BinOp::CmpGt,
    };
    fb.par_range(
        &len,
        vec![
            Reduction {
                var: seed.clone(),
                op,
            },
            Reduction {
                var: count.clone(),
                op: ReduceOp::Sum,
            },
        ],
        |fb, i| {
            let val = fb.emit("val", getitem(arr, i), Ty::Scalar(dtype));
            let nan = fb.emit("nan", Expr::IsNan { value: val.clone() }, Ty::Scalar(DType::Bool));
            let cand = fb.emit("cand", select(&nan, &seed, &val), Ty::Scalar(dtype));
            let take = fb.emit("take", binop(better, &cand, &seed), Ty::Scalar(DType::Bool));
            fb.assign(&seed, select(&take, &cand, &seed));
            count_valid(fb, &count, &nan);
            Ok(())
        },
    )?;
    fb.next_block();
    let res = guard_empty(&mut fb, &seed, &count);
    Ok(fb.finish(Some(res)))
}

/// Timestamp-vs-text comparison: parse the text literal once outside the
/// loop, then apply the operator elementwise between each converted array
/// element and the parsed value. Produces a boolean array.
pub fn timestamp_cmp(
    mut fb: FragmentBuilder<'_>,
    op: BinOp,
    ts_arr: &str,
    ts_str: &str,
) -> Result<Fragment, LowerError> {
    let other = fb.emit(
        "other",
        Expr::ParseTimestamp {
            value: ts_str.into(),
        },
        Ty::Timestamp,
    );
    let len = fb.emit(
        "len",
        Expr::Len {
            array: ts_arr.into(),
        },
        Ty::Scalar(DType::I64),
    );
    let out = fb.emit(
        "out",
        Expr::Alloc {
            size: len.clone(),
            dtype: DType::Bool,
        },
        Ty::array(DType::Bool),
    );
    fb.next_block();
    fb.par_range(&len, vec![], |fb, i| {
        let e = fb.emit("e", getitem(ts_arr, i), Ty::Scalar(DType::DateTime64));
        let raw = fb.emit(
            "raw",
            Expr::Cast {
                value: e,
                dtype: DType::I64,
            },
            Ty::Scalar(DType::I64),
        );
        let t = fb.emit("t", Expr::TimestampOf { value: raw }, Ty::Timestamp);
        let cmp = fb.emit("cmp", binop(op, &t, &other), Ty::Scalar(DType::Bool));
        fb.set_item(&out, i, &cmp)
    })?;
    fb.next_block();
    Ok(fb.finish(Some(out)))
}

/// Elementwise text match: `out[i] = contains(arr[i], pattern)`, where the
/// match primitive is either regex or literal substring.
pub fn str_contains(
    mut fb: FragmentBuilder<'_>,
    arr: &str,
    pattern: &str,
    regex: bool,
) -> Result<Fragment, LowerError> {
    let len = fb.emit("len", Expr::Len { array: arr.into() }, Ty::Scalar(DType::I64));
    let out = fb.emit(
        "out",
        Expr::Alloc {
            size: len.clone(),
            dtype: DType::Bool,
        },
        Ty::array(DType::Bool),
    );
    fb.next_block();
    fb.par_range(&len, vec![], |fb, i| {
        let e = fb.emit("e", getitem(arr, i), Ty::Str);
        let c = fb.emit(
            "c",
            Expr::StrContains {
                value: e,
                pattern: pattern.into(),
                regex,
            },
            Ty::Scalar(DType::Bool),
        );
        fb.set_item(&out, i, &c)
    })?;
    fb.next_block();
    Ok(fb.finish(Some(out)))
}
