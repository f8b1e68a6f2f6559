//! Elementwise rewrites: text comparison, fillna, the boolean column
//! filter, allocation, rolling coercion, pattern matching, and timestamps.

use std::collections::HashSet;

use tablo::interp::{self, Value};
use tablo::ir::function::FuncIr;
use tablo::ir::instr::{BinOp, CallId, Const, Expr, Instr};
use tablo::ir::types::{CallSigs, DType, Signature, Ty, TypeEnv};
use tablo::lower::{lower_columns, LowerOptions, RejectFill};

const DAY_NANOS: i64 = 86_400_000_000_000;

fn assign(target: &str, value: Expr) -> Instr {
    Instr::Assign {
        target: target.into(),
        value,
    }
}

fn global(name: &str, origin: &str) -> Expr {
    Expr::Global {
        name: name.into(),
        origin: origin.into(),
    }
}

fn call(callee: &str, args: &[&str], call: CallId) -> Expr {
    Expr::Call {
        callee: callee.into(),
        args: args.iter().map(|s| s.to_string()).collect(),
        call,
    }
}

fn lower(f: &mut FuncIr, types: &mut TypeEnv, sigs: &mut CallSigs, origins: &HashSet<String>) {
    let warnings = lower_columns(f, types, sigs, origins, LowerOptions::default()).unwrap();
    assert!(warnings.is_empty());
}

fn floats(v: &Value) -> Vec<f64> {
    match v {
        Value::Arr(items) => items
            .iter()
            .map(|x| match x {
                Value::Float(f) => *f,
                other => panic!("expected a float element, got {:?}", other),
            })
            .collect(),
        other => panic!("expected an array, got {:?}", other),
    }
}

#[test]
fn text_comparison_becomes_an_elementwise_bool_loop() {
    let mut f = FuncIr::new("cmp");
    let entry = f.entry;
    f.push(entry, assign("lit", Expr::Const(Const::Str("cd".into()))));
    f.push(
        entry,
        assign(
            "r",
            Expr::BinOp {
                op: BinOp::CmpEq,
                lhs: "names".into(),
                rhs: "lit".into(),
            },
        ),
    );
    f.push(entry, Instr::Return { value: Some("r".into()) });

    let mut types = TypeEnv::new();
    types.set("names", Ty::StrColumn);
    types.set("lit", Ty::Str);
    let mut sigs = CallSigs::new();
    lower(&mut f, &mut types, &mut sigs, &HashSet::new());

    let outcome = interp::run(
        &f,
        vec![("names".into(), Value::str_array(&["ab", "cd"]))],
    )
    .unwrap();
    assert_eq!(outcome.result, Some(Value::bool_array(&[false, true])));
    assert_eq!(types.get("names"), Some(&Ty::StrArray));
    // The handler records the boolean result type itself.
    assert_eq!(types.get("r"), Some(&Ty::array(DType::Bool)));
}

#[test]
fn scalar_on_the_left_also_matches() {
    let mut f = FuncIr::new("cmp");
    let entry = f.entry;
    f.push(entry, assign("lit", Expr::Const(Const::Str("b".into()))));
    f.push(
        entry,
        assign(
            "r",
            Expr::BinOp {
                op: BinOp::CmpLt,
                lhs: "lit".into(),
                rhs: "names".into(),
            },
        ),
    );
    f.push(entry, Instr::Return { value: Some("r".into()) });

    let mut types = TypeEnv::new();
    types.set("names", Ty::StrArray);
    types.set("lit", Ty::Str);
    types.set("r", Ty::array(DType::Bool));
    let mut sigs = CallSigs::new();
    lower(&mut f, &mut types, &mut sigs, &HashSet::new());

    let outcome = interp::run(
        &f,
        vec![("names".into(), Value::str_array(&["a", "c"]))],
    )
    .unwrap();
    assert_eq!(outcome.result, Some(Value::bool_array(&[false, true])));
}

#[test]
fn fillna_writes_through_missing_values() {
    let mut f = FuncIr::new("fill");
    let entry = f.entry;
    let c = f.fresh_call();
    f.push(entry, assign("g", global("fillna", "tablo.frame")));
    f.push(entry, assign("u", call("g", &["out", "a", "fv"], c)));
    f.push(entry, Instr::Return { value: None });

    let mut types = TypeEnv::new();
    types.set("g", Ty::Function);
    types.set("out", Ty::array(DType::F64));
    types.set("a", Ty::Column(DType::F64));
    types.set("fv", Ty::Scalar(DType::F64));
    types.set("u", Ty::Unit);
    let mut sigs = CallSigs::new();
    sigs.set(
        c,
        Signature {
            arg_tys: vec![Ty::array(DType::F64), Ty::Column(DType::F64), Ty::Scalar(DType::F64)],
            ret_ty: Ty::Unit,
        },
    );
    lower(&mut f, &mut types, &mut sigs, &HashSet::new());

    let outcome = interp::run(
        &f,
        vec![
            ("out".into(), Value::float_array(&[0.0, 0.0])),
            ("a".into(), Value::float_array(&[1.0, f64::NAN])),
            ("fv".into(), Value::Float(9.0)),
        ],
    )
    .unwrap();
    assert_eq!(outcome.env["out"], Value::float_array(&[1.0, 9.0]));
}

fn filter_program() -> (FuncIr, TypeEnv, CallSigs, HashSet<String>) {
    let mut f = FuncIr::new("filter");
    let entry = f.entry;
    f.push(
        entry,
        assign(
            "t",
            Expr::Getitem {
                value: "src".into(),
                index: "mask".into(),
            },
        ),
    );
    f.push(entry, Instr::Return { value: None });

    let mut types = TypeEnv::new();
    types.set("src", Ty::Column(DType::F64));
    types.set("t", Ty::Column(DType::F64));
    types.set("mask", Ty::array(DType::Bool));
    let origins: HashSet<String> = ["t".to_string(), "src".to_string()].into_iter().collect();
    (f, types, CallSigs::new(), origins)
}

#[test]
fn column_filter_fills_rejected_positions_with_nan() {
    let (mut f, mut types, mut sigs, origins) = filter_program();
    lower(&mut f, &mut types, &mut sigs, &origins);

    let outcome = interp::run(
        &f,
        vec![
            ("src".into(), Value::float_array(&[10.0, 20.0, 30.0])),
            ("mask".into(), Value::bool_array(&[true, false, true])),
        ],
    )
    .unwrap();
    let t = floats(&outcome.env["t"]);
    assert_eq!(t[0], 10.0);
    assert!(t[1].is_nan());
    assert_eq!(t[2], 30.0);
}

#[test]
fn column_filter_fill_policy_is_configurable() {
    let (mut f, mut types, mut sigs, origins) = filter_program();
    let options = LowerOptions {
        filter_fill: RejectFill::Value(-1.0),
    };
    let warnings = lower_columns(&mut f, &mut types, &mut sigs, &origins, options).unwrap();
    assert!(warnings.is_empty());

    let outcome = interp::run(
        &f,
        vec![
            ("src".into(), Value::float_array(&[10.0, 20.0, 30.0])),
            ("mask".into(), Value::bool_array(&[true, false, true])),
        ],
    )
    .unwrap();
    assert_eq!(floats(&outcome.env["t"]), vec![10.0, -1.0, 30.0]);
}

#[test]
fn filter_needs_both_ends_in_the_column_origin_set() {
    let (mut f, mut types, mut sigs, _) = filter_program();
    let origins: HashSet<String> = ["t".to_string()].into_iter().collect();
    lower(&mut f, &mut types, &mut sigs, &origins);
    // Not recognized: the getitem stays as written.
    assert!(matches!(
        &f.block(f.entry).unwrap().instrs[0],
        Instr::Assign { value: Expr::Getitem { .. }, .. }
    ));
}

#[test]
fn empty_like_allocates_with_the_source_length_and_dtype() {
    let mut f = FuncIr::new("alloc");
    let entry = f.entry;
    let c = f.fresh_call();
    f.push(entry, assign("g", global("empty_like", "tablo.arrays")));
    f.push(entry, assign("r", call("g", &["a"], c)));
    f.push(entry, Instr::Return { value: Some("r".into()) });

    let mut types = TypeEnv::new();
    types.set("g", Ty::Function);
    types.set("a", Ty::array(DType::F64));
    types.set("r", Ty::array(DType::F64));
    let mut sigs = CallSigs::new();
    sigs.set(
        c,
        Signature {
            arg_tys: vec![Ty::array(DType::F64)],
            ret_ty: Ty::array(DType::F64),
        },
    );
    lower(&mut f, &mut types, &mut sigs, &HashSet::new());

    let outcome = interp::run(
        &f,
        vec![("a".into(), Value::float_array(&[1.0, 2.0, 3.0]))],
    )
    .unwrap();
    match outcome.result.unwrap() {
        Value::Arr(items) => {
            assert_eq!(items.len(), 3);
            assert!(items.iter().all(|v| matches!(v, Value::Float(_))));
        }
        other => panic!("expected an array, got {:?}", other),
    }
    assert_eq!(types.get("r"), Some(&Ty::array(DType::F64)));
}

#[test]
fn empty_like_uses_the_shape_for_multidimensional_sources() {
    let mut f = FuncIr::new("alloc");
    let entry = f.entry;
    let c = f.fresh_call();
    f.push(entry, assign("g", global("empty_like", "tablo.arrays")));
    f.push(entry, assign("r", call("g", &["a"], c)));
    f.push(entry, Instr::Return { value: Some("r".into()) });

    let nd = Ty::Array {
        dtype: DType::F64,
        ndim: 2,
    };
    let mut types = TypeEnv::new();
    types.set("g", Ty::Function);
    types.set("a", nd.clone());
    types.set("r", nd.clone());
    let mut sigs = CallSigs::new();
    sigs.set(
        c,
        Signature {
            arg_tys: vec![nd.clone()],
            ret_ty: nd.clone(),
        },
    );
    lower(&mut f, &mut types, &mut sigs, &HashSet::new());

    let instrs = &f.block(f.entry).unwrap().instrs;
    assert!(instrs
        .iter()
        .any(|i| matches!(i, Instr::Assign { value: Expr::Shape { .. }, .. })));
    assert!(instrs
        .iter()
        .any(|i| matches!(i, Instr::Assign { value: Expr::AllocShaped { .. }, .. })));

    // A 2x2 source arrives as its flattened backing store.
    let outcome = interp::run(
        &f,
        vec![("a".into(), Value::float_array(&[1.0, 2.0, 3.0, 4.0]))],
    )
    .unwrap();
    match outcome.result.unwrap() {
        Value::Arr(items) => assert_eq!(items.len(), 4),
        other => panic!("expected an array, got {:?}", other),
    }
    assert_eq!(types.get("r"), Some(&nd));
}

#[test]
fn rolling_coercion_casts_integers_to_float() {
    let mut f = FuncIr::new("roll");
    let entry = f.entry;
    let c = f.fresh_call();
    f.push(entry, assign("g", global("as_rolling_array", "tablo.frame")));
    f.push(entry, assign("r", call("g", &["a"], c)));
    f.push(entry, Instr::Return { value: Some("r".into()) });

    let mut types = TypeEnv::new();
    types.set("g", Ty::Function);
    types.set("a", Ty::array(DType::I64));
    types.set("r", Ty::array(DType::F64));
    let mut sigs = CallSigs::new();
    sigs.set(
        c,
        Signature {
            arg_tys: vec![Ty::array(DType::I64)],
            ret_ty: Ty::array(DType::F64),
        },
    );
    lower(&mut f, &mut types, &mut sigs, &HashSet::new());

    let outcome = interp::run(&f, vec![("a".into(), Value::int_array(&[1, 2, 3]))]).unwrap();
    assert_eq!(outcome.result, Some(Value::float_array(&[1.0, 2.0, 3.0])));
}

fn contains_program(prim: &str, pattern: &str) -> (FuncIr, TypeEnv, CallSigs) {
    let mut f = FuncIr::new("contains");
    let entry = f.entry;
    let c = f.fresh_call();
    f.push(entry, assign("g", global(prim, "tablo.strings")));
    f.push(entry, assign("pat", Expr::Const(Const::Str(pattern.into()))));
    f.push(entry, assign("r", call("g", &["names", "pat"], c)));
    f.push(entry, Instr::Return { value: Some("r".into()) });

    let mut types = TypeEnv::new();
    types.set("g", Ty::Function);
    types.set("names", Ty::StrColumn);
    types.set("pat", Ty::Str);
    types.set("r", Ty::array(DType::Bool));
    let mut sigs = CallSigs::new();
    sigs.set(
        c,
        Signature {
            arg_tys: vec![Ty::StrColumn, Ty::Str],
            ret_ty: Ty::array(DType::Bool),
        },
    );
    (f, types, sigs)
}

#[test]
fn contains_regex_matches_per_element() {
    let (mut f, mut types, mut sigs) = contains_program("contains_regex", "[0-9]+");
    lower(&mut f, &mut types, &mut sigs, &HashSet::new());

    let outcome = interp::run(
        &f,
        vec![("names".into(), Value::str_array(&["foo123", "bar"]))],
    )
    .unwrap();
    assert_eq!(outcome.result, Some(Value::bool_array(&[true, false])));
}

#[test]
fn contains_literal_is_substring_search() {
    let (mut f, mut types, mut sigs) = contains_program("contains_literal", "ar");
    lower(&mut f, &mut types, &mut sigs, &HashSet::new());

    let outcome = interp::run(
        &f,
        vec![("names".into(), Value::str_array(&["foo123", "bar"]))],
    )
    .unwrap();
    assert_eq!(outcome.result, Some(Value::bool_array(&[false, true])));
}

#[test]
fn timestamp_getitem_reinterprets_the_raw_element() {
    let mut f = FuncIr::new("ts");
    let entry = f.entry;
    let c = f.fresh_call();
    f.push(entry, assign("g", global("timestamp_getitem", "tablo.time")));
    f.push(entry, assign("idx", Expr::Const(Const::Int(1))));
    f.push(entry, assign("r", call("g", &["ts", "idx"], c)));
    f.push(entry, Instr::Return { value: Some("r".into()) });

    let mut types = TypeEnv::new();
    types.set("g", Ty::Function);
    types.set("ts", Ty::array(DType::DateTime64));
    types.set("idx", Ty::Scalar(DType::I64));
    types.set("r", Ty::Timestamp);
    let mut sigs = CallSigs::new();
    sigs.set(
        c,
        Signature {
            arg_tys: vec![Ty::array(DType::DateTime64), Ty::Scalar(DType::I64)],
            ret_ty: Ty::Timestamp,
        },
    );
    lower(&mut f, &mut types, &mut sigs, &HashSet::new());

    let outcome = interp::run(
        &f,
        vec![("ts".into(), Value::int_array(&[0, DAY_NANOS]))],
    )
    .unwrap();
    assert_eq!(outcome.result, Some(Value::Timestamp(DAY_NANOS)));
}

fn timestamp_cmp_program(args: &[&str]) -> (FuncIr, TypeEnv, CallSigs) {
    let mut f = FuncIr::new("tscmp");
    let entry = f.entry;
    let c = f.fresh_call();
    f.push(entry, assign("op", Expr::Const(Const::Str("<".into()))));
    f.push(entry, assign("lit", Expr::Const(Const::Str("1970-01-02".into()))));
    f.push(entry, assign("g", global("timestamp_cmp", "tablo.time")));
    f.push(entry, assign("r", call("g", args, c)));
    f.push(entry, Instr::Return { value: Some("r".into()) });

    let mut types = TypeEnv::new();
    types.set("op", Ty::Str);
    types.set("lit", Ty::Str);
    types.set("g", Ty::Function);
    types.set("ts", Ty::array(DType::DateTime64));
    types.set("r", Ty::array(DType::Bool));
    let mut sigs = CallSigs::new();
    let arg_tys = args
        .iter()
        .map(|a| types.get(a).unwrap().clone())
        .collect();
    sigs.set(
        c,
        Signature {
            arg_tys,
            ret_ty: Ty::array(DType::Bool),
        },
    );
    (f, types, sigs)
}

#[test]
fn timestamp_comparison_parses_the_literal_once() {
    let (mut f, mut types, mut sigs) = timestamp_cmp_program(&["op", "ts", "lit"]);
    lower(&mut f, &mut types, &mut sigs, &HashSet::new());

    // ts[i] < 1970-01-02
    let outcome = interp::run(
        &f,
        vec![("ts".into(), Value::int_array(&[0, 2 * DAY_NANOS]))],
    )
    .unwrap();
    assert_eq!(outcome.result, Some(Value::bool_array(&[true, false])));
}

#[test]
fn timestamp_comparison_mirrors_when_the_array_is_on_the_right() {
    let (mut f, mut types, mut sigs) = timestamp_cmp_program(&["op", "lit", "ts"]);
    lower(&mut f, &mut types, &mut sigs, &HashSet::new());

    // 1970-01-02 < ts[i]
    let outcome = interp::run(
        &f,
        vec![("ts".into(), Value::int_array(&[0, 2 * DAY_NANOS]))],
    )
    .unwrap();
    assert_eq!(outcome.result, Some(Value::bool_array(&[false, true])));
}
