use crate::ir::block::Label;
use crate::ir::types::DType;

/// Identifies one call site within a function. Keys the call-signature table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CallId(pub u32);

impl std::fmt::Display for CallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "c{}", self.0)
    }
}

/// Binary operations on scalars. Comparisons yield a bool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    CmpEq,
    CmpNe,
    CmpLt,
    CmpLe,
    CmpGt,
    CmpGe,
}

impl BinOp {
    pub fn is_cmp(self) -> bool {
        matches!(
            self,
            BinOp::CmpEq | BinOp::CmpNe | BinOp::CmpLt | BinOp::CmpLe | BinOp::CmpGt | BinOp::CmpGe
        )
    }

    /// Parses the textual form a comparison wrapper carries as a constant
    /// first argument (`"=="`, `"!="`, `">="`, `">"`, `"<="`, `"<"`).
    pub fn parse_cmp(text: &str) -> Option<BinOp> {
        match text {
            "==" => Some(BinOp::CmpEq),
            "!=" => Some(BinOp::CmpNe),
            "<" => Some(BinOp::CmpLt),
            "<=" => Some(BinOp::CmpLe),
            ">" => Some(BinOp::CmpGt),
            ">=" => Some(BinOp::CmpGe),
            _ => None,
        }
    }
}

impl std::fmt::Display for BinOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::CmpEq => "==",
            BinOp::CmpNe => "!=",
            BinOp::CmpLt => "<",
            BinOp::CmpLe => "<=",
            BinOp::CmpGt => ">",
            BinOp::CmpGe => ">=",
        };
        f.write_str(s)
    }
}

/// A compile-time constant.
#[derive(Debug, Clone)]
pub enum Const {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
}

// Structural IR equality: `Float` payloads compare bitwise so identical NaN
// constants are equal.
impl PartialEq for Const {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Const::Int(a), Const::Int(b)) => a == b,
            (Const::Float(a), Const::Float(b)) => a.to_bits() == b.to_bits(),
            (Const::Bool(a), Const::Bool(b)) => a == b,
            (Const::Str(a), Const::Str(b)) => a == b,
            _ => false,
        }
    }
}

impl std::fmt::Display for Const {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Const::Int(n) => write!(f, "{}", n),
            Const::Float(x) => write!(f, "{}", x),
            Const::Bool(b) => write!(f, "{}", b),
            Const::Str(s) => write!(f, "{:?}", s),
        }
    }
}

/// The right-hand side of an assignment.
///
/// The first group (`Var` through `Getitem`) is what the front end produces.
/// The second group (`Len` through `TimestampOf`) is the elementwise
/// vocabulary the lowering pass rewrites column operations into; the front
/// end never emits these.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Alias copy of another variable.
    Var(String),
    Const(Const),
    /// A reference to a runtime primitive, e.g. ("count", "tablo.frame").
    Global { name: String, origin: String },
    /// A locally constructed function literal (e.g. from an inline
    /// comprehension). Legitimately opaque to call-target resolution.
    MakeFunction,
    Call {
        callee: String,
        args: Vec<String>,
        call: CallId,
    },
    BinOp {
        op: BinOp,
        lhs: String,
        rhs: String,
    },
    Getitem {
        value: String,
        index: String,
    },

    /// Length of a one-dimensional array.
    Len { array: String },
    /// Shape tuple of an N-dimensional array.
    Shape { array: String },
    /// Allocate a one-dimensional array of `size` elements, uninitialized.
    Alloc { size: String, dtype: DType },
    /// Allocate an N-dimensional array from a shape tuple, uninitialized.
    AllocShaped { shape: String, dtype: DType },
    /// Missing-value test: true iff the operand is the floating NaN sentinel.
    IsNan { value: String },
    /// `if cond { if_true } else { if_false }`, all three pre-evaluated.
    Select {
        cond: String,
        if_true: String,
        if_false: String,
    },
    /// Scalar conversion to the given dtype.
    Cast { value: String, dtype: DType },
    /// Per-element text match against a pattern (regex or literal substring).
    StrContains {
        value: String,
        pattern: String,
        regex: bool,
    },
    /// Parse a text literal into a domain timestamp.
    ParseTimestamp { value: String },
    /// Convert a raw i64 datetime payload into a domain timestamp.
    TimestampOf { value: String },
}

impl std::fmt::Display for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expr::Var(name) => f.write_str(name),
            Expr::Const(c) => write!(f, "{}", c),
            Expr::Global { name, origin } => write!(f, "global({}.{})", origin, name),
            Expr::MakeFunction => f.write_str("make_function"),
            Expr::Call { callee, args, call } => {
                write!(f, "{}({}) [{}]", callee, args.join(", "), call)
            }
            Expr::BinOp { op, lhs, rhs } => write!(f, "{} {} {}", lhs, op, rhs),
            Expr::Getitem { value, index } => write!(f, "{}[{}]", value, index),
            Expr::Len { array } => write!(f, "len({})", array),
            Expr::Shape { array } => write!(f, "shape({})", array),
            Expr::Alloc { size, dtype } => write!(f, "alloc({}, {})", size, dtype),
            Expr::AllocShaped { shape, dtype } => write!(f, "alloc_shaped({}, {})", shape, dtype),
            Expr::IsNan { value } => write!(f, "isnan({})", value),
            Expr::Select {
                cond,
                if_true,
                if_false,
            } => write!(f, "select({}, {}, {})", cond, if_true, if_false),
            Expr::Cast { value, dtype } => write!(f, "cast<{}>({})", dtype, value),
            Expr::StrContains {
                value,
                pattern,
                regex,
            } => {
                let kind = if *regex { "regex" } else { "literal" };
                write!(f, "contains_{}({}, {})", kind, value, pattern)
            }
            Expr::ParseTimestamp { value } => write!(f, "parse_timestamp({})", value),
            Expr::TimestampOf { value } => write!(f, "timestamp_of({})", value),
        }
    }
}

/// The reduction operator declared for an accumulator variable of a
/// parallel-range loop. All three are associative and commutative, which is
/// what permits the downstream scheduler to parallelize the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    Sum,
    Min,
    Max,
}

impl std::fmt::Display for ReduceOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ReduceOp::Sum => "sum",
            ReduceOp::Min => "min",
            ReduceOp::Max => "max",
        };
        f.write_str(s)
    }
}

/// Declares one accumulator variable of a `ParRange` loop as a reduction.
#[derive(Debug, Clone, PartialEq)]
pub struct Reduction {
    pub var: String,
    pub op: ReduceOp,
}

/// A single instruction.
///
/// Invariants:
/// - Terminators (`Jump`, `Branch`, `Return`) appear only as the last
///   instruction of a block, and every block ends with one (until a splice
///   is in progress).
/// - A `ParRange` body is straight-line: `Assign` and `SetItem` only, no
///   terminators and no nested loops. Each iteration reads only its own
///   index of its input arrays and writes only its own index of its output
///   array; the sole cross-iteration state is the declared `reduce`
///   variables. Downstream parallelization relies on this.
#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    Assign {
        target: String,
        value: Expr,
    },
    /// Indexed store `array[index] = value`, with its own call signature.
    SetItem {
        array: String,
        index: String,
        value: String,
        call: CallId,
    },
    /// Parallel-range loop over `0..len`. Iterations are declared
    /// independent for the downstream scheduler.
    ParRange {
        index: String,
        len: String,
        body: Vec<Instr>,
        reduce: Vec<Reduction>,
    },
    Jump {
        target: Label,
    },
    Branch {
        cond: String,
        if_true: Label,
        if_false: Label,
    },
    Return {
        value: Option<String>,
    },
}

impl Instr {
    /// Returns `true` if this instruction is a block terminator.
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Instr::Jump { .. } | Instr::Branch { .. } | Instr::Return { .. }
        )
    }

    /// Control-flow successors of a terminator (empty for non-terminators).
    pub fn successors(&self) -> Vec<Label> {
        match self {
            Instr::Jump { target } => vec![*target],
            Instr::Branch {
                if_true, if_false, ..
            } => vec![*if_true, *if_false],
            _ => vec![],
        }
    }
}

impl std::fmt::Display for Instr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Instr::Assign { target, value } => write!(f, "{} = {}", target, value),
            Instr::SetItem {
                array,
                index,
                value,
                call,
            } => write!(f, "{}[{}] = {} [{}]", array, index, value, call),
            Instr::ParRange {
                index,
                len,
                body,
                reduce,
            } => {
                write!(f, "par_range {} in 0..{}", index, len)?;
                if !reduce.is_empty() {
                    let decls: Vec<String> = reduce
                        .iter()
                        .map(|r| format!("{}:{}", r.var, r.op))
                        .collect();
                    write!(f, " reduce({})", decls.join(", "))?;
                }
                writeln!(f, " {{")?;
                for instr in body {
                    writeln!(f, "    {}", instr)?;
                }
                write!(f, "  }}")
            }
            Instr::Jump { target } => write!(f, "jump {}", target),
            Instr::Branch {
                cond,
                if_true,
                if_false,
            } => write!(f, "branch {} ? {} : {}", cond, if_true, if_false),
            Instr::Return { value } => match value {
                Some(v) => write!(f, "return {}", v),
                None => f.write_str("return"),
            },
        }
    }
}
