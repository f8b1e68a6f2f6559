use thiserror::Error;

use crate::ir::instr::CallId;

/// Top-level error type for the TABLO compiler core.
#[derive(Debug, Error)]
pub enum Error {
    #[error("lowering error: {0}")]
    Lower(#[from] LowerError),

    #[error("runtime error: {0}")]
    Interp(#[from] InterpError),
}

/// Fatal conditions raised by the column-lowering pass.
///
/// These abort compilation of the enclosing function: emitting silently
/// wrong numeric code would be worse than failing. Unresolvable call targets
/// are deliberately NOT here — they produce a warning and pass through.
#[derive(Debug, Error)]
pub enum LowerError {
    #[error("in function '{func}': the comparison operator of a timestamp wrapper must be a compile-time string constant, but '{var}' could not be resolved to one")]
    UnresolvedCmpOperator { func: String, var: String },

    #[error("in function '{func}': no type recorded for variable '{var}' — the type environment handed to this pass is incomplete")]
    MissingType { func: String, var: String },

    #[error("in function '{func}': no signature recorded for call site {call}")]
    MissingSignature { func: String, call: CallId },

    #[error("in function '{func}': a value-producing rewrite template returned no result temporary")]
    MissingFragmentResult { func: String },

    #[error("in function '{func}': '{name}' expects {expected} argument(s) but the call site has {got}")]
    BadArity {
        func: String,
        name: String,
        expected: usize,
        got: usize,
    },
}

/// Runtime errors from the IR interpreter.
#[derive(Debug, Error)]
pub enum InterpError {
    #[error("undefined variable '{name}'")]
    UndefinedVar { name: String },

    #[error("unknown block {label}")]
    UnknownBlock { label: u32 },

    #[error("type error — {detail}")]
    TypeError { detail: String },

    #[error("index out of bounds — tried index {idx} on an array of {len} elements")]
    IndexOutOfBounds { idx: i64, len: usize },

    #[error("'{text}' is not a valid timestamp literal")]
    BadTimestamp { text: String },

    #[error("invalid pattern '{pattern}': {detail}")]
    BadPattern { pattern: String, detail: String },

    #[error("unsupported at runtime — {detail}")]
    Unsupported { detail: String },

    #[error("execution exceeded {limit} steps")]
    StepLimit { limit: usize },
}
