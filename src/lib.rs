//! TABLO: column lowering for an ahead-of-time dataframe compiler.
//!
//! This crate is the post-type-inference stage that erases the high-level
//! `Column` type. It rewrites column operations (text comparisons, NaN-aware
//! reductions, boolean filtering, timestamp extraction and comparison,
//! pattern matching) into explicit parallel-range loops and scalar
//! reductions over the raw backing arrays.
//!
//! Pipeline position:
//!
//! ```text
//! front end → type inference → [FuncIr + TypeEnv + CallSigs]
//!   → ColumnLowering (this crate) → scheduler / code generator
//! ```
//!
//! Stages of one run:
//! 1. walk blocks in topological order, dispatching each assignment through
//!    the ordered handler table (`lower::templates` holds the fragment
//!    builders, `lower::fragment` the splicer);
//! 2. rewrite indexed-store signatures whose first argument is a column;
//! 3. reconcile: replace every remaining `Column`/`StrColumn` type with its
//!    backing `Array`/`StrArray` in the type environment and call table.
//!
//! The `interp` module executes lowered IR sequentially and exists to pin
//! down the numeric semantics (missing-value skipping, reduction edge
//! cases) in tests.

pub mod error;
pub mod interp;
pub mod ir;
pub mod lower;

pub use error::Error;
pub use lower::{lower_columns, ColumnLowering, LowerOptions, LowerWarning, RejectFill};
