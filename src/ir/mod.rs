pub mod analysis;
pub mod block;
pub mod function;
pub mod instr;
pub mod types;

pub use block::{Block, Label};
pub use function::FuncIr;
pub use instr::{BinOp, CallId, Const, Expr, Instr, ReduceOp, Reduction};
pub use types::{column_to_array_ty, CallSigs, DType, Signature, Ty, TypeEnv};
