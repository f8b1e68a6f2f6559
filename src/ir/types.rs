use std::collections::HashMap;

use crate::ir::instr::CallId;

/// Element type of an array or scalar value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    Bool,
    I64,
    F64,
    /// Raw datetime64 storage: nanoseconds since the epoch, stored as i64.
    DateTime64,
}

impl DType {
    /// Returns `true` for floating-point element types.
    pub fn is_float(self) -> bool {
        matches!(self, DType::F64)
    }
}

impl std::fmt::Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DType::Bool => "bool",
            DType::I64 => "i64",
            DType::F64 => "f64",
            DType::DateTime64 => "datetime64",
        };
        f.write_str(s)
    }
}

/// The type of a variable in the function under rewrite.
///
/// `Column` and `StrColumn` are the high-level labeled-column types produced
/// by the front end. The column-lowering pass erases both: after the pass no
/// variable's type is `Column(_)` or `StrColumn` — each occurrence has been
/// replaced by its backing `Array`/`StrArray` with identical dtype.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ty {
    /// Contiguous numeric array backing.
    Array { dtype: DType, ndim: u8 },
    /// Contiguous text array backing.
    StrArray,
    /// High-level labeled column over a numeric backing array.
    Column(DType),
    /// High-level labeled column over a text backing array.
    StrColumn,
    /// A scalar of the given element type.
    Scalar(DType),
    /// A scalar string value.
    Str,
    /// A domain timestamp value (converted out of raw datetime64 storage).
    Timestamp,
    /// The shape tuple of an N-dimensional array.
    Shape(u8),
    /// The type of a variable bound to a function object.
    Function,
    /// No value (side-effect-only call results).
    Unit,
}

impl Ty {
    /// One-dimensional numeric array.
    pub fn array(dtype: DType) -> Ty {
        Ty::Array { dtype, ndim: 1 }
    }

    /// Returns `true` if this is a text-backed array or column.
    pub fn is_text_array(&self) -> bool {
        matches!(self, Ty::StrArray | Ty::StrColumn)
    }

    /// Returns `true` for the high-level column types this pass erases.
    pub fn is_column(&self) -> bool {
        matches!(self, Ty::Column(_) | Ty::StrColumn)
    }

    /// Returns `true` for a one-dimensional boolean array or column.
    pub fn is_bool_array(&self) -> bool {
        matches!(
            self,
            Ty::Array {
                dtype: DType::Bool,
                ndim: 1
            } | Ty::Column(DType::Bool)
        )
    }

    /// The element dtype of arrays, columns, and scalars.
    pub fn dtype(&self) -> Option<DType> {
        match self {
            Ty::Array { dtype, .. } | Ty::Column(dtype) | Ty::Scalar(dtype) => Some(*dtype),
            _ => None,
        }
    }
}

impl std::fmt::Display for Ty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Ty::Array { dtype, ndim } => write!(f, "array<{}, {}d>", dtype, ndim),
            Ty::StrArray => f.write_str("str_array"),
            Ty::Column(dtype) => write!(f, "column<{}>", dtype),
            Ty::StrColumn => f.write_str("str_column"),
            Ty::Scalar(dtype) => write!(f, "{}", dtype),
            Ty::Str => f.write_str("str"),
            Ty::Timestamp => f.write_str("timestamp"),
            Ty::Shape(ndim) => write!(f, "shape<{}d>", ndim),
            Ty::Function => f.write_str("function"),
            Ty::Unit => f.write_str("unit"),
        }
    }
}

/// Maps a high-level column type to its backing array type.
/// Every other type is returned unchanged.
pub fn column_to_array_ty(ty: &Ty) -> Ty {
    match ty {
        Ty::Column(dtype) => Ty::Array {
            dtype: *dtype,
            ndim: 1,
        },
        Ty::StrColumn => Ty::StrArray,
        other => other.clone(),
    }
}

/// The type environment of the function under rewrite: one entry per
/// variable name. Populated by the upstream type-inference stage and mutated
/// in place by the column-lowering pass, which owns it exclusively for the
/// duration of its run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypeEnv {
    map: HashMap<String, Ty>,
}

impl TypeEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Ty> {
        self.map.get(name)
    }

    /// Records (or replaces) the type of a variable.
    pub fn set(&mut self, name: impl Into<String>, ty: Ty) {
        self.map.insert(name.into(), ty);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Ty)> {
        self.map.iter()
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut Ty> {
        self.map.values_mut()
    }
}

/// The resolved signature of one call site: argument types and return type.
#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    pub arg_tys: Vec<Ty>,
    pub ret_ty: Ty,
}

/// The call-signature table: one resolved `Signature` per call-site id.
///
/// Must be kept consistent whenever an argument's recorded type changes
/// (e.g. Column → Array), even for call sites the handler chain does not
/// directly rewrite; the final type-reconciliation sweep guarantees this.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallSigs {
    map: HashMap<CallId, Signature>,
}

impl CallSigs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, call: CallId) -> Option<&Signature> {
        self.map.get(&call)
    }

    pub fn get_mut(&mut self, call: CallId) -> Option<&mut Signature> {
        self.map.get_mut(&call)
    }

    pub fn set(&mut self, call: CallId, sig: Signature) {
        self.map.insert(call, sig);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CallId, &Signature)> {
        self.map.iter()
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut Signature> {
        self.map.values_mut()
    }
}
