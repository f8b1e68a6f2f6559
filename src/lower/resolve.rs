//! Call-target resolution: trace a callee variable's reaching definition to
//! a canonical `(name, origin)` identity.

use crate::ir::function::FuncIr;
use crate::ir::instr::{Const, Expr};

/// Alias chains longer than this are treated as unresolved. Front ends do
/// not emit deep alias chains; the cap only guards against cyclic aliases.
const MAX_ALIAS_DEPTH: usize = 32;

/// Outcome of resolving a call expression's callee.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The callee is a known runtime primitive.
    Known { name: String, origin: String },
    /// The callee traces to a locally constructed function literal.
    /// Legitimately opaque: passed through without a diagnostic.
    Opaque,
    /// The callee could not be resolved. Diagnostic-worthy but non-fatal.
    Unknown,
}

/// Statically resolves `callee` by following its reaching definition through
/// alias copies. Requires the function's definition index to be current.
///
/// Never fails: a variable with zero or multiple definitions, an
/// over-long alias chain, or any non-global definition yields `Unknown`.
pub fn resolve_call(func: &FuncIr, callee: &str) -> Resolution {
    let mut name = callee;
    for _ in 0..MAX_ALIAS_DEPTH {
        let defs = func.definitions_of(name);
        if defs.len() != 1 {
            return Resolution::Unknown;
        }
        match &defs[0] {
            Expr::Global { name, origin } => {
                return Resolution::Known {
                    name: name.clone(),
                    origin: origin.clone(),
                }
            }
            Expr::MakeFunction => return Resolution::Opaque,
            Expr::Var(alias) => name = alias,
            _ => return Resolution::Unknown,
        }
    }
    Resolution::Unknown
}

/// Traces `var` to a compile-time constant, following alias copies.
/// Returns `None` if the variable is not uniquely defined by a constant.
pub fn find_const<'f>(func: &'f FuncIr, var: &str) -> Option<&'f Const> {
    let mut name = var;
    for _ in 0..MAX_ALIAS_DEPTH {
        let defs = func.definitions_of(name);
        if defs.len() != 1 {
            return None;
        }
        match &defs[0] {
            Expr::Const(c) => return Some(c),
            Expr::Var(alias) => name = alias,
            _ => return None,
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::instr::Instr;

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

    #[test]
    fn resolves_through_alias_chain() {
        let mut f = FuncIr::new("t");
        let entry = f.entry;
        f.push(entry, assign("g", global("count", "tablo.frame")));
        f.push(entry, assign("h", Expr::Var("g".into())));
        f.push(entry, assign("k", Expr::Var("h".into())));
        f.push(entry, Instr::Return { value: None });
        f.rebuild_definitions();

        assert_eq!(
            resolve_call(&f, "k"),
            Resolution::Known {
                name: "count".into(),
                origin: "tablo.frame".into(),
            }
        );
    }

    #[test]
    fn function_literal_is_opaque_not_unknown() {
        let mut f = FuncIr::new("t");
        let entry = f.entry;
        f.push(entry, assign("g", Expr::MakeFunction));
        f.push(entry, Instr::Return { value: None });
        f.rebuild_definitions();
        assert_eq!(resolve_call(&f, "g"), Resolution::Opaque);
    }

    #[test]
    fn multiple_definitions_are_unknown() {
        let mut f = FuncIr::new("t");
        let entry = f.entry;
        f.push(entry, assign("g", global("count", "tablo.frame")));
        f.push(entry, assign("g", global("mean", "tablo.frame")));
        f.push(entry, Instr::Return { value: None });
        f.rebuild_definitions();
        assert_eq!(resolve_call(&f, "g"), Resolution::Unknown);
    }

    #[test]
    fn alias_cycle_terminates_as_unknown() {
        let mut f = FuncIr::new("t");
        let entry = f.entry;
        f.push(entry, assign("a", Expr::Var("b".into())));
        f.push(entry, assign("b", Expr::Var("a".into())));
        f.push(entry, Instr::Return { value: None });
        f.rebuild_definitions();
        assert_eq!(resolve_call(&f, "a"), Resolution::Unknown);
    }

    #[test]
    fn find_const_follows_aliases() {
        let mut f = FuncIr::new("t");
        let entry = f.entry;
        f.push(entry, assign("op", Expr::Const(Const::Str("==".into()))));
        f.push(entry, assign("op2", Expr::Var("op".into())));
        f.push(entry, Instr::Return { value: None });
        f.rebuild_definitions();
        assert_eq!(find_const(&f, "op2"), Some(&Const::Str("==".into())));
        assert_eq!(find_const(&f, "missing"), None);
    }
}
