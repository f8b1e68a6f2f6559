//! Fragments: ephemeral typed sub-programs built by the template catalogue
//! and spliced into a host function.
//!
//! A fragment's labels, temporaries, and call-site ids are all allocated
//! from the host function's counters, so splicing never renames anything:
//! collision-freedom holds by construction.

use std::mem;

use crate::error::LowerError;
use crate::ir::block::{Block, Label};
use crate::ir::function::FuncIr;
use crate::ir::instr::{Const, Expr, Instr, Reduction};
use crate::ir::types::{CallSigs, DType, Signature, Ty, TypeEnv};

/// An ephemeral typed sub-program: its own block set, an entry label, and —
/// for value-producing templates — the temporary holding the final result.
/// Side-effect-only templates (e.g. in-place fill) expose no result.
///
/// Created per rewrite, consumed immediately by [`include_fragment`], never
/// persisted.
#[derive(Debug)]
pub struct Fragment {
    pub blocks: Vec<Block>,
    pub entry: Label,
    /// The last block of the fragment. Left unterminated; the splicer wires
    /// it to the continuation block.
    pub exit: Label,
    pub result: Option<String>,
}

/// Incrementally builds a [`Fragment`] against the host function's typing
/// context. Every temporary it introduces is registered in the type
/// environment; every indexed store it emits gets a fresh call-site id and
/// a signature in the call-signature table.
pub struct FragmentBuilder<'a> {
    func: &'a mut FuncIr,
    types: &'a mut TypeEnv,
    sigs: &'a mut CallSigs,
    blocks: Vec<Block>,
    entry: Label,
    cur_label: Label,
    cur: Vec<Instr>,
    /// When set, instructions sink into the pending parallel-loop body.
    loop_body: Option<Vec<Instr>>,
}

impl<'a> FragmentBuilder<'a> {
    pub fn new(func: &'a mut FuncIr, types: &'a mut TypeEnv, sigs: &'a mut CallSigs) -> Self {
        let entry = func.fresh_label();
        Self {
            func,
            types,
            sigs,
            blocks: Vec::new(),
            entry,
            cur_label: entry,
            cur: Vec::new(),
            loop_body: None,
        }
    }

    fn sink(&mut self) -> &mut Vec<Instr> {
        self.loop_body.as_mut().unwrap_or(&mut self.cur)
    }

    /// Assigns `value` to an existing variable.
    pub fn assign(&mut self, target: &str, value: Expr) {
        let instr = Instr::Assign {
            target: target.into(),
            value,
        };
        self.sink().push(instr);
    }

    /// Assigns `value` to a fresh typed temporary and returns its name.
    pub fn emit(&mut self, prefix: &str, value: Expr, ty: Ty) -> String {
        let name = self.func.fresh_temp(prefix);
        self.types.set(name.clone(), ty);
        self.assign(&name, value);
        name
    }

    pub fn const_int(&mut self, prefix: &str, value: i64) -> String {
        self.emit(
            prefix,
            Expr::Const(Const::Int(value)),
            Ty::Scalar(DType::I64),
        )
    }

    pub fn const_float(&mut self, prefix: &str, value: f64) -> String {
        self.emit(
            prefix,
            Expr::Const(Const::Float(value)),
            Ty::Scalar(DType::F64),
        )
    }

    /// Emits `array[index] = value` with a fresh call-site id, registering
    /// its signature from the recorded types of the operands.
    pub fn set_item(&mut self, array: &str, index: &str, value: &str) -> Result<(), LowerError> {
        let arr_ty = self.lookup(array)?;
        let val_ty = self.lookup(value)?;
        let call = self.func.fresh_call();
        self.sigs.set(
            call,
            Signature {
                arg_tys: vec![arr_ty, Ty::Scalar(DType::I64), val_ty],
                ret_ty: Ty::Unit,
            },
        );
        let instr = Instr::SetItem {
            array: array.into(),
            index: index.into(),
            value: value.into(),
            call,
        };
        self.sink().push(instr);
        Ok(())
    }

    /// Emits a parallel-range loop over `0..len`. The closure receives the
    /// builder in loop-body mode plus the fresh index variable; everything
    /// it emits becomes the loop body. `reduce` declares the accumulator
    /// variables the body updates.
    ///
    /// Panics if called while another loop body is being built: `ParRange`
    /// bodies are straight-line by invariant and must not nest.
    pub fn par_range(
        &mut self,
        len: &str,
        reduce: Vec<Reduction>,
        body: impl FnOnce(&mut Self, &str) -> Result<(), LowerError>,
    ) -> Result<(), LowerError> {
        assert!(
            self.loop_body.is_none(),
            "FragmentBuilder: par_range called inside a loop body"
        );
        let index = self.func.fresh_temp("i");
        self.types.set(index.clone(), Ty::Scalar(DType::I64));
        self.loop_body = Some(Vec::new());
        body(self, &index)?;
        let instrs = self.loop_body.take().unwrap_or_default();
        self.cur.push(Instr::ParRange {
            index,
            len: len.into(),
            body: instrs,
            reduce,
        });
        Ok(())
    }

    /// Seals the current block with a jump to a fresh successor and makes
    /// the successor current. Templates use one block per phase (setup,
    /// loop, combine) so that each loop stays a region of its own.
    pub fn next_block(&mut self) {
        let next = self.func.fresh_label();
        self.cur.push(Instr::Jump { target: next });
        let instrs = mem::take(&mut self.cur);
        self.blocks.push(Block {
            label: self.cur_label,
            instrs,
        });
        self.cur_label = next;
    }

    /// Consumes the builder. The final block is left unterminated for the
    /// splicer to wire to the continuation point.
    pub fn finish(mut self, result: Option<String>) -> Fragment {
        let instrs = mem::take(&mut self.cur);
        self.blocks.push(Block {
            label: self.cur_label,
            instrs,
        });
        Fragment {
            blocks: self.blocks,
            entry: self.entry,
            exit: self.cur_label,
            result,
        }
    }

    /// The recorded type of a variable; missing entries are a fatal
    /// inconsistency in the typing context handed to this pass.
    pub fn lookup(&self, name: &str) -> Result<Ty, LowerError> {
        self.types
            .get(name)
            .cloned()
            .ok_or_else(|| LowerError::MissingType {
                func: self.func.name.clone(),
                var: name.into(),
            })
    }
}

/// Merges a fragment into the host graph at `at` and returns the label of
/// the freshly created continuation block.
///
/// `done` is the prefix of `at`'s instructions already processed by the
/// driver; it becomes the block's new body, terminated by a jump into the
/// fragment. The fragment's exit block is wired to the continuation block,
/// which starts empty — the driver keeps appending the remainder of the
/// original block (including its terminator) there.
pub fn include_fragment(func: &mut FuncIr, at: Label, done: Vec<Instr>, frag: Fragment) -> Label {
    let cont = func.fresh_label();
    func.insert_block(Block::new(cont));

    let mut body = done;
    body.push(Instr::Jump { target: frag.entry });
    if let Some(block) = func.block_mut(at) {
        block.instrs = body;
    }

    let exit = frag.exit;
    for block in frag.blocks {
        func.insert_block(block);
    }
    func.push(exit, Instr::Jump { target: cont });
    cont
}
