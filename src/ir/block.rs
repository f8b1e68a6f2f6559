use crate::ir::instr::Instr;

/// An opaque index identifying a basic block within a `FuncIr`.
///
/// Labels are stable: splicing never renames an existing label, it only
/// allocates new ones from the function's counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Label(pub u32);

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "b{}", self.0)
    }
}

/// A basic block: an ordered sequence of instructions.
///
/// A well-formed block ends with exactly one terminator. Blocks under
/// construction (inside a fragment builder, or mid-splice) may be
/// temporarily unsealed.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub label: Label,
    pub instrs: Vec<Instr>,
}

impl Block {
    pub fn new(label: Label) -> Self {
        Self {
            label,
            instrs: Vec::new(),
        }
    }

    /// Returns the terminator instruction if the block is sealed.
    pub fn terminator(&self) -> Option<&Instr> {
        self.instrs.last().filter(|i| i.is_terminator())
    }

    /// A block is sealed when it ends with a terminator.
    pub fn is_sealed(&self) -> bool {
        self.terminator().is_some()
    }
}

impl std::fmt::Display for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}:", self.label)?;
        for instr in &self.instrs {
            writeln!(f, "  {}", instr)?;
        }
        Ok(())
    }
}
