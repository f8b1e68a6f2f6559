use std::collections::{BTreeMap, HashMap};

use crate::ir::block::{Block, Label};
use crate::ir::instr::{CallId, Expr, Instr};

/// A typed function body: an arena of basic blocks addressed by stable
/// integer labels.
///
/// Variables are plain names (this IR is not SSA: re-assignment to a name is
/// legal and the type environment holds one entry per name). The arena owns
/// three counters so that every label, temporary name, and call-site id
/// introduced during rewriting is collision-free within the function:
/// fresh temporaries embed a `$`, which never occurs in front-end names.
#[derive(Debug, Clone, PartialEq)]
pub struct FuncIr {
    pub name: String,
    pub entry: Label,
    pub(crate) blocks: BTreeMap<Label, Block>,
    next_label: u32,
    next_temp: u32,
    next_call: u32,
    /// Definition index: variable name → every `Expr` assigned to it.
    /// Rebuilt by `rebuild_definitions()`; the driver refreshes it after
    /// the pass completes.
    pub(crate) definitions: HashMap<String, Vec<Expr>>,
}

impl FuncIr {
    /// Creates a function with a single empty entry block.
    pub fn new(name: impl Into<String>) -> Self {
        let entry = Label(0);
        let mut blocks = BTreeMap::new();
        blocks.insert(entry, Block::new(entry));
        Self {
            name: name.into(),
            entry,
            blocks,
            next_label: 1,
            next_temp: 0,
            next_call: 0,
            definitions: HashMap::new(),
        }
    }

    pub fn block(&self, label: Label) -> Option<&Block> {
        self.blocks.get(&label)
    }

    pub fn block_mut(&mut self, label: Label) -> Option<&mut Block> {
        self.blocks.get_mut(&label)
    }

    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.blocks.values()
    }

    /// Allocates a fresh label without inserting a block. Fragment builders
    /// pre-allocate their labels from here so that splicing never has to
    /// rename anything.
    pub fn fresh_label(&mut self) -> Label {
        let label = Label(self.next_label);
        self.next_label += 1;
        label
    }

    /// Allocates a fresh label and inserts an empty block for it.
    pub fn add_block(&mut self) -> Label {
        let label = self.fresh_label();
        self.blocks.insert(label, Block::new(label));
        label
    }

    /// Inserts a detached block into the arena. Replaces any block already
    /// registered under the same label.
    pub fn insert_block(&mut self, block: Block) {
        self.blocks.insert(block.label, block);
    }

    /// Appends an instruction to a block. No-op if the label is unknown.
    pub fn push(&mut self, label: Label, instr: Instr) {
        if let Some(block) = self.blocks.get_mut(&label) {
            block.instrs.push(instr);
        }
    }

    /// Returns a fresh variable name that cannot collide with any front-end
    /// name or previously issued temporary.
    pub fn fresh_temp(&mut self, prefix: &str) -> String {
        let name = format!("{}${}", prefix, self.next_temp);
        self.next_temp += 1;
        name
    }

    /// Allocates a fresh call-site id.
    pub fn fresh_call(&mut self) -> CallId {
        let id = CallId(self.next_call);
        self.next_call += 1;
        id
    }

    /// Every expression ever assigned to `name`, in no particular order.
    pub fn definitions_of(&self, name: &str) -> &[Expr] {
        self.definitions.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Recomputes the definition index from the current block contents,
    /// including assignments nested inside `ParRange` bodies.
    pub fn rebuild_definitions(&mut self) {
        let mut defs: HashMap<String, Vec<Expr>> = HashMap::new();
        for block in self.blocks.values() {
            collect_definitions(&block.instrs, &mut defs);
        }
        self.definitions = defs;
    }
}

fn collect_definitions(instrs: &[Instr], defs: &mut HashMap<String, Vec<Expr>>) {
    for instr in instrs {
        match instr {
            Instr::Assign { target, value } => {
                defs.entry(target.clone()).or_default().push(value.clone());
            }
            Instr::ParRange { body, .. } => collect_definitions(body, defs),
            _ => {}
        }
    }
}

impl std::fmt::Display for FuncIr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "func {} (entry {}):", self.name, self.entry)?;
        for block in self.blocks.values() {
            write!(f, "{}", block)?;
        }
        Ok(())
    }
}
