//! Control-flow utilities over a block arena: topological ordering and the
//! definition index. The lowering driver treats these as services; they are
//! small enough to live alongside the IR itself.

use std::collections::HashSet;

use crate::ir::block::Label;
use crate::ir::function::FuncIr;

/// Returns the reachable blocks of `func` in a topological processing order
/// (reverse post-order over terminator edges, starting at the entry block).
///
/// Back edges are ignored, which is sufficient for the region shapes this
/// crate rewrites: loops appear as single `ParRange` instructions, not as
/// cyclic block graphs.
pub fn topo_order(func: &FuncIr) -> Vec<Label> {
    let mut visited: HashSet<Label> = HashSet::new();
    let mut post: Vec<Label> = Vec::new();
    dfs(func, func.entry, &mut visited, &mut post);
    post.reverse();
    post
}

fn dfs(func: &FuncIr, label: Label, visited: &mut HashSet<Label>, post: &mut Vec<Label>) {
    if !visited.insert(label) {
        return;
    }
    let successors = func
        .block(label)
        .and_then(|b| b.terminator())
        .map(|t| t.successors())
        .unwrap_or_default();
    for succ in successors {
        dfs(func, succ, visited, post);
    }
    post.push(label);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::block::Block;
    use crate::ir::instr::Instr;

    fn jump(target: Label) -> Instr {
        Instr::Jump { target }
    }

    #[test]
    fn topo_order_linear_chain() {
        let mut f = FuncIr::new("chain");
        let b1 = f.add_block();
        let b2 = f.add_block();
        f.push(f.entry, jump(b1));
        f.push(b1, jump(b2));
        f.push(b2, Instr::Return { value: None });
        assert_eq!(topo_order(&f), vec![f.entry, b1, b2]);
    }

    #[test]
    fn topo_order_diamond_puts_join_last() {
        let mut f = FuncIr::new("diamond");
        let then_b = f.add_block();
        let else_b = f.add_block();
        let join = f.add_block();
        f.push(
            f.entry,
            Instr::Branch {
                cond: "c".into(),
                if_true: then_b,
                if_false: else_b,
            },
        );
        f.push(then_b, jump(join));
        f.push(else_b, jump(join));
        f.push(join, Instr::Return { value: None });

        let order = topo_order(&f);
        assert_eq!(order.first(), Some(&f.entry));
        assert_eq!(order.last(), Some(&join));
        assert_eq!(order.len(), 4);
    }

    #[test]
    fn topo_order_skips_unreachable_blocks() {
        let mut f = FuncIr::new("unreachable");
        let dead = f.fresh_label();
        f.insert_block(Block::new(dead));
        f.push(f.entry, Instr::Return { value: None });
        assert_eq!(topo_order(&f), vec![f.entry]);
    }
}
