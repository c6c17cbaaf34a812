/*
 * Released under the terms of the Apache 2.0 license with LLVM
 * exception. See `LICENSE` for details.
 */

//! Lightweight CFG analyses feeding the SSA reconstruction service:
//! a reverse-postorder block sequence, immediate dominators, and
//! dominance depth.
//!
//! Immediate dominators are computed with the iterative scheme of
//!
//!   A Simple, Fast Dominance Algorithm
//!   Keith D. Cooper, Timothy J. Harvey, and Ken Kennedy
//!   TR-06-33870, Rice University
//!   https://www.cs.rice.edu/~keith/EMBED/dom.pdf
//!
//! in its reverse-postorder-numbered formulation: walk the blocks in
//! RPO, intersect the dominator chains of all processed predecessors,
//! repeat until nothing changes.

use crate::graph::Graph;
use crate::Block;

#[derive(Clone, Debug)]
pub struct CfgInfo {
    /// Reachable blocks in reverse postorder; `rpo[0]` is the entry.
    pub rpo: Vec<Block>,
    /// RPO position per block; `u32::MAX` for unreachable blocks.
    pub rpo_num: Vec<u32>,
    /// Immediate dominator per block. The entry block and unreachable
    /// blocks map to `Block::invalid()`.
    pub idom: Vec<Block>,
    /// Dominator-tree depth; the entry block has depth 0, unreachable
    /// blocks `u32::MAX`.
    pub depth: Vec<u32>,
}

impl CfgInfo {
    pub fn new(graph: &Graph) -> CfgInfo {
        let rpo = reverse_postorder(graph);

        let mut rpo_num = vec![u32::MAX; graph.num_blocks()];
        for (i, &b) in rpo.iter().enumerate() {
            rpo_num[b.index()] = i as u32;
        }

        let idom = immediate_dominators(graph, &rpo, &rpo_num);

        // Parents precede children in RPO, so one forward sweep
        // settles all depths.
        let mut depth = vec![u32::MAX; graph.num_blocks()];
        depth[graph.entry_block().index()] = 0;
        for &b in rpo.iter().skip(1) {
            let parent = idom[b.index()];
            if parent.is_valid() {
                depth[b.index()] = depth[parent.index()] + 1;
            }
        }

        CfgInfo {
            rpo,
            rpo_num,
            idom,
            depth,
        }
    }

    /// Does `a` dominate `b`? Climb `b`'s dominator chain down to
    /// `a`'s depth and compare. Unreachable blocks dominate nothing
    /// and are dominated by nothing.
    pub fn dominates(&self, a: Block, b: Block) -> bool {
        if a == b {
            return true;
        }
        let target = self.depth[a.index()];
        if target == u32::MAX || self.depth[b.index()] == u32::MAX {
            return false;
        }
        let mut cur = b;
        while self.depth[cur.index()] > target {
            cur = self.idom[cur.index()];
        }
        cur == a
    }

    pub fn depth(&self, b: Block) -> u32 {
        self.depth[b.index()]
    }
}

/// Depth-first traversal with an explicit two-phase stack: blocks are
/// emitted when left, giving a postorder, which is then reversed.
fn reverse_postorder(graph: &Graph) -> Vec<Block> {
    enum Step {
        Enter(Block),
        Leave(Block),
    }

    let entry = graph.entry_block();
    let mut seen = vec![false; graph.num_blocks()];
    let mut order = Vec::with_capacity(graph.num_blocks());
    let mut work = vec![Step::Enter(entry)];
    seen[entry.index()] = true;

    while let Some(step) = work.pop() {
        match step {
            Step::Enter(block) => {
                work.push(Step::Leave(block));
                // Reversed here so the successors are entered in
                // their edge order.
                for &succ in graph.block_succs(block).iter().rev() {
                    if !seen[succ.index()] {
                        seen[succ.index()] = true;
                        work.push(Step::Enter(succ));
                    }
                }
            }
            Step::Leave(block) => order.push(block),
        }
    }

    order.reverse();
    order
}

/// The paper's `intersect`: climb both dominator chains, always
/// advancing the deeper (higher-RPO-numbered) side, until they meet.
fn intersect(rpo_num: &[u32], idom: &[Block], mut f1: Block, mut f2: Block) -> Block {
    while f1 != f2 {
        while rpo_num[f1.index()] > rpo_num[f2.index()] {
            f1 = idom[f1.index()];
        }
        while rpo_num[f2.index()] > rpo_num[f1.index()] {
            f2 = idom[f2.index()];
        }
    }
    f1
}

fn immediate_dominators(graph: &Graph, rpo: &[Block], rpo_num: &[u32]) -> Vec<Block> {
    let entry = graph.entry_block();
    let mut idom = vec![Block::invalid(); graph.num_blocks()];

    // The entry is its own dominator while iterating; `intersect`
    // bottoms out there.
    idom[entry.index()] = entry;

    let mut changed = true;
    while changed {
        changed = false;
        for &block in rpo.iter().skip(1) {
            // Fold all predecessors that already have a dominator;
            // unreachable predecessors contribute nothing.
            let mut new_idom = Block::invalid();
            for &pred in graph.block_preds(block) {
                if rpo_num[pred.index()] == u32::MAX || idom[pred.index()].is_invalid() {
                    continue;
                }
                new_idom = if new_idom.is_invalid() {
                    pred
                } else {
                    intersect(rpo_num, &idom, pred, new_idom)
                };
            }
            if new_idom.is_valid() && idom[block.index()] != new_idom {
                idom[block.index()] = new_idom;
                changed = true;
            }
        }
    }

    idom[entry.index()] = Block::invalid();
    idom
}
