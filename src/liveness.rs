/*
 * Released under the terms of the Apache 2.0 license with LLVM
 * exception. See `LICENSE` for details.
 */

//! Block-level liveness: live-at-end sets computed by backward
//! dataflow over the schedule, plus the pairwise interference query
//! the lowering passes consume through the [`Liveness`] trait.

use crate::graph::{Graph, NodeKind};
use crate::sched::Schedule;
use crate::{Block, Liveness, Mode, Node};
use fxhash::FxHashSet;
use log::trace;
use smallvec::{smallvec, SmallVec};

pub struct LiveSets {
    live_end: Vec<Vec<Node>>,
}

fn defs(graph: &Graph, n: Node) -> SmallVec<[Node; 4]> {
    match graph.mode(n) {
        Mode::Data => smallvec![n],
        Mode::Tuple => graph.projs(n),
        Mode::Control => SmallVec::new(),
    }
}

fn is_value_use(graph: &Graph, n: Node) -> bool {
    graph.mode(n).is_data()
}

impl LiveSets {
    pub fn compute(graph: &Graph, sched: &Schedule) -> Self {
        let num_blocks = graph.num_blocks();
        let mut live_in: Vec<FxHashSet<Node>> = vec![FxHashSet::default(); num_blocks];
        let mut live_out: Vec<FxHashSet<Node>> = vec![FxHashSet::default(); num_blocks];

        let mut changed = true;
        while changed {
            changed = false;
            for bi in (0..num_blocks).rev() {
                let block = Block::new(bi);

                let mut out = FxHashSet::default();
                for &succ in graph.block_succs(block) {
                    let pred_pos = graph
                        .block_preds(succ)
                        .iter()
                        .position(|&p| p == block)
                        .expect("block edge lists out of sync");
                    for &v in &live_in[succ.index()] {
                        out.insert(v);
                    }
                    for n in sched.iter_block(succ) {
                        if graph.kind(n) == NodeKind::Phi {
                            out.remove(&n);
                            out.insert(graph.input(n, pred_pos));
                        }
                    }
                }

                let mut live = out.clone();
                for n in sched.iter_block_rev(block) {
                    for d in defs(graph, n) {
                        live.remove(&d);
                    }
                    if graph.kind(n) != NodeKind::Phi {
                        for &op in graph.ins(n) {
                            if is_value_use(graph, op) {
                                live.insert(op);
                            }
                        }
                    }
                }

                if live != live_in[bi] {
                    live_in[bi] = live;
                    changed = true;
                }
                live_out[bi] = out;
            }
        }

        let live_end: Vec<Vec<Node>> = live_out
            .into_iter()
            .map(|set| {
                let mut v: Vec<Node> = set.into_iter().collect();
                v.sort();
                v
            })
            .collect();
        for (bi, l) in live_end.iter().enumerate() {
            trace!("live at end of block{}: {:?}", bi, l);
        }

        LiveSets { live_end }
    }

    /// Is `y` live immediately after the definition point `anchor`
    /// (a scheduled node)?
    fn live_after(&self, graph: &Graph, sched: &Schedule, anchor: Node, y: Node) -> bool {
        let block = sched.block_of(anchor);
        let ydef = graph.skip_proj(y);
        if ydef == anchor {
            // Simultaneously defined (e.g. two projections of one
            // tuple node).
            return true;
        }
        if sched.is_scheduled(ydef)
            && sched.block_of(ydef) == block
            && sched.strictly_before(anchor, ydef)
        {
            // Defined later in the same block.
            return false;
        }
        if self.live_end[block.index()].binary_search(&y).is_ok() {
            return true;
        }
        for u in graph.users(y) {
            if graph.kind(u.node) == NodeKind::Phi {
                // Phi uses live at the end of the pred block; covered
                // by the live-at-end set above.
                continue;
            }
            let upos = graph.skip_proj(u.node);
            if sched.is_scheduled(upos)
                && sched.block_of(upos) == block
                && sched.strictly_before(anchor, upos)
            {
                return true;
            }
        }
        false
    }
}

impl Liveness for LiveSets {
    fn live_at_end(&self, block: Block) -> &[Node] {
        &self.live_end[block.index()]
    }

    fn interfere(&self, graph: &Graph, sched: &Schedule, a: Node, b: Node) -> bool {
        if a == b {
            return false;
        }
        self.live_after(graph, sched, graph.skip_proj(a), b)
            || self.live_after(graph, sched, graph.skip_proj(b), a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RegInfo;

    #[test]
    fn test_straightline_liveness() {
        let mut reginfo = RegInfo::new();
        let cls = reginfo.add_class("gp");
        let mut g = Graph::new();
        let b = g.add_block();
        let a = g.new_inst(b, cls, &[]);
        let c = g.new_inst(b, cls, &[a]);
        let ret = g.new_control_inst(b, &[c]);

        let mut sched = Schedule::new(&g);
        sched.append(b, a);
        sched.append(b, c);
        sched.append(b, ret);

        let live = LiveSets::compute(&g, &sched);
        assert!(live.live_at_end(b).is_empty());
        // `a` dies at `c`; `c` dies at the return.
        assert!(!live.interfere(&g, &sched, a, c));
    }

    #[test]
    fn test_interference_same_block() {
        let mut reginfo = RegInfo::new();
        let cls = reginfo.add_class("gp");
        let mut g = Graph::new();
        let b = g.add_block();
        let a = g.new_inst(b, cls, &[]);
        let c = g.new_inst(b, cls, &[]);
        // Both live until the final use.
        let ret = g.new_control_inst(b, &[a, c]);

        let mut sched = Schedule::new(&g);
        sched.append(b, a);
        sched.append(b, c);
        sched.append(b, ret);

        let live = LiveSets::compute(&g, &sched);
        assert!(live.interfere(&g, &sched, a, c));
    }

    #[test]
    fn test_live_across_blocks() {
        let mut reginfo = RegInfo::new();
        let cls = reginfo.add_class("gp");
        let mut g = Graph::new();
        let b0 = g.add_block();
        let b1 = g.add_block();
        g.add_block_edge(b0, b1);
        g.set_entry(b0);

        let a = g.new_inst(b0, cls, &[]);
        let jmp = g.new_control_inst(b0, &[]);
        let ret = g.new_control_inst(b1, &[a]);

        let mut sched = Schedule::new(&g);
        sched.append(b0, a);
        sched.append(b0, jmp);
        sched.append(b1, ret);

        let live = LiveSets::compute(&g, &sched);
        assert_eq!(live.live_at_end(b0), &[a]);
    }
}
