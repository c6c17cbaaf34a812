/*
 * Released under the terms of the Apache 2.0 license with LLVM
 * exception. See `LICENSE` for details.
 */

//! SSA reconstruction: given a value and a set of newly introduced
//! copies of it, re-point every user of the value to the definition
//! that dominates the use. The constraint pass consumes this through
//! the [`SsaReconstruction`] trait; [`DomSsaFixup`] is the in-crate
//! implementation, built on the block dominator tree plus schedule
//! order within blocks.

use crate::cfg::CfgInfo;
use crate::graph::{Graph, NodeKind, Use};
use crate::sched::Schedule;
use crate::{Block, Node};
use fxhash::FxHashMap;
use log::debug;

pub trait SsaReconstruction {
    /// The set of definitions is `{original} ∪ copies`. Every user of
    /// `original` (other than the copies themselves) is re-pointed to
    /// the nearest dominating definition. Panics if some use is not
    /// dominated by any definition; that indicates graph corruption.
    fn fix_users(&mut self, graph: &mut Graph, sched: &Schedule, original: Node, copies: &[Node]);
}

pub struct DomSsaFixup {
    cfg: CfgInfo,
}

impl DomSsaFixup {
    pub fn new(graph: &Graph) -> Self {
        Self {
            cfg: CfgInfo::new(graph),
        }
    }
}

struct PosCache {
    by_block: FxHashMap<Block, FxHashMap<Node, u32>>,
}

impl PosCache {
    fn new() -> Self {
        Self {
            by_block: FxHashMap::default(),
        }
    }

    fn pos(&mut self, sched: &Schedule, block: Block, n: Node) -> u32 {
        let map = self.by_block.entry(block).or_insert_with(|| {
            sched
                .iter_block(block)
                .enumerate()
                .map(|(i, n)| (n, i as u32))
                .collect()
        });
        *map.get(&n).expect("node not scheduled in its block")
    }
}

/// Where a use happens: the block, and the schedule anchor within it
/// (`None` for uses at the end of the block, i.e. phi edges).
fn use_location(graph: &Graph, user: Use) -> (Block, Option<Node>) {
    if graph.kind(user.node) == NodeKind::Phi {
        let block = graph.block_of(user.node);
        let pred = graph.block_preds(block)[user.pos as usize];
        (pred, None)
    } else {
        let anchor = graph.skip_proj(user.node);
        (graph.block_of(anchor), Some(anchor))
    }
}

impl SsaReconstruction for DomSsaFixup {
    fn fix_users(&mut self, graph: &mut Graph, sched: &Schedule, original: Node, copies: &[Node]) {
        let mut pos = PosCache::new();

        let mut defs: Vec<Node> = Vec::with_capacity(copies.len() + 1);
        defs.push(original);
        defs.extend_from_slice(copies);

        let users: Vec<Use> = graph
            .users(original)
            .iter()
            .copied()
            .filter(|u| !defs.contains(&u.node))
            .collect();

        for user in users {
            let (use_block, use_anchor) = use_location(graph, user);

            let mut best: Option<(Node, Block, u32)> = None;
            for &d in &defs {
                let d_anchor = graph.skip_proj(d);
                assert!(
                    sched.is_scheduled(d_anchor),
                    "ssa reconstruction: definition {} is not scheduled",
                    d
                );
                let d_block = sched.block_of(d_anchor);

                let dominates = if d_block == use_block {
                    match use_anchor {
                        Some(anchor) => {
                            pos.pos(sched, d_block, d_anchor) < pos.pos(sched, d_block, anchor)
                        }
                        // Use at end of block: any def in the block
                        // reaches it.
                        None => true,
                    }
                } else {
                    self.cfg.dominates(d_block, use_block)
                };
                if !dominates {
                    continue;
                }

                let d_pos = pos.pos(sched, d_block, d_anchor);
                best = match best {
                    None => Some((d, d_block, d_pos)),
                    Some((bd, bb, bp)) => {
                        // Dominating defs of one use are totally
                        // ordered: same block decides by schedule
                        // position, otherwise by domtree depth.
                        let better = if d_block == bb {
                            d_pos > bp
                        } else {
                            self.cfg.depth(d_block) > self.cfg.depth(bb)
                        };
                        if better {
                            Some((d, d_block, d_pos))
                        } else {
                            Some((bd, bb, bp))
                        }
                    }
                };
            }

            let (best, ..) = best.unwrap_or_else(|| {
                panic!(
                    "ssa reconstruction failed: no definition of {} dominates use {}@{}",
                    original, user.node, user.pos
                )
            });
            if best != original {
                debug!(
                    "ssa: re-pointing use {}@{} from {} to {}",
                    user.node, user.pos, original, best
                );
                graph.set_input(user.node, user.pos as usize, best);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RegInfo;

    #[test]
    fn test_same_block_repoint() {
        let mut reginfo = RegInfo::new();
        let cls = reginfo.add_class("gp");
        let mut g = Graph::new();
        let b = g.add_block();
        let v = g.new_inst(b, cls, &[]);
        let early_use = g.new_inst(b, cls, &[v]);
        let cpy = g.new_copy(b, v);
        let late_use = g.new_inst(b, cls, &[v]);
        let ret = g.new_control_inst(b, &[early_use, late_use]);

        let mut sched = Schedule::new(&g);
        sched.append(b, v);
        sched.append(b, early_use);
        sched.append(b, cpy);
        sched.append(b, late_use);
        sched.append(b, ret);

        let mut ssa = DomSsaFixup::new(&g);
        ssa.fix_users(&mut g, &sched, v, &[cpy]);

        assert_eq!(g.input(early_use, 0), v);
        assert_eq!(g.input(late_use, 0), cpy);
        // The copy itself still reads the original.
        assert_eq!(g.input(cpy, 0), v);
    }

    #[test]
    fn test_cross_block_repoint() {
        let mut reginfo = RegInfo::new();
        let cls = reginfo.add_class("gp");
        let mut g = Graph::new();
        let b0 = g.add_block();
        let b1 = g.add_block();
        g.add_block_edge(b0, b1);
        g.set_entry(b0);

        let v = g.new_inst(b0, cls, &[]);
        let cpy = g.new_copy(b0, v);
        let jmp = g.new_control_inst(b0, &[]);
        let use1 = g.new_inst(b1, cls, &[v]);
        let ret = g.new_control_inst(b1, &[use1]);

        let mut sched = Schedule::new(&g);
        sched.append(b0, v);
        sched.append(b0, cpy);
        sched.append(b0, jmp);
        sched.append(b1, use1);
        sched.append(b1, ret);

        let mut ssa = DomSsaFixup::new(&g);
        ssa.fix_users(&mut g, &sched, v, &[cpy]);

        assert_eq!(g.input(use1, 0), cpy);
    }

    #[test]
    fn test_phi_use_repoint() {
        let mut reginfo = RegInfo::new();
        let cls = reginfo.add_class("gp");
        let mut g = Graph::new();
        let b0 = g.add_block();
        let b1 = g.add_block();
        let b2 = g.add_block();
        let b3 = g.add_block();
        g.add_block_edge(b0, b1);
        g.add_block_edge(b0, b2);
        g.add_block_edge(b1, b3);
        g.add_block_edge(b2, b3);
        g.set_entry(b0);

        let v = g.new_inst(b0, cls, &[]);
        let br = g.new_control_inst(b0, &[]);
        // A copy of `v` only along the b1 edge.
        let cpy = g.new_copy(b1, v);
        let jmp1 = g.new_control_inst(b1, &[]);
        let jmp2 = g.new_control_inst(b2, &[]);
        let phi = g.new_phi(b3, cls, &[v, v]);
        let ret = g.new_control_inst(b3, &[phi]);

        let mut sched = Schedule::new(&g);
        sched.append(b0, v);
        sched.append(b0, br);
        sched.append(b1, cpy);
        sched.append(b1, jmp1);
        sched.append(b2, jmp2);
        sched.append(b3, phi);
        sched.append(b3, ret);

        let mut ssa = DomSsaFixup::new(&g);
        ssa.fix_users(&mut g, &sched, v, &[cpy]);

        // The phi input along b1 sees the copy; along b2 the original.
        assert_eq!(g.input(phi, 0), cpy);
        assert_eq!(g.input(phi, 1), v);
    }
}
