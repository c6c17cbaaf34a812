/*
 * Released under the terms of the Apache 2.0 license with LLVM
 * exception. See `LICENSE` for details.
 */

//! Constraint scenarios: straightline blocks of instructions with
//! random must-differ masks, run through `assure_constraints` and
//! checked for enforcement and idempotence.

use super::{machine_regs, SplitMix64};
use crate::constraints::{already_assured, assure_constraints};
use crate::graph::{Graph, NodeKind};
use crate::sched::Schedule;
use crate::ssa::DomSsaFixup;
use crate::{Node, RegReq};

#[cfg(feature = "fuzzing")]
use arbitrary::{Arbitrary, Result, Unstructured};

#[derive(Clone, Debug)]
pub struct InstSpec {
    /// Operand picks, as indices into the pool of previously defined
    /// values (taken modulo the pool size).
    pub ops: Vec<usize>,
    pub must_differ: u32,
    pub should_be_same: u32,
    /// Two-output tuple instruction; the requirement goes on both
    /// projections, which exercises copy-keep melting.
    pub tuple: bool,
}

#[derive(Clone, Debug)]
pub struct ConstraintScenario {
    pub insts: Vec<InstSpec>,
    /// Pool indices the block's terminator keeps live (modulo the
    /// pool size); empty means all of them. Values nothing uses after
    /// their constrained instruction exercise the CopyKeep-to-Keep
    /// conversion.
    pub term_uses: Vec<usize>,
}

pub struct Built {
    pub graph: Graph,
    pub sched: Schedule,
}

impl ConstraintScenario {
    pub fn build(&self) -> Built {
        let (_reginfo, cls, _allocatable) = machine_regs(8);
        let mut graph = Graph::new();
        let block = graph.add_block();

        let mut pool: Vec<Node> = vec![];
        let mut order: Vec<Node> = vec![];
        for _ in 0..2 {
            let def = graph.new_inst(block, cls, &[]);
            pool.push(def);
            order.push(def);
        }

        for spec in &self.insts {
            let ops: Vec<Node> = spec
                .ops
                .iter()
                .map(|&i| pool[i % pool.len()])
                .collect();
            let mask = if ops.is_empty() {
                0
            } else {
                (1u32 << ops.len().min(31)) - 1
            };
            let req = RegReq {
                must_differ: spec.must_differ & mask,
                should_be_same: spec.should_be_same & mask,
                ..RegReq::default()
            };
            if spec.tuple {
                let t = graph.new_tuple_inst(block, &ops);
                order.push(t);
                for pi in 0..2 {
                    let p = graph.new_proj(t, cls, pi);
                    graph.set_req(p, req);
                    pool.push(p);
                }
            } else {
                let n = graph.new_inst(block, cls, &ops);
                graph.set_req(n, req);
                pool.push(n);
                order.push(n);
            }
        }

        let term_ins: Vec<Node> = if self.term_uses.is_empty() {
            pool.clone()
        } else {
            self.term_uses
                .iter()
                .map(|&i| pool[i % pool.len()])
                .collect()
        };
        let term = graph.new_control_inst(block, &term_ins);
        order.push(term);

        let mut sched = Schedule::new(&graph);
        for &n in &order {
            sched.append(block, n);
        }

        Built { graph, sched }
    }
}

/// Every (non-vacuous) must-differ constraint must be backed by a
/// keep chain binding the instruction to a copy of the named operand.
pub fn check_assured(graph: &Graph, _sched: &Schedule) {
    for n in graph.nodes() {
        let req = graph.req(n);
        if req.must_differ == 0 {
            continue;
        }
        let skipped = graph.skip_proj(n);

        if req.should_be_same != 0
            && req.must_differ.is_power_of_two()
            && req.should_be_same.is_power_of_two()
            && graph.input(skipped, req.must_differ.trailing_zeros() as usize)
                == graph.input(skipped, req.should_be_same.trailing_zeros() as usize)
        {
            continue;
        }

        for i in 0..u32::BITS {
            if req.must_differ & (1u32 << i) == 0 {
                continue;
            }
            let v = graph.input(skipped, i as usize);
            if graph.flags(v).ignore || !graph.mode(v).is_data() {
                continue;
            }
            assert!(
                already_assured(graph, n, v),
                "must-differ on {} input {} has no keep chain",
                n,
                i
            );
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct GraphStats {
    pub live_nodes: usize,
    pub scheduled: usize,
    pub copies: usize,
    pub keeps: usize,
    pub copy_keeps: usize,
}

pub fn graph_stats(graph: &Graph, sched: &Schedule) -> GraphStats {
    let mut stats = GraphStats {
        live_nodes: 0,
        scheduled: 0,
        copies: 0,
        keeps: 0,
        copy_keeps: 0,
    };
    for n in graph.nodes() {
        stats.live_nodes += 1;
        if sched.is_scheduled(n) {
            stats.scheduled += 1;
        }
        match graph.kind(n) {
            NodeKind::Copy => stats.copies += 1,
            NodeKind::Keep => stats.keeps += 1,
            NodeKind::CopyKeep => stats.copy_keeps += 1,
            _ => {}
        }
    }
    stats
}

/// Run the constraint pass, check enforcement, then run it again and
/// check that the second pass is a no-op.
pub fn run(scenario: &ConstraintScenario) {
    let mut b = scenario.build();

    let mut ssa = DomSsaFixup::new(&b.graph);
    assure_constraints(&mut b.graph, &mut b.sched, &mut ssa);
    check_assured(&b.graph, &b.sched);

    let first = graph_stats(&b.graph, &b.sched);
    let mut ssa = DomSsaFixup::new(&b.graph);
    assure_constraints(&mut b.graph, &mut b.sched, &mut ssa);
    check_assured(&b.graph, &b.sched);
    let second = graph_stats(&b.graph, &b.sched);
    assert_eq!(first, second, "assure_constraints is not idempotent");
}

pub fn random_scenario(seed: u64) -> ConstraintScenario {
    let mut rng = SplitMix64(seed);
    let n_insts = 1 + rng.below(12);
    let mut insts = vec![];
    for _ in 0..n_insts {
        let n_ops = 1 + rng.below(3);
        let ops = (0..n_ops).map(|_| rng.below(64)).collect();
        let must_differ = (rng.next_u64() & 0x7) as u32;
        let should_be_same = if rng.chance(25) {
            1u32 << rng.below(3)
        } else {
            0
        };
        insts.push(InstSpec {
            ops,
            must_differ,
            should_be_same,
            tuple: rng.chance(30),
        });
    }
    let term_uses = if rng.chance(50) {
        (0..1 + rng.below(8)).map(|_| rng.below(64)).collect()
    } else {
        vec![]
    };
    ConstraintScenario { insts, term_uses }
}

#[cfg(feature = "fuzzing")]
impl<'a> Arbitrary<'a> for ConstraintScenario {
    fn arbitrary(u: &mut Unstructured<'a>) -> Result<Self> {
        let mut insts = vec![];
        while bool::arbitrary(u)? && insts.len() < 24 {
            let n_ops = u.int_in_range(1..=3u32)? as usize;
            let mut ops = vec![];
            for _ in 0..n_ops {
                ops.push(u.int_in_range(0..=63u32)? as usize);
            }
            insts.push(InstSpec {
                ops,
                must_differ: u.int_in_range(0..=7u32)?,
                should_be_same: if bool::arbitrary(u)? {
                    1u32 << u.int_in_range(0..=2u32)?
                } else {
                    0
                },
                tuple: bool::arbitrary(u)?,
            });
        }
        let mut term_uses = vec![];
        while bool::arbitrary(u)? && term_uses.len() < 8 {
            term_uses.push(u.int_in_range(0..=63u32)? as usize);
        }
        Ok(ConstraintScenario { insts, term_uses })
    }
}
