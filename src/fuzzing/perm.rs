/*
 * Released under the terms of the Apache 2.0 license with LLVM
 * exception. See `LICENSE` for details.
 */

//! Permutation scenarios: build a block around a single Perm node
//! with a chosen register movement, lower it, and check the movement
//! by simulating the emitted sequence over a register file of
//! abstract value tags.

use super::{machine_regs, SplitMix64};
use crate::bitvec::BitVec;
use crate::graph::{Graph, NodeKind};
use crate::liveness::LiveSets;
use crate::lower::lower_nodes_after_ra;
use crate::sched::Schedule;
use crate::verify;
use crate::{Block, Node, Reg, RegClass, RegInfo};
use fxhash::FxHashMap;

#[cfg(feature = "fuzzing")]
use arbitrary::{Arbitrary, Result, Unstructured};

/// A register movement for one permutation, in class-local register
/// indices. The in side and the out side are each duplicate-free;
/// slots with `in == out` exercise no-op elision.
#[derive(Clone, Debug)]
pub struct PermScenario {
    pub n_regs: usize,
    pub mapping: Vec<(usize, usize)>,
    /// Registers whose values stay live across the permutation; these
    /// are unavailable as scratch.
    pub live_extra: Vec<usize>,
    /// Schedule a dead definition between the operand definitions and
    /// the permutation. Without one (and without extra live values)
    /// the operand definitions are directly movable, and push-through
    /// dissolves the permutation before the emitter ever sees it.
    pub barrier: bool,
}

pub struct Built {
    pub graph: Graph,
    pub sched: Schedule,
    pub reginfo: RegInfo,
    pub cls: RegClass,
    pub allocatable: BitVec,
    pub block: Block,
    pub perm: Node,
    /// Slot operand definitions, in mapping order.
    pub defs: Vec<Node>,
    /// Definitions of the extra live values, in `live_extra` order.
    pub extras: Vec<Node>,
    /// Expected end state: the value of `node` sits in `reg` after
    /// the permutation point.
    pub expected: Vec<(Reg, Node)>,
}

impl PermScenario {
    pub fn build(&self) -> Built {
        let (reginfo, cls, allocatable) = machine_regs(self.n_regs);
        let mut graph = Graph::new();
        let block = graph.add_block();

        let mut defs = vec![];
        for &(in_idx, _) in &self.mapping {
            let def = graph.new_inst(block, cls, &[]);
            graph.set_reg(def, reginfo.reg_in_class(cls, in_idx));
            defs.push(def);
        }
        let mut extras = vec![];
        for &idx in &self.live_extra {
            let def = graph.new_inst(block, cls, &[]);
            graph.set_reg(def, reginfo.reg_in_class(cls, idx));
            extras.push(def);
        }

        let mut barrier = None;
        if self.barrier {
            let used: Vec<usize> = self
                .mapping
                .iter()
                .flat_map(|&(i, o)| [i, o])
                .chain(self.live_extra.iter().copied())
                .collect();
            if let Some(spare) = (0..self.n_regs).find(|i| !used.contains(i)) {
                let def = graph.new_inst(block, cls, &[]);
                graph.set_reg(def, reginfo.reg_in_class(cls, spare));
                barrier = Some(def);
            }
        }

        let perm = graph.new_perm(cls, block, &defs);
        let mut expected = vec![];
        let mut term_ins = vec![];
        for (i, &(_, out_idx)) in self.mapping.iter().enumerate() {
            let out_reg = reginfo.reg_in_class(cls, out_idx);
            let proj = graph.new_proj(perm, cls, i as u32);
            graph.set_reg(proj, out_reg);
            expected.push((out_reg, defs[i]));
            term_ins.push(proj);
        }
        term_ins.extend_from_slice(&extras);
        let term = graph.new_control_inst(block, &term_ins);

        let mut sched = Schedule::new(&graph);
        for &d in defs.iter().chain(extras.iter()).chain(barrier.iter()) {
            sched.append(block, d);
        }
        sched.append(block, perm);
        sched.append(block, term);

        Built {
            graph,
            sched,
            reginfo,
            cls,
            allocatable,
            block,
            perm,
            defs,
            extras,
            expected,
        }
    }
}

/// The abstract value a node carries: copies forward their operand's
/// value, a permutation's i-th projection carries the i-th operand's
/// value, everything else is its own value.
pub fn value_of(graph: &Graph, n: Node) -> Node {
    match graph.kind(n) {
        NodeKind::Copy | NodeKind::CopyKeep => value_of(graph, graph.input(n, 0)),
        NodeKind::Proj(i) => {
            let parent = graph.input(n, 0);
            if graph.kind(parent) == NodeKind::Perm {
                value_of(graph, graph.input(parent, i as usize))
            } else {
                n
            }
        }
        _ => n,
    }
}

/// Replay the block over a register file of value tags, checking that
/// every source register still holds its value when read and that the
/// expected movement happened.
pub fn check_movement(b: &Built) {
    let g = &b.graph;
    let mut regfile: FxHashMap<Reg, Node> = FxHashMap::default();

    for n in b.sched.iter_block(b.block) {
        match g.kind(n) {
            NodeKind::Copy | NodeKind::CopyKeep => {
                let src = g.input(n, 0);
                let src_reg = g.reg(src).expect("copy source has no register");
                assert_eq!(
                    regfile.get(&src_reg).copied(),
                    Some(value_of(g, src)),
                    "copy {} reads a clobbered source register",
                    n
                );
                regfile.insert(g.reg(n).expect("copy has no register"), value_of(g, n));
            }
            NodeKind::Perm => {
                for &op in g.ins(n) {
                    let reg = g.reg(op).expect("exchange operand has no register");
                    assert_eq!(
                        regfile.get(&reg).copied(),
                        Some(value_of(g, op)),
                        "exchange {} reads a clobbered source register",
                        n
                    );
                }
                for p in g.projs(n) {
                    regfile.insert(g.reg(p).expect("projection has no register"), value_of(g, p));
                }
            }
            NodeKind::Inst if g.mode(n).is_data() => {
                regfile.insert(g.reg(n).expect("def has no register"), n);
            }
            _ => {}
        }
    }

    for &(reg, def) in &b.expected {
        assert_eq!(
            regfile.get(&reg).copied(),
            Some(def),
            "wrong value left in {:?}",
            reg
        );
    }
}

/// Lower a built scenario and check all end-to-end invariants:
/// structural well-formedness, no surviving wide permutation, the
/// register movement itself, and schedule-order preservation.
pub fn lower_and_check(b: &mut Built) {
    verify::check(&b.graph, &b.sched, &b.reginfo).unwrap();
    let order_before: Vec<Node> = b.sched.iter_block(b.block).collect();

    let live = LiveSets::compute(&b.graph, &b.sched);
    lower_nodes_after_ra(&mut b.graph, &mut b.sched, &b.reginfo, &b.allocatable, live);

    verify::check_lowered(&b.graph, &b.sched, &b.reginfo).unwrap();
    check_movement(b);

    let order_after: Vec<Node> = b.sched.iter_block(b.block).collect();
    let survivors_before: Vec<Node> = order_before
        .iter()
        .copied()
        .filter(|n| order_after.contains(n))
        .collect();
    let survivors_after: Vec<Node> = order_after
        .iter()
        .copied()
        .filter(|n| order_before.contains(n))
        .collect();
    assert_eq!(
        survivors_before, survivors_after,
        "surviving nodes changed relative order"
    );
}

pub fn run(scenario: &PermScenario) {
    let mut built = scenario.build();
    lower_and_check(&mut built);
}

/// Deterministic scenario generation: class of 4..=32 registers,
/// arity 2..=8, a random permutation over a random register subset
/// (fixed points included), random extra live values.
pub fn random_scenario(seed: u64) -> PermScenario {
    let mut rng = SplitMix64(seed);
    let n_regs = 4 + rng.below(29);
    let max_arity = 8.min(n_regs);
    let arity = 2 + rng.below(max_arity - 1);

    let mut avail: Vec<usize> = (0..n_regs).collect();
    let mut ins = vec![];
    for _ in 0..arity {
        let k = rng.below(avail.len());
        ins.push(avail.swap_remove(k));
    }
    let mut outs = ins.clone();
    for i in (1..outs.len()).rev() {
        let j = rng.below(i + 1);
        outs.swap(i, j);
    }
    let mapping = ins.into_iter().zip(outs).collect();

    let mut live_extra = vec![];
    for &r in &avail {
        if rng.chance(40) {
            live_extra.push(r);
        }
    }

    PermScenario {
        n_regs,
        mapping,
        live_extra,
        barrier: rng.chance(50),
    }
}

#[cfg(feature = "fuzzing")]
impl<'a> Arbitrary<'a> for PermScenario {
    fn arbitrary(u: &mut Unstructured<'a>) -> Result<Self> {
        let n_regs = u.int_in_range(4..=32u32)? as usize;
        let max_arity = 8.min(n_regs);
        let arity = u.int_in_range(2..=max_arity as u32)? as usize;

        let mut avail: Vec<usize> = (0..n_regs).collect();
        let mut ins = vec![];
        for _ in 0..arity {
            let k = u.int_in_range(0..=(avail.len() - 1) as u32)? as usize;
            ins.push(avail.swap_remove(k));
        }
        let mut outs = ins.clone();
        for i in (1..outs.len()).rev() {
            let j = u.int_in_range(0..=i as u32)? as usize;
            outs.swap(i, j);
        }
        let mapping = ins.into_iter().zip(outs).collect();

        let mut live_extra = vec![];
        for &r in &avail {
            if bool::arbitrary(u)? {
                live_extra.push(r);
            }
        }

        Ok(PermScenario {
            n_regs,
            mapping,
            live_extra,
            barrier: bool::arbitrary(u)?,
        })
    }
}
