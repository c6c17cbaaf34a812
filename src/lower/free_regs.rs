/*
 * Released under the terms of the Apache 2.0 license with LLVM
 * exception. See `LICENSE` for details.
 */

//! The free-register oracle: one pass over the function before
//! lowering that records, per permutation, a scratch register of the
//! permutation's class that is allocatable and not live at the
//! permutation's schedule position.

use crate::bitvec::BitVec;
use crate::graph::{Graph, NodeKind};
use crate::sched::Schedule;
use crate::{Block, Liveness, Mode, Node, Reg, RegClass, RegInfo};
use fxhash::FxHashMap;
use log::{debug, trace};

pub struct FreeRegMap {
    map: FxHashMap<Node, Reg>,
}

impl FreeRegMap {
    pub fn get(&self, perm: Node) -> Option<Reg> {
        self.map.get(&perm).copied()
    }
}

fn set_reg_in_use(
    graph: &Graph,
    reginfo: &RegInfo,
    node: Node,
    cls: RegClass,
    regs_in_use: &mut [bool],
    in_use: bool,
) {
    if !graph.mode(node).is_data() {
        return;
    }
    let reg = graph
        .reg(node)
        .unwrap_or_else(|| panic!("no register assigned at {}", node));
    if reginfo.is_virtual(reg) {
        return;
    }
    if reginfo.class_of(reg) != cls {
        return;
    }
    trace!(
        "    register {} is now {}",
        reginfo.reg_name(reg),
        if in_use { "not free" } else { "free" }
    );
    regs_in_use[reginfo.local_index(reg)] = in_use;
}

fn update_reg_defs(
    graph: &Graph,
    reginfo: &RegInfo,
    node: Node,
    cls: RegClass,
    regs_in_use: &mut [bool],
    in_use: bool,
) {
    if graph.mode(node) == Mode::Tuple {
        for proj in graph.projs(node) {
            set_reg_in_use(graph, reginfo, proj, cls, regs_in_use, in_use);
        }
    } else {
        set_reg_in_use(graph, reginfo, node, cls, regs_in_use, in_use);
    }
}

fn update_reg_uses(
    graph: &Graph,
    reginfo: &RegInfo,
    node: Node,
    cls: RegClass,
    regs_in_use: &mut [bool],
) {
    for &op in graph.ins(node) {
        if graph.mode(op).is_data() {
            set_reg_in_use(graph, reginfo, op, cls, regs_in_use, true);
        }
    }
}

fn find_free_register<L: Liveness>(
    graph: &Graph,
    sched: &Schedule,
    reginfo: &RegInfo,
    allocatable: &BitVec,
    live: &L,
    perm: Node,
    cls: RegClass,
    out: &mut FxHashMap<Node, Reg>,
) {
    let block = graph.block_of(perm);
    let num_registers = reginfo.num_regs(cls);
    let mut regs_in_use = vec![false; num_registers];

    debug!("looking for free register for {}", perm);
    for &node in live.live_at_end(block) {
        trace!("  live at block end: {}", node);
        set_reg_in_use(graph, reginfo, node, cls, &mut regs_in_use, true);
    }

    for node in sched.iter_block_rev(block) {
        if graph.kind(node) == NodeKind::Phi {
            break;
        }
        trace!("  looking at node: {}", node);

        // The permutation's own outputs and inputs count as live; a
        // scratch register must not collide with either.
        update_reg_defs(graph, reginfo, node, cls, &mut regs_in_use, node == perm);
        update_reg_uses(graph, reginfo, node, cls, &mut regs_in_use);

        if node == perm {
            break;
        }
    }

    for i in 0..num_registers {
        let reg = reginfo.reg_in_class(cls, i);
        let okay_to_use = allocatable.get(reg.index());
        if !regs_in_use[i] && okay_to_use {
            debug!(
                "free reg for {}: register {} is free and okay to use",
                perm,
                reginfo.reg_name(reg)
            );
            out.insert(perm, reg);
            return;
        }
    }

    debug!("no free reg for {} found", perm);
}

/// Run once per function before lowering; the result is read-only
/// during lowering and must be recomputed if the schedule changes.
pub fn find_free_registers<L: Liveness>(
    graph: &Graph,
    sched: &Schedule,
    reginfo: &RegInfo,
    allocatable: &BitVec,
    live: &L,
) -> FreeRegMap {
    let mut map = FxHashMap::default();
    for bi in 0..graph.num_blocks() {
        let block = Block::new(bi);
        for node in sched.iter_block(block) {
            if graph.kind(node) != NodeKind::Perm {
                continue;
            }
            let cls = reginfo.class_of(
                graph
                    .reg(graph.input(node, 0))
                    .unwrap_or_else(|| panic!("no register assigned at {}", graph.input(node, 0))),
            );
            find_free_register(graph, sched, reginfo, allocatable, live, node, cls, &mut map);
        }
    }
    FreeRegMap { map }
}
