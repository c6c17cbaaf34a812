/*
 * Released under the terms of the Apache 2.0 license with LLVM
 * exception. See `LICENSE` for details.
 */

//! Emission of concrete copy/exchange sequences for one decomposed
//! move. New nodes are inserted after an advancing schedule point
//! that starts at the permutation's predecessor, so the sequence ends
//! up immediately before the permutation, tail move first.

use super::pairs::{in_node_for, out_node_for, set_in_node, MoveKind, PermMove, RegPair};
use crate::graph::Graph;
use crate::sched::Schedule;
use crate::{Node, Reg, RegInfo};
use log::debug;

fn sched_point_before(sched: &Schedule, perm: Node) -> Node {
    sched
        .prev(perm)
        .unwrap_or_else(|| panic!("{} is not scheduled or has no predecessor", perm))
}

/// A chain `[r0, .., r_{k-1}]` becomes k-1 copies, emitted from the
/// tail backwards so every source register is read before it is
/// overwritten. Each copy takes over the projection of its target
/// register.
fn split_chain_into_copies(
    graph: &mut Graph,
    sched: &mut Schedule,
    perm: Node,
    mv: &PermMove,
    pairs: &[RegPair],
) {
    let block = graph.block_of(perm);
    let mut sched_point = sched_point_before(sched, perm);

    debug_assert_eq!(mv.kind, MoveKind::Chain);

    for i in (0..mv.elems.len() - 1).rev() {
        let arg = in_node_for(pairs, mv.elems[i]);
        let res = out_node_for(pairs, mv.elems[i + 1]);

        debug!(
            "{} creating copy node ({}, {:?}) -> ({}, {:?})",
            perm,
            arg,
            mv.elems[i],
            res,
            mv.elems[i + 1]
        );

        let cpy = graph.new_copy(block, arg);
        graph.set_reg(cpy, mv.elems[i + 1]);

        graph.exchange(res, cpy);
        graph.kill(res);

        sched.insert_after(sched_point, cpy);
        sched_point = cpy;
    }
}

/// A cycle without a scratch register becomes k-1 two-register
/// exchanges (arity-2 permutations).
///
/// A cycle with more than two elements corresponds to a permutation
///
/// ```text
///   +----+   +----+   +----+
///   | r1 |   | r2 |   | r3 |
///   +-+--+   +-+--+   +--+-+
///     |        |         |
///   +-+--------+---------+-+
///   |         Perm         |
///   +-+--------+---------+-+
///     |        |         |
///   +-+--+   +-+--+   +--+-+
///   |Proj|   |Proj|   |Proj|
///   | r2 |   | r3 |   | r1 |
///   +----+   +----+   +----+
/// ```
///
/// which splits into a sequence of 2x2 permutations where the "other"
/// projection of each middle exchange is a fresh intermediate that
/// feeds the next one. The pair table's in-value for that register is
/// re-pointed accordingly.
fn split_cycle_into_swaps(
    graph: &mut Graph,
    sched: &mut Schedule,
    reginfo: &RegInfo,
    perm: Node,
    mv: &PermMove,
    pairs: &mut [RegPair],
) {
    let cls = reginfo.class_of(
        graph
            .reg(graph.input(perm, 0))
            .unwrap_or_else(|| panic!("no register assigned at {}", graph.input(perm, 0))),
    );
    let block = graph.block_of(perm);
    let mut sched_point = sched_point_before(sched, perm);

    debug_assert_eq!(mv.kind, MoveKind::Cycle);

    for i in (0..mv.elems.len() - 1).rev() {
        let arg1 = in_node_for(pairs, mv.elems[i]);
        let arg2 = in_node_for(pairs, mv.elems[i + 1]);
        let res2 = out_node_for(pairs, mv.elems[i + 1]);

        debug!(
            "{} creating exchange node ({}, {:?}) and ({}, {:?})",
            perm,
            arg1,
            mv.elems[i],
            arg2,
            mv.elems[i + 1]
        );

        let xchg = graph.new_perm(cls, block, &[arg1, arg2]);

        let res1 = if i > 0 {
            // Cycle is not done yet: fresh intermediate projection,
            // which becomes the in-value of the next exchange.
            let inter = graph.new_proj(xchg, cls, 1);
            set_in_node(pairs, mv.elems[i], inter);
            inter
        } else {
            let orig = out_node_for(pairs, mv.elems[i]);
            graph.set_proj(orig, xchg, 1);
            orig
        };
        graph.set_proj(res2, xchg, 0);

        graph.set_reg(res2, mv.elems[i + 1]);
        graph.set_reg(res1, mv.elems[i]);

        sched.insert_after(sched_point, xchg);
        debug!("replacing {} with {}, placed after {}", perm, xchg, sched_point);
        sched_point = xchg;
    }
}

/// A cycle with a free scratch register becomes k+1 plain copies:
/// save the tail register, rotate as a chain, restore into the head.
fn split_cycle_into_copies(
    graph: &mut Graph,
    sched: &mut Schedule,
    perm: Node,
    mv: &PermMove,
    pairs: &[RegPair],
    free_reg: Reg,
) {
    let block = graph.block_of(perm);
    let mut sched_point = sched_point_before(sched, perm);

    debug_assert_eq!(mv.kind, MoveKind::Cycle);

    let num_elems = mv.elems.len();

    // Save last register content.
    let arg = in_node_for(pairs, mv.elems[num_elems - 1]);
    let save_cpy = graph.new_copy(block, arg);
    graph.set_reg(save_cpy, free_reg);
    sched.insert_after(sched_point, save_cpy);
    sched_point = save_cpy;

    for i in (0..num_elems - 1).rev() {
        let arg = in_node_for(pairs, mv.elems[i]);
        let res = out_node_for(pairs, mv.elems[i + 1]);

        debug!(
            "{} creating copy node ({}, {:?}) -> ({}, {:?})",
            perm,
            arg,
            mv.elems[i],
            res,
            mv.elems[i + 1]
        );

        let cpy = graph.new_copy(block, arg);
        graph.set_reg(cpy, mv.elems[i + 1]);

        graph.exchange(res, cpy);
        graph.kill(res);

        sched.insert_after(sched_point, cpy);
        sched_point = cpy;
    }

    // Restore last register content into the first register.
    let restore_cpy = graph.new_copy(block, save_cpy);
    graph.set_reg(restore_cpy, mv.elems[0]);
    let proj = out_node_for(pairs, mv.elems[0]);
    graph.exchange(proj, restore_cpy);
    graph.kill(proj);
    sched.insert_after(sched_point, restore_cpy);
}

pub(crate) fn reduce_perm_size(
    graph: &mut Graph,
    sched: &mut Schedule,
    reginfo: &RegInfo,
    perm: Node,
    mv: &PermMove,
    pairs: &mut [RegPair],
    free_reg: Option<Reg>,
) {
    match mv.kind {
        MoveKind::Cycle => match free_reg {
            Some(reg) if mv.elems.len() > 2 => {
                debug!(
                    "using register {} to implement cycle of {}",
                    reginfo.reg_name(reg),
                    perm
                );
                split_cycle_into_copies(graph, sched, perm, mv, pairs, reg);
            }
            _ => split_cycle_into_swaps(graph, sched, reginfo, perm, mv, pairs),
        },
        MoveKind::Chain => split_chain_into_copies(graph, sched, perm, mv, pairs),
    }
}
