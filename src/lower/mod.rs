/*
 * Released under the terms of the Apache 2.0 license with LLVM
 * exception. See `LICENSE` for details.
 */

//! Lowering of permutation nodes after register allocation: resolves
//! cycles and chains into copy and exchange operations, after first
//! trying to shrink each permutation by sinking independent
//! instructions past it.

use crate::bitvec::BitVec;
use crate::graph::{Graph, NodeKind};
use crate::sched::Schedule;
use crate::{Block, Liveness, Node, RegInfo};
use log::debug;

mod emit;
mod free_regs;
mod pairs;
mod push_through;

pub use free_regs::{find_free_registers, FreeRegMap};
pub use push_through::push_through_perm;

use pairs::{build_pair_list, first_unchecked, move_info, MoveKind};

#[cfg(test)]
mod tests;

/// Lower one permutation node: build the register pair list, identify
/// cycles and chains, and replace each with copies or exchanges. The
/// caller has to make sure that `perm` is a Perm node.
pub(crate) fn lower_perm_node(
    graph: &mut Graph,
    sched: &mut Schedule,
    reginfo: &RegInfo,
    free_regs: &FreeRegMap,
    perm: Node,
) {
    assert_eq!(
        graph.kind(perm),
        NodeKind::Perm,
        "non-Perm node passed to lower_perm_node"
    );
    let arity = graph.arity(perm);
    let mut keep_perm = false;

    debug!("perm: {}, sched point is {:?}", perm, sched.prev(perm));
    assert!(
        sched.prev(perm).is_some(),
        "{} is not scheduled or has no predecessor",
        perm
    );
    assert_eq!(
        arity,
        graph.users(perm).len(),
        "perm's in and out numbers different"
    );

    let mut pairs = build_pair_list(graph, perm);

    debug!("{} has {} unresolved constraints", perm, pairs.len());

    while let Some(start) = first_unchecked(&pairs) {
        let mv = move_info(&mut pairs, start);

        debug!(
            "{}: following {} created: {:?}",
            perm,
            match mv.kind {
                MoveKind::Chain => "chain",
                MoveKind::Cycle => "cycle",
            },
            &mv.elems[..]
        );

        if mv.kind == MoveKind::Cycle && arity == 2 {
            // A Perm with two elements which represents a cycle
            // already is an exchange node; nothing to do.
            keep_perm = true;
        } else {
            emit::reduce_perm_size(
                graph,
                sched,
                reginfo,
                perm,
                &mv,
                &mut pairs,
                free_regs.get(perm),
            );
        }
    }

    if !keep_perm {
        sched.remove(perm);
        graph.kill(perm);
    }
}

/// Lower all permutation nodes in the graph.
///
/// Precondition: liveness is computed and every data node carries an
/// assigned physical register. On return no permutation of arity > 2
/// remains (arity-2 cycles are exchanges and stay). The liveness
/// value is consumed: lowering invalidates it.
pub fn lower_nodes_after_ra<L: Liveness>(
    graph: &mut Graph,
    sched: &mut Schedule,
    reginfo: &RegInfo,
    allocatable: &BitVec,
    live: L,
) {
    let free_regs = find_free_registers(graph, sched, reginfo, allocatable, &live);

    let mut perms: Vec<Node> = vec![];
    for bi in 0..graph.num_blocks() {
        let block = Block::new(bi);
        for node in sched.iter_block(block) {
            if graph.kind(node) == NodeKind::Perm {
                perms.push(node);
            }
        }
    }

    for perm in perms {
        let perm_stayed = push_through_perm(graph, sched, reginfo, &live, perm);
        if perm_stayed {
            lower_perm_node(graph, sched, reginfo, &free_regs, perm);
        }
    }

    // Dropping `live` here: lowering has changed the schedule, so the
    // sets no longer describe the graph.
    drop(live);
}
