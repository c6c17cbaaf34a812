/*
 * Released under the terms of the Apache 2.0 license with LLVM
 * exception. See `LICENSE` for details.
 */

//! Sinking independent scheduled instructions past a permutation.
//!
//! Every operand definition moved below the permutation removes one
//! slot: the moved node adopts the slot's output register and the
//! projection's users. If all slots go, the permutation disappears
//! entirely; otherwise it shrinks.

use crate::bitvec::BitVec;
use crate::graph::Graph;
use crate::sched::Schedule;
use crate::{Liveness, Node, RegClass, RegInfo, ReqKind};
use log::{debug, trace};
use smallvec::SmallVec;

fn consider_in_reg_alloc(graph: &Graph, reginfo: &RegInfo, cls: RegClass, op: Node) -> bool {
    if !graph.mode(op).is_data() || graph.flags(op).ignore {
        return false;
    }
    match graph.reg(op) {
        Some(reg) => reginfo.class_of(reg) == cls,
        None => graph.cls(op) == Some(cls),
    }
}

/// Returns `true` if the permutation stays and still requires
/// lowering, `false` if it was eliminated entirely.
pub fn push_through_perm<L: Liveness>(
    graph: &mut Graph,
    sched: &mut Schedule,
    reginfo: &RegInfo,
    live: &L,
    perm: Node,
) -> bool {
    let arity = graph.arity(perm);

    // Pick some projection to find out the register class.
    let one_proj = *graph
        .projs(perm)
        .first()
        .unwrap_or_else(|| panic!("{} has no projections", perm));
    let cls = reginfo.class_of(
        graph
            .reg(one_proj)
            .unwrap_or_else(|| panic!("no register assigned at {}", one_proj)),
    );

    debug!("perm move {}", perm);

    // Find the point in the schedule after which the potentially
    // movable nodes must be defined. The Perm is only pushed up to
    // the first instruction which lets an operand of itself die: any
    // further and the formerly dead operand would be live at the
    // Perm, increasing register pressure by one.
    let mut frontier: Option<Node> = None;
    let mut cursor = sched.prev(perm);
    'search: while let Some(irn) = cursor {
        for i in (0..graph.arity(irn)).rev() {
            let op = graph.input(irn, i);
            if consider_in_reg_alloc(graph, reginfo, cls, op)
                && !live.interfere(graph, sched, op, one_proj)
            {
                frontier = Some(irn);
                break 'search;
            }
        }
        cursor = sched.prev(irn);
    }

    trace!("\tfrontier: {:?}", frontier);

    let mut moved = BitVec::with_capacity(arity);
    let mut n_moved = 0;
    let mut candidate = sched.prev(perm);
    while let Some(node) = candidate {
        // Is node an input of the Perm?
        let mut slot: Option<(Node, usize)> = None;
        for out in graph.projs(perm) {
            let pn = graph.proj_index(out) as usize;
            if graph.input(perm, pn) == node {
                slot = Some((out, pn));
                break;
            }
        }
        // It wasn't an input to the perm; we can't do anything more.
        let Some((proj, input)) = slot else { break };
        if let Some(f) = frontier {
            if !sched.strictly_before(f, node) {
                break;
            }
        }
        if graph.flags(node).modify_flags {
            break;
        }
        if graph.req(node).kind != ReqKind::Normal {
            break;
        }
        // Moving a node whose own operands are in the class would
        // inflate register pressure past the Perm.
        if graph
            .ins(node)
            .iter()
            .any(|&op| consider_in_reg_alloc(graph, reginfo, cls, op))
        {
            break;
        }

        debug!("\tmoving {} after {}, killing {}", node, perm, proj);

        let prev = sched.prev(node);

        // Move the movable node behind the Perm.
        sched.remove(node);
        sched.insert_after(perm, node);

        // Give it the proj's register.
        let reg = graph
            .reg(proj)
            .unwrap_or_else(|| panic!("no register assigned at {}", proj));
        graph.set_reg(node, reg);

        // Reroute all users of the proj to the moved node.
        graph.exchange(proj, node);
        graph.kill(proj);

        moved.set(input, true);
        n_moved += 1;

        candidate = prev;
    }

    // Well, we could not push anything through the perm.
    if n_moved == 0 {
        return true;
    }

    let new_size = arity - n_moved;
    if new_size == 0 {
        sched.remove(perm);
        graph.kill(perm);
        return false;
    }

    // Shrink the Perm: keep the surviving slots and renumber their
    // projections contiguously.
    let mut kept: SmallVec<[Node; 8]> = SmallVec::new();
    let mut proj_map: Vec<Option<u32>> = vec![None; arity];
    for i in 0..arity {
        if moved.get(i) {
            continue;
        }
        proj_map[i] = Some(kept.len() as u32);
        kept.push(graph.input(perm, i));
    }
    debug_assert_eq!(kept.len(), new_size);

    for proj in graph.projs(perm) {
        let pn = graph.proj_index(proj) as usize;
        let new_pn = proj_map[pn].expect("projection of a moved slot survived");
        graph.set_proj(proj, perm, new_pn);
    }
    graph.set_ins(perm, &kept);

    true
}
