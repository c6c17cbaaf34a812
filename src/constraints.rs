/*
 * Released under the terms of the Apache 2.0 license with LLVM
 * exception. See `LICENSE` for details.
 */

//! Enforcement of must-differ output constraints.
//!
//! For every instruction whose output requirement names input
//! positions it must not share a register with, an unspillable copy
//! of each such input is inserted before the instruction and bound to
//! it with a keep edge: the copy is then live across the instruction,
//! which forces the allocator (or a later verifier) to give the two
//! values distinct registers. Redundant CopyKeeps over the same tuple
//! parent are melted into one, and single-assignment form is restored
//! through the SSA reconstruction service at the end.

use crate::graph::{Graph, NodeKind};
use crate::sched::Schedule;
use crate::ssa::SsaReconstruction;
use crate::{Block, Mode, Node, RegClass};
use fxhash::FxHashMap;
use log::debug;
use smallvec::{smallvec, SmallVec};

/// Associates a value with the copies and CopyKeeps introduced for it.
struct OpCopyAssoc {
    cls: RegClass,
    copies: Vec<Node>,
}

struct ConstraintEnv {
    op_set: FxHashMap<Node, OpCopyAssoc>,
    /// Key insertion order, so later stages are deterministic.
    order: Vec<Node>,
}

/// Scan backward from `start`, crossing only copy nodes, for an
/// already-present unspillable copy of `op`.
fn find_copy(graph: &Graph, sched: &Schedule, start: Node, op: Node) -> Option<Node> {
    let mut cur = start;
    loop {
        cur = sched.prev(cur)?;
        if graph.kind(cur) != NodeKind::Copy {
            return None;
        }
        if graph.input(cur, 0) == op && graph.flags(cur).dont_spill {
            return Some(cur);
        }
    }
}

/// Is there already a keep edge binding `irn` to a copy of `other`?
/// If so the constraint is structurally satisfied and the pass must
/// not insert another pattern (this is what makes it idempotent).
pub(crate) fn already_assured(graph: &Graph, irn: Node, other: Node) -> bool {
    graph.users(other).iter().any(|u| match graph.kind(u.node) {
        NodeKind::CopyKeep => u.pos == 0 && graph.ins(u.node)[1..].contains(&irn),
        NodeKind::Keep => graph.ins(u.node).contains(&irn),
        _ => false,
    })
}

fn gen_assure_different_pattern(
    graph: &mut Graph,
    sched: &mut Schedule,
    env: &mut ConstraintEnv,
    irn: Node,
    other_different: Node,
) {
    if graph.flags(other_different).ignore || !graph.mode(other_different).is_data() {
        debug!(
            "ignore constraint for {} because other node is ignore or not a data node",
            irn
        );
        return;
    }
    if already_assured(graph, irn, other_different) {
        debug!("constraint for {} on {} already assured", irn, other_different);
        return;
    }

    let block = graph.block_of(irn);
    let cls = graph
        .cls(other_different)
        .unwrap_or_else(|| panic!("no register class at {}", other_different));
    let anchor = graph.skip_proj(irn);

    // Make a non-spillable copy of the different node. The different
    // node could be in a block far away; the copy is optimized later
    // if not needed.
    let cpy = match find_copy(graph, sched, anchor, other_different) {
        Some(cpy) => {
            debug!("using already existing {} for value {}", cpy, other_different);
            cpy
        }
        None => {
            let cpy = graph.new_copy(block, other_different);
            graph.flags_mut(cpy).dont_spill = true;
            debug!("created non-spillable {} for value {}", cpy, other_different);
            cpy
        }
    };

    // Add the Keep resp. CopyKeep and reroute the users of the other
    // node in case of CopyKeep.
    let keep = if graph.has_users(other_different) {
        let keep = graph.new_copy_keep(block, cpy, &[irn]);
        graph.set_in_cls(keep, cls);
        keep
    } else {
        graph.new_keep(block, &[irn, cpy])
    };

    debug!("created {}({}, {})", keep, irn, cpy);

    assert!(
        sched.is_scheduled(anchor),
        "need schedule to assure constraints"
    );
    if !sched.is_scheduled(cpy) {
        sched.insert_before(anchor, cpy);
    }
    sched.insert_after(anchor, keep);

    if !env.op_set.contains_key(&other_different) {
        env.order.push(other_different);
        env.op_set.insert(
            other_different,
            OpCopyAssoc {
                cls,
                copies: vec![],
            },
        );
    }
    let entry = env.op_set.get_mut(&other_different).unwrap();
    if !entry.copies.contains(&cpy) {
        entry.copies.push(cpy);
    }
    if graph.kind(keep) == NodeKind::CopyKeep {
        entry.copies.push(keep);
    }
}

/// Checks whether the node has a must-differ constraint on its output
/// and inserts the keep pattern for every named input.
///
/// `irn` is the constrained node (possibly a Proj); `skipped` its
/// unprojected predecessor, whose operands the constraint indexes.
fn assure_different_constraints(
    graph: &mut Graph,
    sched: &mut Schedule,
    env: &mut ConstraintEnv,
    irn: Node,
    skipped: Node,
) {
    let req = graph.req(irn);
    if req.must_differ == 0 {
        return;
    }
    let other = req.must_differ;

    if req.should_be_same != 0 {
        let same = req.should_be_same;
        if other.is_power_of_two() && same.is_power_of_two() {
            let idx_other = other.trailing_zeros() as usize;
            let idx_same = same.trailing_zeros() as usize;

            // A should-be-same x and must-be-different y requirement
            // is vacuous iff both inputs are equal.
            if graph.input(skipped, idx_other) == graph.input(skipped, idx_same) {
                return;
            }
        }
    }

    for i in 0..u32::BITS {
        if other & (1u32 << i) != 0 {
            let i = i as usize;
            assert!(
                i < graph.arity(skipped),
                "must-differ constraint on {} references input {} out of range",
                irn,
                i
            );
            let different_from = graph.input(skipped, i);
            gen_assure_different_pattern(graph, sched, env, irn, different_from);
        }
    }
}

fn assure_constraints_walker(
    graph: &mut Graph,
    sched: &mut Schedule,
    env: &mut ConstraintEnv,
    block: Block,
) {
    let mut cur = sched.last(block);
    while let Some(irn) = cur {
        let prev = sched.prev(irn);
        match graph.mode(irn) {
            Mode::Tuple => {
                for proj in graph.projs(irn) {
                    if graph.mode(proj).is_data() {
                        assure_different_constraints(graph, sched, env, proj, irn);
                    }
                }
            }
            Mode::Data => assure_different_constraints(graph, sched, env, irn, irn),
            Mode::Control => {}
        }
        cur = prev;
    }
}

/// Melt all CopyKeeps of one association entry whose keep targets are
/// projections of the same tuple node (or that node itself), copying
/// the same operand: one fused CopyKeep with all targets replaces
/// them.
fn melt_copykeeps(graph: &mut Graph, sched: &mut Schedule, env: &mut ConstraintEnv) {
    for &op in &env.order {
        let entry = env.op_set.get_mut(&op).unwrap();

        let mut ck_arr: Vec<Option<Node>> = entry
            .copies
            .iter()
            .copied()
            .filter(|&c| graph.kind(c) == NodeKind::CopyKeep)
            .map(Some)
            .collect();

        for idx in 0..ck_arr.len() {
            let Some(ref_ck) = ck_arr[idx] else { continue };
            let ref_parent = graph.skip_proj(graph.input(ref_ck, 1));
            ck_arr[idx] = None;

            debug!("trying to melt {}:", ref_ck);

            let mut melted: SmallVec<[Node; 4]> = smallvec![ref_ck];
            for j in idx + 1..ck_arr.len() {
                let Some(cur_ck) = ck_arr[j] else { continue };
                if graph.skip_proj(graph.input(cur_ck, 1)) == ref_parent {
                    debug!("\t{}", cur_ck);
                    melted.push(cur_ck);
                    ck_arr[j] = None;
                    entry.copies.retain(|&c| c != cur_ck);
                    sched.remove(cur_ck);
                }
            }

            if melted.len() == 1 {
                debug!("\tno candidate found");
                continue;
            }

            entry.copies.retain(|&c| c != ref_ck);
            sched.remove(ref_ck);

            let new_ck_in: SmallVec<[Node; 4]> =
                melted.iter().map(|&ck| graph.input(ck, 1)).collect();
            let ref_op = graph.input(ref_ck, 0);
            let ref_block = graph.block_of(ref_ck);

            for &ck in &melted {
                graph.kill(ck);
            }

            let new_ck = graph.new_copy_keep(ref_block, ref_op, &new_ck_in);
            graph.set_in_cls(new_ck, entry.cls);
            entry.copies.push(new_ck);

            // Walk along the schedule from the shared parent until a
            // non-Keep node is found and place the fused keep there.
            let mut sched_pt = ref_parent;
            loop {
                match sched.next(sched_pt) {
                    Some(n) if matches!(graph.kind(n), NodeKind::Keep | NodeKind::CopyKeep) => {
                        sched_pt = n;
                    }
                    Some(n) => {
                        sched.insert_before(n, new_ck);
                        break;
                    }
                    None => {
                        sched.insert_after(sched_pt, new_ck);
                        break;
                    }
                }
            }
            debug!("created {}, scheduled after {}", new_ck, sched_pt);
        }
    }
}

/// Assure register constraints over all blocks.
///
/// Precondition: a schedule exists and constraint annotations are
/// present. Afterwards every must-differ constraint is satisfied by a
/// keep chain that makes an unspillable copy of the named operand
/// live across the constrained instruction.
pub fn assure_constraints(
    graph: &mut Graph,
    sched: &mut Schedule,
    ssa: &mut impl SsaReconstruction,
) {
    let mut env = ConstraintEnv {
        op_set: FxHashMap::default(),
        order: vec![],
    };

    for bi in 0..graph.num_blocks() {
        assure_constraints_walker(graph, sched, &mut env, Block::new(bi));
    }

    // Melt CopyKeeps pointing to projs of the same tuple node and
    // keeping the same operand.
    melt_copykeeps(graph, sched, &mut env);

    for &op in &env.order {
        let entry = &env.op_set[&op];
        debug!("introduce copies for {}: {:?}", op, entry.copies);

        // The copies are definitions of the operand's value; let the
        // reconstruction service re-point every user to the one that
        // dominates it.
        ssa.fix_users(graph, sched, op, &entry.copies);

        // Not all CopyKeeps may really be needed; transform the
        // userless ones into plain Keeps.
        for &cp in &entry.copies {
            if graph.kind(cp) == NodeKind::CopyKeep && !graph.has_users(cp) {
                let ins: SmallVec<[Node; 4]> = SmallVec::from_slice(graph.ins(cp));
                let keep = graph.new_keep(graph.block_of(cp), &ins);
                sched.insert_before(cp, keep);
                sched.remove(cp);
                graph.kill(cp);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fuzzing::constr::{check_assured, graph_stats, random_scenario, run};
    use crate::fuzzing::machine_regs;
    use crate::ssa::DomSsaFixup;
    use crate::RegReq;

    fn find_kind(graph: &Graph, kind: NodeKind) -> Vec<Node> {
        graph.nodes().filter(|&n| graph.kind(n) == kind).collect()
    }

    #[test]
    fn test_must_differ_inserts_copy_and_keep() {
        let (_reginfo, cls, _allocatable) = machine_regs(8);
        let mut g = Graph::new();
        let block = g.add_block();
        let a = g.new_inst(block, cls, &[]);
        let b = g.new_inst(block, cls, &[]);
        let i = g.new_inst(block, cls, &[a, b]);
        g.set_req(i, RegReq::must_differ_from(1 << 1));
        let term = g.new_control_inst(block, &[i, a, b]);

        let mut sched = Schedule::new(&g);
        for n in [a, b, i, term] {
            sched.append(block, n);
        }

        let mut ssa = DomSsaFixup::new(&g);
        assure_constraints(&mut g, &mut sched, &mut ssa);
        check_assured(&g, &sched);

        // An unspillable copy of `b` directly before the instruction.
        let cpy = sched.prev(i).unwrap();
        assert_eq!(g.kind(cpy), NodeKind::Copy);
        assert!(g.flags(cpy).dont_spill);
        assert_eq!(g.input(cpy, 0), b);

        // The keep directly after it, binding instruction and copy.
        let keep = sched.next(i).unwrap();
        assert_eq!(g.kind(keep), NodeKind::CopyKeep);
        assert_eq!(g.input(keep, 0), cpy);
        assert_eq!(g.input(keep, 1), i);

        // SSA reconstruction re-pointed the users of `b` to the
        // definition dominating them.
        assert_eq!(g.input(i, 1), cpy);
        assert_eq!(g.input(term, 2), keep);
    }

    #[test]
    fn test_copykeeps_over_one_tuple_are_melted() {
        let (_reginfo, cls, _allocatable) = machine_regs(8);
        let mut g = Graph::new();
        let block = g.add_block();
        let a = g.new_inst(block, cls, &[]);
        let t = g.new_tuple_inst(block, &[a]);
        let p0 = g.new_proj(t, cls, 0);
        let p1 = g.new_proj(t, cls, 1);
        g.set_req(p0, RegReq::must_differ_from(1 << 0));
        g.set_req(p1, RegReq::must_differ_from(1 << 0));
        let term = g.new_control_inst(block, &[p0, p1, a]);

        let mut sched = Schedule::new(&g);
        for n in [a, t, term] {
            sched.append(block, n);
        }

        let mut ssa = DomSsaFixup::new(&g);
        assure_constraints(&mut g, &mut sched, &mut ssa);
        check_assured(&g, &sched);

        assert_eq!(find_kind(&g, NodeKind::Copy).len(), 1);
        let cks = find_kind(&g, NodeKind::CopyKeep);
        assert_eq!(cks.len(), 1);
        let melted = cks[0];
        assert_eq!(g.arity(melted), 3);
        assert_eq!(&g.ins(melted)[1..], &[p0, p1]);
        // Scheduled right after the shared tuple parent.
        assert_eq!(sched.next(t), Some(melted));
    }

    #[test]
    fn test_unused_copykeep_becomes_keep() {
        let (_reginfo, cls, _allocatable) = machine_regs(8);
        let mut g = Graph::new();
        let block = g.add_block();
        let a = g.new_inst(block, cls, &[]);
        let b = g.new_inst(block, cls, &[]);
        let i = g.new_inst(block, cls, &[a, b]);
        g.set_req(i, RegReq::must_differ_from(1 << 1));
        // `b` has no user past the instruction.
        let term = g.new_control_inst(block, &[i, a]);

        let mut sched = Schedule::new(&g);
        for n in [a, b, i, term] {
            sched.append(block, n);
        }

        let mut ssa = DomSsaFixup::new(&g);
        assure_constraints(&mut g, &mut sched, &mut ssa);
        check_assured(&g, &sched);

        assert!(find_kind(&g, NodeKind::CopyKeep).is_empty());
        let keeps = find_kind(&g, NodeKind::Keep);
        assert_eq!(keeps.len(), 1);
        let cpy = g.input(keeps[0], 0);
        assert_eq!(g.kind(cpy), NodeKind::Copy);
        assert_eq!(g.ins(keeps[0])[1], i);
        assert_eq!(sched.next(i), Some(keeps[0]));
    }

    #[test]
    fn test_should_be_same_short_circuit() {
        let (_reginfo, cls, _allocatable) = machine_regs(8);
        let mut g = Graph::new();
        let block = g.add_block();
        let a = g.new_inst(block, cls, &[]);
        let i = g.new_inst(block, cls, &[a, a]);
        g.set_req(
            i,
            RegReq {
                must_differ: 1 << 1,
                should_be_same: 1 << 0,
                ..RegReq::default()
            },
        );
        let term = g.new_control_inst(block, &[i, a]);

        let mut sched = Schedule::new(&g);
        for n in [a, i, term] {
            sched.append(block, n);
        }

        let before = graph_stats(&g, &sched);
        let mut ssa = DomSsaFixup::new(&g);
        assure_constraints(&mut g, &mut sched, &mut ssa);
        // Both masks are single bits and both inputs are the same
        // value: the constraint is vacuous and nothing is inserted.
        assert_eq!(before, graph_stats(&g, &sched));
    }

    #[test]
    fn test_ignore_operand_is_skipped() {
        let (_reginfo, cls, _allocatable) = machine_regs(8);
        let mut g = Graph::new();
        let block = g.add_block();
        let sp = g.new_inst(block, cls, &[]);
        g.flags_mut(sp).ignore = true;
        let i = g.new_inst(block, cls, &[sp]);
        g.set_req(i, RegReq::must_differ_from(1 << 0));
        let term = g.new_control_inst(block, &[i, sp]);

        let mut sched = Schedule::new(&g);
        for n in [sp, i, term] {
            sched.append(block, n);
        }

        let before = graph_stats(&g, &sched);
        let mut ssa = DomSsaFixup::new(&g);
        assure_constraints(&mut g, &mut sched, &mut ssa);
        assert_eq!(before, graph_stats(&g, &sched));
    }

    #[test]
    fn test_existing_copy_is_reused() {
        // The same value at two constrained operand positions: the
        // second pattern finds the first one's copy right before the
        // instruction and reuses it.
        let (_reginfo, cls, _allocatable) = machine_regs(8);
        let mut g = Graph::new();
        let block = g.add_block();
        let b = g.new_inst(block, cls, &[]);
        let i = g.new_inst(block, cls, &[b, b]);
        g.set_req(i, RegReq::must_differ_from(0b11));
        let term = g.new_control_inst(block, &[i, b]);

        let mut sched = Schedule::new(&g);
        for n in [b, i, term] {
            sched.append(block, n);
        }

        let mut ssa = DomSsaFixup::new(&g);
        assure_constraints(&mut g, &mut sched, &mut ssa);
        check_assured(&g, &sched);

        // One copy serves both bits; the two CopyKeeps share keep
        // target and operand and are melted into one.
        assert_eq!(find_kind(&g, NodeKind::Copy).len(), 1);
        assert_eq!(find_kind(&g, NodeKind::CopyKeep).len(), 1);
    }

    #[test]
    fn test_random_constraint_scenarios() {
        for seed in 0..100 {
            run(&random_scenario(seed));
        }
    }
}
