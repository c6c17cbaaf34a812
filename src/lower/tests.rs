/*
 * Released under the terms of the Apache 2.0 license with LLVM
 * exception. See `LICENSE` for details.
 */

use super::*;
use crate::fuzzing::perm::{lower_and_check, random_scenario, run, Built, PermScenario};
use crate::graph::{Graph, NodeKind};
use crate::liveness::LiveSets;
use crate::verify;
use crate::Node;
use fxhash::FxHashSet;

fn count_kind(graph: &Graph, kind: NodeKind) -> usize {
    graph.nodes().filter(|&n| graph.kind(n) == kind).count()
}

fn count_copies(graph: &Graph) -> usize {
    count_kind(graph, NodeKind::Copy)
}

fn count_perms(graph: &Graph) -> usize {
    count_kind(graph, NodeKind::Perm)
}

#[test]
fn test_three_cycle_without_scratch() {
    // r1 -> r2 -> r3 -> r1, every other register occupied across the
    // permutation: the cycle must come out as two 2-exchanges.
    let mut b = PermScenario {
        n_regs: 4,
        mapping: vec![(1, 2), (2, 3), (3, 1)],
        live_extra: vec![0],
        barrier: false,
    }
    .build();
    lower_and_check(&mut b);
    assert!(b.graph.is_dead(b.perm));
    assert_eq!(count_perms(&b.graph), 2);
    assert_eq!(count_copies(&b.graph), 0);
    for n in b.graph.nodes() {
        if b.graph.kind(n) == NodeKind::Perm {
            assert_eq!(b.graph.arity(n), 2);
        }
    }
}

#[test]
fn test_three_cycle_with_scratch() {
    // Same cycle, but a scratch register is free: save, rotate as a
    // chain, restore. Four copies, no exchange.
    let mut b = PermScenario {
        n_regs: 8,
        mapping: vec![(1, 2), (2, 3), (3, 1)],
        live_extra: vec![],
        barrier: true,
    }
    .build();
    lower_and_check(&mut b);
    assert_eq!(count_perms(&b.graph), 0);
    assert_eq!(count_copies(&b.graph), 4);
}

#[test]
fn test_chain_of_three() {
    // r1 -> r2 -> r3 with r1's old value dead afterwards: two copies,
    // zero exchanges, no scratch involved.
    let mut b = PermScenario {
        n_regs: 4,
        mapping: vec![(1, 2), (2, 3)],
        live_extra: vec![],
        barrier: true,
    }
    .build();
    lower_and_check(&mut b);
    assert_eq!(count_perms(&b.graph), 0);
    assert_eq!(count_copies(&b.graph), 2);
}

#[test]
fn test_noop_elision() {
    // The r5 -> r5 slot is spliced away; the remaining 2-cycle is
    // materialized as one exchange (the original arity is 3, so the
    // keep-as-exchange shortcut does not apply).
    let mut b = PermScenario {
        n_regs: 8,
        mapping: vec![(5, 5), (1, 2), (2, 1)],
        live_extra: vec![0],
        barrier: false,
    }
    .build();
    let noop_def = b.defs[0];
    lower_and_check(&mut b);
    assert!(b.graph.is_dead(b.perm));
    assert_eq!(count_perms(&b.graph), 1);
    assert_eq!(count_copies(&b.graph), 0);
    // The terminator reads the untouched value straight from its def.
    assert!(b
        .graph
        .users(noop_def)
        .iter()
        .any(|u| b.graph.mode(u.node) == crate::Mode::Control));
}

#[test]
fn test_arity_two_cycle_is_kept() {
    // A 2-element cycle already is an exchange; the node survives
    // untouched.
    let mut b = PermScenario {
        n_regs: 4,
        mapping: vec![(1, 2), (2, 1)],
        live_extra: vec![0],
        barrier: false,
    }
    .build();
    lower_and_check(&mut b);
    assert!(!b.graph.is_dead(b.perm));
    assert_eq!(count_perms(&b.graph), 1);
    assert_eq!(count_copies(&b.graph), 0);
}

#[test]
fn test_push_through_eliminates_perm() {
    // Both operand definitions sit directly before the permutation
    // and are independent: they sink past it and the permutation
    // vanishes without a single emitted move.
    let mut b = PermScenario {
        n_regs: 4,
        mapping: vec![(1, 2), (2, 1)],
        live_extra: vec![],
        barrier: false,
    }
    .build();
    let (d0, d1) = (b.defs[0], b.defs[1]);
    lower_and_check(&mut b);
    assert!(b.graph.is_dead(b.perm));
    assert_eq!(count_perms(&b.graph), 0);
    assert_eq!(count_copies(&b.graph), 0);
    // The moved definitions adopted their projections' registers.
    assert_eq!(b.graph.reg(d0), Some(b.reginfo.reg_in_class(b.cls, 2)));
    assert_eq!(b.graph.reg(d1), Some(b.reginfo.reg_in_class(b.cls, 1)));
}

#[test]
fn test_push_through_standalone() {
    let mut b = PermScenario {
        n_regs: 4,
        mapping: vec![(1, 2), (2, 1)],
        live_extra: vec![],
        barrier: false,
    }
    .build();
    let live = LiveSets::compute(&b.graph, &b.sched);
    let stayed = push_through_perm(&mut b.graph, &mut b.sched, &b.reginfo, &live, b.perm);
    assert!(!stayed);
    assert!(b.graph.is_dead(b.perm));
}

#[test]
fn test_push_through_partial_shrink() {
    // An unrelated live value sits between the second and third
    // operand definition: only the third can sink. The permutation
    // loses that slot, its projections are renumbered, and the rest
    // lowers as a chain.
    let mut b = PermScenario {
        n_regs: 8,
        mapping: vec![(1, 2), (2, 3), (3, 1)],
        live_extra: vec![0],
        barrier: false,
    }
    .build();
    let blocker = b.extras[0];
    let d2 = b.defs[2];
    b.sched.remove(blocker);
    b.sched.insert_before(d2, blocker);

    let live = LiveSets::compute(&b.graph, &b.sched);
    let stayed = push_through_perm(&mut b.graph, &mut b.sched, &b.reginfo, &live, b.perm);
    assert!(stayed);
    assert_eq!(b.graph.arity(b.perm), 2);
    // Slot 2 (r3 -> r1) moved: its def now writes r1 directly.
    assert_eq!(b.graph.reg(d2), Some(b.reginfo.reg_in_class(b.cls, 1)));
    let projs = b.graph.projs(b.perm);
    assert_eq!(projs.len(), 2);
    for (i, &p) in projs.iter().enumerate() {
        assert_eq!(b.graph.proj_index(p) as usize, i);
    }

    // The shrunken permutation is now a chain r1 -> r2 -> r3; finish
    // the pipeline and check the end-to-end movement.
    let live = LiveSets::compute(&b.graph, &b.sched);
    lower_nodes_after_ra(&mut b.graph, &mut b.sched, &b.reginfo, &b.allocatable, live);
    verify::check_lowered(&b.graph, &b.sched, &b.reginfo).unwrap();
    crate::fuzzing::perm::check_movement(&b);
    assert_eq!(count_perms(&b.graph), 0);
    assert_eq!(count_copies(&b.graph), 2);
}

#[test]
fn test_push_through_blocked_by_unrelated_inst() {
    // The node directly before the permutation is not one of its
    // operand producers, so the candidate scan stops immediately and
    // the permutation stays whole.
    let mut b = PermScenario {
        n_regs: 8,
        mapping: vec![(1, 2), (2, 3), (3, 1)],
        live_extra: vec![],
        barrier: true,
    }
    .build();
    let live = LiveSets::compute(&b.graph, &b.sched);
    let stayed = push_through_perm(&mut b.graph, &mut b.sched, &b.reginfo, &live, b.perm);
    assert!(stayed);
    assert_eq!(b.graph.arity(b.perm), 3);
}

#[test]
fn test_free_register_oracle_canonical_choice() {
    let b = PermScenario {
        n_regs: 8,
        mapping: vec![(1, 2), (2, 3), (3, 1)],
        live_extra: vec![],
        barrier: true,
    }
    .build();
    let live = LiveSets::compute(&b.graph, &b.sched);
    let free = find_free_registers(&b.graph, &b.sched, &b.reginfo, &b.allocatable, &live);
    // First free register by class index: r0.
    assert_eq!(free.get(b.perm), Some(b.reginfo.reg_in_class(b.cls, 0)));
}

#[test]
fn test_free_register_oracle_none_available() {
    let b = PermScenario {
        n_regs: 4,
        mapping: vec![(1, 2), (2, 3), (3, 1)],
        live_extra: vec![0],
        barrier: false,
    }
    .build();
    let live = LiveSets::compute(&b.graph, &b.sched);
    let free = find_free_registers(&b.graph, &b.sched, &b.reginfo, &b.allocatable, &live);
    assert_eq!(free.get(b.perm), None);
}

#[test]
fn test_free_register_oracle_skips_unallocatable() {
    let mut b = PermScenario {
        n_regs: 8,
        mapping: vec![(1, 2), (2, 3), (3, 1)],
        live_extra: vec![],
        barrier: true,
    }
    .build();
    // Forbid r0: the canonical choice has to advance past the
    // permutation's own registers to r4.
    b.allocatable
        .set(b.reginfo.reg_in_class(b.cls, 0).index(), false);
    let live = LiveSets::compute(&b.graph, &b.sched);
    let free = find_free_registers(&b.graph, &b.sched, &b.reginfo, &b.allocatable, &live);
    assert_eq!(free.get(b.perm), Some(b.reginfo.reg_in_class(b.cls, 4)));
}

#[test]
fn test_perm_in_second_block() {
    // Lowering walks all blocks; a value live into the second block
    // keeps its register from scratch duty there.
    use crate::sched::Schedule;

    let (reginfo, cls, allocatable) = crate::fuzzing::machine_regs(4);
    let mut g = Graph::new();
    let b0 = g.add_block();
    let b1 = g.add_block();
    g.add_block_edge(b0, b1);
    g.set_entry(b0);

    let held = g.new_inst(b0, cls, &[]);
    g.set_reg(held, reginfo.reg_in_class(cls, 0));
    let d1 = g.new_inst(b0, cls, &[]);
    g.set_reg(d1, reginfo.reg_in_class(cls, 1));
    let d2 = g.new_inst(b0, cls, &[]);
    g.set_reg(d2, reginfo.reg_in_class(cls, 2));
    let d3 = g.new_inst(b0, cls, &[]);
    g.set_reg(d3, reginfo.reg_in_class(cls, 3));
    let jmp = g.new_control_inst(b0, &[]);

    let entry_mark = g.new_control_inst(b1, &[]);
    let perm = g.new_perm(cls, b1, &[d1, d2, d3]);
    let outs = [2usize, 3, 1];
    let mut projs = vec![];
    for (i, &o) in outs.iter().enumerate() {
        let p = g.new_proj(perm, cls, i as u32);
        g.set_reg(p, reginfo.reg_in_class(cls, o));
        projs.push(p);
    }
    let mut term_ins = projs.clone();
    term_ins.push(held);
    let ret = g.new_control_inst(b1, &term_ins);

    let mut sched = Schedule::new(&g);
    for n in [held, d1, d2, d3, jmp] {
        sched.append(b0, n);
    }
    for n in [entry_mark, perm, ret] {
        sched.append(b1, n);
    }

    let live = LiveSets::compute(&g, &sched);
    // r0 is live through the perm and r1..r3 are its own registers:
    // no scratch exists, so the cycle becomes exchanges.
    let free = find_free_registers(&g, &sched, &reginfo, &allocatable, &live);
    assert_eq!(free.get(perm), None);

    lower_nodes_after_ra(&mut g, &mut sched, &reginfo, &allocatable, live);
    verify::check_lowered(&g, &sched, &reginfo).unwrap();
    assert_eq!(count_perms(&g), 2);
}

#[test]
fn test_random_permutations() {
    for seed in 0..300 {
        let scenario = random_scenario(seed);
        run(&scenario);
    }
}

#[test]
fn test_push_through_never_increases_pressure() {
    for seed in 0..150 {
        let mut b = random_scenario(seed).build();
        let live = LiveSets::compute(&b.graph, &b.sched);
        let before = max_pressure(&b);
        push_through_perm(&mut b.graph, &mut b.sched, &b.reginfo, &live, b.perm);
        let after = max_pressure(&b);
        assert!(
            after <= before,
            "seed {}: pressure went from {} to {}",
            seed,
            before,
            after
        );
    }
}

/// The maximum number of simultaneously live values at any program
/// point of the scenario block.
fn max_pressure(b: &Built) -> usize {
    let g = &b.graph;
    let sched = &b.sched;
    let live = LiveSets::compute(g, sched);
    let mut set: FxHashSet<Node> = live.live_at_end(b.block).iter().copied().collect();
    let mut max = set.len();
    for n in sched.iter_block_rev(b.block) {
        match g.mode(n) {
            crate::Mode::Data => {
                set.remove(&n);
            }
            crate::Mode::Tuple => {
                for p in g.projs(n) {
                    set.remove(&p);
                }
            }
            crate::Mode::Control => {}
        }
        if g.kind(n) != NodeKind::Phi {
            for &op in g.ins(n) {
                if g.mode(op).is_data() {
                    set.insert(op);
                }
            }
        }
        max = max.max(set.len());
    }
    max
}
