/*
 * Released under the terms of the Apache 2.0 license with LLVM
 * exception. See `LICENSE` for details.
 */

//! Register pairs and their decomposition into cycles and chains.
//!
//! A permutation of arity n is first flattened into up to n register
//! pairs (no-op slots are spliced away), then the pair set is
//! partitioned into moves: closed cycles, and chains whose first
//! register's old inhabitant is dead after the permutation.

use crate::graph::Graph;
use crate::{Node, Reg};
use log::debug;
use smallvec::SmallVec;

/// One slot of a permutation: the value `in_node` in `in_reg` must
/// end up in `out_reg`, whose projection is `out_node`.
pub(crate) struct RegPair {
    pub in_reg: Reg,
    pub in_node: Node,
    pub out_reg: Reg,
    pub out_node: Node,
    pub checked: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum MoveKind {
    Cycle,
    Chain,
}

/// The register movement one cycle or chain describes.
pub(crate) struct PermMove {
    pub kind: MoveKind,
    pub elems: SmallVec<[Reg; 8]>,
}

/// Flatten `perm` into register pairs. Slots whose in- and
/// out-register coincide generate no code: the projection's users are
/// spliced onto the operand and the slot is dropped.
pub(crate) fn build_pair_list(graph: &mut Graph, perm: Node) -> SmallVec<[RegPair; 8]> {
    let mut pairs: SmallVec<[RegPair; 8]> = SmallVec::new();

    for out in graph.projs(perm) {
        let pn = graph.proj_index(out) as usize;
        let input = graph.input(perm, pn);
        let in_reg = graph
            .reg(input)
            .unwrap_or_else(|| panic!("no register assigned at {}", input));
        let out_reg = graph
            .reg(out)
            .unwrap_or_else(|| panic!("no register assigned at {}", out));

        if in_reg == out_reg {
            debug!(
                "{} removing equal perm register pair ({}, {}, {:?})",
                perm, input, out, out_reg
            );
            graph.exchange(out, input);
            graph.kill(out);
            continue;
        }

        pairs.push(RegPair {
            in_reg,
            in_node: input,
            out_reg,
            out_node: out,
            checked: false,
        });
    }

    pairs
}

pub(crate) fn first_unchecked(pairs: &[RegPair]) -> Option<usize> {
    pairs.iter().position(|p| !p.checked)
}

fn pair_for_in(pairs: &[RegPair], reg: Reg) -> Option<usize> {
    pairs.iter().position(|p| p.in_reg == reg)
}

fn pair_for_out(pairs: &[RegPair], reg: Reg) -> Option<usize> {
    pairs.iter().position(|p| p.out_reg == reg)
}

/// The node currently holding the value that lives in `reg` before
/// the permutation.
pub(crate) fn in_node_for(pairs: &[RegPair], reg: Reg) -> Node {
    pairs[pair_for_in(pairs, reg).expect("no pair for in-register")].in_node
}

/// The projection that receives `reg` after the permutation.
pub(crate) fn out_node_for(pairs: &[RegPair], reg: Reg) -> Node {
    pairs[pair_for_out(pairs, reg).expect("no pair for out-register")].out_node
}

pub(crate) fn set_in_node(pairs: &mut [RegPair], reg: Reg, node: Node) {
    let idx = pair_for_in(pairs, reg).expect("no pair for in-register");
    pairs[idx].in_node = node;
}

/// Identify the cycle or chain containing `pairs[start]` and mark all
/// of its pairs checked.
///
/// We could be right in the middle of a chain, so first walk backwards
/// (following out-register == current head) until either the walk
/// closes on the start pair's out-register (cycle) or no predecessor
/// pair exists (chain head). Then walk forwards from there, recording
/// each register.
pub(crate) fn move_info(pairs: &mut [RegPair], start: usize) -> PermMove {
    let mut head = pairs[start].in_reg;
    let cur_out = pairs[start].out_reg;
    let mut kind = MoveKind::Cycle;
    let mut start = start;

    while head != cur_out {
        match pair_for_out(pairs, head) {
            None => {
                kind = MoveKind::Chain;
                break;
            }
            Some(idx) => {
                head = pairs[idx].in_reg;
                start = idx;
            }
        }
    }

    let mut elems: SmallVec<[Reg; 8]> = SmallVec::new();
    elems.push(pairs[start].in_reg);
    elems.push(pairs[start].out_reg);
    let mut cur = pairs[start].out_reg;

    while cur != head {
        match pair_for_in(pairs, cur) {
            None => break,
            Some(idx) => {
                cur = pairs[idx].out_reg;
                if cur != head {
                    elems.push(cur);
                } else {
                    // Back where we started.
                    kind = MoveKind::Cycle;
                }
            }
        }
    }

    // Mark every pair sharing an in- or out-register with the move.
    for i in 0..elems.len() {
        let reg = elems[i];
        if let Some(idx) = pair_for_in(pairs, reg) {
            pairs[idx].checked = true;
        }
        if let Some(idx) = pair_for_out(pairs, reg) {
            pairs[idx].checked = true;
        }
    }

    PermMove { kind, elems }
}
