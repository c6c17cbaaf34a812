/*
 * Released under the terms of the Apache 2.0 license with LLVM
 * exception. See `LICENSE` for details.
 */

//! Structural invariant checks for graphs handled by this layer.
//! Tests and fuzz targets run these before and after the passes; the
//! passes themselves treat violations as programmer errors and abort.

use crate::graph::{Graph, NodeKind};
use crate::sched::Schedule;
use crate::{Node, RegInfo};

#[derive(Clone, Debug)]
pub enum VerifyError {
    /// A data node in an interesting class carries no register.
    MissingReg(Node),
    /// Operands or projections of one permutation span more than one
    /// register class.
    MixedClass(Node),
    /// A real (non-projection) node is not in the schedule, or its
    /// schedule block disagrees with its graph block.
    NotScheduled(Node),
    /// A permutation's input count differs from its projection count.
    ArityMismatch { node: Node, ins: usize, outs: usize },
    /// The multiset of a permutation's input registers differs from
    /// the multiset of its output registers.
    RegMultisetMismatch(Node),
    /// A projection selects a slot beyond its parent's arity.
    BadProjIndex(Node),
    /// An operand/user edge pair is out of sync.
    EdgeOutOfSync(Node),
}

impl std::fmt::Display for VerifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for VerifyError {}

pub fn check(graph: &Graph, sched: &Schedule, reginfo: &RegInfo) -> Result<(), VerifyError> {
    for n in graph.nodes() {
        // Edge coherence: every operand edge must be mirrored by a
        // user edge.
        for (pos, &input) in graph.ins(n).iter().enumerate() {
            let mirrored = graph
                .users(input)
                .iter()
                .any(|u| u.node == n && u.pos == pos as u32);
            if !mirrored {
                return Err(VerifyError::EdgeOutOfSync(n));
            }
        }

        match graph.kind(n) {
            NodeKind::Proj(index) => {
                let parent = graph.input(n, 0);
                if graph.kind(parent) == NodeKind::Perm && index as usize >= graph.arity(parent) {
                    return Err(VerifyError::BadProjIndex(n));
                }
            }
            NodeKind::Perm => check_perm(graph, sched, reginfo, n)?,
            _ => {}
        }

        if !matches!(graph.kind(n), NodeKind::Proj(_)) {
            if !sched.is_scheduled(n) || sched.block_of(n) != graph.block_of(n) {
                return Err(VerifyError::NotScheduled(n));
            }
        }
    }
    Ok(())
}

fn check_perm(
    graph: &Graph,
    sched: &Schedule,
    reginfo: &RegInfo,
    perm: Node,
) -> Result<(), VerifyError> {
    if !sched.is_scheduled(perm) {
        return Err(VerifyError::NotScheduled(perm));
    }

    let projs = graph.projs(perm);
    if projs.len() != graph.arity(perm) {
        return Err(VerifyError::ArityMismatch {
            node: perm,
            ins: graph.arity(perm),
            outs: projs.len(),
        });
    }

    // Class consistency and register presence. Register-multiset
    // equality is NOT checked here: freshly built permutations are
    // register-bijective, but slot removal by push-through leaves
    // chain-shaped permutations whose in- and out-sets differ.
    let mut cls = None;
    for &op in graph.ins(perm) {
        let reg = graph.reg(op).ok_or(VerifyError::MissingReg(op))?;
        if *cls.get_or_insert(reginfo.class_of(reg)) != reginfo.class_of(reg) {
            return Err(VerifyError::MixedClass(perm));
        }
    }
    for &p in &projs {
        let reg = graph.reg(p).ok_or(VerifyError::MissingReg(p))?;
        if *cls.get_or_insert(reginfo.class_of(reg)) != reginfo.class_of(reg) {
            return Err(VerifyError::MixedClass(perm));
        }
    }
    Ok(())
}

/// Post-lowering invariant: every surviving permutation is an arity-2
/// cycle, i.e. an exchange.
pub fn check_lowered(graph: &Graph, sched: &Schedule, reginfo: &RegInfo) -> Result<(), VerifyError> {
    check(graph, sched, reginfo)?;
    for n in graph.nodes() {
        if graph.kind(n) != NodeKind::Perm {
            continue;
        }
        if graph.arity(n) != 2 {
            return Err(VerifyError::ArityMismatch {
                node: n,
                ins: graph.arity(n),
                outs: graph.projs(n).len(),
            });
        }
        // A 2-cycle: input and output registers are the same pair and
        // each slot changes register.
        let mut in_regs: Vec<_> = graph.ins(n).iter().map(|&op| graph.reg(op)).collect();
        let mut out_regs: Vec<_> = graph.projs(n).iter().map(|&p| graph.reg(p)).collect();
        in_regs.sort();
        out_regs.sort();
        if in_regs != out_regs {
            return Err(VerifyError::RegMultisetMismatch(n));
        }
        for p in graph.projs(n) {
            let pn = graph.proj_index(p) as usize;
            let in_reg = graph.reg(graph.input(n, pn));
            if in_reg == graph.reg(p) {
                return Err(VerifyError::RegMultisetMismatch(n));
            }
        }
    }
    Ok(())
}
