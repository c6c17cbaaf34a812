/*
 * Released under the terms of the Apache 2.0 license with LLVM
 * exception. See `LICENSE` for details.
 */

//! Post-register-allocation lowering.
//!
//! After registers have been assigned, the IR still contains abstract
//! `Perm` nodes (simultaneous transfers of a set of values between a
//! set of physical registers) and per-instruction output requirements
//! of the form "must occupy a register distinct from input i". This
//! crate rewrites the graph so that a real machine can execute it:
//!
//! - [`lower_nodes_after_ra`] decomposes every permutation into
//!   register-to-register copies and two-register exchanges, sinking
//!   independent instructions past the permutation first where that
//!   shrinks it;
//! - [`assure_constraints`] inserts unspillable copies and keep edges
//!   so that must-differ output constraints are enforced structurally,
//!   and restores single-assignment form afterwards.
//!
//! The surrounding backend supplies the IR graph, the per-block
//! schedule, the register database, a liveness oracle and an SSA
//! reconstruction service; all of these have small in-crate
//! realizations sufficient to run and test the passes.

pub mod bitvec;
pub mod cfg;
pub mod constraints;
pub mod graph;
pub mod liveness;
pub mod lower;
pub mod sched;
pub mod ssa;
pub mod verify;

#[macro_use]
mod index;
pub use index::{Block, Node};

pub use constraints::assure_constraints;
pub use liveness::LiveSets;
pub use lower::{find_free_registers, lower_nodes_after_ra, push_through_perm, FreeRegMap};
pub use ssa::{DomSsaFixup, SsaReconstruction};

#[cfg(any(test, feature = "fuzzing"))]
pub mod fuzzing;

/// A register class: a set of interchangeable physical registers
/// (integer, float, ...). Classes are small indices into a [`RegInfo`]
/// database.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RegClass(pub u8);

impl RegClass {
    #[inline(always)]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Debug for RegClass {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "class{}", self.0)
    }
}

/// A register, identified by its global index into the [`RegInfo`]
/// database. The class, class-local index, name and virtual flag live
/// in the database.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Reg(pub u16);

impl Reg {
    #[inline(always)]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Debug for Reg {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "r{}", self.0)
    }
}

struct RegDesc {
    name: String,
    class: RegClass,
    /// Index within the class.
    index: u16,
    virt: bool,
}

struct RegClassDesc {
    name: String,
    /// Members by class-local index.
    regs: Vec<Reg>,
}

/// The register database: classes and registers with their names,
/// class-local indices and virtual/physical flags. Built once per
/// target and read-only afterwards.
pub struct RegInfo {
    classes: Vec<RegClassDesc>,
    regs: Vec<RegDesc>,
}

impl RegInfo {
    pub fn new() -> Self {
        Self {
            classes: vec![],
            regs: vec![],
        }
    }

    pub fn add_class(&mut self, name: &str) -> RegClass {
        let cls = RegClass(self.classes.len() as u8);
        self.classes.push(RegClassDesc {
            name: name.to_string(),
            regs: vec![],
        });
        cls
    }

    pub fn add_reg(&mut self, class: RegClass, name: &str) -> Reg {
        self.add_reg_impl(class, name, false)
    }

    /// A virtual register: it participates in the graph but is never
    /// considered for liveness or scratch selection.
    pub fn add_virtual_reg(&mut self, class: RegClass, name: &str) -> Reg {
        self.add_reg_impl(class, name, true)
    }

    fn add_reg_impl(&mut self, class: RegClass, name: &str, virt: bool) -> Reg {
        let reg = Reg(self.regs.len() as u16);
        let class_desc = &mut self.classes[class.index()];
        self.regs.push(RegDesc {
            name: name.to_string(),
            class,
            index: class_desc.regs.len() as u16,
            virt,
        });
        class_desc.regs.push(reg);
        reg
    }

    #[inline(always)]
    pub fn class_of(&self, reg: Reg) -> RegClass {
        self.regs[reg.index()].class
    }

    /// The class-local index of `reg`.
    #[inline(always)]
    pub fn local_index(&self, reg: Reg) -> usize {
        self.regs[reg.index()].index as usize
    }

    /// Lookup by class-local index.
    #[inline(always)]
    pub fn reg_in_class(&self, class: RegClass, index: usize) -> Reg {
        self.classes[class.index()].regs[index]
    }

    #[inline(always)]
    pub fn num_regs(&self, class: RegClass) -> usize {
        self.classes[class.index()].regs.len()
    }

    #[inline(always)]
    pub fn is_virtual(&self, reg: Reg) -> bool {
        self.regs[reg.index()].virt
    }

    pub fn reg_name(&self, reg: Reg) -> &str {
        &self.regs[reg.index()].name
    }

    pub fn class_name(&self, class: RegClass) -> &str {
        &self.classes[class.index()].name
    }

    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }

    /// Total number of registers across all classes; the global index
    /// space used by allocatability bitmaps.
    pub fn num_global_regs(&self) -> usize {
        self.regs.len()
    }
}

/// The mode of a node: whether it produces a data value, a tuple of
/// values (selected by projections), or nothing register-relevant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Mode {
    Data = 0,
    Tuple = 1,
    Control = 2,
}

impl Mode {
    #[inline(always)]
    pub fn is_data(self) -> bool {
        self == Mode::Data
    }
}

/// Per-node flags relevant to this layer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NodeFlags {
    /// The allocator must not materialize this value by reloading from
    /// memory; it has to hold a register of its own.
    pub dont_spill: bool,
    /// The instruction modifies processor flags and must not be
    /// reordered across other flag-sensitive instructions.
    pub modify_flags: bool,
    /// The value is outside the allocator's purview (fixed special
    /// registers and the like).
    pub ignore: bool,
}

/// The kind of an output register requirement.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReqKind {
    /// Any register of the node's class.
    #[default]
    Normal,
    /// Anything beyond a plain class constraint (limited register
    /// sets, fixed registers). Such nodes are never sunk past a
    /// permutation.
    Limited,
}

/// An output register requirement: constraint kind plus input-position
/// bitmasks for must-differ and should-be-same relations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RegReq {
    pub kind: ReqKind,
    /// Bit i set: the output must not share a register with input i.
    pub must_differ: u32,
    /// Bit i set: the output would prefer input i's register.
    pub should_be_same: u32,
}

impl RegReq {
    pub fn must_differ_from(mask: u32) -> Self {
        Self {
            kind: ReqKind::Normal,
            must_differ: mask,
            should_be_same: 0,
        }
    }
}

/// The liveness oracle consumed by lowering: per-block live-at-end
/// sets and a pairwise interference query. [`liveness::LiveSets`] is
/// the in-crate implementation.
pub trait Liveness {
    fn live_at_end(&self, block: Block) -> &[Node];

    /// Do the live ranges of `a` and `b` overlap? A use at the def
    /// point of the other value does not count as overlap.
    fn interfere(&self, graph: &graph::Graph, sched: &sched::Schedule, a: Node, b: Node) -> bool;
}
