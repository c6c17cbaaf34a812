/*
 * Released under the terms of the Apache 2.0 license with LLVM
 * exception. See `LICENSE` for details.
 */

//! Scenario builders and semantic checkers shared by the unit tests,
//! the fuzz targets and the benchmarks.

pub mod constr;
pub mod perm;

use crate::bitvec::BitVec;
use crate::{RegClass, RegInfo};

/// A single-class register file of `n_regs` registers, all
/// allocatable.
pub fn machine_regs(n_regs: usize) -> (RegInfo, RegClass, BitVec) {
    let mut reginfo = RegInfo::new();
    let cls = reginfo.add_class("gp");
    let mut allocatable = BitVec::with_capacity(n_regs);
    for i in 0..n_regs {
        let reg = reginfo.add_reg(cls, &format!("r{}", i));
        allocatable.set(reg.index(), true);
    }
    (reginfo, cls, allocatable)
}

/// Tiny deterministic generator so tests and benches can enumerate
/// scenarios without depending on an RNG crate in the library.
pub struct SplitMix64(pub u64);

impl SplitMix64 {
    pub fn next_u64(&mut self) -> u64 {
        self.0 = self.0.wrapping_add(0x9e37_79b9_7f4a_7c15);
        let mut z = self.0;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        z ^ (z >> 31)
    }

    /// Uniform-ish value in `0..bound`.
    pub fn below(&mut self, bound: usize) -> usize {
        debug_assert!(bound > 0);
        (self.next_u64() % bound as u64) as usize
    }

    pub fn chance(&mut self, percent: u64) -> bool {
        self.next_u64() % 100 < percent
    }
}
