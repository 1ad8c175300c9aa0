//! Per-warp pending-write tracking.
//!
//! Maps each warp to the set of registers with an in-flight write, plus the
//! subset reserved by long operations (global, local, and texture loads).
//! The scheduler consults [`Scoreboard::collides`] before issue; an
//! instruction issues only when none of its registers are pending, and its
//! outputs are reserved immediately afterwards — before the scheduler
//! examines the next warp.

use std::collections::HashSet;

use tracing::trace;

use crate::core::instruction::WarpInstruction;

/// Per-warp pending-write register sets.
pub struct Scoreboard {
    core_id: usize,
    /// Registers with a pending write, indexed by warp.
    pending_writes: Vec<HashSet<u32>>,
    /// Registers whose pending write is a long operation.
    long_op_registers: Vec<HashSet<u32>>,
}

impl Scoreboard {
    /// Creates a clear scoreboard for `n_warps` warps.
    pub fn new(core_id: usize, n_warps: usize) -> Self {
        Self {
            core_id,
            pending_writes: vec![HashSet::new(); n_warps],
            long_op_registers: vec![HashSet::new(); n_warps],
        }
    }

    /// Whether issuing `inst` would conflict with a pending write (RAW on
    /// a source, WAW on a destination).
    pub fn collides(&self, warp_id: usize, inst: &WarpInstruction) -> bool {
        let pending = &self.pending_writes[warp_id];
        inst.dst_regs.iter().any(|r| pending.contains(r))
            || inst.src_regs.iter().any(|r| pending.contains(r))
    }

    /// Reserves every destination register of `inst`, tagging them long-op
    /// for global/local/texture loads.
    pub fn reserve_registers(&mut self, inst: &WarpInstruction) {
        let long_op = inst.is_long_op_load();
        for &reg in &inst.dst_regs {
            trace!(
                core = self.core_id,
                warp = inst.warp_id,
                reg,
                long_op,
                "scoreboard reserve"
            );
            let _ = self.pending_writes[inst.warp_id].insert(reg);
            if long_op {
                let _ = self.long_op_registers[inst.warp_id].insert(reg);
            }
        }
    }

    /// Releases every destination register of `inst` (non-memory
    /// writeback).
    pub fn release_registers(&mut self, inst: &WarpInstruction) {
        for &reg in &inst.dst_regs {
            self.release_register(inst.warp_id, reg);
        }
    }

    /// Releases a single register when its writeback completes.
    pub fn release_register(&mut self, warp_id: usize, reg: u32) {
        let _ = self.pending_writes[warp_id].remove(&reg);
        let _ = self.long_op_registers[warp_id].remove(&reg);
    }

    /// Whether the warp has any write outstanding.
    pub fn has_pending_writes(&self, warp_id: usize) -> bool {
        !self.pending_writes[warp_id].is_empty()
    }

    /// The warp's pending-write set.
    pub fn pending_writes(&self, warp_id: usize) -> &HashSet<u32> {
        &self.pending_writes[warp_id]
    }

    /// Whether `reg`'s pending write is a long operation.
    pub fn is_long_op(&self, warp_id: usize, reg: u32) -> bool {
        self.long_op_registers[warp_id].contains(&reg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::instruction::{MemorySpace, OpClass};

    fn inst(warp_id: usize, op: OpClass, dst: &[u32], src: &[u32]) -> WarpInstruction {
        WarpInstruction {
            uid: 0,
            warp_id,
            pc: 0,
            op,
            dst_regs: dst.to_vec(),
            src_regs: src.to_vec(),
            active_mask: 1,
            mem_space: if op.is_memory() {
                MemorySpace::Global
            } else {
                MemorySpace::None
            },
            mem_width: 4,
            mem_addr: 0,
            latency: 1,
            cdp_class: 0,
            scheduler_id: 0,
            issued_cycle: 0,
        }
    }

    #[test]
    fn test_new_no_collisions() {
        let sb = Scoreboard::new(0, 4);
        let add = inst(0, OpClass::Int, &[1], &[2, 3]);
        assert!(!sb.collides(0, &add));
        assert!(!sb.has_pending_writes(0));
    }

    #[test]
    fn test_raw_collision() {
        let mut sb = Scoreboard::new(0, 4);
        let load = inst(0, OpClass::Load, &[1], &[2]);
        sb.reserve_registers(&load);

        // ADD R2, R1, R3 reads R1, which the load still owns
        let add = inst(0, OpClass::Int, &[2], &[1, 3]);
        assert!(sb.collides(0, &add));

        sb.release_register(0, 1);
        assert!(!sb.collides(0, &add));
    }

    #[test]
    fn test_waw_collision() {
        let mut sb = Scoreboard::new(0, 4);
        let first = inst(0, OpClass::Sp, &[5], &[]);
        sb.reserve_registers(&first);
        let second = inst(0, OpClass::Sp, &[5], &[]);
        assert!(sb.collides(0, &second));
    }

    #[test]
    fn test_long_op_tagging() {
        let mut sb = Scoreboard::new(0, 4);
        let load = inst(0, OpClass::Load, &[7], &[]);
        sb.reserve_registers(&load);
        assert!(sb.is_long_op(0, 7));

        let alu = inst(0, OpClass::Int, &[8], &[]);
        sb.reserve_registers(&alu);
        assert!(!sb.is_long_op(0, 8));

        sb.release_register(0, 7);
        assert!(!sb.is_long_op(0, 7));
        assert!(!sb.has_pending_writes(0) || sb.pending_writes(0).contains(&8));
    }

    #[test]
    fn test_warps_are_independent() {
        let mut sb = Scoreboard::new(0, 4);
        let load = inst(1, OpClass::Load, &[1], &[]);
        sb.reserve_registers(&load);
        let add = inst(0, OpClass::Int, &[2], &[1]);
        assert!(!sb.collides(0, &add));
        assert!(sb.collides(1, &inst(1, OpClass::Int, &[2], &[1])));
    }
}
