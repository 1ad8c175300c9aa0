//! Warp-instruction slots feeding the execution pipes.
//!
//! Each execution pipe owns a [`RegisterSet`]: a small ordered sequence of
//! instruction slots the schedulers issue into and the pipe drains from. In
//! sub-core mode every scheduler may only touch the slot matching its own
//! id, which prevents scheduler cross-talk on the register ports.

use crate::core::instruction::WarpInstruction;

/// A register set holding at most one instruction per slot.
pub struct RegisterSet {
    name: &'static str,
    id: usize,
    regs: Vec<Option<WarpInstruction>>,
}

impl RegisterSet {
    /// Creates `num` empty slots.
    pub fn new(name: &'static str, id: usize, num: usize) -> Self {
        Self {
            name,
            id,
            regs: (0..num).map(|_| None).collect(),
        }
    }

    /// Pipe name, for diagnostics.
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Pipe id.
    pub const fn id(&self) -> usize {
        self.id
    }

    /// Number of slots.
    pub fn size(&self) -> usize {
        self.regs.len()
    }

    /// Whether an issue slot is free. In sub-core mode only the scheduler's
    /// own slot counts.
    pub fn has_free(&self, sub_core_model: bool, reg_id: usize) -> bool {
        if sub_core_model {
            debug_assert!(reg_id < self.regs.len());
            self.regs[reg_id].is_none()
        } else {
            self.regs.iter().any(Option::is_none)
        }
    }

    /// Whether any slot holds an instruction awaiting dispatch.
    pub fn has_ready(&self) -> bool {
        self.regs.iter().any(Option::is_some)
    }

    /// Places `inst` into a free slot (the scheduler's own in sub-core
    /// mode). The caller must have observed [`Self::has_free`].
    pub fn move_in(&mut self, sub_core_model: bool, reg_id: usize, inst: WarpInstruction) {
        let slot = if sub_core_model {
            &mut self.regs[reg_id]
        } else {
            self.regs
                .iter_mut()
                .find(|slot| slot.is_none())
                .unwrap_or_else(|| panic!("no free slot in register set `{}`", self.name))
        };
        debug_assert!(slot.is_none(), "move_in into an occupied slot");
        *slot = Some(inst);
    }

    /// Takes the oldest ready instruction (smallest uid).
    pub fn move_out(&mut self) -> Option<WarpInstruction> {
        let idx = self
            .regs
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|inst| (i, inst.uid)))
            .min_by_key(|&(_, uid)| uid)
            .map(|(i, _)| i)?;
        self.regs[idx].take()
    }

    /// The oldest ready instruction without removing it.
    pub fn peek_ready(&self) -> Option<&WarpInstruction> {
        self.regs
            .iter()
            .flatten()
            .min_by_key(|inst| inst.uid)
    }
}

impl std::fmt::Debug for RegisterSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let occupied = self.regs.iter().filter(|s| s.is_some()).count();
        write!(f, "{}[{}]({}/{})", self.name, self.id, occupied, self.regs.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::instruction::{MemorySpace, OpClass};

    fn inst(uid: u64) -> WarpInstruction {
        WarpInstruction {
            uid,
            warp_id: 0,
            pc: 0,
            op: OpClass::Sp,
            dst_regs: vec![],
            src_regs: vec![],
            active_mask: 1,
            mem_space: MemorySpace::None,
            mem_width: 0,
            mem_addr: 0,
            latency: 1,
            cdp_class: 0,
            scheduler_id: 0,
            issued_cycle: 0,
        }
    }

    #[test]
    fn test_move_in_move_out_oldest_first() {
        let mut rs = RegisterSet::new("SP", 0, 2);
        rs.move_in(false, 0, inst(10));
        rs.move_in(false, 0, inst(5));
        assert!(!rs.has_free(false, 0));
        assert_eq!(rs.move_out().map(|i| i.uid), Some(5));
        assert_eq!(rs.move_out().map(|i| i.uid), Some(10));
        assert!(rs.move_out().is_none());
    }

    #[test]
    fn test_sub_core_slot_discipline() {
        let mut rs = RegisterSet::new("SP", 0, 2);
        rs.move_in(true, 1, inst(1));
        // slot 1 taken, slot 0 still free
        assert!(rs.has_free(true, 0));
        assert!(!rs.has_free(true, 1));
        // whole-set view sees a free slot either way
        assert!(rs.has_free(false, 0));
    }
}
