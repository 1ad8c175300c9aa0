//! Kernel traces: the `TraceProvider` capability and the launch table.
//!
//! The trace front-end (parsing external kernel traces) is an external
//! collaborator; the simulator consumes an already-ordered instruction
//! stream per warp through [`TraceProvider`]. The [`KernelTable`] holds
//! running kernels and picks the next one to issue blocks from,
//! round-robin starting at the last issuer.

use std::sync::Arc;

use serde::Deserialize;
use tracing::trace;

use crate::common::error::SimError;
use crate::common::Cycle;
use crate::core::instruction::TraceInstruction;

/// Launch geometry of one kernel.
#[derive(Debug, Clone, Deserialize)]
pub struct KernelLaunch {
    /// Kernel name, for the report.
    pub name: String,
    /// Grid dimensions in blocks.
    pub grid_dim: (u32, u32, u32),
    /// Block dimensions in threads.
    pub block_dim: (u32, u32, u32),
    /// Scratchpad bytes per block.
    #[serde(default)]
    pub shared_bytes: u32,
    /// Kernel parameter bytes.
    #[serde(default)]
    pub param_bytes: u32,
    /// Extra launch latency charged before the first block may issue.
    #[serde(default)]
    pub launch_latency: Cycle,
}

impl KernelLaunch {
    /// Total blocks in the grid.
    pub const fn num_blocks(&self) -> usize {
        (self.grid_dim.0 as usize) * (self.grid_dim.1 as usize) * (self.grid_dim.2 as usize)
    }

    /// Threads per block.
    pub const fn threads_per_block(&self) -> usize {
        (self.block_dim.0 as usize) * (self.block_dim.1 as usize) * (self.block_dim.2 as usize)
    }

    /// Warps per block for a given warp size.
    pub const fn warps_per_block(&self, warp_size: usize) -> usize {
        self.threads_per_block().div_ceil(warp_size)
    }
}

/// Source of ordered warp instruction streams for one kernel.
pub trait TraceProvider {
    /// The kernel's launch descriptor.
    fn launch(&self) -> &KernelLaunch;

    /// The ordered instruction stream of warp `warp` in block `block`.
    fn warp_trace(&self, block: usize, warp: usize) -> Vec<TraceInstruction>;
}

/// A complete in-memory kernel trace, deserializable from JSON.
///
/// The stream of block `b`, warp `w` is `warps[b * warps_per_block + w]`;
/// missing streams are empty (the warp launches and immediately exits).
#[derive(Debug, Clone, Deserialize)]
pub struct MemoryTrace {
    /// Launch descriptor.
    pub launch: KernelLaunch,
    /// Per-(block, warp) instruction streams, block-major.
    pub warps: Vec<Vec<TraceInstruction>>,
    /// Warp size the streams were recorded for.
    pub warp_size: usize,
}

impl TraceProvider for MemoryTrace {
    fn launch(&self) -> &KernelLaunch {
        &self.launch
    }

    fn warp_trace(&self, block: usize, warp: usize) -> Vec<TraceInstruction> {
        let per_block = self.launch.warps_per_block(self.warp_size);
        self.warps
            .get(block * per_block + warp)
            .cloned()
            .unwrap_or_default()
    }
}

/// One running kernel.
pub struct KernelState {
    /// Launch uid, unique across the run.
    pub uid: u64,
    /// The kernel's trace.
    pub provider: Arc<dyn TraceProvider>,
    /// Next block to issue.
    pub next_block: usize,
    /// Blocks currently resident on cores.
    pub running_blocks: usize,
    /// Remaining launch latency; blocks issue only once it reaches zero.
    pub tb_latency: Cycle,
    /// Core cycle of the first block issue.
    pub start_cycle: Option<Cycle>,
}

impl KernelState {
    /// Whether every block has been handed to a core.
    pub fn no_more_blocks_to_run(&self) -> bool {
        self.next_block >= self.provider.launch().num_blocks()
    }

    /// Whether the kernel has fully drained.
    pub fn done(&self) -> bool {
        self.no_more_blocks_to_run() && self.running_blocks == 0
    }
}

/// Fixed-size table of running kernels.
pub struct KernelTable {
    slots: Vec<Option<KernelState>>,
    last_issued: usize,
    next_uid: u64,
}

impl KernelTable {
    /// Creates a table with `max_concurrent` kernel slots.
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            slots: (0..max_concurrent.max(1)).map(|_| None).collect(),
            last_issued: 0,
            next_uid: 1,
        }
    }

    /// Places a kernel in the first free slot.
    pub fn launch(&mut self, provider: Arc<dyn TraceProvider>) -> Result<u64, SimError> {
        let tb_latency = provider.launch().launch_latency;
        let uid = self.next_uid;
        let state = KernelState {
            uid,
            provider,
            next_block: 0,
            running_blocks: 0,
            tb_latency,
            start_cycle: None,
        };
        let slot = self
            .slots
            .iter_mut()
            .find(|slot| slot.as_ref().is_none_or(|k| k.done()))
            .ok_or_else(|| {
                SimError::InvalidState("kernel launch with no free slot".into())
            })?;
        *slot = Some(state);
        self.next_uid += 1;
        Ok(uid)
    }

    /// Picks the kernel to issue blocks from: the last issuer while it has
    /// blocks left and no pending launch latency, otherwise a round-robin
    /// scan starting one past it.
    pub fn select_kernel(&mut self) -> Option<usize> {
        let n = self.slots.len();
        let preferred = self.slots[self.last_issued]
            .as_ref()
            .is_some_and(|k| !k.no_more_blocks_to_run() && k.tb_latency == 0);
        if preferred {
            trace!(slot = self.last_issued, "select kernel: sticky");
            return Some(self.last_issued);
        }
        for i in 0..n {
            let idx = (self.last_issued + 1 + i) % n;
            let eligible = self.slots[idx]
                .as_ref()
                .is_some_and(|k| !k.no_more_blocks_to_run() && k.tb_latency == 0);
            if eligible {
                self.last_issued = idx;
                trace!(slot = idx, "select kernel: rotated");
                return Some(idx);
            }
        }
        None
    }

    /// The kernel in `slot`.
    pub fn get_mut(&mut self, slot: usize) -> Option<&mut KernelState> {
        self.slots[slot].as_mut()
    }

    /// The running kernel with `uid`.
    pub fn by_uid_mut(&mut self, uid: u64) -> Option<&mut KernelState> {
        self.slots
            .iter_mut()
            .flatten()
            .find(|k| k.uid == uid)
    }

    /// Whether any kernel still has unissued blocks.
    pub fn more_blocks_left(&self) -> bool {
        self.slots
            .iter()
            .flatten()
            .any(|k| !k.no_more_blocks_to_run())
    }

    /// Whether every kernel has drained.
    pub fn all_done(&self) -> bool {
        self.slots.iter().flatten().all(KernelState::done)
    }

    /// Burns one cycle of launch latency on every pending kernel.
    pub fn decrement_kernel_latency(&mut self) {
        for kernel in self.slots.iter_mut().flatten() {
            if kernel.tb_latency > 0 {
                kernel.tb_latency -= 1;
            }
        }
    }

    /// Marks a kernel's block as finished.
    pub fn block_completed(&mut self, uid: u64) {
        if let Some(kernel) = self.by_uid_mut(uid) {
            debug_assert!(kernel.running_blocks > 0);
            kernel.running_blocks = kernel.running_blocks.saturating_sub(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::instruction::{MemorySpace, OpClass};

    fn provider(blocks: u32) -> Arc<dyn TraceProvider> {
        Arc::new(MemoryTrace {
            launch: KernelLaunch {
                name: "k".into(),
                grid_dim: (blocks, 1, 1),
                block_dim: (32, 1, 1),
                shared_bytes: 0,
                param_bytes: 0,
                launch_latency: 0,
            },
            warps: vec![
                vec![TraceInstruction {
                    pc: 0,
                    op: OpClass::Int,
                    dst_regs: vec![],
                    src_regs: vec![],
                    active_mask: 1,
                    mem_space: MemorySpace::None,
                    mem_width: 0,
                    mem_addr: 0,
                    latency: 0,
                    cdp_class: 0,
                }];
                blocks as usize
            ],
            warp_size: 32,
        })
    }

    #[test]
    fn test_launch_and_select() {
        let mut table = KernelTable::new(2);
        let uid = table.launch(provider(2)).expect("free slot");
        assert_eq!(uid, 1);
        let slot = table.select_kernel().expect("selectable");
        let kernel = table.get_mut(slot).expect("kernel");
        assert!(!kernel.no_more_blocks_to_run());
    }

    #[test]
    fn test_select_skips_drained_kernels() {
        let mut table = KernelTable::new(2);
        let _ = table.launch(provider(1)).expect("slot");
        let _ = table.launch(provider(1)).expect("slot");
        let first = table.select_kernel().expect("first");
        {
            let kernel = table.get_mut(first).expect("kernel");
            kernel.next_block = 1; // all blocks issued
        }
        let second = table.select_kernel().expect("second kernel");
        assert_ne!(first, second);
    }

    #[test]
    fn test_launch_latency_blocks_selection() {
        let mut table = KernelTable::new(1);
        let mut launch = KernelLaunch {
            name: "k".into(),
            grid_dim: (1, 1, 1),
            block_dim: (32, 1, 1),
            shared_bytes: 0,
            param_bytes: 0,
            launch_latency: 2,
        };
        launch.launch_latency = 2;
        let trace = MemoryTrace {
            launch,
            warps: vec![vec![]],
            warp_size: 32,
        };
        let _ = table.launch(Arc::new(trace)).expect("slot");
        assert!(table.select_kernel().is_none());
        table.decrement_kernel_latency();
        table.decrement_kernel_latency();
        assert!(table.select_kernel().is_some());
    }
}
