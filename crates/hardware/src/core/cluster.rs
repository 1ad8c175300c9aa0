//! SIMT cluster: cores sharing one fabric port.
//!
//! The cluster owns its cores and the response FIFO between the fabric and
//! them. Its `icnt_cycle` runs in the CORE clock domain and moves one reply
//! per tick from the fabric toward the owning core; `issue_block2core`
//! hands kernel blocks to cores with free CTA slots.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::debug;

use crate::common::Cycle;
use crate::config::Config;
use crate::core::sm::SmCore;
use crate::icnt::Interconnect;
use crate::mem::fetch::{FetchStatus, MemFetch};
use crate::stats::SimStats;
use crate::trace::KernelTable;

/// Replies the cluster may hold between the fabric and its cores.
const RESPONSE_FIFO_DEPTH: usize = 8;

/// One SIMT cluster.
pub struct SimtCluster {
    /// Cluster id; also its fabric device id.
    pub cluster_id: usize,
    config: Arc<Config>,
    cores: Vec<SmCore>,
    response_fifo: VecDeque<Box<MemFetch>>,
    /// Core to try first on the next block issue.
    next_issue_core: usize,
}

impl SimtCluster {
    /// Builds cluster `cluster_id` with its cores.
    pub fn new(cluster_id: usize, config: &Arc<Config>) -> Self {
        let cores = (0..config.core.n_simt_cores_per_cluster)
            .map(|local| SmCore::new(cluster_id, local, Arc::clone(config)))
            .collect();
        Self {
            cluster_id,
            config: Arc::clone(config),
            cores,
            response_fifo: VecDeque::new(),
            next_issue_core: 0,
        }
    }

    /// The cluster's cores.
    pub fn cores_mut(&mut self) -> &mut [SmCore] {
        &mut self.cores
    }

    /// Live warps across the cluster; zero means every thread completed.
    pub fn not_completed(&self) -> usize {
        self.cores.iter().map(SmCore::active_warps).sum()
    }

    /// One CORE-domain fabric tick: deliver the head reply to its core,
    /// then pull a fresh reply from the fabric into the response FIFO.
    pub fn icnt_cycle(&mut self, icnt: &mut Interconnect, cycle: Cycle, stats: &mut SimStats) {
        if let Some(fetch) = self.response_fifo.pop_front() {
            let core = fetch.core_id.min(self.cores.len() - 1);
            debug!(cluster = self.cluster_id, core, fetch = ?fetch, "reply to core");
            self.cores[core].accept_reply(fetch, cycle, stats);
        }
        if self.response_fifo.len() < RESPONSE_FIFO_DEPTH {
            if let Some(mut fetch) = icnt.pop(self.cluster_id) {
                fetch.set_status(FetchStatus::InIcntToShader, cycle);
                self.response_fifo.push_back(fetch);
            }
        }
    }

    /// One CORE-domain compute tick over every core.
    pub fn core_cycle(&mut self, icnt: &mut Interconnect, cycle: Cycle, stats: &mut SimStats) {
        for core in &mut self.cores {
            core.cycle(cycle, icnt, stats);
        }
    }

    /// Issues blocks to cores with room, rotating the starting core.
    /// Returns the number of blocks issued.
    pub fn issue_block2core(&mut self, kernels: &mut KernelTable, stats: &mut SimStats) -> usize {
        let mut issued = 0;
        let n_cores = self.cores.len();
        for i in 0..n_cores {
            let core_idx = (self.next_issue_core + i) % n_cores;
            let Some(slot) = kernels.select_kernel() else {
                break;
            };
            let Some(kernel) = kernels.get_mut(slot) else {
                break;
            };
            let warps_needed = kernel
                .provider
                .launch()
                .warps_per_block(self.config.core.warp_size);
            if self.cores[core_idx].can_issue_block(warps_needed) {
                if kernel.start_cycle.is_none() {
                    kernel.start_cycle = Some(stats.gpu_sim_cycle);
                }
                self.cores[core_idx].issue_block(kernel);
                stats.gpu_issued_cta += 1;
                issued += 1;
            }
        }
        if issued > 0 {
            self.next_issue_core = (self.next_issue_core + 1) % n_cores;
        }
        issued
    }

    /// Drains kernel uids of blocks that completed on this cluster.
    pub fn drain_completed_blocks(&mut self, kernels: &mut KernelTable) {
        for core in &mut self.cores {
            for uid in core.completed_blocks.drain(..) {
                kernels.block_completed(uid);
            }
        }
    }

    /// Invalidates every core's L1 caches.
    pub fn cache_invalidate(&mut self) {
        for core in &mut self.cores {
            core.cache_invalidate();
        }
    }

    /// L1D statistics roll-up over the cluster.
    pub fn l1d_stats(&self) -> crate::stats::CacheStats {
        let mut total = crate::stats::CacheStats::default();
        for core in &self.cores {
            total += core.l1d_stats();
        }
        total
    }
}
