//! Top-level simulator owning every component.
//!
//! The simulator is the sole owner of all state: clusters, memory
//! partitions, the fabric, the clock stepper, and the kernel table. There
//! are no process-wide singletons; components that must talk to a sibling
//! do so through the references this loop hands them for exactly one tick.
//!
//! Per activated domain the loop runs, in order: cluster fabric-pop (CORE),
//! sub-partition reply push (ICNT), DRAM channel cycles (DRAM), fabric pop
//! into sub-partitions plus L2 cycles (L2), fabric advance (ICNT), then the
//! shader pipelines, block-to-core issue, flush checks, and the deadlock
//! detector (CORE).

use std::sync::Arc;

use tracing::{debug, error, info};

use crate::common::error::SimError;
use crate::config::Config;
use crate::core::cluster::SimtCluster;
use crate::icnt::Interconnect;
use crate::mem::fetch::FetchStatus;
use crate::mem::partition::MemoryPartition;
use crate::mem::subpartition::MemorySubPartition;
use crate::sim::clock::{ClockDomains, DomainMask};
use crate::stats::SimStats;
use crate::trace::{KernelTable, TraceProvider};

/// Cycles between deadlock-detector samples.
const DEADLOCK_WINDOW: u64 = 50_000;

/// Concurrent kernel slots in the launch table.
const MAX_CONCURRENT_KERNELS: usize = 8;

/// The simulator.
pub struct Simulator {
    config: Arc<Config>,
    clusters: Vec<SimtCluster>,
    partitions: Vec<MemoryPartition>,
    icnt: Interconnect,
    clock: ClockDomains,
    kernels: KernelTable,
    stats: SimStats,
    last_cluster_issue: usize,
    last_gpu_sim_insn: u64,
    deadlock: bool,
    l2_enabled: bool,
}

impl Simulator {
    /// Validates the configuration and builds every component.
    pub fn new(config: Config) -> Result<Self, SimError> {
        config.validate()?;
        let config = Arc::new(config);

        let clusters = (0..config.core.n_simt_clusters)
            .map(|id| SimtCluster::new(id, &config))
            .collect();
        let partitions = (0..config.memory.n_mem)
            .map(|id| MemoryPartition::new(id, &config))
            .collect();
        let icnt = Interconnect::new(
            config.core.n_simt_clusters,
            config.n_mem_ports(),
            &config.interconnect,
        )?;
        let clock = ClockDomains::new(&config.clock, config.sim.lockstep);
        let stats = SimStats::new(
            config.core.num_schedulers,
            config.core.max_insn_issue_per_warp,
        );
        let l2_enabled = config.cache.parsed()?.l2.is_some();

        info!(
            clusters = config.core.n_simt_clusters,
            mem_ports = config.n_mem_ports(),
            "simulator built"
        );
        Ok(Self {
            clusters,
            partitions,
            icnt,
            clock,
            kernels: KernelTable::new(MAX_CONCURRENT_KERNELS),
            stats,
            last_cluster_issue: 0,
            last_gpu_sim_insn: 0,
            deadlock: false,
            l2_enabled,
            config,
        })
    }

    /// Places a kernel in the launch table; its blocks start issuing on
    /// subsequent cycles.
    pub fn launch(&mut self, provider: Arc<dyn TraceProvider>) -> Result<u64, SimError> {
        self.kernels.launch(provider)
    }

    /// Accumulated statistics.
    pub const fn stats(&self) -> &SimStats {
        &self.stats
    }

    /// The device-to-node map of the fabric.
    pub fn node_map(&self) -> &[usize] {
        self.icnt.node_map()
    }

    /// Whether the simulation should keep cycling.
    pub fn active(&self) -> bool {
        let sim = &self.config.sim;
        if sim.max_cycles > 0 && self.stats.gpu_sim_cycle >= sim.max_cycles {
            return false;
        }
        if sim.max_instructions > 0 && self.stats.gpu_sim_insn >= sim.max_instructions {
            return false;
        }
        if sim.max_blocks > 0 && self.stats.gpu_issued_cta >= sim.max_blocks {
            return false;
        }
        if sim.deadlock_detect && self.deadlock {
            return false;
        }
        if self.clusters.iter().any(|c| c.not_completed() > 0) {
            return true;
        }
        if self.partitions.iter().any(MemoryPartition::busy) {
            return true;
        }
        if self.icnt.busy() {
            return true;
        }
        self.kernels.more_blocks_left()
    }

    /// One step of the multi-domain cycle loop.
    pub fn cycle(&mut self) {
        let mask = self.clock.next_domains();
        let cycle = self.stats.gpu_sim_cycle;

        if mask.contains(DomainMask::CORE) {
            // shader-side fabric pops follow the CORE clock
            for cluster in &mut self.clusters {
                cluster.icnt_cycle(&mut self.icnt, cycle, &mut self.stats);
            }
        }

        if mask.contains(DomainMask::ICNT) {
            // pop replies from the memory side into the fabric
            let mut replies_this_cycle = 0;
            for partition in &mut self.partitions {
                for sub in &mut partition.subs {
                    push_reply_to_fabric(
                        sub,
                        &mut self.icnt,
                        &self.config,
                        cycle,
                        &mut self.stats,
                        &mut replies_this_cycle,
                    );
                }
            }
            self.stats.partition_replies_in_parallel += replies_this_cycle;
        }

        if mask.contains(DomainMask::DRAM) {
            for partition in &mut self.partitions {
                partition.dram_cycle(cycle);
            }
        }

        if mask.contains(DomainMask::L2) {
            let mut reqs_this_cycle = 0;
            for partition in &mut self.partitions {
                for sub in &mut partition.subs {
                    let device = self.config.mem_device(sub.id);
                    if sub.full(MemorySubPartition::reserve_slots()) {
                        self.stats.gpu_stall_dramfull += 1;
                    } else if let Some(fetch) = self.icnt.pop(device) {
                        debug!(sub = sub.id, fetch = ?fetch, "fabric to sub-partition");
                        sub.push(fetch, cycle);
                        reqs_this_cycle += 1;
                    }
                    sub.cache_cycle(cycle);
                }
            }
            self.stats.partition_reqs_in_parallel += reqs_this_cycle;
            if reqs_this_cycle > 0 {
                self.stats.partition_util_cycles += 1;
            }
        }

        if mask.contains(DomainMask::ICNT) {
            self.icnt.advance();
        }

        if mask.contains(DomainMask::CORE) {
            let more_blocks = self.kernels.more_blocks_left();
            for cluster in &mut self.clusters {
                if cluster.not_completed() > 0 || more_blocks {
                    cluster.core_cycle(&mut self.icnt, cycle, &mut self.stats);
                }
                cluster.drain_completed_blocks(&mut self.kernels);
            }
            self.stats.gpu_sim_cycle += 1;

            self.issue_block2core();
            self.kernels.decrement_kernel_latency();
            self.flush_caches_on_completion();

            if self.stats.gpu_sim_cycle % DEADLOCK_WINDOW == 0 {
                if self.config.sim.deadlock_detect
                    && self.stats.gpu_sim_insn == self.last_gpu_sim_insn
                {
                    self.deadlock = true;
                } else {
                    self.last_gpu_sim_insn = self.stats.gpu_sim_insn;
                }
            }
        }
    }

    /// Round-robin block issue across clusters, starting one past the last
    /// cluster that issued.
    fn issue_block2core(&mut self) {
        let n = self.clusters.len();
        let last_issued = self.last_cluster_issue;
        for i in 0..n {
            let idx = (i + last_issued + 1) % n;
            let num = self.clusters[idx].issue_block2core(&mut self.kernels, &mut self.stats);
            if num > 0 {
                self.last_cluster_issue = idx;
            }
        }
    }

    /// Invalidates L1s of completed clusters and, once every cluster has
    /// completed, flushes the L2 slices. The per-cluster L1 invalidation
    /// happens as each cluster drains; the L2 flush waits for all of them.
    fn flush_caches_on_completion(&mut self) {
        let mut all_threads_complete = true;
        if self.config.sim.flush_l1_cache {
            for cluster in &mut self.clusters {
                if cluster.not_completed() == 0 {
                    cluster.cache_invalidate();
                } else {
                    all_threads_complete = false;
                }
            }
        }

        if self.config.sim.flush_l2_cache {
            if !self.config.sim.flush_l1_cache {
                all_threads_complete = self
                    .clusters
                    .iter()
                    .all(|cluster| cluster.not_completed() == 0);
            }
            if all_threads_complete && self.l2_enabled {
                for partition in &mut self.partitions {
                    for sub in &mut partition.subs {
                        let dirty = sub.flush_l2();
                        debug!(sub = sub.id, dirty, "L2 flushed");
                    }
                }
            }
        }
    }

    /// Runs to completion.
    ///
    /// # Errors
    ///
    /// [`SimError::Deadlock`] when the detector fires; the partition and
    /// fabric states are logged first.
    pub fn run(&mut self) -> Result<(), SimError> {
        while self.active() {
            self.cycle();
        }
        self.collect_stats();
        if self.deadlock {
            let partitions_busy = self.partitions.iter().filter(|p| p.busy()).count();
            let icnt_busy = self.icnt.busy();
            error!("deadlock detected; dumping memory-side state");
            for partition in &self.partitions {
                if partition.busy() {
                    error!("{}", partition.dump_state());
                }
            }
            return Err(SimError::Deadlock {
                cycle: self.stats.gpu_sim_cycle,
                last_core: self.stats.last_writeback_core,
                partitions_busy,
                icnt_busy,
            });
        }
        info!(
            cycles = self.stats.gpu_sim_cycle,
            instructions = self.stats.gpu_sim_insn,
            "simulation drained"
        );
        Ok(())
    }

    /// Rolls component-local counters into the stats record.
    fn collect_stats(&mut self) {
        self.stats.icnt_total_elapsed = self.icnt.total_elapsed();
        self.stats.icnt_packets = self.icnt.packets_delivered();
        let mut l2_total = crate::stats::CacheStats::default();
        for partition in &self.partitions {
            for sub in &partition.subs {
                l2_total += sub.l2_stats();
            }
        }
        self.stats.l2_cache = l2_total;
        let mut l1_total = crate::stats::CacheStats::default();
        for cluster in &self.clusters {
            l1_total += cluster.l1d_stats();
        }
        self.stats.l1d_cache = l1_total;
    }
}

/// Moves one reply from a sub-partition into the fabric, or counts the
/// stall.
fn push_reply_to_fabric(
    sub: &mut MemorySubPartition,
    icnt: &mut Interconnect,
    config: &Config,
    cycle: u64,
    stats: &mut SimStats,
    replies_this_cycle: &mut u64,
) {
    let Some(front) = sub.top() else {
        return;
    };
    let response_size = front.reply_size();
    let device = config.mem_device(sub.id);
    if icnt.has_buffer(device, response_size) {
        if let Some(mut fetch) = sub.pop() {
            fetch.return_timestamp = cycle;
            fetch.set_status(FetchStatus::InIcntToShader, cycle);
            let dst_device = fetch.cluster_id;
            debug!(sub = sub.id, fetch = ?fetch, "reply into fabric");
            icnt.push(device, dst_device, fetch, response_size);
            *replies_this_cycle += 1;
        }
    } else {
        stats.gpu_stall_icnt2sh += 1;
    }
}
