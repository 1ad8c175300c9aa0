//! Shader core: fetch/decode/issue/writeback.
//!
//! One `SmCore` holds the resident warps, the scoreboard, the schedulers
//! with their issue ports, the execution pipes, and the load/store unit.
//! Per core cycle it runs the stages back to front — writeback, execute,
//! issue, decode — so results written this cycle are visible to issue next
//! cycle, one instruction boundary apart, the way the hardware pipelines
//! it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use crate::common::Cycle;
use crate::config::Config;
use crate::core::instruction::OpClass;
use crate::core::scheduler::{
    ExecUnitKind, IssueContext, IssuePorts, IssuedEvent, SchedulerUnit,
};
use crate::core::scoreboard::Scoreboard;
use crate::core::unit::{LdstUnit, MemCompletion, MemCompletionKind, PipelinedUnit};
use crate::core::warp::TraceWarp;
use crate::icnt::Interconnect;
use crate::mem::fetch::MemFetch;
use crate::stats::SimStats;
use crate::trace::KernelState;

/// Execution-barrier state of one CTA.
struct BarrierState {
    arrived: HashSet<usize>,
}

/// One shader core.
pub struct SmCore {
    /// Core id unique across the device.
    pub global_id: usize,
    /// Owning cluster.
    pub cluster_id: usize,
    config: Arc<Config>,
    warps: Vec<TraceWarp>,
    scoreboard: Scoreboard,
    schedulers: Vec<SchedulerUnit>,
    ports: IssuePorts,
    units: Vec<PipelinedUnit>,
    ldst: LdstUnit,
    barriers: HashMap<usize, BarrierState>,
    /// Live (not-yet-exited) warps per resident CTA slot.
    cta_warps: HashMap<usize, usize>,
    cta_kernel: HashMap<usize, u64>,
    /// Kernel uids of blocks that completed; drained by the simulator.
    pub completed_blocks: Vec<u64>,
    next_uid: u64,
    next_dynamic_warp_id: u64,
    events: Vec<IssuedEvent>,
}

impl SmCore {
    /// Builds core `local_id` of `cluster_id`.
    pub fn new(cluster_id: usize, local_id: usize, config: Arc<Config>) -> Self {
        let global_id = cluster_id * config.core.n_simt_cores_per_cluster + local_id;
        let max_warps = config.max_warps_per_core();
        let num_schedulers = config.core.num_schedulers;
        // warps are distributed over schedulers modulo the scheduler count
        let schedulers = (0..num_schedulers)
            .map(|sid| {
                let supervised = (0..max_warps)
                    .filter(|w| w % num_schedulers == sid)
                    .collect();
                SchedulerUnit::new(sid, supervised)
            })
            .collect();
        let core_cfg = &config.core;
        let mut units = vec![
            PipelinedUnit::new(ExecUnitKind::Sp, core_cfg.num_sp_units),
            PipelinedUnit::new(ExecUnitKind::Int, core_cfg.num_int_units),
            PipelinedUnit::new(ExecUnitKind::Dp, core_cfg.num_dp_units),
            PipelinedUnit::new(ExecUnitKind::Sfu, core_cfg.num_sfu_units),
            PipelinedUnit::new(ExecUnitKind::Tensor, core_cfg.num_tensor_core_units),
        ];
        for (i, spec) in core_cfg.specialized_units.iter().enumerate() {
            units.push(PipelinedUnit::new(
                ExecUnitKind::Specialized(i),
                spec.num_units,
            ));
        }
        Self {
            global_id,
            cluster_id,
            warps: (0..max_warps).map(TraceWarp::new).collect(),
            scoreboard: Scoreboard::new(global_id, max_warps),
            schedulers,
            ports: IssuePorts::new(core_cfg),
            units,
            ldst: LdstUnit::new(cluster_id, local_id, global_id, &config),
            barriers: HashMap::new(),
            cta_warps: HashMap::new(),
            cta_kernel: HashMap::new(),
            completed_blocks: Vec::new(),
            next_uid: 0,
            next_dynamic_warp_id: 0,
            events: Vec::new(),
            config,
        }
    }

    /// Live warps on this core.
    pub fn active_warps(&self) -> usize {
        self.warps.iter().filter(|w| w.is_active()).count()
    }

    /// Total warp slots.
    pub fn max_warps(&self) -> usize {
        self.warps.len()
    }

    /// Whether a block needing `warps_needed` warp slots fits right now.
    pub fn can_issue_block(&self, warps_needed: usize) -> bool {
        let free_slots = self.warps.iter().filter(|w| !w.is_active()).count();
        self.cta_warps.len() < self.config.core.max_cta_per_core && free_slots >= warps_needed
    }

    /// Issues the next block of `kernel` onto this core.
    pub fn issue_block(&mut self, kernel: &mut KernelState) {
        let launch = kernel.provider.launch();
        let warps_needed = launch.warps_per_block(self.config.core.warp_size);
        debug_assert!(self.can_issue_block(warps_needed));

        let block_id = kernel.next_block;
        kernel.next_block += 1;
        kernel.running_blocks += 1;

        let cta_slot = (0..self.config.core.max_cta_per_core)
            .find(|slot| !self.cta_warps.contains_key(slot))
            .unwrap_or(0);
        debug!(
            core = self.global_id,
            kernel = kernel.uid,
            block = block_id,
            cta_slot,
            "issue block to core"
        );

        let provider = Arc::clone(&kernel.provider);
        let mut launched = 0;
        for slot in 0..self.warps.len() {
            if launched == warps_needed {
                break;
            }
            if self.warps[slot].is_active() {
                continue;
            }
            let trace = provider.warp_trace(block_id, launched);
            let dynamic_id = self.next_dynamic_warp_id;
            self.next_dynamic_warp_id += 1;
            self.warps[slot].launch(cta_slot, dynamic_id, trace);
            launched += 1;
        }
        let _ = self.barriers.insert(
            cta_slot,
            BarrierState {
                arrived: HashSet::new(),
            },
        );
        let _ = self.cta_warps.insert(cta_slot, warps_needed);
        let _ = self.cta_kernel.insert(cta_slot, kernel.uid);
    }

    /// Accepts a memory reply routed to this core.
    pub fn accept_reply(&mut self, fetch: Box<MemFetch>, cycle: Cycle, stats: &mut SimStats) {
        let mut completions = Vec::new();
        self.ldst.accept_reply(fetch, cycle, &mut completions);
        for completion in completions {
            self.apply_mem_completion(completion, stats);
        }
    }

    fn apply_mem_completion(&mut self, completion: MemCompletion, stats: &mut SimStats) {
        match completion.kind {
            MemCompletionKind::LoadWriteback | MemCompletionKind::OnChipWriteback => {
                for &reg in &completion.dst_regs {
                    self.scoreboard.release_register(completion.warp_id, reg);
                }
                let warp = &mut self.warps[completion.warp_id];
                warp.inflight_instructions = warp.inflight_instructions.saturating_sub(1);
                stats.gpu_sim_insn += u64::from(completion.active_lanes);
                stats.last_writeback_core = self.global_id;
                if let Some(rt) = completion.round_trip {
                    stats.mem_latency.add(rt);
                }
            }
            MemCompletionKind::StoreSent => {
                let warp = &mut self.warps[completion.warp_id];
                warp.stores_outstanding += 1;
                warp.inflight_instructions = warp.inflight_instructions.saturating_sub(1);
                stats.gpu_sim_insn += u64::from(completion.active_lanes);
                stats.last_writeback_core = self.global_id;
            }
            MemCompletionKind::StoreAck => {
                let warp = &mut self.warps[completion.warp_id];
                warp.stores_outstanding = warp.stores_outstanding.saturating_sub(1);
                if warp.stores_outstanding == 0 {
                    warp.waiting_membar = false;
                }
                if let Some(rt) = completion.round_trip {
                    stats.mem_latency.add(rt);
                }
            }
        }
    }

    /// One CORE-domain tick.
    pub fn cycle(&mut self, cycle: Cycle, icnt: &mut Interconnect, stats: &mut SimStats) {
        // writeback + execute: every pipe retires finished work, then
        // refills from its issue port
        let mut finished = Vec::new();
        {
            let units = &mut self.units;
            let ports = &mut self.ports;
            for unit in units.iter_mut() {
                unit.cycle(cycle, ports.port_mut(unit.kind), &mut finished);
            }
        }
        for inst in finished {
            self.scoreboard.release_registers(&inst);
            let warp = &mut self.warps[inst.warp_id];
            warp.inflight_instructions = warp.inflight_instructions.saturating_sub(1);
            stats.gpu_sim_insn += u64::from(inst.active_count());
            stats.last_writeback_core = self.global_id;
        }

        // memory pipe
        let mut mem_completions = Vec::new();
        self.ldst
            .cycle(cycle, &mut self.ports.mem, icnt, &mut mem_completions);
        for completion in mem_completions {
            self.apply_mem_completion(completion, stats);
        }

        // issue
        self.events.clear();
        {
            let warps = &mut self.warps;
            let scoreboard = &mut self.scoreboard;
            let ports = &mut self.ports;
            let events = &mut self.events;
            let config = &self.config.core;
            let mut ctx = IssueContext {
                warps,
                scoreboard,
                ports,
                config,
                stats,
                events,
                cycle,
            };
            for scheduler in &mut self.schedulers {
                let _ = scheduler.cycle(&mut ctx);
            }
        }
        let events = std::mem::take(&mut self.events);
        for event in &events {
            self.apply_issue_event(event);
        }
        self.events = events;

        // decode keeps every live warp's ibuffer topped up
        for warp in &mut self.warps {
            if warp.is_active() && !warp.trace_done() {
                warp.decode(&mut self.next_uid);
            }
        }

        self.retire_finished_warps(stats);

        stats.occupancy_filled += self.active_warps() as u64;
        stats.occupancy_total += self.warps.len() as u64;
    }

    fn apply_issue_event(&mut self, event: &IssuedEvent) {
        // the wait flags were raised at issue; this pass only keeps the
        // CTA-wide arrival books
        if event.op == OpClass::Barrier {
            let cta = self.warps[event.warp_id].cta_id;
            if let Some(barrier) = self.barriers.get_mut(&cta) {
                let _ = barrier.arrived.insert(event.warp_id);
            }
            self.maybe_release_barrier(cta);
        }
    }

    /// Releases a CTA barrier once every live warp has arrived.
    fn maybe_release_barrier(&mut self, cta: usize) {
        let live = self.cta_warps.get(&cta).copied().unwrap_or(0);
        let Some(barrier) = self.barriers.get_mut(&cta) else {
            return;
        };
        if barrier.arrived.len() >= live {
            let released: Vec<usize> = barrier.arrived.drain().collect();
            for warp_id in released {
                self.warps[warp_id].waiting_barrier = false;
            }
        }
    }

    fn retire_finished_warps(&mut self, stats: &mut SimStats) {
        let mut finished_ctas = Vec::new();
        for warp_id in 0..self.warps.len() {
            let done = {
                let warp = &self.warps[warp_id];
                warp.is_active()
                    && warp.functional_done()
                    && warp.inflight_instructions == 0
                    && warp.stores_outstanding == 0
                    && !self.scoreboard.has_pending_writes(warp_id)
            };
            if !done {
                continue;
            }
            let cta = self.warps[warp_id].cta_id;
            self.warps[warp_id].done_exit = true;
            debug!(core = self.global_id, warp = warp_id, cta, "warp exits");
            let mut remaining = None;
            if let Some(count) = self.cta_warps.get_mut(&cta) {
                *count -= 1;
                remaining = Some(*count);
            }
            match remaining {
                Some(0) => finished_ctas.push(cta),
                // an exited warp can be the last arrival a barrier waits on
                Some(_) => self.maybe_release_barrier(cta),
                None => {}
            }
        }
        for cta in finished_ctas {
            let _ = self.cta_warps.remove(&cta);
            let _ = self.barriers.remove(&cta);
            if let Some(uid) = self.cta_kernel.remove(&cta) {
                self.completed_blocks.push(uid);
            }
            stats.gpu_completed_cta += 1;
        }
    }

    /// Invalidates this core's L1 caches.
    pub fn cache_invalidate(&mut self) {
        self.ldst.cache_invalidate();
    }

    /// L1D statistics for the roll-up.
    pub fn l1d_stats(&self) -> crate::stats::CacheStats {
        self.ldst.l1d_stats()
    }
}
