//! Pipelined execution units and the load/store unit.
//!
//! A [`PipelinedUnit`] drains its issue port and holds each instruction for
//! its execution latency before handing it to writeback. The
//! [`LdstUnit`] additionally turns off-chip memory instructions into
//! [`MemFetch`]es, probes the L1 data cache for loads, and injects lowered
//! requests into the fabric, stalling locally on backpressure.

use std::collections::VecDeque;

use tracing::debug;

use crate::common::masks::{ByteMask, SectorMask, LINE_SIZE, SECTOR_SIZE};
use crate::common::Cycle;
use crate::config::Config;
use crate::core::instruction::{OpClass, WarpInstruction};
use crate::core::register_set::RegisterSet;
use crate::core::scheduler::ExecUnitKind;
use crate::icnt::Interconnect;
use crate::mem::cache::{CacheAccessOutcome, DataCache};
use crate::mem::fetch::{AccessKind, FetchStatus, MemFetch};

/// Control-header bytes per request.
const CTRL_SIZE: u32 = 8;

/// Pending outbound requests the load/store unit may hold.
const REQUEST_QUEUE_DEPTH: usize = 8;

/// A pipelined execution unit (SP/INT/DP/SFU/TENSOR/SPEC).
pub struct PipelinedUnit {
    /// Unit class.
    pub kind: ExecUnitKind,
    num_units: usize,
    in_flight: Vec<(Cycle, WarpInstruction)>,
}

impl PipelinedUnit {
    /// Creates a unit class with `num_units` instances (dispatches per
    /// cycle).
    pub fn new(kind: ExecUnitKind, num_units: usize) -> Self {
        Self {
            kind,
            num_units,
            in_flight: Vec::new(),
        }
    }

    /// One core tick: retire finished work, then dispatch from the issue
    /// port, one instruction per unit instance.
    pub fn cycle(
        &mut self,
        cycle: Cycle,
        port: &mut RegisterSet,
        completed: &mut Vec<WarpInstruction>,
    ) {
        let mut i = 0;
        while i < self.in_flight.len() {
            if self.in_flight[i].0 <= cycle {
                completed.push(self.in_flight.swap_remove(i).1);
            } else {
                i += 1;
            }
        }
        for _ in 0..self.num_units {
            let Some(inst) = port.move_out() else { break };
            self.in_flight.push((cycle + inst.latency, inst));
        }
    }

    /// Whether the unit still holds work.
    pub fn busy(&self) -> bool {
        !self.in_flight.is_empty()
    }
}

/// What a load/store completion means to the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemCompletionKind {
    /// An off-chip load reply: release long-op registers and retire.
    LoadWriteback,
    /// An on-chip access (shared memory, L1 hit, barrier): release and
    /// retire.
    OnChipWriteback,
    /// A store left for memory: retire it and count it outstanding.
    StoreSent,
    /// A store acknowledgement returned: drain the outstanding counter.
    StoreAck,
}

/// A load/store completion delivered back to the core.
pub struct MemCompletion {
    /// Warp that issued the access.
    pub warp_id: usize,
    /// Registers to release (loads).
    pub dst_regs: Vec<u32>,
    /// Active lanes for retirement accounting.
    pub active_lanes: u32,
    /// Completion class.
    pub kind: MemCompletionKind,
    /// Round-trip latency in core cycles (off-chip accesses only).
    pub round_trip: Option<Cycle>,
}

/// The load/store unit: L1 data cache, fetch generation, fabric injection.
pub struct LdstUnit {
    cluster_id: usize,
    core_id: usize,
    l1d: Option<DataCache>,
    /// Memory instruction being processed; held here across stall cycles.
    dispatch: Option<WarpInstruction>,
    /// On-chip accesses (shared memory, barriers) completing at a cycle.
    smem_inflight: Vec<(Cycle, WarpInstruction)>,
    /// Lowered requests awaiting fabric injection.
    request_queue: VecDeque<Box<MemFetch>>,
    next_fetch_id: u64,
    smem_latency: Cycle,
    l1_hit_latency: Cycle,
    n_mem_ports: usize,
    n_clusters: usize,
}

impl LdstUnit {
    /// Builds the unit for core `core_id` of cluster `cluster_id`.
    pub fn new(cluster_id: usize, core_id: usize, global_core_id: usize, config: &Config) -> Self {
        let l1d = config
            .cache
            .parsed()
            .ok()
            .and_then(|caches| caches.l1d)
            .map(|params| DataCache::new("L1D", params, (0x1000 + global_core_id as u64) << 48));
        Self {
            cluster_id,
            core_id,
            l1d,
            dispatch: None,
            smem_inflight: Vec::new(),
            request_queue: VecDeque::new(),
            next_fetch_id: (global_core_id as u64) << 48,
            smem_latency: config.core.latency.shared_mem,
            l1_hit_latency: config.core.latency.l1_hit,
            n_mem_ports: config.n_mem_ports(),
            n_clusters: config.core.n_simt_clusters,
        }
    }

    fn alloc_fetch_id(&mut self) -> u64 {
        let id = self.next_fetch_id;
        self.next_fetch_id += 1;
        id
    }

    /// Memory sub-partition targeted by `addr` (256-byte interleave).
    fn sub_partition_of(&self, addr: u64) -> usize {
        ((addr >> 8) as usize) % self.n_mem_ports
    }

    fn build_fetch(&mut self, inst: &WarpInstruction, cycle: Cycle) -> Box<MemFetch> {
        let is_store = inst.op.is_store();
        let data_bytes = (inst.mem_width * inst.active_count()).clamp(SECTOR_SIZE, LINE_SIZE);
        let size = if is_store {
            data_bytes + CTRL_SIZE
        } else {
            data_bytes
        };
        let kind = if is_store {
            AccessKind::WriteRequest
        } else {
            AccessKind::ReadRequest
        };
        let mut fetch = Box::new(MemFetch::new(
            self.alloc_fetch_id(),
            inst.mem_addr,
            kind,
            size,
            CTRL_SIZE,
            inst.mem_space,
            self.cluster_id,
            self.core_id,
            inst.warp_id,
            self.sub_partition_of(inst.mem_addr),
            cycle,
        ));
        let offset = (inst.mem_addr % u64::from(LINE_SIZE)) as u32;
        let span_end = (offset + data_bytes).min(LINE_SIZE);
        let mut sectors = SectorMask::default();
        for s in offset / SECTOR_SIZE..span_end.div_ceil(SECTOR_SIZE) {
            sectors.set(s);
        }
        fetch.sector_mask = sectors;
        if is_store {
            fetch.byte_mask = ByteMask::span(offset, span_end - offset);
        } else {
            fetch.dst_regs.clone_from(&inst.dst_regs);
        }
        fetch.active_lanes = inst.active_count();
        fetch
    }

    /// One core tick: drain on-chip completions, process the held or next
    /// memory instruction, then inject queued requests into the fabric.
    ///
    /// Returns completions the core must write back.
    pub fn cycle(
        &mut self,
        cycle: Cycle,
        port: &mut RegisterSet,
        icnt: &mut Interconnect,
        completed: &mut Vec<MemCompletion>,
    ) {
        let mut i = 0;
        while i < self.smem_inflight.len() {
            if self.smem_inflight[i].0 <= cycle {
                let (_, inst) = self.smem_inflight.swap_remove(i);
                completed.push(MemCompletion {
                    warp_id: inst.warp_id,
                    active_lanes: inst.active_mask.count_ones(),
                    dst_regs: inst.dst_regs,
                    kind: MemCompletionKind::OnChipWriteback,
                    round_trip: None,
                });
            } else {
                i += 1;
            }
        }

        if self.dispatch.is_none() {
            self.dispatch = port.move_out();
        }
        if let Some(inst) = self.dispatch.take() {
            self.process(inst, cycle, completed);
        }

        // inject the oldest lowered request, subject to fabric space
        if let Some(fetch) = self.request_queue.front() {
            let src_device = self.cluster_id;
            let dst_device = self.n_clusters + fetch.sub_partition;
            if icnt.has_buffer(src_device, fetch.size) {
                if let Some(mut fetch) = self.request_queue.pop_front() {
                    fetch.set_status(FetchStatus::InIcntToMem, cycle);
                    let size = fetch.size;
                    debug!(core = self.core_id, fetch = ?fetch, "inject into fabric");
                    icnt.push(src_device, dst_device, fetch, size);
                }
            }
        }

        // drain L1 misses behind the head request
        if let Some(l1) = self.l1d.as_mut() {
            while self.request_queue.len() < REQUEST_QUEUE_DEPTH && l1.has_downstream_ready() {
                if let Some(lowered) = l1.pop_downstream() {
                    self.request_queue.push_back(lowered);
                }
            }
        }
    }

    fn process(
        &mut self,
        inst: WarpInstruction,
        cycle: Cycle,
        completed: &mut Vec<MemCompletion>,
    ) {
        // barriers and on-chip spaces never leave the SM
        if inst.op == OpClass::MemBar || !inst.mem_space.is_offchip() {
            self.smem_inflight.push((cycle + self.smem_latency, inst));
            return;
        }

        if self.request_queue.len() >= REQUEST_QUEUE_DEPTH {
            // no room to lower anything; hold the instruction
            self.dispatch = Some(inst);
            return;
        }

        if inst.op.is_store() {
            let fetch = self.build_fetch(&inst, cycle);
            self.request_queue.push_back(fetch);
            // the store retires now; the ack only drains the outstanding
            // counter
            completed.push(MemCompletion {
                warp_id: inst.warp_id,
                dst_regs: Vec::new(),
                active_lanes: inst.active_mask.count_ones(),
                kind: MemCompletionKind::StoreSent,
                round_trip: None,
            });
            return;
        }

        // loads probe the L1 when one exists
        let fetch = self.build_fetch(&inst, cycle);
        match self.l1d.as_mut() {
            None => {
                self.request_queue.push_back(fetch);
            }
            Some(l1) => match l1.access(fetch, cycle) {
                CacheAccessOutcome::Hit(_serviced) => {
                    self.smem_inflight.push((cycle + self.l1_hit_latency, inst));
                }
                CacheAccessOutcome::PendingHit | CacheAccessOutcome::Miss => {}
                CacheAccessOutcome::ReservationFail(_rejected) => {
                    // retry the whole instruction next cycle
                    self.dispatch = Some(inst);
                }
            },
        }
    }

    /// Accepts a reply from the fabric, producing load completions.
    pub fn accept_reply(
        &mut self,
        fetch: Box<MemFetch>,
        cycle: Cycle,
        completed: &mut Vec<MemCompletion>,
    ) {
        if fetch.is_internal {
            // acknowledgement of a cache writeback; nothing waits on it
            return;
        }
        if fetch.kind == AccessKind::WriteAck {
            completed.push(MemCompletion {
                warp_id: fetch.warp_id,
                dst_regs: Vec::new(),
                active_lanes: 0,
                kind: MemCompletionKind::StoreAck,
                round_trip: Some(cycle.saturating_sub(fetch.issue_cycle)),
            });
            return;
        }

        let for_l1 = self
            .l1d
            .as_ref()
            .is_some_and(|l1| l1.waiting_for_fill(fetch.addr));
        let ready = if for_l1 {
            self.l1d
                .as_mut()
                .map(|l1| l1.fill(fetch, cycle))
                .unwrap_or_default()
        } else {
            vec![fetch]
        };
        for reply in ready {
            completed.push(MemCompletion {
                warp_id: reply.warp_id,
                dst_regs: reply.dst_regs.clone(),
                active_lanes: reply.active_lanes,
                kind: MemCompletionKind::LoadWriteback,
                round_trip: Some(cycle.saturating_sub(reply.issue_cycle)),
            });
        }
    }

    /// Whether any memory work is still in flight inside the unit.
    pub fn busy(&self) -> bool {
        self.dispatch.is_some()
            || !self.smem_inflight.is_empty()
            || !self.request_queue.is_empty()
            || self.l1d.as_ref().is_some_and(|l1| !l1.quiesced())
    }

    /// Invalidates the L1 data cache.
    pub fn cache_invalidate(&mut self) {
        if let Some(l1) = self.l1d.as_mut() {
            let _ = l1.flush();
        }
    }

    /// L1D statistics.
    pub fn l1d_stats(&self) -> crate::stats::CacheStats {
        self.l1d
            .as_ref()
            .map(|l1| *l1.stats())
            .unwrap_or_default()
    }
}
