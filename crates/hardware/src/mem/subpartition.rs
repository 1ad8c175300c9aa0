//! Memory sub-partition: boundary FIFOs, ROP ordering queue, L2 slice.
//!
//! A sub-partition is one L2 slice plus the four bounded FIFOs that carry
//! requests across its clock boundaries:
//!
//! ```text
//! fabric → icnt_l2 → [L2] → l2_dram → DRAM
//! fabric ← l2_icnt ← [L2] ← dram_l2 ← DRAM
//! ```
//!
//! Non-texture requests first sit in the ROP ordering queue for a fixed
//! delay before entering `icnt_l2`, preserving age order for coherent reply
//! streams.

use std::collections::VecDeque;

use tracing::debug;

use crate::common::fifo::Fifo;
use crate::common::masks::SECTOR_CHUNK_SIZE;
use crate::common::Cycle;
use crate::config::Config;
use crate::mem::cache::{CacheAccessOutcome, DataCache};
use crate::mem::fetch::{FetchStatus, MemFetch};
use crate::stats::CacheStats;

/// One memory sub-partition.
pub struct MemorySubPartition {
    /// Global sub-partition index (also selects the fabric port).
    pub id: usize,
    icnt_l2: Fifo<Box<MemFetch>>,
    l2_dram: Fifo<Box<MemFetch>>,
    dram_l2: Fifo<Box<MemFetch>>,
    l2_icnt: Fifo<Box<MemFetch>>,
    rop_queue: VecDeque<(Cycle, Box<MemFetch>)>,
    rop_latency: u64,
    /// Replies produced by the L2 (hits and completed fills) waiting for
    /// `l2_icnt` space.
    pending_replies: VecDeque<Box<MemFetch>>,
    l2_cache: Option<DataCache>,
}

impl MemorySubPartition {
    /// Builds sub-partition `id` from the configuration.
    pub fn new(id: usize, config: &Config) -> Self {
        let l2_params = config
            .cache
            .parsed()
            .ok()
            .and_then(|caches| caches.l2);
        let l2_cache = l2_params.map(|params| {
            // namespace writeback ids per slice, above any core-minted id
            DataCache::new("L2", params, (0x4000 + id as u64) << 48)
        });
        Self {
            id,
            icnt_l2: Fifo::new("icnt_l2", config.memory.icnt_l2_queue_size),
            l2_dram: Fifo::new("l2_dram", config.memory.l2_dram_queue_size),
            dram_l2: Fifo::new("dram_l2", config.memory.dram_l2_queue_size),
            l2_icnt: Fifo::new("l2_icnt", config.memory.l2_icnt_queue_size),
            rop_queue: VecDeque::new(),
            rop_latency: config.memory.rop_latency,
            pending_replies: VecDeque::new(),
            l2_cache,
        }
    }

    /// Whether accepting `n` more requests would overrun the inbound side
    /// (the `icnt→L2` FIFO plus the ROP queue feeding it).
    pub fn full(&self, n: usize) -> bool {
        self.icnt_l2.len() + self.rop_queue.len() + n > self.icnt_l2.capacity()
    }

    /// Headroom the fabric must reserve per pop: a sectored request may
    /// expand into one entry per sector.
    pub const fn reserve_slots() -> usize {
        SECTOR_CHUNK_SIZE as usize
    }

    /// Accepts a request from the fabric. Texture accesses enter `icnt_l2`
    /// directly; everything else waits out the ROP delay first.
    pub fn push(&mut self, mut fetch: Box<MemFetch>, cycle: Cycle) {
        fetch.set_status(FetchStatus::InPartitionIcntToL2, cycle);
        if fetch.is_texture() {
            self.icnt_l2.push(fetch);
        } else {
            self.rop_queue
                .push_back((cycle + self.rop_latency, fetch));
        }
    }

    /// Head of the outbound reply queue.
    pub fn top(&self) -> Option<&MemFetch> {
        self.l2_icnt.front().map(AsRef::as_ref)
    }

    /// Takes the head of the outbound reply queue.
    pub fn pop(&mut self) -> Option<Box<MemFetch>> {
        self.l2_icnt.pop()
    }

    /// One L2-domain tick.
    pub fn cache_cycle(&mut self, cycle: Cycle) {
        self.drain_pending_replies(cycle);
        self.service_inbound(cycle);
        self.service_dram_returns(cycle);
        self.drain_l2_misses(cycle);
        self.drain_rop(cycle);
    }

    /// Completed replies move into `l2_icnt` as space allows.
    fn drain_pending_replies(&mut self, cycle: Cycle) {
        while !self.l2_icnt.full() {
            let Some(mut reply) = self.pending_replies.pop_front() else {
                break;
            };
            reply.convert_to_reply();
            reply.set_status(FetchStatus::InL2ToIcnt, cycle);
            self.l2_icnt.push(reply);
        }
    }

    /// Pops the `icnt_l2` head into the L2 (or straight to DRAM when the
    /// L2 is disabled).
    fn service_inbound(&mut self, cycle: Cycle) {
        if self.icnt_l2.is_empty() {
            return;
        }
        let Some(l2) = self.l2_cache.as_mut() else {
            // no L2: forward to DRAM untouched
            if !self.l2_dram.full() {
                if let Some(mut fetch) = self.icnt_l2.pop() {
                    fetch.set_status(FetchStatus::InL2ToDram, cycle);
                    self.l2_dram.push(fetch);
                }
            }
            return;
        };

        // a hit needs reply space, a miss needs lowering space; stall the
        // head rather than overrun either side
        if self.l2_icnt.full() || self.l2_dram.full() {
            return;
        }
        let Some(mut fetch) = self.icnt_l2.pop() else {
            return;
        };
        fetch.set_status(FetchStatus::InL2, cycle);
        debug!(sub = self.id, fetch = ?fetch, "L2 access");
        match l2.access(fetch, cycle) {
            CacheAccessOutcome::Hit(serviced) => {
                self.pending_replies.push_back(serviced);
            }
            CacheAccessOutcome::PendingHit | CacheAccessOutcome::Miss => {}
            CacheAccessOutcome::ReservationFail(mut returned) => {
                debug!(sub = self.id, "L2 reservation fail, retrying next tick");
                // allow the status to sit at InL2 while the head retries
                returned.set_status(FetchStatus::InL2, cycle);
                self.icnt_l2.push_front(returned);
            }
        }
    }

    /// Fills returning DRAM data into the L2 and queues replies.
    fn service_dram_returns(&mut self, cycle: Cycle) {
        let Some(fetch) = self.dram_l2.front() else {
            return;
        };
        let for_l2 = self
            .l2_cache
            .as_ref()
            .is_some_and(|l2| !fetch.is_write() && l2.waiting_for_fill(fetch.addr));

        if for_l2 {
            let Some(fetch) = self.dram_l2.pop() else {
                return;
            };
            if let Some(l2) = self.l2_cache.as_mut() {
                for ready in l2.fill(fetch, cycle) {
                    self.pending_replies.push_back(ready);
                }
            }
        } else {
            let Some(fetch) = self.dram_l2.pop() else {
                return;
            };
            if fetch.is_internal {
                // eviction-writeback ack: nothing upstream waits; destroy it
                return;
            }
            self.pending_replies.push_back(fetch);
        }
    }

    /// Moves lowered L2 misses into the `L2→dram` FIFO.
    fn drain_l2_misses(&mut self, cycle: Cycle) {
        let Some(l2) = self.l2_cache.as_mut() else {
            return;
        };
        while !self.l2_dram.full() && l2.has_downstream_ready() {
            if let Some(mut lowered) = l2.pop_downstream() {
                lowered.set_status(FetchStatus::InL2ToDram, cycle);
                self.l2_dram.push(lowered);
            }
        }
    }

    /// Promotes aged-out ROP entries into `icnt_l2`.
    fn drain_rop(&mut self, cycle: Cycle) {
        while let Some((ready, _)) = self.rop_queue.front() {
            if *ready > cycle || self.icnt_l2.full() {
                break;
            }
            if let Some((_, fetch)) = self.rop_queue.pop_front() {
                self.icnt_l2.push(fetch);
            }
        }
    }

    /// Whether DRAM may hand this sub-partition another return.
    pub fn dram_l2_full(&self) -> bool {
        self.dram_l2.full()
    }

    /// Accepts a DRAM return.
    pub fn dram_l2_push(&mut self, mut fetch: Box<MemFetch>, cycle: Cycle) {
        fetch.set_status(FetchStatus::InDramToL2, cycle);
        self.dram_l2.push(fetch);
    }

    /// Head of the `L2→dram` FIFO.
    pub fn l2_dram_front(&self) -> Option<&MemFetch> {
        self.l2_dram.front().map(AsRef::as_ref)
    }

    /// Takes the head of the `L2→dram` FIFO.
    pub fn l2_dram_pop(&mut self) -> Option<Box<MemFetch>> {
        self.l2_dram.pop()
    }

    /// Flushes the L2 slice; returns how many dirty lines were dropped.
    pub fn flush_l2(&mut self) -> usize {
        self.l2_cache.as_mut().map_or(0, DataCache::flush)
    }

    /// L2 statistics for the hierarchy roll-up.
    pub fn l2_stats(&self) -> CacheStats {
        self.l2_cache
            .as_ref()
            .map(|l2| *l2.stats())
            .unwrap_or_default()
    }

    /// Whether any request is in flight anywhere in this sub-partition.
    pub fn busy(&self) -> bool {
        !self.icnt_l2.is_empty()
            || !self.l2_dram.is_empty()
            || !self.dram_l2.is_empty()
            || !self.l2_icnt.is_empty()
            || !self.rop_queue.is_empty()
            || !self.pending_replies.is_empty()
            || self.l2_cache.as_ref().is_some_and(|l2| !l2.quiesced())
    }

    /// Occupancy snapshot for deadlock diagnostics.
    pub fn dump_state(&self) -> String {
        format!(
            "sub[{}]: icnt_l2={} l2_dram={} dram_l2={} l2_icnt={} rop={} pending={}",
            self.id,
            self.icnt_l2.len(),
            self.l2_dram.len(),
            self.dram_l2.len(),
            self.l2_icnt.len(),
            self.rop_queue.len(),
            self.pending_replies.len(),
        )
    }
}
