//! Memory partition unit: DRAM latency queue and credit arbitration.
//!
//! A partition owns one DRAM channel and `n_sub_partition_per_channel`
//! sub-partitions. Sub-partitions compete for the channel through a credit
//! scheme: each holds a private credit allowance and may borrow from a
//! shared pool once its own is spent. `last_borrower` seeds the round-robin
//! scan so a starved sub-partition is always reconsidered first.

use std::collections::VecDeque;

use tracing::debug;

use crate::common::Cycle;
use crate::config::Config;
use crate::mem::dram::{DramTiming, FixedLatency, RowBuffer};
use crate::mem::fetch::{FetchStatus, MemFetch};
use crate::mem::subpartition::MemorySubPartition;

/// Credit bookkeeping for the DRAM channel.
///
/// Credits count *remaining* allowance: `private_credit[spid]` never goes
/// negative, and a sub-partition with none left may still proceed while
/// `shared_credit` remains.
pub struct ArbitrationMetadata {
    private_credit: Vec<i32>,
    private_credit_limit: i32,
    shared_credit: i32,
    shared_credit_limit: i32,
    last_borrower: usize,
}

impl ArbitrationMetadata {
    /// Creates fully stocked credit pools for `n_subs` sub-partitions.
    pub fn new(n_subs: usize, private_limit: i32, shared_limit: i32) -> Self {
        Self {
            private_credit: vec![private_limit; n_subs],
            private_credit_limit: private_limit,
            shared_credit: shared_limit,
            shared_credit_limit: shared_limit,
            last_borrower: n_subs - 1,
        }
    }

    /// Whether sub-partition `spid` can take a channel slot right now.
    pub fn has_credits(&self, spid: usize) -> bool {
        self.private_credit[spid] > 0 || self.shared_credit > 0
    }

    /// Spends one credit for `spid`: private first, shared otherwise.
    pub fn borrow_credit(&mut self, spid: usize) {
        if self.private_credit[spid] > 0 {
            self.private_credit[spid] -= 1;
        } else {
            assert!(self.shared_credit > 0, "credit borrow with empty pools");
            self.shared_credit -= 1;
        }
        self.last_borrower = spid;
    }

    /// Returns one credit for `spid`: tops up private first, then shared.
    pub fn return_credit(&mut self, spid: usize) {
        if self.private_credit[spid] < self.private_credit_limit {
            self.private_credit[spid] += 1;
        } else {
            assert!(
                self.shared_credit < self.shared_credit_limit,
                "credit return overflows both pools"
            );
            self.shared_credit += 1;
        }
    }

    /// The most recent credit spender; the next arbitration scan starts
    /// one past it.
    pub const fn last_borrower(&self) -> usize {
        self.last_borrower
    }

    /// Remaining private credit of `spid`.
    pub fn private_credit(&self, spid: usize) -> i32 {
        self.private_credit[spid]
    }

    /// Remaining shared credit.
    pub const fn shared_credit(&self) -> i32 {
        self.shared_credit
    }
}

struct DramDelayEntry {
    ready_cycle: Cycle,
    fetch: Box<MemFetch>,
    spid: usize,
}

/// One memory partition: a DRAM channel plus its sub-partitions.
pub struct MemoryPartition {
    /// Partition index.
    pub id: usize,
    /// The sub-partitions of this channel, locally indexed.
    pub subs: Vec<MemorySubPartition>,
    latency_queue: VecDeque<DramDelayEntry>,
    timing: Box<dyn DramTiming>,
    arbitration: ArbitrationMetadata,
}

impl MemoryPartition {
    /// Builds partition `id` with its sub-partitions from the config.
    pub fn new(id: usize, config: &Config) -> Self {
        let n_subs = config.memory.n_sub_partition_per_channel;
        let subs = (0..n_subs)
            .map(|local| MemorySubPartition::new(id * n_subs + local, config))
            .collect();
        let timing: Box<dyn DramTiming> = if config.memory.simple_dram_model {
            Box::new(FixedLatency::new(config.memory.dram_latency))
        } else {
            Box::new(RowBuffer::new(
                config.memory.t_cas,
                config.memory.t_ras,
                config.memory.t_pre,
            ))
        };
        Self {
            id,
            subs,
            latency_queue: VecDeque::new(),
            timing,
            arbitration: ArbitrationMetadata::new(
                n_subs,
                config.memory.private_credit_limit,
                config.memory.shared_credit_limit,
            ),
        }
    }

    /// One DRAM-domain tick: return one aged-out access to its
    /// sub-partition, then arbitrate one new access into the channel.
    pub fn dram_cycle(&mut self, cycle: Cycle) {
        // return path: head pops only once its ready time has passed
        if let Some(head) = self.latency_queue.front() {
            if head.ready_cycle <= cycle && !self.subs[head.spid].dram_l2_full() {
                if let Some(entry) = self.latency_queue.pop_front() {
                    debug!(
                        partition = self.id,
                        fetch = ?entry.fetch,
                        "DRAM return to sub-partition {}",
                        entry.spid
                    );
                    self.subs[entry.spid].dram_l2_push(entry.fetch, cycle);
                    self.arbitration.return_credit(entry.spid);
                }
            }
        }

        // issue path: round-robin over sub-partitions starting one past the
        // last borrower
        let n_subs = self.subs.len();
        for i in 0..n_subs {
            let spid = (self.arbitration.last_borrower() + 1 + i) % n_subs;
            if self.subs[spid].l2_dram_front().is_none() || !self.arbitration.has_credits(spid) {
                continue;
            }
            if let Some(mut fetch) = self.subs[spid].l2_dram_pop() {
                let latency = self.timing.access_latency(fetch.addr);
                fetch.set_status(FetchStatus::InDram, cycle);
                self.latency_queue.push_back(DramDelayEntry {
                    ready_cycle: cycle + latency,
                    fetch,
                    spid,
                });
                self.arbitration.borrow_credit(spid);
            }
            break;
        }
    }

    /// Whether the channel or any sub-partition holds in-flight work.
    pub fn busy(&self) -> bool {
        !self.latency_queue.is_empty() || self.subs.iter().any(MemorySubPartition::busy)
    }

    /// Arbitration state, exposed for diagnostics and tests.
    pub const fn arbitration(&self) -> &ArbitrationMetadata {
        &self.arbitration
    }

    /// Occupancy snapshot for deadlock diagnostics.
    pub fn dump_state(&self) -> String {
        let mut out = format!(
            "partition[{}]: dram_latency_queue={} shared_credit={}",
            self.id,
            self.latency_queue.len(),
            self.arbitration.shared_credit(),
        );
        for sub in &self.subs {
            out.push_str("\n  ");
            out.push_str(&sub.dump_state());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_private_credit_spends_before_shared() {
        let mut arb = ArbitrationMetadata::new(2, 1, 2);
        assert!(arb.has_credits(0));
        arb.borrow_credit(0);
        assert_eq!(arb.private_credit(0), 0);
        assert_eq!(arb.shared_credit(), 2);

        // private exhausted: the next borrow dips into the shared pool
        arb.borrow_credit(0);
        assert_eq!(arb.shared_credit(), 1);
        assert_eq!(arb.last_borrower(), 0);
    }

    #[test]
    fn test_return_refills_private_first() {
        let mut arb = ArbitrationMetadata::new(2, 1, 2);
        arb.borrow_credit(1);
        arb.borrow_credit(1);
        arb.return_credit(1);
        assert_eq!(arb.private_credit(1), 1);
        arb.return_credit(1);
        assert_eq!(arb.shared_credit(), 2);
    }

    #[test]
    fn test_starved_sub_recovers_through_shared_pool() {
        let mut arb = ArbitrationMetadata::new(2, 1, 1);
        arb.borrow_credit(1); // sub 1 spends its private credit
        arb.borrow_credit(0); // sub 0 spends its private credit
        arb.borrow_credit(0); // sub 0 drains the shared pool
        assert!(!arb.has_credits(0));
        assert!(!arb.has_credits(1));

        // first return refills sub 0's private pool; sub 1 stays starved
        arb.return_credit(0);
        assert!(!arb.has_credits(1));

        // second return overflows into the shared pool, unblocking sub 1
        arb.return_credit(0);
        assert!(arb.has_credits(1));
        assert_eq!(arb.shared_credit(), 1);
    }
}
