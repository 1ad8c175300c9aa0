//! Simulation statistics collection and reporting.
//!
//! This module tracks performance counters for the simulator. It provides:
//! 1. **Cycle and instruction totals:** `gpu_sim_cycle`, `gpu_sim_insn`,
//!    per-kernel accumulation.
//! 2. **Stall accounting:** fabric-to-shader and DRAM-full stalls, issue
//!    cycle distribution.
//! 3. **Histograms:** power-of-two, linear-stride, and externally binned.
//! 4. **Cache roll-ups:** per-cache access/miss/pending-hit/reservation-fail
//!    counters and hierarchy totals.

/// Histogram over non-negative samples with power-of-two bucket boundaries.
///
/// Bucket 0 counts zero samples; bucket `k` counts samples in
/// `[2^(k-1), 2^k)`. Bucketing uses the branch-free bit trick of the
/// reference implementation.
#[derive(Debug, Clone)]
pub struct Pow2Histogram {
    name: String,
    bins: Vec<u64>,
    maximum: u64,
    sum: u64,
}

impl Pow2Histogram {
    /// Creates a histogram with `n_bins` buckets.
    pub fn new(name: impl Into<String>, n_bins: usize) -> Self {
        Self {
            name: name.into(),
            bins: vec![0; n_bins],
            maximum: 0,
            sum: 0,
        }
    }

    /// Adds one sample.
    pub fn add(&mut self, sample: u64) {
        let mut v = sample;
        let mut bin = usize::from(v > 0xFFFF) << 4;
        v >>= bin;
        let mut shift = usize::from(v > 0xFF) << 3;
        v >>= shift;
        bin |= shift;
        shift = usize::from(v > 0xF) << 2;
        v >>= shift;
        bin |= shift;
        shift = usize::from(v > 0x3) << 1;
        v >>= shift;
        bin |= shift;
        bin |= (v >> 1) as usize;
        bin += usize::from(sample > 0);

        let bin = bin.min(self.bins.len() - 1);
        self.bins[bin] += 1;
        self.maximum = self.maximum.max(sample);
        self.sum += sample;
    }

    /// Bucket counts.
    pub fn bins(&self) -> &[u64] {
        &self.bins
    }

    /// Largest sample observed.
    pub const fn max(&self) -> u64 {
        self.maximum
    }

    /// Mean of all samples, or zero when empty.
    pub fn avg(&self) -> f64 {
        let total: u64 = self.bins.iter().sum();
        if total == 0 {
            0.0
        } else {
            self.sum as f64 / total as f64
        }
    }

    /// Histogram name for the report.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Histogram with fixed-stride buckets; the top bucket saturates.
#[derive(Debug, Clone)]
pub struct LinearHistogram {
    name: String,
    stride: u64,
    bins: Vec<u64>,
    maximum: u64,
    sum: u64,
}

impl LinearHistogram {
    /// Creates a histogram of `n_bins` buckets each `stride` wide.
    pub fn new(name: impl Into<String>, stride: u64, n_bins: usize) -> Self {
        Self {
            name: name.into(),
            stride,
            bins: vec![0; n_bins],
            maximum: 0,
            sum: 0,
        }
    }

    /// Adds one sample; samples past the last bucket land in it.
    pub fn add(&mut self, sample: u64) {
        let bin = ((sample / self.stride) as usize).min(self.bins.len() - 1);
        self.bins[bin] += 1;
        self.maximum = self.maximum.max(sample);
        self.sum += sample;
    }

    /// Bucket counts.
    pub fn bins(&self) -> &[u64] {
        &self.bins
    }

    /// Largest sample observed.
    pub const fn max(&self) -> u64 {
        self.maximum
    }

    /// Mean of all samples, or zero when empty.
    pub fn avg(&self) -> f64 {
        let total: u64 = self.bins.iter().sum();
        if total == 0 {
            0.0
        } else {
            self.sum as f64 / total as f64
        }
    }

    /// Histogram name for the report.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Histogram with caller-supplied bucket boundaries.
///
/// A sample lands in the last bucket whose boundary is `<=` the sample
/// (samples below the first boundary land in bucket 0).
#[derive(Debug, Clone)]
pub struct BinnedHistogram {
    name: String,
    boundaries: Vec<u64>,
    bins: Vec<u64>,
    maximum: u64,
    sum: u64,
}

impl BinnedHistogram {
    /// Creates a histogram from ascending boundaries.
    pub fn new(name: impl Into<String>, boundaries: Vec<u64>) -> Self {
        let n = boundaries.len().max(1);
        Self {
            name: name.into(),
            boundaries,
            bins: vec![0; n],
            maximum: 0,
            sum: 0,
        }
    }

    /// Adds one sample.
    pub fn add(&mut self, sample: u64) {
        let bin = self
            .boundaries
            .iter()
            .rposition(|&b| b <= sample)
            .unwrap_or(0);
        self.bins[bin] += 1;
        self.maximum = self.maximum.max(sample);
        self.sum += sample;
    }

    /// Bucket counts.
    pub fn bins(&self) -> &[u64] {
        &self.bins
    }

    /// Largest sample observed.
    pub const fn max(&self) -> u64 {
        self.maximum
    }

    /// Mean of all samples, or zero when empty.
    pub fn avg(&self) -> f64 {
        let total: u64 = self.bins.iter().sum();
        if total == 0 {
            0.0
        } else {
            self.sum as f64 / total as f64
        }
    }

    /// Histogram name for the report.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Access/miss accounting for one cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Total accesses probed against the tag array.
    pub accesses: u64,
    /// Accesses that missed.
    pub misses: u64,
    /// Accesses that hit a line still being filled (merged into an MSHR).
    pub pending_hits: u64,
    /// Accesses rejected for want of a line or MSHR slot.
    pub res_fails: u64,
}

impl CacheStats {
    /// Miss rate over all accesses, or zero when idle.
    pub fn miss_rate(&self) -> f64 {
        if self.accesses == 0 {
            0.0
        } else {
            self.misses as f64 / self.accesses as f64
        }
    }
}

impl std::ops::AddAssign for CacheStats {
    fn add_assign(&mut self, rhs: Self) {
        self.accesses += rhs.accesses;
        self.misses += rhs.misses;
        self.pending_hits += rhs.pending_hits;
        self.res_fails += rhs.res_fails;
    }
}

/// Top-level simulation statistics.
///
/// All counters are additive across the run; the derived values (rates,
/// averages) are computed at report time.
#[derive(Debug)]
pub struct SimStats {
    /// Core-domain cycles elapsed.
    pub gpu_sim_cycle: u64,
    /// Instructions retired (scaled by active lanes).
    pub gpu_sim_insn: u64,
    /// CTAs launched to cores.
    pub gpu_issued_cta: u64,
    /// CTAs completed.
    pub gpu_completed_cta: u64,
    /// Cycles a reply could not enter the fabric toward a shader.
    pub gpu_stall_icnt2sh: u64,
    /// Cycles a sub-partition refused fabric traffic for want of space.
    pub gpu_stall_dramfull: u64,
    /// Memory requests entering partitions, summed per L2 tick.
    pub partition_reqs_in_parallel: u64,
    /// Replies leaving partitions, summed per ICNT tick.
    pub partition_replies_in_parallel: u64,
    /// L2 ticks on which at least one request entered a partition.
    pub partition_util_cycles: u64,
    /// Per-scheduler single-issue cycle counts, indexed by scheduler id.
    pub single_issue_nums: Vec<u64>,
    /// Per-scheduler dual-issue cycle counts, indexed by scheduler id.
    pub dual_issue_nums: Vec<u64>,
    /// Issue outcome distribution: `[idle/control-hazard, raw-stall,
    /// pipeline-stall, issued-1, issued-2, ...]`.
    pub shader_cycle_distro: Vec<u64>,
    /// Warp occupancy: filled warp slots summed per core tick.
    pub occupancy_filled: u64,
    /// Warp occupancy: theoretical warp slots summed per core tick.
    pub occupancy_total: u64,
    /// Fabric latency: sum over popped packets of (pop - push) cycles.
    pub icnt_total_elapsed: u64,
    /// Fabric packets delivered.
    pub icnt_packets: u64,
    /// Round-trip memory latency histogram (core cycles).
    pub mem_latency: Pow2Histogram,
    /// L2 hierarchy totals.
    pub l2_cache: CacheStats,
    /// L1 data cache totals.
    pub l1d_cache: CacheStats,
    /// Core that last committed an instruction (deadlock diagnostics).
    pub last_writeback_core: usize,
}

impl SimStats {
    /// Creates zeroed stats sized for the configured scheduler count and
    /// issue width.
    pub fn new(num_schedulers: usize, max_issue: usize) -> Self {
        Self {
            gpu_sim_cycle: 0,
            gpu_sim_insn: 0,
            gpu_issued_cta: 0,
            gpu_completed_cta: 0,
            gpu_stall_icnt2sh: 0,
            gpu_stall_dramfull: 0,
            partition_reqs_in_parallel: 0,
            partition_replies_in_parallel: 0,
            partition_util_cycles: 0,
            single_issue_nums: vec![0; num_schedulers],
            dual_issue_nums: vec![0; num_schedulers],
            shader_cycle_distro: vec![0; 3 + max_issue],
            occupancy_filled: 0,
            occupancy_total: 0,
            icnt_total_elapsed: 0,
            icnt_packets: 0,
            mem_latency: Pow2Histogram::new("mem_lat_dist", 32),
            l2_cache: CacheStats::default(),
            l1d_cache: CacheStats::default(),
            last_writeback_core: 0,
        }
    }

    /// Instructions per cycle, or zero before the first cycle.
    pub fn ipc(&self) -> f64 {
        if self.gpu_sim_cycle == 0 {
            0.0
        } else {
            self.gpu_sim_insn as f64 / self.gpu_sim_cycle as f64
        }
    }

    /// Mean fabric traversal latency per delivered packet.
    pub fn icnt_avg_latency(&self) -> f64 {
        if self.icnt_packets == 0 {
            0.0
        } else {
            self.icnt_total_elapsed as f64 / self.icnt_packets as f64
        }
    }

    /// Prints the end-of-simulation report to stdout.
    pub fn print(&self) {
        println!("==========================================================");
        println!("SIMT ACCELERATOR SIMULATION STATISTICS");
        println!("==========================================================");
        println!("gpu_sim_cycle            {}", self.gpu_sim_cycle);
        println!("gpu_sim_insn             {}", self.gpu_sim_insn);
        println!("gpu_ipc                  {:.4}", self.ipc());
        println!("gpu_issued_cta           {}", self.gpu_issued_cta);
        println!("gpu_completed_cta        {}", self.gpu_completed_cta);
        println!("gpu_stall_dramfull       {}", self.gpu_stall_dramfull);
        println!("gpu_stall_icnt2sh        {}", self.gpu_stall_icnt2sh);
        println!(
            "partiton_reqs_in_parallel      {}",
            self.partition_reqs_in_parallel
        );
        println!(
            "partiton_replys_in_parallel    {}",
            self.partition_replies_in_parallel
        );
        if self.occupancy_total > 0 {
            println!(
                "gpu_occupancy            {:.4}%",
                100.0 * self.occupancy_filled as f64 / self.occupancy_total as f64
            );
        }
        println!("----------------------------------------------------------");
        println!("ISSUE");
        for (i, (single, dual)) in self
            .single_issue_nums
            .iter()
            .zip(&self.dual_issue_nums)
            .enumerate()
        {
            println!("  sched[{i}]  single_issue = {single}  dual_issue = {dual}");
        }
        print!("  shader_cycle_distro    = ");
        for count in &self.shader_cycle_distro {
            print!("{count} ");
        }
        println!();
        println!("----------------------------------------------------------");
        println!("MEMORY");
        let cache = |name: &str, s: &CacheStats| {
            println!("  {name}_total_cache_accesses = {}", s.accesses);
            println!("  {name}_total_cache_misses = {}", s.misses);
            if s.accesses > 0 {
                println!("  {name}_total_cache_miss_rate = {:.4}", s.miss_rate());
            }
            println!("  {name}_total_cache_pending_hits = {}", s.pending_hits);
            println!("  {name}_total_cache_reservation_fails = {}", s.res_fails);
        };
        cache("L1D", &self.l1d_cache);
        cache("L2", &self.l2_cache);
        println!(
            "  icnt_packets = {}  icnt_avg_latency = {:.2}",
            self.icnt_packets,
            self.icnt_avg_latency()
        );
        print!(
            "  {} = ",
            self.mem_latency.name()
        );
        for count in self.mem_latency.bins() {
            print!("{count} ");
        }
        println!(
            "max={} avg={:.2}",
            self.mem_latency.max(),
            self.mem_latency.avg()
        );
        println!("==========================================================");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pow2_bucketing() {
        let mut h = Pow2Histogram::new("h", 32);
        h.add(0);
        h.add(1);
        h.add(2);
        h.add(3);
        h.add(4);
        h.add(65536);
        // 0 -> bin 0; 1 -> bin 1; 2,3 -> bin 2; 4 -> bin 3; 65536 -> bin 17
        assert_eq!(h.bins()[0], 1);
        assert_eq!(h.bins()[1], 1);
        assert_eq!(h.bins()[2], 2);
        assert_eq!(h.bins()[3], 1);
        assert_eq!(h.bins()[17], 1);
        assert_eq!(h.max(), 65536);
    }

    #[test]
    fn test_pow2_avg_is_sum_over_samples() {
        let mut h = Pow2Histogram::new("h", 32);
        h.add(10);
        h.add(20);
        h.add(30);
        assert!((h.avg() - 20.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_linear_saturates_top_bin() {
        let mut h = LinearHistogram::new("h", 10, 4);
        h.add(5);
        h.add(15);
        h.add(999);
        assert_eq!(h.bins(), &[1, 1, 0, 1]);
        assert_eq!(h.max(), 999);
    }

    #[test]
    fn test_binned_boundaries() {
        let mut h = BinnedHistogram::new("h", vec![0, 100, 1000]);
        h.add(50);
        h.add(100);
        h.add(5000);
        assert_eq!(h.bins(), &[1, 1, 1]);
    }

    #[test]
    fn test_cache_stats_accumulate() {
        let mut total = CacheStats::default();
        total += CacheStats {
            accesses: 4,
            misses: 1,
            pending_hits: 2,
            res_fails: 0,
        };
        total += CacheStats {
            accesses: 6,
            misses: 3,
            pending_hits: 0,
            res_fails: 1,
        };
        assert_eq!(total.accesses, 10);
        assert_eq!(total.misses, 4);
        assert!((total.miss_rate() - 0.4).abs() < f64::EPSILON);
    }
}
