//! The memory side of the accelerator.
//!
//! Everything behind the interconnect lives here:
//! 1. **Fetches:** [`fetch::MemFetch`], the unit of memory traffic.
//! 2. **Caches:** tag arrays, line/sector blocks, MSHRs, the data cache.
//! 3. **DRAM:** the fixed-latency and row-buffer channel models.
//! 4. **Partitions:** the partition unit (arbitration + DRAM latency queue)
//!    and its sub-partitions (boundary FIFOs + ROP queue + L2 slice).

/// Cache blocks, tag array, MSHR table, and the data cache.
pub mod cache;
/// DRAM channel timing models.
pub mod dram;
/// Memory request representation and lifecycle.
pub mod fetch;
/// Memory partition unit: DRAM latency queue and credit arbitration.
pub mod partition;
/// Memory sub-partition: boundary FIFOs, ROP queue, L2 slice.
pub mod subpartition;
