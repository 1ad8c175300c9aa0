//! Cycle-driven microarchitectural simulator for many-core SIMT
//! accelerators.
//!
//! This crate models, at per-cycle granularity, the flow of memory and
//! compute instructions through:
//! 1. **Cores:** shader cores with warp schedulers, scoreboards, and
//!    pipelined execution units, grouped into SIMT clusters.
//! 2. **Fabric:** a packet-switched interconnect with bounded injection,
//!    ejection, and boundary buffers and per-VC round-robin delivery.
//! 3. **Memory:** partition units with credit arbitration and DRAM latency
//!    queues, sub-partitions with boundary FIFOs and an L2 slice each.
//! 4. **Clocks:** four frequency domains interleaved by a min-time stepper.
//!
//! The workload arrives as a kernel trace through the
//! [`trace::TraceProvider`] capability; the simulator reproduces
//! contention, queueing, and timing effects and reports structured
//! counters at the end of the run.

/// Common types and constants (cycles, addresses, FIFOs, masks, errors).
pub mod common;
/// Simulator configuration (defaults, hierarchy, cache geometry strings).
pub mod config;
/// Shader cores, warps, schedulers, and execution units.
pub mod core;
/// The interconnect fabric.
pub mod icnt;
/// Memory fetches, caches, DRAM, and partitions.
pub mod mem;
/// Clock domains and the top-level cycle loop.
pub mod sim;
/// Simulation statistics collection and reporting.
pub mod stats;
/// Kernel traces and the launch table.
pub mod trace;

/// Root configuration type; use `Config::default()` or deserialize JSON.
pub use crate::config::Config;
/// Top-level simulator; owns clusters, partitions, fabric, and clocks.
pub use crate::sim::simulator::Simulator;
/// Accumulated simulation counters.
pub use crate::stats::SimStats;
/// The trace capability the simulator consumes.
pub use crate::trace::TraceProvider;
