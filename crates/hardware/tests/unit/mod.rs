//! Unit and scenario tests for the simulator components.

/// Configuration parsing and validation.
pub mod config;
/// Fabric delivery, node mapping, and round-robin fairness.
pub mod fabric;
/// Property tests for FIFOs, masks, and histograms.
pub mod properties;
/// Scheduler issue rules: RAW stalls and dual-issue.
pub mod scheduler;
/// End-to-end system scenarios: round trips, cache chains, deadlock.
pub mod system;
