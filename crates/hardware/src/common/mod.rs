//! Common types shared across the simulator.
//!
//! This module collects the small building blocks every component uses:
//! 1. **Errors:** the central [`error::SimError`] enum.
//! 2. **FIFOs:** the bounded [`fifo::Fifo`] used by the memory sub-partitions.
//! 3. **Masks:** sector/byte masks and the sector geometry constants.

/// Central error enum (config parse, invalid state, deadlock).
pub mod error;
/// Bounded FIFO with occupancy accounting.
pub mod fifo;
/// Sector/byte masks and sector geometry constants.
pub mod masks;

/// Simulation cycle count. All clock domains and timestamps use this width.
pub type Cycle = u64;

/// Linear device address, as carried by memory fetches.
pub type Address = u64;
