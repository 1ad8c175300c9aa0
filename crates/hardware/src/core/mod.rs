//! The shader-core (SM) side of the accelerator.
//!
//! This module contains everything that runs in the CORE clock domain:
//! 1. **Instructions:** opcode classes and in-flight warp instructions.
//! 2. **Warps:** per-warp trace cursors and instruction buffers.
//! 3. **Issue:** scoreboard, register sets, and the warp schedulers.
//! 4. **Execution:** pipelined execution units and the load/store unit.
//! 5. **Cores and clusters:** fetch/decode/issue/writeback plumbing and the
//!    cluster fabric ports.

/// SIMT cluster: cores sharing one fabric port.
pub mod cluster;
/// Opcode classes, memory spaces, and warp instructions.
pub mod instruction;
/// Warp-instruction slots feeding the execution pipes.
pub mod register_set;
/// Per-warp pending-write tracking.
pub mod scoreboard;
/// Per-cycle warp ordering and issue.
pub mod scheduler;
/// Shader core: fetch/decode/issue/writeback.
pub mod sm;
/// Pipelined execution units and the load/store unit.
pub mod unit;
/// Per-warp state and the two-slot instruction buffer.
pub mod warp;
