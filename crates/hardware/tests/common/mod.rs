//! Shared test infrastructure.
//!
//! Builders for minimal configurations and in-memory kernel traces. Every
//! scenario runs in lockstep clock mode so latencies are deterministic in
//! core cycles.

use std::sync::Arc;

use warpsim_core::config::Config;
use warpsim_core::core::instruction::{MemorySpace, OpClass, TraceInstruction};
use warpsim_core::trace::{KernelLaunch, MemoryTrace};

/// A one-cluster, one-memory-port configuration in lockstep mode, with the
/// L1 data cache disabled so memory traffic exercises the fabric and L2.
pub fn tiny_config() -> Config {
    let mut config = Config::default();
    config.sim.lockstep = true;
    config.sim.max_cycles = 500_000;
    config.core.n_simt_clusters = 1;
    config.core.n_simt_cores_per_cluster = 1;
    config.core.n_thread_per_shader = 64;
    config.core.num_schedulers = 1;
    config.memory.n_mem = 1;
    config.memory.n_sub_partition_per_channel = 1;
    config.interconnect.use_map = false;
    config.interconnect.num_vcs = 1;
    config.cache.l1d = "none".into();
    config
}

/// Wraps one warp's instruction stream as a single-block kernel of 32
/// threads.
pub fn one_warp_kernel(instructions: Vec<TraceInstruction>) -> Arc<MemoryTrace> {
    Arc::new(MemoryTrace {
        launch: KernelLaunch {
            name: "test_kernel".into(),
            grid_dim: (1, 1, 1),
            block_dim: (32, 1, 1),
            shared_bytes: 0,
            param_bytes: 0,
            launch_latency: 0,
        },
        warps: vec![instructions],
        warp_size: 32,
    })
}

/// A global load of 4 bytes per lane into `dst`.
pub fn global_load(pc: u64, addr: u64, dst: u32) -> TraceInstruction {
    TraceInstruction {
        pc,
        op: OpClass::Load,
        dst_regs: vec![dst],
        src_regs: vec![],
        active_mask: 1,
        mem_space: MemorySpace::Global,
        mem_width: 4,
        mem_addr: addr,
        latency: 0,
        cdp_class: 0,
    }
}

/// A global store of 4 bytes per lane.
pub fn global_store(pc: u64, addr: u64, src: u32) -> TraceInstruction {
    TraceInstruction {
        pc,
        op: OpClass::Store,
        dst_regs: vec![],
        src_regs: vec![src],
        active_mask: 1,
        mem_space: MemorySpace::Global,
        mem_width: 4,
        mem_addr: addr,
        latency: 0,
        cdp_class: 0,
    }
}

/// An integer ALU instruction `dst <- src...`.
pub fn int_op(pc: u64, dst: u32, src: Vec<u32>) -> TraceInstruction {
    TraceInstruction {
        pc,
        op: OpClass::Int,
        dst_regs: vec![dst],
        src_regs: src,
        active_mask: 1,
        mem_space: MemorySpace::None,
        mem_width: 0,
        mem_addr: 0,
        latency: 0,
        cdp_class: 0,
    }
}

/// An FP32 instruction `dst <- src...`.
pub fn sp_op(pc: u64, dst: u32, src: Vec<u32>) -> TraceInstruction {
    TraceInstruction {
        pc,
        op: OpClass::Sp,
        dst_regs: vec![dst],
        src_regs: src,
        active_mask: 1,
        mem_space: MemorySpace::None,
        mem_width: 0,
        mem_addr: 0,
        latency: 0,
        cdp_class: 0,
    }
}
