//! Configuration system for the SIMT accelerator simulator.
//!
//! This module defines all configuration structures used to parameterize the
//! simulator. It provides:
//! 1. **Defaults:** baseline hardware constants (shader geometry, fabric
//!    buffering, memory timing).
//! 2. **Structures:** hierarchical config for simulation control, clocks,
//!    shader cores, the interconnect, the memory system, and caches.
//! 3. **Cache geometry strings:** the compact `S:64:128:16,L:B:m:W:L,...`
//!    form, parsed strictly — malformed strings are init-time errors, never
//!    silently truncated.
//!
//! Configuration is supplied as JSON (CLI `--config`) or built in code with
//! `Config::default()` for tests.

use serde::Deserialize;

use crate::common::error::SimError;

/// Default configuration constants for the simulator.
///
/// These values define the baseline hardware configuration when not
/// explicitly overridden in the JSON configuration.
mod defaults {
    /// Threads per shader core (maximum resident).
    pub const N_THREAD_PER_SHADER: usize = 2048;

    /// Threads per warp. Active-lane masks assume `<= 64`.
    pub const WARP_SIZE: usize = 32;

    /// Number of SIMT clusters.
    pub const N_SIMT_CLUSTERS: usize = 8;

    /// Shader cores per SIMT cluster.
    pub const N_SIMT_CORES_PER_CLUSTER: usize = 1;

    /// Maximum concurrent CTAs per shader core.
    pub const MAX_CTA_PER_CORE: usize = 8;

    /// Register file size per shader core.
    pub const SHADER_REGISTERS: usize = 65536;

    /// Warp schedulers per shader core.
    pub const NUM_SCHEDULERS: usize = 2;

    /// Maximum instructions one warp may issue per cycle.
    pub const MAX_INSN_ISSUE_PER_WARP: usize = 2;

    /// Bytes per interconnect flit.
    pub const FLIT_SIZE: u32 = 32;

    /// Number of interconnect subnets (1 shared, 2 = request/reply split).
    pub const SUBNETS: usize = 2;

    /// Virtual channels per subnet port.
    pub const NUM_VCS: usize = 1;

    /// Per-VC router buffer depth in flits; also the ejection-buffer
    /// fallback when `ejection_buffer_size` is zero.
    pub const VC_BUF_SIZE: usize = 64;

    /// Injection (input) queue capacity in flits when the config gives zero.
    pub const INPUT_BUFFER_SIZE: usize = 9;

    /// Boundary buffer capacity in flits. Must be nonzero.
    pub const BOUNDARY_BUFFER_SIZE: usize = 16;

    /// Number of memory partitions (DRAM channels). With two
    /// sub-partitions per channel this yields 8 memory ports, matching the
    /// shipped (8, 8) node-map preset.
    pub const N_MEM: usize = 4;

    /// Memory sub-partitions per channel.
    pub const N_SUB_PARTITION_PER_CHANNEL: usize = 2;

    /// Fixed DRAM access latency (simple model), in DRAM cycles.
    pub const DRAM_LATENCY: u64 = 100;

    /// Column access strobe latency (full model), in DRAM cycles.
    pub const T_CAS: u64 = 14;

    /// Row activation latency (full model), in DRAM cycles.
    pub const T_RAS: u64 = 14;

    /// Precharge latency (full model), in DRAM cycles.
    pub const T_PRE: u64 = 14;

    /// Raster-ordered (ROP) queue delay, in L2 cycles.
    pub const ROP_LATENCY: u64 = 115;

    /// Capacity of each sub-partition boundary FIFO, in requests.
    pub const PARTITION_QUEUE_SIZE: usize = 8;

    /// Per-sub-partition private DRAM-queue credit.
    pub const PRIVATE_CREDIT_LIMIT: i32 = 1;

    /// Shared DRAM-queue credit pool per partition.
    pub const SHARED_CREDIT_LIMIT: i32 = 6;

    /// Core clock domain frequency in MHz.
    pub const CORE_FREQ_MHZ: f64 = 1365.0;

    /// Interconnect clock domain frequency in MHz.
    pub const ICNT_FREQ_MHZ: f64 = 1365.0;

    /// L2 clock domain frequency in MHz.
    pub const L2_FREQ_MHZ: f64 = 1365.0;

    /// DRAM clock domain frequency in MHz.
    pub const DRAM_FREQ_MHZ: f64 = 877.0;

    /// Cycles between deadlock-detector samples.
    pub const DEADLOCK_WINDOW: u64 = 50_000;

    /// Default execution latency per opcode class when the trace gives none.
    pub const SP_LATENCY: u64 = 4;
    /// Integer pipe latency.
    pub const INT_LATENCY: u64 = 4;
    /// Double-precision pipe latency.
    pub const DP_LATENCY: u64 = 64;
    /// Special-function pipe latency.
    pub const SFU_LATENCY: u64 = 20;
    /// Tensor-core pipe latency.
    pub const TENSOR_LATENCY: u64 = 64;
    /// Shared-memory access latency (serviced inside the SM).
    pub const SMEM_LATENCY: u64 = 24;
    /// L1 data cache hit latency.
    pub const L1_HIT_LATENCY: u64 = 20;
}

/// Root configuration structure containing all simulator settings.
///
/// # Examples
///
/// ```
/// use warpsim_core::config::Config;
///
/// let config = Config::default();
/// assert_eq!(config.core.warp_size, 32);
/// assert_eq!(config.interconnect.flit_size, 32);
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Simulation control (limits, deadlock detection, flush policy).
    #[serde(default)]
    pub sim: SimulationConfig,
    /// Clock domain frequencies.
    #[serde(default)]
    pub clock: ClockConfig,
    /// Shader core geometry and issue rules.
    #[serde(default)]
    pub core: CoreConfig,
    /// Interconnect fabric buffering and mapping.
    #[serde(default)]
    pub interconnect: InterconnectConfig,
    /// Memory partition and DRAM timing.
    #[serde(default)]
    pub memory: MemoryConfig,
    /// Cache geometry strings (L1I/L1T/L1C/L1D/L2).
    #[serde(default)]
    pub cache: CacheHierarchyConfig,
}

impl Config {
    /// Validates cross-field consistency and parses every cache geometry
    /// string. Errors here are fatal at init.
    pub fn validate(&self) -> Result<(), SimError> {
        if self.core.warp_size == 0 || self.core.warp_size > 64 {
            return Err(SimError::config(
                "warp_size must be in 1..=64",
                self.core.warp_size.to_string(),
            ));
        }
        if self.interconnect.subnets == 0 || self.interconnect.subnets > 2 {
            return Err(SimError::config(
                "subnets must be 1 or 2",
                self.interconnect.subnets.to_string(),
            ));
        }
        if self.interconnect.num_vcs == 0 {
            return Err(SimError::config("num_vcs must be nonzero", "0"));
        }
        if self.interconnect.boundary_buffer_size == 0 {
            return Err(SimError::config(
                "boundary_buffer_size must be nonzero",
                "0",
            ));
        }
        if self.interconnect.flit_size == 0 {
            return Err(SimError::config("flit_size must be nonzero", "0"));
        }
        if !self.interconnect.memory_node_map.is_empty()
            && self.interconnect.memory_node_map.len() != self.n_mem_ports()
        {
            return Err(SimError::config(
                "memory_node_map length must equal the number of memory ports",
                format!("{:?}", self.interconnect.memory_node_map),
            ));
        }
        if self.memory.n_sub_partition_per_channel == 0 {
            return Err(SimError::config(
                "n_sub_partition_per_channel must be nonzero",
                "0",
            ));
        }
        if self.core.num_schedulers == 0 {
            return Err(SimError::config("num_schedulers must be nonzero", "0"));
        }
        let _ = self.cache.parsed()?;
        Ok(())
    }

    /// Total number of memory ports on the fabric (one per sub-partition).
    pub const fn n_mem_ports(&self) -> usize {
        self.memory.n_mem * self.memory.n_sub_partition_per_channel
    }

    /// Fabric device id of memory sub-partition `i`.
    pub const fn mem_device(&self, i: usize) -> usize {
        self.core.n_simt_clusters + i
    }

    /// Total shader cores across all clusters.
    pub const fn num_cores(&self) -> usize {
        self.core.n_simt_clusters * self.core.n_simt_cores_per_cluster
    }

    /// Maximum resident warps per shader core.
    pub const fn max_warps_per_core(&self) -> usize {
        self.core.n_thread_per_shader / self.core.warp_size
    }
}

/// Simulation control settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimulationConfig {
    /// Stop after this many core cycles (0 = unlimited).
    #[serde(default)]
    pub max_cycles: u64,

    /// Stop after this many retired instructions (0 = unlimited).
    #[serde(default)]
    pub max_instructions: u64,

    /// Stop after launching this many CTAs (0 = unlimited).
    #[serde(default)]
    pub max_blocks: u64,

    /// Enable the stalled-instruction deadlock detector.
    #[serde(default = "SimulationConfig::default_deadlock_detect")]
    pub deadlock_detect: bool,

    /// Invalidate a cluster's L1s once all of its threads complete.
    #[serde(default)]
    pub flush_l1_cache: bool,

    /// Flush the L2 caches once every cluster's threads complete.
    #[serde(default)]
    pub flush_l2_cache: bool,

    /// Run every clock domain on each core tick (deterministic tests).
    #[serde(default)]
    pub lockstep: bool,
}

impl SimulationConfig {
    fn default_deadlock_detect() -> bool {
        true
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            max_cycles: 0,
            max_instructions: 0,
            max_blocks: 0,
            deadlock_detect: true,
            flush_l1_cache: false,
            flush_l2_cache: false,
            lockstep: false,
        }
    }
}

/// Clock domain frequencies in MHz. Periods derive as `1000 / freq` ns.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClockConfig {
    /// Shader core clock.
    #[serde(default = "ClockConfig::default_core")]
    pub core_freq_mhz: f64,
    /// Interconnect clock.
    #[serde(default = "ClockConfig::default_icnt")]
    pub icnt_freq_mhz: f64,
    /// L2 clock.
    #[serde(default = "ClockConfig::default_l2")]
    pub l2_freq_mhz: f64,
    /// DRAM clock.
    #[serde(default = "ClockConfig::default_dram")]
    pub dram_freq_mhz: f64,
}

impl ClockConfig {
    fn default_core() -> f64 {
        defaults::CORE_FREQ_MHZ
    }
    fn default_icnt() -> f64 {
        defaults::ICNT_FREQ_MHZ
    }
    fn default_l2() -> f64 {
        defaults::L2_FREQ_MHZ
    }
    fn default_dram() -> f64 {
        defaults::DRAM_FREQ_MHZ
    }
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            core_freq_mhz: defaults::CORE_FREQ_MHZ,
            icnt_freq_mhz: defaults::ICNT_FREQ_MHZ,
            l2_freq_mhz: defaults::L2_FREQ_MHZ,
            dram_freq_mhz: defaults::DRAM_FREQ_MHZ,
        }
    }
}

/// Shader core geometry, execution unit counts, and issue rules.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CoreConfig {
    /// Maximum resident threads per shader core.
    #[serde(default = "CoreConfig::default_threads")]
    pub n_thread_per_shader: usize,

    /// Threads per warp.
    #[serde(default = "CoreConfig::default_warp_size")]
    pub warp_size: usize,

    /// Number of SIMT clusters (each one fabric port).
    #[serde(default = "CoreConfig::default_clusters")]
    pub n_simt_clusters: usize,

    /// Shader cores per cluster.
    #[serde(default = "CoreConfig::default_cores_per_cluster")]
    pub n_simt_cores_per_cluster: usize,

    /// Maximum concurrent CTAs per core.
    #[serde(default = "CoreConfig::default_max_cta")]
    pub max_cta_per_core: usize,

    /// Register file size per core.
    #[serde(default = "CoreConfig::default_registers")]
    pub shader_registers: usize,

    /// Warp schedulers per core.
    #[serde(default = "CoreConfig::default_schedulers")]
    pub num_schedulers: usize,

    /// Maximum instructions one warp may issue per cycle.
    #[serde(default = "CoreConfig::default_max_issue")]
    pub max_insn_issue_per_warp: usize,

    /// Restrict same-cycle dual issue to distinct execution unit classes
    /// (Maxwell/Pascal style).
    #[serde(default)]
    pub dual_issue_diff_exec_units: bool,

    /// One-scheduler-per-register-slot discipline (Volta sub-core model).
    #[serde(default)]
    pub sub_core_model: bool,

    /// SP (FP32) unit count.
    #[serde(default = "CoreConfig::default_sp_units")]
    pub num_sp_units: usize,

    /// INT unit count (0 = integer ops execute on SP, Fermi/Pascal style).
    #[serde(default = "CoreConfig::default_int_units")]
    pub num_int_units: usize,

    /// DP (FP64) unit count (0 = DP ops fall back to SFU, Fermi style).
    #[serde(default)]
    pub num_dp_units: usize,

    /// SFU unit count.
    #[serde(default = "CoreConfig::default_sfu_units")]
    pub num_sfu_units: usize,

    /// Tensor core unit count.
    #[serde(default)]
    pub num_tensor_core_units: usize,

    /// Specialized unit descriptors, indexed by `op - SPEC_UNIT_START`.
    #[serde(default)]
    pub specialized_units: Vec<SpecializedUnitConfig>,

    /// Per-class default execution latencies (used when a trace instruction
    /// carries no latency of its own).
    #[serde(default)]
    pub latency: LatencyConfig,

    /// Extra latency budget charged per child-kernel (CDP) launch class.
    #[serde(default = "CoreConfig::default_cdp_latency")]
    pub cdp_latency: Vec<u64>,
}

impl CoreConfig {
    fn default_threads() -> usize {
        defaults::N_THREAD_PER_SHADER
    }
    fn default_warp_size() -> usize {
        defaults::WARP_SIZE
    }
    fn default_clusters() -> usize {
        defaults::N_SIMT_CLUSTERS
    }
    fn default_cores_per_cluster() -> usize {
        defaults::N_SIMT_CORES_PER_CLUSTER
    }
    fn default_max_cta() -> usize {
        defaults::MAX_CTA_PER_CORE
    }
    fn default_registers() -> usize {
        defaults::SHADER_REGISTERS
    }
    fn default_schedulers() -> usize {
        defaults::NUM_SCHEDULERS
    }
    fn default_max_issue() -> usize {
        defaults::MAX_INSN_ISSUE_PER_WARP
    }
    fn default_sp_units() -> usize {
        4
    }
    fn default_int_units() -> usize {
        4
    }
    fn default_sfu_units() -> usize {
        4
    }
    fn default_cdp_latency() -> Vec<u64> {
        vec![7200, 8000, 100, 12000, 1600]
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            n_thread_per_shader: defaults::N_THREAD_PER_SHADER,
            warp_size: defaults::WARP_SIZE,
            n_simt_clusters: defaults::N_SIMT_CLUSTERS,
            n_simt_cores_per_cluster: defaults::N_SIMT_CORES_PER_CLUSTER,
            max_cta_per_core: defaults::MAX_CTA_PER_CORE,
            shader_registers: defaults::SHADER_REGISTERS,
            num_schedulers: defaults::NUM_SCHEDULERS,
            max_insn_issue_per_warp: defaults::MAX_INSN_ISSUE_PER_WARP,
            dual_issue_diff_exec_units: false,
            sub_core_model: false,
            num_sp_units: Self::default_sp_units(),
            num_int_units: Self::default_int_units(),
            num_dp_units: 0,
            num_sfu_units: Self::default_sfu_units(),
            num_tensor_core_units: 0,
            specialized_units: Vec::new(),
            latency: LatencyConfig::default(),
            cdp_latency: Self::default_cdp_latency(),
        }
    }
}

/// One specialized execution unit class (e.g. BRA, TEX units on Turing).
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SpecializedUnitConfig {
    /// Number of unit instances.
    pub num_units: usize,
    /// Execution latency in core cycles.
    pub latency: u64,
    /// Display name for the stats report.
    pub name: String,
}

/// Default execution latencies per opcode class.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LatencyConfig {
    /// SP (FP32) pipe.
    #[serde(default = "LatencyConfig::default_sp")]
    pub sp: u64,
    /// INT pipe.
    #[serde(default = "LatencyConfig::default_int")]
    pub int: u64,
    /// DP (FP64) pipe.
    #[serde(default = "LatencyConfig::default_dp")]
    pub dp: u64,
    /// SFU pipe.
    #[serde(default = "LatencyConfig::default_sfu")]
    pub sfu: u64,
    /// Tensor core pipe.
    #[serde(default = "LatencyConfig::default_tensor")]
    pub tensor: u64,
    /// Shared-memory round trip inside the SM.
    #[serde(default = "LatencyConfig::default_smem")]
    pub shared_mem: u64,
    /// L1 data cache hit latency.
    #[serde(default = "LatencyConfig::default_l1_hit")]
    pub l1_hit: u64,
}

impl LatencyConfig {
    fn default_sp() -> u64 {
        defaults::SP_LATENCY
    }
    fn default_int() -> u64 {
        defaults::INT_LATENCY
    }
    fn default_dp() -> u64 {
        defaults::DP_LATENCY
    }
    fn default_sfu() -> u64 {
        defaults::SFU_LATENCY
    }
    fn default_tensor() -> u64 {
        defaults::TENSOR_LATENCY
    }
    fn default_smem() -> u64 {
        defaults::SMEM_LATENCY
    }
    fn default_l1_hit() -> u64 {
        defaults::L1_HIT_LATENCY
    }
}

impl Default for LatencyConfig {
    fn default() -> Self {
        Self {
            sp: defaults::SP_LATENCY,
            int: defaults::INT_LATENCY,
            dp: defaults::DP_LATENCY,
            sfu: defaults::SFU_LATENCY,
            tensor: defaults::TENSOR_LATENCY,
            shared_mem: defaults::SMEM_LATENCY,
            l1_hit: defaults::L1_HIT_LATENCY,
        }
    }
}

/// Interconnect fabric buffering and node mapping.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InterconnectConfig {
    /// Bytes per flit; packets carry `ceil(size / flit_size)` flits.
    #[serde(default = "InterconnectConfig::default_flit_size")]
    pub flit_size: u32,

    /// Subnets: 1 shared, or 2 to split request and reply traffic.
    #[serde(default = "InterconnectConfig::default_subnets")]
    pub subnets: usize,

    /// Virtual channels per port.
    #[serde(default = "InterconnectConfig::default_num_vcs")]
    pub num_vcs: usize,

    /// Per-VC buffer depth; ejection fallback when `ejection_buffer_size`
    /// is zero.
    #[serde(default = "InterconnectConfig::default_vc_buf")]
    pub vc_buf_size: usize,

    /// Injection queue capacity in flits (0 selects the built-in default).
    #[serde(default)]
    pub input_buffer_size: usize,

    /// Ejection buffer capacity in flits (0 falls back to `vc_buf_size`).
    #[serde(default)]
    pub ejection_buffer_size: usize,

    /// Boundary buffer capacity in flits. Must be nonzero.
    #[serde(default = "InterconnectConfig::default_boundary")]
    pub boundary_buffer_size: usize,

    /// Use the preset (or `memory_node_map`) device-to-node layout instead
    /// of the identity map.
    #[serde(default = "InterconnectConfig::default_use_map")]
    pub use_map: bool,

    /// Explicit memory-port node positions; overrides the presets. Length
    /// must equal the number of memory ports.
    #[serde(default)]
    pub memory_node_map: Vec<usize>,
}

impl InterconnectConfig {
    fn default_flit_size() -> u32 {
        defaults::FLIT_SIZE
    }
    fn default_subnets() -> usize {
        defaults::SUBNETS
    }
    fn default_num_vcs() -> usize {
        defaults::NUM_VCS
    }
    fn default_vc_buf() -> usize {
        defaults::VC_BUF_SIZE
    }
    fn default_boundary() -> usize {
        defaults::BOUNDARY_BUFFER_SIZE
    }
    fn default_use_map() -> bool {
        true
    }

    /// Injection capacity with the zero fallback applied.
    pub const fn input_capacity(&self) -> usize {
        if self.input_buffer_size == 0 {
            defaults::INPUT_BUFFER_SIZE
        } else {
            self.input_buffer_size
        }
    }

    /// Ejection capacity with the zero fallback applied.
    pub const fn ejection_capacity(&self) -> usize {
        if self.ejection_buffer_size == 0 {
            self.vc_buf_size
        } else {
            self.ejection_buffer_size
        }
    }
}

impl Default for InterconnectConfig {
    fn default() -> Self {
        Self {
            flit_size: defaults::FLIT_SIZE,
            subnets: defaults::SUBNETS,
            num_vcs: defaults::NUM_VCS,
            vc_buf_size: defaults::VC_BUF_SIZE,
            input_buffer_size: 0,
            ejection_buffer_size: 0,
            boundary_buffer_size: defaults::BOUNDARY_BUFFER_SIZE,
            use_map: true,
            memory_node_map: Vec::new(),
        }
    }
}

/// Memory partition, DRAM timing, and arbitration settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemoryConfig {
    /// Number of memory partitions (DRAM channels).
    #[serde(default = "MemoryConfig::default_n_mem")]
    pub n_mem: usize,

    /// Sub-partitions per channel.
    #[serde(default = "MemoryConfig::default_sub_partitions")]
    pub n_sub_partition_per_channel: usize,

    /// Use the single-cycle fixed-latency DRAM model instead of the
    /// row-buffer timing model.
    #[serde(default = "MemoryConfig::default_simple_dram")]
    pub simple_dram_model: bool,

    /// Fixed access latency for the simple DRAM model, in DRAM cycles.
    #[serde(default = "MemoryConfig::default_dram_latency")]
    pub dram_latency: u64,

    /// Column access strobe latency (full model).
    #[serde(default = "MemoryConfig::default_t_cas")]
    pub t_cas: u64,

    /// Row activation latency (full model).
    #[serde(default = "MemoryConfig::default_t_ras")]
    pub t_ras: u64,

    /// Precharge latency (full model).
    #[serde(default = "MemoryConfig::default_t_pre")]
    pub t_pre: u64,

    /// ROP ordering-queue delay applied to non-texture requests, in L2
    /// cycles.
    #[serde(default = "MemoryConfig::default_rop_latency")]
    pub rop_latency: u64,

    /// Capacity of the `icnt→L2` FIFO, in requests.
    #[serde(default = "MemoryConfig::default_queue")]
    pub icnt_l2_queue_size: usize,

    /// Capacity of the `L2→dram` FIFO, in requests.
    #[serde(default = "MemoryConfig::default_queue")]
    pub l2_dram_queue_size: usize,

    /// Capacity of the `dram→L2` FIFO, in requests.
    #[serde(default = "MemoryConfig::default_queue")]
    pub dram_l2_queue_size: usize,

    /// Capacity of the `L2→icnt` FIFO, in requests.
    #[serde(default = "MemoryConfig::default_queue")]
    pub l2_icnt_queue_size: usize,

    /// Per-sub-partition private DRAM-queue credit.
    #[serde(default = "MemoryConfig::default_private_credit")]
    pub private_credit_limit: i32,

    /// Shared DRAM-queue credit pool per partition.
    #[serde(default = "MemoryConfig::default_shared_credit")]
    pub shared_credit_limit: i32,
}

impl MemoryConfig {
    fn default_n_mem() -> usize {
        defaults::N_MEM
    }
    fn default_sub_partitions() -> usize {
        defaults::N_SUB_PARTITION_PER_CHANNEL
    }
    fn default_simple_dram() -> bool {
        true
    }
    fn default_dram_latency() -> u64 {
        defaults::DRAM_LATENCY
    }
    fn default_t_cas() -> u64 {
        defaults::T_CAS
    }
    fn default_t_ras() -> u64 {
        defaults::T_RAS
    }
    fn default_t_pre() -> u64 {
        defaults::T_PRE
    }
    fn default_rop_latency() -> u64 {
        defaults::ROP_LATENCY
    }
    fn default_queue() -> usize {
        defaults::PARTITION_QUEUE_SIZE
    }
    fn default_private_credit() -> i32 {
        defaults::PRIVATE_CREDIT_LIMIT
    }
    fn default_shared_credit() -> i32 {
        defaults::SHARED_CREDIT_LIMIT
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            n_mem: defaults::N_MEM,
            n_sub_partition_per_channel: defaults::N_SUB_PARTITION_PER_CHANNEL,
            simple_dram_model: true,
            dram_latency: defaults::DRAM_LATENCY,
            t_cas: defaults::T_CAS,
            t_ras: defaults::T_RAS,
            t_pre: defaults::T_PRE,
            rop_latency: defaults::ROP_LATENCY,
            icnt_l2_queue_size: defaults::PARTITION_QUEUE_SIZE,
            l2_dram_queue_size: defaults::PARTITION_QUEUE_SIZE,
            dram_l2_queue_size: defaults::PARTITION_QUEUE_SIZE,
            l2_icnt_queue_size: defaults::PARTITION_QUEUE_SIZE,
            private_credit_limit: defaults::PRIVATE_CREDIT_LIMIT,
            shared_credit_limit: defaults::SHARED_CREDIT_LIMIT,
        }
    }
}

/// Cache geometry strings for every cache in the hierarchy.
///
/// Each entry uses the compact form
/// `T:nset:line:assoc,R:W:A:WA:SIF,M:entries:merge,miss:result,port` or the
/// literal `none` to disable the cache.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheHierarchyConfig {
    /// L1 instruction cache.
    #[serde(default = "CacheHierarchyConfig::default_l1i")]
    pub l1i: String,
    /// L1 texture cache.
    #[serde(default = "CacheHierarchyConfig::default_l1t")]
    pub l1t: String,
    /// L1 constant cache.
    #[serde(default = "CacheHierarchyConfig::default_l1c")]
    pub l1c: String,
    /// L1 data cache.
    #[serde(default = "CacheHierarchyConfig::default_l1d")]
    pub l1d: String,
    /// Unified L2 cache (one slice per sub-partition).
    #[serde(default = "CacheHierarchyConfig::default_l2")]
    pub l2: String,
}

impl CacheHierarchyConfig {
    fn default_l1i() -> String {
        "N:64:128:16,L:R:f:N:L,A:2:48,4:0,32".into()
    }
    fn default_l1t() -> String {
        "N:4:128:24,L:R:m:N:L,F:128:4,128:2,32".into()
    }
    fn default_l1c() -> String {
        "N:128:64:2,L:R:f:N:L,A:2:64,4:0,32".into()
    }
    fn default_l1d() -> String {
        "S:4:128:64,L:L:s:N:L,A:256:8,16:0,32".into()
    }
    fn default_l2() -> String {
        "S:64:128:16,L:B:m:W:L,A:192:4,32:0,32".into()
    }

    /// Parses every geometry string; any malformed entry is an init error.
    pub fn parsed(&self) -> Result<ParsedCaches, SimError> {
        Ok(ParsedCaches {
            l1i: CacheParams::parse(&self.l1i)?,
            l1t: CacheParams::parse(&self.l1t)?,
            l1c: CacheParams::parse(&self.l1c)?,
            l1d: CacheParams::parse(&self.l1d)?,
            l2: CacheParams::parse(&self.l2)?,
        })
    }
}

impl Default for CacheHierarchyConfig {
    fn default() -> Self {
        Self {
            l1i: Self::default_l1i(),
            l1t: Self::default_l1t(),
            l1c: Self::default_l1c(),
            l1d: Self::default_l1d(),
            l2: Self::default_l2(),
        }
    }
}

/// The parsed cache hierarchy.
#[derive(Debug, Clone)]
pub struct ParsedCaches {
    /// L1 instruction cache geometry.
    pub l1i: Option<CacheParams>,
    /// L1 texture cache geometry.
    pub l1t: Option<CacheParams>,
    /// L1 constant cache geometry.
    pub l1c: Option<CacheParams>,
    /// L1 data cache geometry.
    pub l1d: Option<CacheParams>,
    /// L2 slice geometry.
    pub l2: Option<CacheParams>,
}

/// Line vs. sector allocation granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKind {
    /// Whole-line allocation (`N`).
    Normal,
    /// Per-sector status bits (`S`).
    Sector,
}

/// Replacement policy inside one set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplacementPolicy {
    /// Least recently used (`L`).
    Lru,
    /// Oldest allocation first (`F`).
    Fifo,
}

/// What a write does to the cache array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePolicy {
    /// Read only (`R`): writes are configuration errors at access time.
    ReadOnly,
    /// Write back (`B`): dirty lines written out on eviction.
    WriteBack,
    /// Write through (`T`): every write also goes to the next level.
    WriteThrough,
    /// Write evict (`E`): writes invalidate and bypass.
    WriteEvict,
    /// Local write back, global write through (`L`).
    LocalWbGlobalWt,
}

/// When a line is allocated relative to the miss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocPolicy {
    /// Allocate on miss (`m`).
    OnMiss,
    /// Allocate on fill (`f`).
    OnFill,
    /// Streaming (`s`): on-fill with MSHR capacity matched to lines.
    Streaming,
}

/// Write-miss allocation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteAllocPolicy {
    /// No write allocate (`N`).
    None,
    /// Classic write allocate (`W`).
    WriteAllocate,
    /// Fetch on write (`F`).
    FetchOnWrite,
    /// Lazy fetch on read (`L`).
    LazyFetchOnRead,
}

/// Set index hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetIndexFunction {
    /// Fermi-style hash (`H`).
    FermiHash,
    /// Polynomial hash (`P`).
    IPoly,
    /// Custom (`C`).
    Custom,
    /// Linear modulo (`L`).
    Linear,
    /// XOR folding (`X`).
    BitwiseXor,
}

/// MSHR organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MshrKind {
    /// Texture FIFO (`F`).
    TexFifo,
    /// Sectored texture FIFO (`T`).
    SectorTexFifo,
    /// Associative (`A`).
    Assoc,
    /// Sectored associative (`S`).
    SectorAssoc,
}

/// Parsed cache geometry.
///
/// Parsing is strict: the reference implementation's parser silently
/// ignored fields beyond a minimum token count; here every token must be
/// present and well-formed.
#[derive(Debug, Clone)]
pub struct CacheParams {
    /// Allocation granularity.
    pub kind: CacheKind,
    /// Number of sets.
    pub n_sets: usize,
    /// Line size in bytes.
    pub line_size: u32,
    /// Ways per set.
    pub assoc: usize,
    /// Replacement policy.
    pub replacement: ReplacementPolicy,
    /// Write policy.
    pub write_policy: WritePolicy,
    /// Allocation policy.
    pub alloc_policy: AllocPolicy,
    /// Write-miss allocation policy.
    pub write_alloc: WriteAllocPolicy,
    /// Set index hash.
    pub set_index: SetIndexFunction,
    /// MSHR organization.
    pub mshr_kind: MshrKind,
    /// MSHR entry count.
    pub mshr_entries: usize,
    /// Maximum misses merged per MSHR entry.
    pub mshr_max_merge: usize,
    /// Miss queue depth.
    pub miss_queue_size: usize,
    /// Result FIFO depth (0 = unbounded).
    pub result_fifo_entries: usize,
    /// Data port width in bytes (0 = line size).
    pub data_port_width: u32,
}

impl CacheParams {
    /// Parses a geometry string; `none` yields `Ok(None)` (disabled cache).
    ///
    /// # Errors
    ///
    /// [`SimError::ConfigParse`] for a wrong field count, an unknown policy
    /// character, a non-numeric field, or non-power-of-two geometry.
    pub fn parse(text: &str) -> Result<Option<Self>, SimError> {
        if text == "none" {
            return Ok(None);
        }
        let err = |reason: &str| SimError::config(reason, text);

        let groups: Vec<&str> = text.split(',').collect();
        if groups.len() != 5 {
            return Err(err("expected 5 comma-separated groups"));
        }

        let g0: Vec<&str> = groups[0].split(':').collect();
        let g1: Vec<&str> = groups[1].split(':').collect();
        let g2: Vec<&str> = groups[2].split(':').collect();
        let g3: Vec<&str> = groups[3].split(':').collect();
        let g4: Vec<&str> = groups[4].split(':').collect();
        if g0.len() != 4 || g1.len() != 5 || g2.len() != 3 || g3.len() != 2 || g4.len() != 1 {
            return Err(err("wrong token count in a group"));
        }

        let number = |tok: &str| -> Result<usize, SimError> {
            tok.parse::<usize>()
                .map_err(|_| SimError::config(format!("`{tok}` is not a number"), text))
        };

        let kind = match g0[0] {
            "N" => CacheKind::Normal,
            "S" => CacheKind::Sector,
            other => return Err(SimError::config(format!("unknown cache type `{other}`"), text)),
        };
        let n_sets = number(g0[1])?;
        let line_size = number(g0[2])? as u32;
        let assoc = number(g0[3])?;
        if n_sets == 0 || !n_sets.is_power_of_two() {
            return Err(err("set count must be a nonzero power of two"));
        }
        if line_size == 0 || !line_size.is_power_of_two() {
            return Err(err("line size must be a nonzero power of two"));
        }
        if assoc == 0 {
            return Err(err("associativity must be nonzero"));
        }
        if kind == CacheKind::Sector
            && line_size != crate::common::masks::LINE_SIZE
        {
            return Err(err("sector caches require line size = sectors * sector size"));
        }

        let replacement = match g1[0] {
            "L" => ReplacementPolicy::Lru,
            "F" => ReplacementPolicy::Fifo,
            other => {
                return Err(SimError::config(
                    format!("unknown replacement policy `{other}`"),
                    text,
                ));
            }
        };
        let write_policy = match g1[1] {
            "R" => WritePolicy::ReadOnly,
            "B" => WritePolicy::WriteBack,
            "T" => WritePolicy::WriteThrough,
            "E" => WritePolicy::WriteEvict,
            "L" => WritePolicy::LocalWbGlobalWt,
            other => {
                return Err(SimError::config(format!("unknown write policy `{other}`"), text));
            }
        };
        let alloc_policy = match g1[2] {
            "m" => AllocPolicy::OnMiss,
            "f" => AllocPolicy::OnFill,
            "s" => AllocPolicy::Streaming,
            other => {
                return Err(SimError::config(format!("unknown alloc policy `{other}`"), text));
            }
        };
        let write_alloc = match g1[3] {
            "N" => WriteAllocPolicy::None,
            "W" => WriteAllocPolicy::WriteAllocate,
            "F" => WriteAllocPolicy::FetchOnWrite,
            "L" => WriteAllocPolicy::LazyFetchOnRead,
            other => {
                return Err(SimError::config(
                    format!("unknown write-allocate policy `{other}`"),
                    text,
                ));
            }
        };
        let set_index = match g1[4] {
            "H" => SetIndexFunction::FermiHash,
            "P" => SetIndexFunction::IPoly,
            "C" => SetIndexFunction::Custom,
            "L" => SetIndexFunction::Linear,
            "X" => SetIndexFunction::BitwiseXor,
            other => {
                return Err(SimError::config(
                    format!("unknown set index function `{other}`"),
                    text,
                ));
            }
        };
        let mshr_kind = match g2[0] {
            "F" => MshrKind::TexFifo,
            "T" => MshrKind::SectorTexFifo,
            "A" => MshrKind::Assoc,
            "S" => MshrKind::SectorAssoc,
            other => {
                return Err(SimError::config(format!("unknown MSHR type `{other}`"), text));
            }
        };

        Ok(Some(Self {
            kind,
            n_sets,
            line_size,
            assoc,
            replacement,
            write_policy,
            alloc_policy,
            write_alloc,
            set_index,
            mshr_kind,
            mshr_entries: number(g2[1])?,
            mshr_max_merge: number(g2[2])?,
            miss_queue_size: number(g3[0])?,
            result_fifo_entries: number(g3[1])?,
            data_port_width: number(g4[0])? as u32,
        }))
    }

    /// Total lines across the array.
    pub const fn num_lines(&self) -> usize {
        self.n_sets * self.assoc
    }

    /// The address masked down to its line base.
    pub const fn block_addr(&self, addr: u64) -> u64 {
        addr & !((self.line_size as u64) - 1)
    }

    /// MSHR coalescing address: sector granularity for sector caches, line
    /// granularity otherwise.
    pub const fn mshr_addr(&self, addr: u64) -> u64 {
        let atom = match self.kind {
            CacheKind::Sector => crate::common::masks::SECTOR_SIZE as u64,
            CacheKind::Normal => self.line_size as u64,
        };
        addr & !(atom - 1)
    }

    /// Set index for an address. All hash variants beyond linear fold the
    /// upper bits in; the closed set keeps hashes deterministic across runs.
    pub fn set_index_of(&self, addr: u64) -> usize {
        let line = addr >> self.line_size.trailing_zeros();
        let sets = self.n_sets as u64;
        let idx = match self.set_index {
            SetIndexFunction::Linear => line % sets,
            SetIndexFunction::BitwiseXor | SetIndexFunction::FermiHash => {
                (line ^ (line >> self.n_sets.trailing_zeros())) % sets
            }
            SetIndexFunction::IPoly | SetIndexFunction::Custom => {
                let folded = line ^ (line >> 13) ^ (line >> 27);
                folded % sets
            }
        };
        idx as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_l2_geometry() {
        let params = CacheParams::parse("S:64:128:16,L:B:m:W:L,A:192:4,32:0,32")
            .ok()
            .flatten()
            .expect("valid geometry");
        assert_eq!(params.kind, CacheKind::Sector);
        assert_eq!(params.n_sets, 64);
        assert_eq!(params.line_size, 128);
        assert_eq!(params.assoc, 16);
        assert_eq!(params.replacement, ReplacementPolicy::Lru);
        assert_eq!(params.write_policy, WritePolicy::WriteBack);
        assert_eq!(params.alloc_policy, AllocPolicy::OnMiss);
        assert_eq!(params.write_alloc, WriteAllocPolicy::WriteAllocate);
        assert_eq!(params.mshr_kind, MshrKind::Assoc);
        assert_eq!(params.mshr_entries, 192);
        assert_eq!(params.mshr_max_merge, 4);
        assert_eq!(params.miss_queue_size, 32);
    }

    #[test]
    fn test_parse_none_disables() {
        assert!(CacheParams::parse("none").is_ok_and(|p| p.is_none()));
    }

    #[test]
    fn test_parse_rejects_trailing_garbage() {
        assert!(CacheParams::parse("S:64:128:16,L:B:m:W:L,A:192:4,32:0,32,junk").is_err());
    }

    #[test]
    fn test_parse_rejects_unknown_policy() {
        assert!(CacheParams::parse("S:64:128:16,Q:B:m:W:L,A:192:4,32:0,32").is_err());
    }

    #[test]
    fn test_parse_rejects_non_power_of_two_sets() {
        assert!(CacheParams::parse("N:63:128:16,L:B:m:W:L,A:192:4,32:0,32").is_err());
    }

    #[test]
    fn test_node_map_length_checked() {
        let mut config = Config::default();
        config.interconnect.memory_node_map = vec![1, 2, 3];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_json_round_trip_overrides() {
        let json = r#"{
            "core": { "n_simt_clusters": 1, "num_schedulers": 1 },
            "memory": { "n_mem": 1, "n_sub_partition_per_channel": 1 },
            "interconnect": { "num_vcs": 2 }
        }"#;
        let config: Config = serde_json::from_str(json).expect("valid json");
        assert_eq!(config.core.n_simt_clusters, 1);
        assert_eq!(config.memory.n_mem, 1);
        assert_eq!(config.interconnect.num_vcs, 2);
        // untouched sections keep their defaults
        assert_eq!(config.core.warp_size, 32);
    }
}
