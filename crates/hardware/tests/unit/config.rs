//! Configuration parsing and validation tests.

use pretty_assertions::assert_eq;
use rstest::rstest;

use warpsim_core::config::{
    CacheKind, CacheParams, Config, MshrKind, ReplacementPolicy, WriteAllocPolicy, WritePolicy,
};

#[test]
fn default_config_is_valid() {
    let config = Config::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.core.warp_size, 32);
    assert_eq!(config.n_mem_ports(), 8);
    assert_eq!(config.num_cores(), 8);
}

#[test]
fn json_overrides_merge_with_defaults() {
    let json = r#"{
        "sim": { "max_cycles": 1000, "lockstep": true },
        "core": { "dual_issue_diff_exec_units": true },
        "cache": { "l2": "none" }
    }"#;
    let config: Config = serde_json::from_str(json).expect("valid json");
    assert_eq!(config.sim.max_cycles, 1000);
    assert!(config.sim.lockstep);
    assert!(config.core.dual_issue_diff_exec_units);
    assert_eq!(config.cache.l2, "none");
    assert!(config.validate().is_ok());
}

#[test]
fn unknown_fields_are_rejected() {
    let json = r#"{ "core": { "warp_sizes": 32 } }"#;
    assert!(serde_json::from_str::<Config>(json).is_err());
}

#[test]
fn l1d_default_geometry_parses() {
    let config = Config::default();
    let caches = config.cache.parsed().expect("parses");
    let l1d = caches.l1d.expect("enabled");
    assert_eq!(l1d.kind, CacheKind::Sector);
    assert_eq!(l1d.n_sets, 4);
    assert_eq!(l1d.assoc, 64);
}

#[rstest]
#[case("S:64:128:16,L:B:m:W:L,A:192:4,32:0,32", true)]
#[case("none", true)]
// wrong group count
#[case("S:64:128:16,L:B:m:W:L,A:192:4", false)]
// unknown write policy
#[case("S:64:128:16,L:Q:m:W:L,A:192:4,32:0,32", false)]
// non-numeric field
#[case("S:64:x:16,L:B:m:W:L,A:192:4,32:0,32", false)]
// sets not a power of two
#[case("S:63:128:16,L:B:m:W:L,A:192:4,32:0,32", false)]
// trailing garbage
#[case("S:64:128:16,L:B:m:W:L,A:192:4,32:0,32,extra", false)]
fn cache_string_strictness(#[case] text: &str, #[case] ok: bool) {
    assert_eq!(CacheParams::parse(text).is_ok(), ok, "{text}");
}

#[test]
fn cache_string_fields_decode() {
    let params = CacheParams::parse("N:128:64:8,F:T:f:N:X,S:32:8,16:4,64")
        .expect("parses")
        .expect("enabled");
    assert_eq!(params.kind, CacheKind::Normal);
    assert_eq!(params.replacement, ReplacementPolicy::Fifo);
    assert_eq!(params.write_policy, WritePolicy::WriteThrough);
    assert_eq!(params.write_alloc, WriteAllocPolicy::None);
    assert_eq!(params.mshr_kind, MshrKind::SectorAssoc);
    assert_eq!(params.mshr_entries, 32);
    assert_eq!(params.mshr_max_merge, 8);
    assert_eq!(params.miss_queue_size, 16);
    assert_eq!(params.result_fifo_entries, 4);
    assert_eq!(params.data_port_width, 64);
}

#[test]
fn bad_node_map_length_fails_validation() {
    let mut config = Config::default();
    config.interconnect.memory_node_map = vec![1, 2];
    assert!(config.validate().is_err());
}

#[test]
fn zero_vcs_fails_validation() {
    let mut config = Config::default();
    config.interconnect.num_vcs = 0;
    assert!(config.validate().is_err());
}
