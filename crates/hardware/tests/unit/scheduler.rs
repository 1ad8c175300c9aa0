//! Scheduler issue rules: RAW stalls and dual-issue.

use pretty_assertions::assert_eq;

use warpsim_core::Simulator;

use crate::common::{global_load, int_op, one_warp_kernel, sp_op, tiny_config};

#[test]
fn raw_dependence_stalls_until_load_returns() {
    // LD R1, [addr]; ADD R2, R1, R3 — the ADD must wait out the full
    // memory round trip on the scoreboard
    let mut simulator = Simulator::new(tiny_config()).expect("builds");
    let _ = simulator
        .launch(one_warp_kernel(vec![
            global_load(0x100, 0x4000, 1),
            int_op(0x108, 2, vec![1, 3]),
        ]))
        .expect("launch");
    simulator.run().expect("drains");

    let stats = simulator.stats();
    assert_eq!(stats.gpu_sim_insn, 2);
    // the warp sat in the RAW-stall bucket while the load was outstanding
    assert!(
        stats.shader_cycle_distro[1] > 0,
        "expected RAW-stall cycles, distro = {:?}",
        stats.shader_cycle_distro
    );
}

#[test]
fn independent_alu_work_does_not_raw_stall() {
    let mut simulator = Simulator::new(tiny_config()).expect("builds");
    let _ = simulator
        .launch(one_warp_kernel(vec![
            int_op(0x100, 1, vec![]),
            int_op(0x108, 2, vec![]),
            int_op(0x110, 3, vec![]),
        ]))
        .expect("launch");
    simulator.run().expect("drains");
    assert_eq!(simulator.stats().gpu_sim_insn, 3);
}

#[test]
fn dual_issue_to_different_units() {
    // a MEM op then an SP op are eligible for same-cycle dual issue under
    // the distinct-unit rule
    let mut config = tiny_config();
    config.core.dual_issue_diff_exec_units = true;
    config.core.max_insn_issue_per_warp = 2;
    let mut simulator = Simulator::new(config).expect("builds");
    let _ = simulator
        .launch(one_warp_kernel(vec![
            global_load(0x100, 0x8000, 1),
            sp_op(0x108, 2, vec![3, 4]),
        ]))
        .expect("launch");
    simulator.run().expect("drains");

    let stats = simulator.stats();
    assert_eq!(stats.gpu_sim_insn, 2);
    assert!(
        stats.dual_issue_nums[0] >= 1,
        "expected a dual-issue cycle, got {:?}",
        stats.dual_issue_nums
    );
}

#[test]
fn back_to_back_mem_ops_single_issue() {
    // two MEM ops cannot share a cycle when dual issue requires distinct
    // unit classes
    let mut config = tiny_config();
    config.core.dual_issue_diff_exec_units = true;
    config.core.max_insn_issue_per_warp = 2;
    let mut simulator = Simulator::new(config).expect("builds");
    let _ = simulator
        .launch(one_warp_kernel(vec![
            global_load(0x100, 0x8000, 1),
            global_load(0x108, 0xC000, 2),
        ]))
        .expect("launch");
    simulator.run().expect("drains");

    let stats = simulator.stats();
    assert_eq!(stats.gpu_sim_insn, 2);
    assert_eq!(
        stats.dual_issue_nums[0], 0,
        "distinct-unit rule must forbid MEM+MEM dual issue"
    );
    assert!(stats.single_issue_nums[0] >= 2);
}

#[test]
fn sub_core_mode_still_drains() {
    let mut config = tiny_config();
    config.core.sub_core_model = true;
    config.core.num_schedulers = 2;
    let mut simulator = Simulator::new(config).expect("builds");
    let _ = simulator
        .launch(one_warp_kernel(vec![
            int_op(0x100, 1, vec![]),
            sp_op(0x108, 2, vec![]),
            int_op(0x110, 3, vec![]),
        ]))
        .expect("launch");
    simulator.run().expect("drains");
    assert_eq!(simulator.stats().gpu_sim_insn, 3);
}
