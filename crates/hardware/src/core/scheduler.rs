//! Per-cycle warp ordering and issue.
//!
//! Each scheduler unit supervises a fixed subset of a core's warps. Per
//! cycle it orders them greedy-then-oldest (the warp issued last cycle
//! first, then runnable warps by ascending `dynamic_warp_id`, with done or
//! waiting warps last) and walks the list until one warp issues up to
//! `max_insn_issue_per_warp` instructions.
//!
//! Routing priority per instruction: MEM; then SP/INT (integer work runs on
//! the INT pipe when one exists, SP-class work stays on SP); then DP; DP
//! falls back to SFU when no DP units exist; then SFU/ALU-SFU; then tensor;
//! then the specialized units. With `dual_issue_diff_exec_units` the second
//! issue in a cycle must target a different unit class than the first.

use tracing::debug;

use crate::common::Cycle;
use crate::config::CoreConfig;
use crate::core::instruction::{OpClass, WarpInstruction};
use crate::core::register_set::RegisterSet;
use crate::core::scoreboard::Scoreboard;
use crate::core::warp::TraceWarp;
use crate::stats::SimStats;

/// Execution unit classes, for the distinct-unit dual-issue rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecUnitKind {
    /// Nothing issued yet this cycle.
    None,
    /// SP pipe.
    Sp,
    /// INT pipe.
    Int,
    /// DP pipe.
    Dp,
    /// SFU pipe.
    Sfu,
    /// Tensor-core pipe.
    Tensor,
    /// Memory pipe.
    Mem,
    /// Specialized pipe, by unit index.
    Specialized(usize),
}

/// Issue register sets of every execution pipe on a core.
pub struct IssuePorts {
    /// SP pipe issue slots.
    pub sp: RegisterSet,
    /// INT pipe issue slots.
    pub int: RegisterSet,
    /// DP pipe issue slots.
    pub dp: RegisterSet,
    /// SFU pipe issue slots.
    pub sfu: RegisterSet,
    /// Tensor pipe issue slots.
    pub tensor: RegisterSet,
    /// Memory pipe issue slots.
    pub mem: RegisterSet,
    /// Specialized pipe issue slots, by unit index.
    pub spec: Vec<RegisterSet>,
}

impl IssuePorts {
    /// Creates one slot per scheduler in every pipe.
    pub fn new(config: &CoreConfig) -> Self {
        let n = config.num_schedulers;
        Self {
            sp: RegisterSet::new("SP", 0, n),
            int: RegisterSet::new("INT", 1, n),
            dp: RegisterSet::new("DP", 2, n),
            sfu: RegisterSet::new("SFU", 3, n),
            tensor: RegisterSet::new("TENSOR", 4, n),
            mem: RegisterSet::new("MEM", 5, n),
            spec: config
                .specialized_units
                .iter()
                .enumerate()
                .map(|(i, _)| RegisterSet::new("SPEC", 6 + i, n))
                .collect(),
        }
    }

    pub(crate) fn port_mut(&mut self, kind: ExecUnitKind) -> &mut RegisterSet {
        match kind {
            ExecUnitKind::Sp => &mut self.sp,
            ExecUnitKind::Int => &mut self.int,
            ExecUnitKind::Dp => &mut self.dp,
            ExecUnitKind::Sfu => &mut self.sfu,
            ExecUnitKind::Tensor => &mut self.tensor,
            ExecUnitKind::Mem => &mut self.mem,
            ExecUnitKind::Specialized(i) => &mut self.spec[i],
            ExecUnitKind::None => unreachable!("no port for ExecUnitKind::None"),
        }
    }
}

/// Side effects of an issue the core must apply (barrier arrival, memory
/// barrier, exit).
pub struct IssuedEvent {
    /// Warp that issued.
    pub warp_id: usize,
    /// Opcode class issued.
    pub op: OpClass,
}

/// Everything a scheduler touches during its cycle, borrowed from the core.
pub struct IssueContext<'a> {
    /// All warp slots of the core.
    pub warps: &'a mut [TraceWarp],
    /// The core's scoreboard.
    pub scoreboard: &'a mut Scoreboard,
    /// The execution pipes' issue slots.
    pub ports: &'a mut IssuePorts,
    /// Core configuration.
    pub config: &'a CoreConfig,
    /// Global statistics.
    pub stats: &'a mut SimStats,
    /// Issue side effects for the core to apply after the cycle.
    pub events: &'a mut Vec<IssuedEvent>,
    /// Current core cycle.
    pub cycle: Cycle,
}

impl IssueContext<'_> {
    fn latency_for(&self, inst: &WarpInstruction) -> Cycle {
        if inst.latency > 0 {
            return inst.latency;
        }
        let lat = &self.config.latency;
        match inst.op {
            OpClass::Sp => lat.sp,
            OpClass::Dp => lat.dp,
            OpClass::Sfu | OpClass::AluSfu => lat.sfu,
            OpClass::Tensor => lat.tensor,
            OpClass::Specialized(i) => self
                .config
                .specialized_units
                .get(i)
                .map_or(lat.int, |u| u.latency),
            _ => lat.int,
        }
    }
}

/// One warp scheduler.
pub struct SchedulerUnit {
    /// Scheduler id; also its register-set slot in sub-core mode.
    pub id: usize,
    /// Warp ids this scheduler supervises.
    pub supervised: Vec<usize>,
    /// Index (into `supervised`) of the warp that issued last.
    last_supervised_issued: usize,
    /// Instructions issued on the previous cycle.
    pub num_issued_last_cycle: usize,
}

impl SchedulerUnit {
    /// Creates a scheduler over the given warp ids.
    pub fn new(id: usize, supervised: Vec<usize>) -> Self {
        Self {
            id,
            supervised,
            last_supervised_issued: 0,
            num_issued_last_cycle: 0,
        }
    }

    /// Greedy-then-oldest ordering: last cycle's issuer first, then
    /// runnable warps by ascending dynamic warp id, done/waiting last.
    fn order_warps(&self, ctx: &IssueContext<'_>) -> Vec<usize> {
        let greedy = self.supervised.get(self.last_supervised_issued).copied();
        let mut rest: Vec<usize> = self
            .supervised
            .iter()
            .copied()
            .filter(|&w| Some(w) != greedy)
            .collect();
        rest.sort_by_key(|&w| {
            let warp = &ctx.warps[w];
            (warp.done_exit || warp.waiting(), warp.dynamic_warp_id)
        });
        let mut ordered = Vec::with_capacity(self.supervised.len());
        if let Some(g) = greedy {
            ordered.push(g);
        }
        ordered.extend(rest);
        ordered
    }

    /// One scheduler cycle. Returns the number of instructions issued.
    pub fn cycle(&mut self, ctx: &mut IssueContext<'_>) -> usize {
        // there was a warp with a valid instruction (no control-hazard flush)
        let mut valid_inst = false;
        // of the valid, one passed the scoreboard
        let mut ready_inst = false;
        // of those, one actually issued
        let mut issued_inst = false;

        let prioritized = self.order_warps(ctx);
        debug!(sched = self.id, warps = ?prioritized, "scheduler ordering");

        let max_issue = ctx.config.max_insn_issue_per_warp;
        let diff_exec_units = ctx.config.dual_issue_diff_exec_units;
        let sub_core = ctx.config.sub_core_model;

        let mut total_issued = 0;

        for &warp_id in &prioritized {
            if ctx.warps[warp_id].done_exit {
                continue;
            }
            let mut checked = 0;
            let mut issued = 0;
            let mut previous_kind = ExecUnitKind::None;

            while !ctx.warps[warp_id].waiting()
                && !ctx.warps[warp_id].ibuffer_empty()
                && checked < max_issue
                && checked <= issued
                && issued < max_issue
            {
                let Some(inst) = ctx.warps[warp_id].ibuffer_next().cloned() else {
                    break;
                };

                // a CDP dummy in flight burns its latency budget first
                if inst.cdp_class > 0
                    && ctx.warps[warp_id].cdp_dummy
                    && ctx.warps[warp_id].cdp_latency > 0
                {
                    ctx.warps[warp_id].cdp_latency -= 1;
                    break;
                }

                let expected_pc = ctx.warps[warp_id].pc;
                if inst.pc != expected_pc {
                    // control hazard: redirect and refetch
                    debug!(sched = self.id, warp = warp_id, "control hazard flush");
                    ctx.warps[warp_id].set_next_pc(expected_pc);
                    ctx.warps[warp_id].ibuffer_flush();
                    checked += 1;
                    continue;
                }
                valid_inst = true;

                if ctx.scoreboard.collides(warp_id, &inst) {
                    debug!(sched = self.id, warp = warp_id, "scoreboard collision");
                    checked += 1;
                    continue;
                }
                ready_inst = true;

                let kind = match self.route(ctx, warp_id, &inst, previous_kind, diff_exec_units, sub_core) {
                    RouteOutcome::Issue(kind) => kind,
                    RouteOutcome::CdpHold => break,
                    RouteOutcome::Stall => {
                        checked += 1;
                        continue;
                    }
                };

                self.do_issue(ctx, warp_id, kind, sub_core);
                issued += 1;
                issued_inst = true;
                previous_kind = kind;
                checked += 1;
            }

            if issued > 0 {
                if let Some(idx) = self.supervised.iter().position(|&w| w == warp_id) {
                    self.last_supervised_issued = idx;
                }
                self.num_issued_last_cycle = issued;
                if issued == 1 {
                    ctx.stats.single_issue_nums[self.id] += 1;
                } else {
                    ctx.stats.dual_issue_nums[self.id] += 1;
                }
                total_issued = issued;
                break;
            }
        }

        // issue stall bucketing
        if !valid_inst {
            ctx.stats.shader_cycle_distro[0] += 1;
        } else if !ready_inst {
            ctx.stats.shader_cycle_distro[1] += 1;
        } else if !issued_inst {
            ctx.stats.shader_cycle_distro[2] += 1;
        } else {
            let slot = (2 + total_issued).min(ctx.stats.shader_cycle_distro.len() - 1);
            ctx.stats.shader_cycle_distro[slot] += 1;
        }

        total_issued
    }

    /// Picks the execution pipe for `inst`, honoring availability and the
    /// distinct-unit dual-issue rule.
    fn route(
        &self,
        ctx: &mut IssueContext<'_>,
        warp_id: usize,
        inst: &WarpInstruction,
        previous: ExecUnitKind,
        diff_exec_units: bool,
        sub_core: bool,
    ) -> RouteOutcome {
        let cfg = ctx.config;
        let blocked = |kind| diff_exec_units && previous == kind;

        if inst.op.is_memory() {
            return if ctx.ports.mem.has_free(sub_core, self.id) && !blocked(ExecUnitKind::Mem) {
                RouteOutcome::Issue(ExecUnitKind::Mem)
            } else {
                RouteOutcome::Stall
            };
        }

        match inst.op {
            OpClass::Dp if cfg.num_dp_units > 0 => {
                if !blocked(ExecUnitKind::Dp) && ctx.ports.dp.has_free(sub_core, self.id) {
                    RouteOutcome::Issue(ExecUnitKind::Dp)
                } else {
                    RouteOutcome::Stall
                }
            }
            // without DP units, double-precision work runs on the SFU pipe
            OpClass::Dp | OpClass::Sfu | OpClass::AluSfu => {
                if !blocked(ExecUnitKind::Sfu)
                    && cfg.num_sfu_units > 0
                    && ctx.ports.sfu.has_free(sub_core, self.id)
                {
                    RouteOutcome::Issue(ExecUnitKind::Sfu)
                } else {
                    RouteOutcome::Stall
                }
            }
            OpClass::Tensor => {
                if !blocked(ExecUnitKind::Tensor)
                    && cfg.num_tensor_core_units > 0
                    && ctx.ports.tensor.has_free(sub_core, self.id)
                {
                    RouteOutcome::Issue(ExecUnitKind::Tensor)
                } else {
                    RouteOutcome::Stall
                }
            }
            OpClass::Specialized(sid) => {
                let available = cfg
                    .specialized_units
                    .get(sid)
                    .is_some_and(|u| u.num_units > 0)
                    && sid < ctx.ports.spec.len()
                    && ctx.ports.spec[sid].has_free(sub_core, self.id);
                if available && !blocked(ExecUnitKind::Specialized(sid)) {
                    RouteOutcome::Issue(ExecUnitKind::Specialized(sid))
                } else {
                    RouteOutcome::Stall
                }
            }
            // ALU / INT / SP / Barrier / Exit work: the INT pipe takes
            // everything but SP-class ops when it exists (Volta split);
            // otherwise the SP pipe takes all of it
            _ => {
                let sp_avail = cfg.num_sp_units > 0 && ctx.ports.sp.has_free(sub_core, self.id);
                let int_avail = cfg.num_int_units > 0 && ctx.ports.int.has_free(sub_core, self.id);

                let execute_on_int = cfg.num_int_units > 0
                    && int_avail
                    && inst.op != OpClass::Sp
                    && !blocked(ExecUnitKind::Int);
                let execute_on_sp = !execute_on_int
                    && sp_avail
                    && (cfg.num_int_units == 0 || inst.op == OpClass::Sp)
                    && !blocked(ExecUnitKind::Sp);

                if execute_on_int || execute_on_sp {
                    // child-kernel launches charge their latency budget
                    // before occupying a pipe
                    if inst.cdp_class > 0 && !ctx.warps[warp_id].cdp_dummy {
                        let class = inst.cdp_class as usize;
                        let table = &cfg.cdp_latency;
                        let mut latency = table.get(class - 1).copied().unwrap_or(0);
                        if class > 1 {
                            latency += table.get(class).copied().unwrap_or(0)
                                * Cycle::from(inst.active_count());
                        }
                        ctx.warps[warp_id].cdp_latency = latency;
                        ctx.warps[warp_id].cdp_dummy = true;
                        return RouteOutcome::CdpHold;
                    }
                    if inst.cdp_class > 0 && ctx.warps[warp_id].cdp_dummy {
                        ctx.warps[warp_id].cdp_dummy = false;
                    }
                }

                if execute_on_int {
                    RouteOutcome::Issue(ExecUnitKind::Int)
                } else if execute_on_sp {
                    RouteOutcome::Issue(ExecUnitKind::Sp)
                } else {
                    RouteOutcome::Stall
                }
            }
        }
    }

    /// Moves the warp's head instruction into the chosen pipe and reserves
    /// its outputs.
    fn do_issue(&self, ctx: &mut IssueContext<'_>, warp_id: usize, kind: ExecUnitKind, sub_core: bool) {
        let Some(mut inst) = ctx.warps[warp_id].ibuffer_step() else {
            return;
        };
        inst.scheduler_id = self.id;
        inst.issued_cycle = ctx.cycle;
        inst.latency = ctx.latency_for(&inst);
        debug!(
            sched = self.id,
            warp = warp_id,
            op = ?inst.op,
            unit = ?kind,
            "issue"
        );
        ctx.scoreboard.reserve_registers(&inst);
        ctx.warps[warp_id].inflight_instructions += 1;
        // barrier waits take effect at issue: nothing younger may slip out
        // in the same cycle
        match inst.op {
            OpClass::Barrier => ctx.warps[warp_id].waiting_barrier = true,
            OpClass::MemBar if ctx.warps[warp_id].stores_outstanding > 0 => {
                ctx.warps[warp_id].waiting_membar = true;
            }
            _ => {}
        }
        ctx.events.push(IssuedEvent {
            warp_id,
            op: inst.op,
        });
        ctx.ports.port_mut(kind).move_in(sub_core, self.id, inst);
    }
}

enum RouteOutcome {
    Issue(ExecUnitKind),
    Stall,
    CdpHold,
}
