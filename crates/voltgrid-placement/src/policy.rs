//! Placement policies.
//!
//! A policy answers two questions: which existing VM should take this
//! task, and failing that, which machine should host a fresh VM. The
//! engine handles everything around those answers (wake-ups, commit,
//! deferral), so a policy stays a pure selection function over the
//! host snapshot and the registry.

use tracing::debug;

use voltgrid_fleet::FleetRegistry;
use voltgrid_host::{Host, MachineId, SState, Time, VmId};

use crate::request::TaskRequest;

/// Thresholds the shipped policies consult.
#[derive(Debug, Clone, Copy)]
pub struct PlacementTuning {
    /// Machines above this utilization take no new VMs.
    pub overload_threshold: f64,
    /// Stricter cap applied to SLA0/SLA1 placements.
    pub strict_utilization_cap: f64,
}

impl Default for PlacementTuning {
    fn default() -> Self {
        Self {
            overload_threshold: 0.80,
            strict_utilization_cap: 0.50,
        }
    }
}

/// Strategy interface for placement decisions.
pub trait PlacementPolicy {
    fn name(&self) -> &'static str;

    /// Pick an existing VM for the task, or `None`.
    fn select_vm(
        &self,
        host: &dyn Host,
        fleet: &FleetRegistry,
        req: &TaskRequest,
    ) -> Option<VmId>;

    /// Pick a machine to create a fresh VM on, or `None`.
    fn select_machine(
        &self,
        host: &dyn Host,
        fleet: &FleetRegistry,
        req: &TaskRequest,
    ) -> Option<MachineId>;

    /// Periodic hook for policy-specific upkeep.
    fn on_tick(&mut self, _host: &dyn Host, _fleet: &FleetRegistry, _now: Time) {}

    /// Whether SLA-driven migration and periodic consolidation run
    /// under this policy.
    fn supports_migration(&self) -> bool {
        false
    }
}

/// Registered policy names, default first.
pub fn policy_names() -> &'static [&'static str] {
    &["efficiency", "first-fit", "load-aware"]
}

/// Look up a policy by name.
pub fn policy_by_name(name: &str, tuning: PlacementTuning) -> Option<Box<dyn PlacementPolicy>> {
    match name {
        "efficiency" => Some(Box::new(EfficiencyPolicy { tuning })),
        "first-fit" => Some(Box::new(FirstFitPolicy)),
        "load-aware" => Some(Box::new(LoadAwarePolicy { tuning })),
        _ => None,
    }
}

// ── Shared candidate checks ────────────────────────────────────────

/// Number of active tasks on `vm` if it can take the request: type and
/// CPU match, host machine in S0 with room for the task's memory, and
/// no migration in flight.
fn vm_candidate_load(
    host: &dyn Host,
    fleet: &FleetRegistry,
    vm: VmId,
    req: &TaskRequest,
) -> Option<usize> {
    if fleet.is_migrating(vm) {
        return None;
    }
    let info = host.vm_info(vm).ok()?;
    if info.cpu != req.cpu || info.vm_type != req.vm_type {
        return None;
    }
    let machine = host.machine_info(info.machine_id?).ok()?;
    if machine.s_state != SState::S0 {
        return None;
    }
    if machine.memory_used + req.memory > machine.memory_size {
        return None;
    }
    Some(info.active_tasks.len())
}

/// Whether `machine` can host a fresh VM for the request: S0, matching
/// CPU family, and room for the task plus the VM overhead.
fn machine_fits(host: &dyn Host, machine: MachineId, req: &TaskRequest) -> bool {
    match host.machine_info(machine) {
        Ok(info) => {
            info.s_state == SState::S0
                && info.cpu == req.cpu
                && info.memory_used + req.memory + host.vm_overhead() <= info.memory_size
        }
        Err(_) => false,
    }
}

// ── Policies ───────────────────────────────────────────────────────

/// The default policy: least-loaded VM with an idle short-circuit for
/// strict SLAs, then machines in efficiency order gated on
/// utilization.
pub struct EfficiencyPolicy {
    tuning: PlacementTuning,
}

impl PlacementPolicy for EfficiencyPolicy {
    fn name(&self) -> &'static str {
        "efficiency"
    }

    fn select_vm(
        &self,
        host: &dyn Host,
        fleet: &FleetRegistry,
        req: &TaskRequest,
    ) -> Option<VmId> {
        let mut best: Option<(usize, VmId)> = None;
        for &vm in fleet.vms() {
            let Some(load) = vm_candidate_load(host, fleet, vm, req) else {
                continue;
            };
            if load == 0 && req.sla.is_strict() {
                debug!(vm, task = req.task, "idle vm short-circuits strict placement");
                return Some(vm);
            }
            if best.map_or(true, |(min, _)| load < min) {
                best = Some((load, vm));
            }
        }
        best.map(|(_, vm)| vm)
    }

    fn select_machine(
        &self,
        host: &dyn Host,
        fleet: &FleetRegistry,
        req: &TaskRequest,
    ) -> Option<MachineId> {
        let cap = if req.sla.is_strict() {
            self.tuning.strict_utilization_cap
        } else {
            self.tuning.overload_threshold
        };
        fleet.efficiency_order().iter().copied().find(|&m| {
            fleet.is_active(m) && machine_fits(host, m, req) && fleet.utilization(m) <= cap
        })
    }

    fn supports_migration(&self) -> bool {
        true
    }
}

/// First compatible VM, machines in id order, memory gate only.
pub struct FirstFitPolicy;

impl PlacementPolicy for FirstFitPolicy {
    fn name(&self) -> &'static str {
        "first-fit"
    }

    fn select_vm(
        &self,
        host: &dyn Host,
        fleet: &FleetRegistry,
        req: &TaskRequest,
    ) -> Option<VmId> {
        fleet
            .vms()
            .iter()
            .copied()
            .find(|&vm| vm_candidate_load(host, fleet, vm, req).is_some())
    }

    fn select_machine(
        &self,
        host: &dyn Host,
        fleet: &FleetRegistry,
        req: &TaskRequest,
    ) -> Option<MachineId> {
        (0..host.machine_count()).find(|&m| fleet.is_active(m) && machine_fits(host, m, req))
    }
}

/// Least-loaded VM, least-utilized machine.
pub struct LoadAwarePolicy {
    tuning: PlacementTuning,
}

impl PlacementPolicy for LoadAwarePolicy {
    fn name(&self) -> &'static str {
        "load-aware"
    }

    fn select_vm(
        &self,
        host: &dyn Host,
        fleet: &FleetRegistry,
        req: &TaskRequest,
    ) -> Option<VmId> {
        let mut best: Option<(usize, VmId)> = None;
        for &vm in fleet.vms() {
            if let Some(load) = vm_candidate_load(host, fleet, vm, req) {
                if best.map_or(true, |(min, _)| load < min) {
                    best = Some((load, vm));
                }
            }
        }
        best.map(|(_, vm)| vm)
    }

    fn select_machine(
        &self,
        host: &dyn Host,
        fleet: &FleetRegistry,
        req: &TaskRequest,
    ) -> Option<MachineId> {
        let mut best: Option<(f64, MachineId)> = None;
        for &m in fleet.machines() {
            if !fleet.is_active(m) || !machine_fits(host, m, req) {
                continue;
            }
            let util = fleet.utilization(m);
            if util > self.tuning.overload_threshold {
                continue;
            }
            if best.map_or(true, |(min, _)| util < min) {
                best = Some((util, m));
            }
        }
        best.map(|(_, m)| m)
    }
}
