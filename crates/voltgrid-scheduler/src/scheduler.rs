//! The scheduler — eight callbacks over a fleet registry.

use tracing::{debug, info, warn};

use voltgrid_fleet::FleetRegistry;
use voltgrid_host::{
    CpuFamily, Host, MachineId, PState, Priority, SState, SlaClass, TaskId, Time, VmId, VmType,
};
use voltgrid_placement::{
    find_migration_target, policy_by_name, MigrationTarget, Placement, PlacementEngine,
    TaskRequest,
};
use voltgrid_power::{PStateDecision, PowerGovernor};

use crate::config::SchedulerConfig;
use crate::error::{SchedulerError, SchedulerResult};
use crate::report::RunReport;

/// The controller the host drives.
///
/// One value per simulation; nothing global. The host calls the
/// callbacks sequentially in timestamp order, so no locking exists
/// anywhere in here. Recoverable host failures are absorbed within
/// the callback that hit them.
pub struct Scheduler {
    config: SchedulerConfig,
    fleet: FleetRegistry,
    engine: PlacementEngine,
    governor: PowerGovernor,
    /// Periodic checks seen so far; gates consolidation cadence.
    ticks: u32,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> SchedulerResult<Self> {
        let policy = policy_by_name(&config.policy, config.tuning())
            .ok_or_else(|| SchedulerError::UnknownPolicy(config.policy.clone()))?;
        let governor = PowerGovernor::new(config.power());
        Ok(Self {
            config,
            fleet: FleetRegistry::default(),
            engine: PlacementEngine::new(policy),
            governor,
            ticks: 0,
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn fleet(&self) -> &FleetRegistry {
        &self.fleet
    }

    pub fn fleet_mut(&mut self) -> &mut FleetRegistry {
        &mut self.fleet
    }

    // ── Callbacks ──────────────────────────────────────────────────

    /// One-time init: snapshot the fleet and optionally pre-create a
    /// warm pool of Linux VMs across the efficiency order.
    pub fn init(&mut self, host: &mut dyn Host) {
        self.fleet = FleetRegistry::from_host(host);
        let created = self.prefill_warm_pool(host);
        info!(
            machines = self.fleet.machines().len(),
            active = self.fleet.active_count(),
            warm_vms = created,
            policy = self.engine.policy().name(),
            "scheduler initialized"
        );
    }

    /// A task arrived: place it, or defer it for the next drain.
    pub fn new_task(&mut self, host: &mut dyn Host, now: Time, task: TaskId) {
        let Ok(tinfo) = host.task_info(task) else {
            warn!(task, "new task not inspectable; dropping");
            return;
        };
        let req = TaskRequest::from_info(&tinfo, now, self.config.urgent_window);
        match self.engine.place(host, &mut self.fleet, &req) {
            Placement::Assigned { .. } => {}
            Placement::Deferred { .. } => {
                self.fleet.deferred.push(req.target_completion, task);
            }
            Placement::MemoryRace { machine } => {
                self.fleet.deferred.push(req.target_completion, task);
                self.memory_warning(host, now, machine);
            }
        }
    }

    /// A task finished. The host already removed it; utilization
    /// catches up on the next sweep.
    pub fn task_complete(&mut self, _host: &mut dyn Host, now: Time, task: TaskId) {
        debug!(task, now, "task complete");
    }

    /// Periodic reconciliation: refresh utilization, retarget
    /// P-states, drain deferred tasks, and every few ticks consolidate
    /// idle machines into sleep.
    pub fn periodic_check(&mut self, host: &mut dyn Host, now: Time) {
        self.reconcile(host);
        self.drain_deferred(host, now);
        self.ticks = self.ticks.wrapping_add(1);
        if self.engine.policy().supports_migration()
            && self.config.consolidation_interval > 0
            && self.ticks % self.config.consolidation_interval == 0
        {
            self.consolidate(host);
        }
        self.engine.policy_mut().on_tick(host, &self.fleet, now);
    }

    /// The host reports memory pressure: identify the fattest VM as a
    /// migration candidate, push every core to P0, and move the
    /// candidate away (or wake a standby) when the policy allows.
    pub fn memory_warning(&mut self, host: &mut dyn Host, now: Time, machine: MachineId) {
        let Ok(minfo) = host.machine_info(machine) else {
            return;
        };
        let mut candidate: Option<(usize, VmId)> = None;
        for &vm in self.fleet.vms() {
            if self.fleet.is_migrating(vm) {
                continue;
            }
            let Ok(vinfo) = host.vm_info(vm) else {
                continue;
            };
            if vinfo.machine_id != Some(machine) {
                continue;
            }
            let tasks = vinfo.active_tasks.len();
            if candidate.map_or(true, |(best, _)| tasks > best) {
                candidate = Some((tasks, vm));
            }
        }

        for core in 0..minfo.num_cpus {
            let _ = host.set_core_performance(machine, core, PState::P0);
        }

        let Some((tasks, vm)) = candidate else {
            return;
        };
        debug!(machine, vm, tasks, "memory pressure: migration candidate");
        if !self.engine.policy().supports_migration() {
            return;
        }
        if !self
            .fleet
            .migration_cooled_down(vm, now, self.config.migration_cooldown)
        {
            return;
        }
        match find_migration_target(host, &self.fleet, vm, &self.config.tuning()) {
            Some(MigrationTarget::Ready(target)) => self.issue_migration(host, now, vm, target),
            Some(MigrationTarget::Waking(standby)) => self.wake(host, standby),
            None => {}
        }
    }

    /// A migration finished: erase the pending entry, make sure the
    /// new host runs fast enough for its priority mix, reconcile.
    pub fn migration_done(&mut self, host: &mut dyn Host, _now: Time, vm: VmId) {
        if self.fleet.remove_pending_migration(vm).is_none() {
            warn!(vm, "completion for a migration this scheduler never issued");
            return;
        }
        info!(vm, "migration complete");
        if let Ok(vinfo) = host.vm_info(vm) {
            if let Some(machine) = vinfo.machine_id {
                if has_strict_tasks(host, &self.fleet, machine) {
                    if let Ok(minfo) = host.machine_info(machine) {
                        if minfo.p_state != PState::P0 {
                            let _ = host.set_core_performance(machine, 0, PState::P0);
                        }
                    }
                }
            }
        }
        self.reconcile(host);
    }

    /// An S-state transition settled.
    pub fn state_change_complete(&mut self, host: &mut dyn Host, now: Time, machine: MachineId) {
        self.fleet.clear_waking(machine);
        let Ok(info) = host.machine_info(machine) else {
            warn!(machine, "machine vanished during state change");
            self.fleet.deactivate(machine);
            return;
        };
        match info.s_state {
            SState::S0 => {
                self.fleet.activate(machine);
                for core in 0..info.num_cpus {
                    let _ = host.set_core_performance(machine, core, PState::P1);
                }
                if info.active_vms == 0 {
                    self.create_vm_bouquet(host, machine, info.cpu);
                }
                info!(machine, "machine awake");
                self.drain_deferred(host, now);
            }
            SState::S5 => {
                self.fleet.deactivate(machine);
            }
            _ => {
                self.fleet.set_utilization(machine, 0.0);
            }
        }
    }

    /// The host predicts an SLA violation for a running task.
    pub fn sla_warning(&mut self, host: &mut dyn Host, now: Time, task: TaskId) {
        let Ok(tinfo) = host.task_info(task) else {
            return;
        };
        if tinfo.sla == SlaClass::Sla3 {
            return;
        }
        let located = self.fleet.vms().iter().copied().find_map(|vm| {
            if self.fleet.is_migrating(vm) {
                return None;
            }
            let vinfo = host.vm_info(vm).ok()?;
            if vinfo.active_tasks.contains(&task) {
                Some((vm, vinfo.machine_id?))
            } else {
                None
            }
        });
        let Some((vm, machine)) = located else {
            debug!(task, "sla warning for a task not on any placeable vm");
            return;
        };

        match tinfo.sla {
            SlaClass::Sla0 | SlaClass::Sla1 => {
                let _ = host.set_task_priority(task, Priority::High);
                let _ = host.set_core_performance(machine, 0, PState::P0);
                if self.fleet.utilization(machine) > self.config.overload_threshold
                    && self.engine.policy().supports_migration()
                    && self
                        .fleet
                        .migration_cooled_down(vm, now, self.config.migration_cooldown)
                {
                    match find_migration_target(host, &self.fleet, vm, &self.config.tuning()) {
                        Some(MigrationTarget::Ready(target)) => {
                            self.issue_migration(host, now, vm, target)
                        }
                        Some(MigrationTarget::Waking(standby)) => self.wake(host, standby),
                        None => {}
                    }
                }
            }
            SlaClass::Sla2 => {
                if tinfo.priority == Priority::Low {
                    let _ = host.set_task_priority(task, Priority::Mid);
                }
            }
            SlaClass::Sla3 => {}
        }
    }

    /// Final callback: shut the fleet's VMs down (migrating ones are
    /// left for the host to settle) and assemble the report.
    pub fn simulation_complete(&mut self, host: &mut dyn Host, now: Time) -> RunReport {
        for vm in self.fleet.vms().to_vec() {
            if self.fleet.is_migrating(vm) {
                warn!(vm, "simulation end with migration in flight; vm left to the host");
                continue;
            }
            let attached = host.vm_info(vm).map(|i| i.machine_id.is_some());
            if attached.unwrap_or(false) {
                match host.shutdown_vm(vm) {
                    Ok(()) => self.fleet.remove_vm(vm),
                    Err(e) => warn!(vm, error = %e, "could not shut down vm"),
                }
            }
        }
        let mut sla_violations = [0.0; 4];
        for sla in SlaClass::ALL {
            sla_violations[sla.index()] = host.sla_report(sla);
        }
        let report = RunReport {
            sla_violations,
            energy_kwh: host.cluster_energy(),
            elapsed_secs: now as f64 / 1_000_000.0,
        };
        info!(
            energy_kwh = report.energy_kwh,
            elapsed_secs = report.elapsed_secs,
            "simulation complete"
        );
        report
    }

    // ── Internal helpers ───────────────────────────────────────────

    /// Refresh utilization and retarget P-states.
    fn reconcile(&mut self, host: &mut dyn Host) {
        self.refresh_utilization(host);
        self.apply_pstates(host);
    }

    fn refresh_utilization(&mut self, host: &mut dyn Host) {
        for m in self.fleet.machines().to_vec() {
            match host.machine_info(m) {
                Ok(info) => {
                    if info.s_state == SState::S0 && self.fleet.is_active(m) {
                        self.fleet.set_utilization(m, info.utilization());
                    } else if self.fleet.is_active(m) {
                        // Observed asleep: drop it from the active tier.
                        self.fleet.deactivate(m);
                    } else {
                        self.fleet.set_utilization(m, 0.0);
                    }
                }
                Err(e) => {
                    warn!(machine = m, error = %e, "machine dropped from active set");
                    self.fleet.deactivate(m);
                }
            }
        }
    }

    fn apply_pstates(&mut self, host: &mut dyn Host) {
        for m in self.fleet.machines().to_vec() {
            if !self.fleet.is_active(m) {
                continue;
            }
            let Ok(info) = host.machine_info(m) else {
                continue;
            };
            if info.s_state != SState::S0 {
                continue;
            }
            let strict = has_strict_tasks(host, &self.fleet, m);
            let utilization = self.fleet.utilization(m);
            if let PStateDecision::SetTo(p) = self.governor.evaluate_pstate(&info, utilization, strict)
            {
                let _ = host.set_core_performance(m, 0, p);
            }
        }
    }

    /// Re-attempt every deferred task, tightest deadline first.
    fn drain_deferred(&mut self, host: &mut dyn Host, now: Time) {
        if self.fleet.deferred.is_empty() {
            return;
        }
        for (deadline, task) in self.fleet.deferred.snapshot() {
            let Ok(tinfo) = host.task_info(task) else {
                self.fleet.deferred.remove(deadline, task);
                continue;
            };
            let req = TaskRequest::from_info(&tinfo, now, self.config.urgent_window);
            match self.engine.place(host, &mut self.fleet, &req) {
                Placement::Assigned { vm, .. } => {
                    debug!(task, vm, "deferred task placed");
                    self.fleet.deferred.remove(deadline, task);
                }
                Placement::Deferred { .. } => {}
                Placement::MemoryRace { machine } => {
                    self.memory_warning(host, now, machine);
                }
            }
        }
    }

    /// Shut down and demote idle underloaded machines, keeping the
    /// active floor.
    fn consolidate(&mut self, host: &mut dyn Host) {
        for m in self.governor.demotion_candidates(host, &self.fleet) {
            let vms = vms_on_machine(host, &self.fleet, m);
            let mut drained = true;
            for vm in vms {
                if self.fleet.is_migrating(vm) {
                    drained = false;
                    continue;
                }
                match host.shutdown_vm(vm) {
                    Ok(()) => self.fleet.remove_vm(vm),
                    Err(e) => {
                        warn!(vm, error = %e, "shutdown failed; machine stays up");
                        drained = false;
                    }
                }
            }
            if !drained {
                continue;
            }
            if host.set_machine_state(m, SState::S0i1).is_ok() {
                self.fleet.deactivate(m);
                info!(machine = m, "idle machine demoted to light sleep");
            }
        }
    }

    fn issue_migration(&mut self, host: &mut dyn Host, now: Time, vm: VmId, target: MachineId) {
        // Record first: the pending entry must exist before the host
        // can possibly report completion.
        if !self.fleet.insert_pending_migration(vm, target, now) {
            return;
        }
        match host.migrate_vm(vm, target) {
            Ok(()) => info!(vm, target, "migration issued"),
            Err(e) => {
                warn!(vm, target, error = %e, "migration rejected");
                self.fleet.remove_pending_migration(vm);
            }
        }
    }

    fn wake(&mut self, host: &mut dyn Host, machine: MachineId) {
        if self.fleet.is_waking(machine) {
            return;
        }
        if host.set_machine_state(machine, SState::S0).is_ok() {
            self.fleet.mark_waking(machine);
            info!(machine, "standby machine waking");
        }
    }

    /// Create the family-appropriate VM bouquet on a freshly woken
    /// machine, stopping when memory runs out.
    fn create_vm_bouquet(&mut self, host: &mut dyn Host, machine: MachineId, cpu: CpuFamily) {
        let bouquet: [VmType; 4] = match cpu {
            CpuFamily::X86 | CpuFamily::Arm => {
                [VmType::Windows, VmType::Windows, VmType::Linux, VmType::LinuxRt]
            }
            CpuFamily::Power => [VmType::Aix, VmType::Aix, VmType::Linux, VmType::LinuxRt],
            CpuFamily::RiscV => [VmType::Linux, VmType::Linux, VmType::LinuxRt, VmType::LinuxRt],
        };
        for vm_type in bouquet {
            let Ok(info) = host.machine_info(machine) else {
                return;
            };
            if info.memory_used + host.vm_overhead() > info.memory_size {
                return;
            }
            match host.create_vm(vm_type, cpu) {
                Ok(vm) => match host.attach_vm(vm, machine) {
                    Ok(()) => self.fleet.push_vm(vm),
                    Err(e) => {
                        warn!(machine, ?vm_type, error = %e, "bouquet attach failed");
                        let _ = host.shutdown_vm(vm);
                        return;
                    }
                },
                Err(e) => {
                    warn!(machine, ?vm_type, error = %e, "bouquet create failed");
                    return;
                }
            }
        }
    }

    fn prefill_warm_pool(&mut self, host: &mut dyn Host) -> u32 {
        if self.config.warm_pool == 0 {
            return 0;
        }
        let order = self.fleet.efficiency_order().to_vec();
        let mut created = 0;
        loop {
            let mut progressed = false;
            for &m in &order {
                if created >= self.config.warm_pool {
                    return created;
                }
                let Ok(info) = host.machine_info(m) else {
                    continue;
                };
                if info.s_state != SState::S0 {
                    continue;
                }
                if info.memory_used + host.vm_overhead() > info.memory_size {
                    continue;
                }
                let Ok(vm) = host.create_vm(VmType::Linux, info.cpu) else {
                    continue;
                };
                match host.attach_vm(vm, m) {
                    Ok(()) => {
                        self.fleet.push_vm(vm);
                        created += 1;
                        progressed = true;
                    }
                    Err(e) => {
                        warn!(machine = m, error = %e, "warm pool attach failed");
                        let _ = host.shutdown_vm(vm);
                    }
                }
            }
            if !progressed {
                return created;
            }
        }
    }
}

// ── Fleet scans ────────────────────────────────────────────────────

/// VMs currently attached to a machine, in registry order.
fn vms_on_machine(host: &dyn Host, fleet: &FleetRegistry, machine: MachineId) -> Vec<VmId> {
    fleet
        .vms()
        .iter()
        .copied()
        .filter(|&vm| {
            host.vm_info(vm)
                .map(|i| i.machine_id == Some(machine))
                .unwrap_or(false)
        })
        .collect()
}

/// Whether any task on the machine belongs to SLA0 or SLA1.
fn has_strict_tasks(host: &dyn Host, fleet: &FleetRegistry, machine: MachineId) -> bool {
    for &vm in fleet.vms() {
        let Ok(vinfo) = host.vm_info(vm) else {
            continue;
        };
        if vinfo.machine_id != Some(machine) {
            continue;
        }
        for &task in &vinfo.active_tasks {
            if let Ok(tinfo) = host.task_info(task) {
                if tinfo.sla.is_strict() {
                    return true;
                }
            }
        }
    }
    false
}
