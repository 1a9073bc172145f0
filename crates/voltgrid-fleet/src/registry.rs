//! Fleet registry — machines, VMs, migrations, utilization.

use std::collections::{BTreeSet, HashMap};

use tracing::{debug, warn};

use voltgrid_host::{Host, MachineId, Time, VmId};

use crate::deferred::DeferredQueue;

/// Canonical mutable state of the scheduler.
///
/// Built once at init from a host snapshot. All mutations are
/// synchronous; execution is single-threaded so no locking is needed.
/// Reads never fail — a machine or VM the host no longer answers for
/// simply stops being a candidate when the caller inspects it.
#[derive(Debug, Default)]
pub struct FleetRegistry {
    /// Every machine id the host reported at init.
    machines: Vec<MachineId>,
    /// Every VM the scheduler knows about, in insertion order.
    vms: Vec<VmId>,
    /// Machines believed to be in S0.
    active: BTreeSet<MachineId>,
    /// Cached `active_tasks / num_cpus`, refreshed each sweep.
    utilization: HashMap<MachineId, f64>,
    /// Machines ascending by S0 power cost, ties by id.
    efficiency_order: Vec<MachineId>,
    /// VM → target machine for migrations in flight.
    pending_migrations: HashMap<VmId, MachineId>,
    /// Last time each VM was migrated, for cooldown checks.
    last_migration: HashMap<VmId, Time>,
    /// Machines with an outstanding wake request.
    waking: BTreeSet<MachineId>,
    /// Tasks awaiting placement, earliest deadline first.
    pub deferred: DeferredQueue,
}

impl FleetRegistry {
    /// Snapshot the host's fleet: machine ids, initial active set, and
    /// the efficiency order. Machines the host fails to describe keep
    /// their slot but rank last and start inactive.
    pub fn from_host(host: &dyn Host) -> Self {
        let mut registry = FleetRegistry::default();
        let mut efficiencies: Vec<(u64, MachineId)> = Vec::new();

        for id in 0..host.machine_count() {
            registry.machines.push(id);
            match host.machine_info(id) {
                Ok(info) => {
                    efficiencies.push((info.s0_cost(), id));
                    if info.s_state.is_active() {
                        registry.active.insert(id);
                    }
                    registry.utilization.insert(id, 0.0);
                }
                Err(e) => {
                    warn!(machine = id, error = %e, "machine not inspectable at init");
                    efficiencies.push((u64::MAX, id));
                    registry.utilization.insert(id, 0.0);
                }
            }
        }

        efficiencies.sort();
        registry.efficiency_order = efficiencies.into_iter().map(|(_, id)| id).collect();
        registry
    }

    // ── Machines ───────────────────────────────────────────────────

    pub fn machines(&self) -> &[MachineId] {
        &self.machines
    }

    /// Machines ascending by S0 power cost; the canonical iteration
    /// order for placement and migration-target search.
    pub fn efficiency_order(&self) -> &[MachineId] {
        &self.efficiency_order
    }

    pub fn is_active(&self, machine: MachineId) -> bool {
        self.active.contains(&machine)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn activate(&mut self, machine: MachineId) {
        self.active.insert(machine);
        self.utilization.insert(machine, 0.0);
    }

    pub fn deactivate(&mut self, machine: MachineId) {
        self.active.remove(&machine);
        self.utilization.insert(machine, 0.0);
    }

    pub fn utilization(&self, machine: MachineId) -> f64 {
        self.utilization.get(&machine).copied().unwrap_or(0.0)
    }

    pub fn set_utilization(&mut self, machine: MachineId, value: f64) {
        self.utilization.insert(machine, value);
    }

    // ── Wake requests ──────────────────────────────────────────────

    /// Record an outstanding wake so deferred placements do not
    /// re-issue the state change. Returns false if already pending.
    pub fn mark_waking(&mut self, machine: MachineId) -> bool {
        self.waking.insert(machine)
    }

    pub fn is_waking(&self, machine: MachineId) -> bool {
        self.waking.contains(&machine)
    }

    pub fn clear_waking(&mut self, machine: MachineId) {
        self.waking.remove(&machine);
    }

    // ── VMs ────────────────────────────────────────────────────────

    pub fn vms(&self) -> &[VmId] {
        &self.vms
    }

    pub fn push_vm(&mut self, vm: VmId) {
        self.vms.push(vm);
    }

    pub fn remove_vm(&mut self, vm: VmId) {
        self.vms.retain(|&id| id != vm);
        self.last_migration.remove(&vm);
    }

    // ── Pending migrations ─────────────────────────────────────────

    /// Record a migration in flight. Write-once: a VM already pending
    /// is left untouched and the call reports failure.
    pub fn insert_pending_migration(&mut self, vm: VmId, target: MachineId, now: Time) -> bool {
        if self.pending_migrations.contains_key(&vm) {
            return false;
        }
        self.pending_migrations.insert(vm, target);
        self.last_migration.insert(vm, now);
        debug!(vm, target, "migration recorded");
        true
    }

    /// Erase a completed migration, returning its target if known.
    pub fn remove_pending_migration(&mut self, vm: VmId) -> Option<MachineId> {
        self.pending_migrations.remove(&vm)
    }

    pub fn is_migrating(&self, vm: VmId) -> bool {
        self.pending_migrations.contains_key(&vm)
    }

    pub fn migration_target(&self, vm: VmId) -> Option<MachineId> {
        self.pending_migrations.get(&vm).copied()
    }

    /// True if any in-flight migration has this machine as source or
    /// target. Such machines must not be drained or demoted.
    pub fn involved_in_migration(&self, machine: MachineId, host: &dyn Host) -> bool {
        for (&vm, &target) in &self.pending_migrations {
            if target == machine {
                return true;
            }
            if let Ok(info) = host.vm_info(vm) {
                if info.machine_id == Some(machine) {
                    return true;
                }
            }
        }
        false
    }

    /// Whether a VM may be migrated again, given the cooldown.
    pub fn migration_cooled_down(&self, vm: VmId, now: Time, cooldown: Time) -> bool {
        match self.last_migration.get(&vm) {
            Some(&last) => now.saturating_sub(last) >= cooldown,
            None => true,
        }
    }
}
