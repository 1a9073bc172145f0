//! Migration-target search.

use tracing::debug;

use voltgrid_fleet::FleetRegistry;
use voltgrid_host::{Host, MachineId, SState, VmId};

use crate::policy::PlacementTuning;

/// Result of a migration-target search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationTarget {
    /// An S0 machine that can take the VM right now.
    Ready(MachineId),
    /// No active machine fits, but this sleeping one would; the caller
    /// should wake it and retry once it reports S0.
    Waking(MachineId),
}

/// Find a machine for `vm` to move to.
///
/// The VM's footprint is its overhead plus the memory of every task
/// it currently runs. Machines are scanned in efficiency order,
/// skipping the VM's current host; a candidate must match the CPU
/// family, be S0, fit the footprint, and sit below the overload
/// threshold. If no S0 machine qualifies, the first sleeping machine
/// that matches CPU and memory is proposed for wake-up instead.
pub fn find_migration_target(
    host: &dyn Host,
    fleet: &FleetRegistry,
    vm: VmId,
    tuning: &PlacementTuning,
) -> Option<MigrationTarget> {
    let info = host.vm_info(vm).ok()?;
    let current = info.machine_id;
    let task_mem: u64 = info
        .active_tasks
        .iter()
        .filter_map(|&t| host.task_info(t).ok())
        .map(|t| t.memory)
        .sum();
    let required = host.vm_overhead() + task_mem;

    let mut wake: Option<MachineId> = None;
    for &m in fleet.efficiency_order() {
        if Some(m) == current {
            continue;
        }
        let Ok(machine) = host.machine_info(m) else {
            continue;
        };
        if machine.cpu != info.cpu {
            continue;
        }
        if machine.memory_used + required > machine.memory_size {
            continue;
        }
        if machine.s_state == SState::S0 {
            if fleet.utilization(m) < tuning.overload_threshold {
                debug!(vm, target = m, required, "migration target found");
                return Some(MigrationTarget::Ready(m));
            }
        } else if wake.is_none() && !fleet.is_waking(m) {
            wake = Some(m);
        }
    }
    wake.map(MigrationTarget::Waking)
}
