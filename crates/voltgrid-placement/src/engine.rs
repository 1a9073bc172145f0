//! Placement engine — drives one task through the placement steps.

use tracing::{debug, info, warn};

use voltgrid_fleet::FleetRegistry;
use voltgrid_host::{Host, HostError, MachineId, SState, VmId};

use crate::policy::PlacementPolicy;
use crate::request::TaskRequest;

/// Outcome of one placement attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Task dispatched onto a VM.
    Assigned { vm: VmId, machine: MachineId },
    /// No capacity now; the task should re-enter placement later.
    /// `waking` names a machine a wake request was just issued for.
    Deferred { waking: Option<MachineId> },
    /// The host rejected the commit for lack of memory — the caller
    /// should raise a memory warning for the machine and defer.
    MemoryRace { machine: MachineId },
}

/// Runs the placement steps for the configured policy:
/// VM match → machine match (create VM) → wake → commit.
pub struct PlacementEngine {
    policy: Box<dyn PlacementPolicy>,
}

impl PlacementEngine {
    pub fn new(policy: Box<dyn PlacementPolicy>) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &dyn PlacementPolicy {
        self.policy.as_ref()
    }

    pub fn policy_mut(&mut self) -> &mut dyn PlacementPolicy {
        self.policy.as_mut()
    }

    /// Place one task. Mutates the host (VM creation, dispatch, wake
    /// requests) and the registry (new VMs, wake tracking); never
    /// touches the deferred queue — that stays the caller's job.
    pub fn place(
        &self,
        host: &mut dyn Host,
        fleet: &mut FleetRegistry,
        req: &TaskRequest,
    ) -> Placement {
        // Step 1: an existing VM.
        if let Some(vm) = self.policy.select_vm(host, fleet, req) {
            return self.commit(host, req, vm);
        }

        // Step 2: a fresh VM on an eligible machine.
        if let Some(machine) = self.policy.select_machine(host, fleet, req) {
            match self.create_on(host, machine, req) {
                Ok(vm) => {
                    fleet.push_vm(vm);
                    return self.commit(host, req, vm);
                }
                Err(e) => {
                    warn!(machine, task = req.task, error = %e, "vm creation failed");
                    return Placement::Deferred { waking: None };
                }
            }
        }

        // Step 3: wake a sleeping machine and defer.
        let waking = self.wake_candidate(host, fleet, req);
        if let Some(machine) = waking {
            if host.set_machine_state(machine, SState::S0).is_ok() {
                fleet.mark_waking(machine);
                info!(machine, task = req.task, "waking machine for deferred task");
                return Placement::Deferred { waking: Some(machine) };
            }
        }
        debug!(task = req.task, "no capacity; task deferred");
        Placement::Deferred { waking: None }
    }

    // ── Internal helpers ───────────────────────────────────────────

    /// Create and attach a VM of the request's type; tear the VM down
    /// again if the attach fails.
    fn create_on(
        &self,
        host: &mut dyn Host,
        machine: MachineId,
        req: &TaskRequest,
    ) -> Result<VmId, HostError> {
        let vm = host.create_vm(req.vm_type, req.cpu)?;
        if let Err(e) = host.attach_vm(vm, machine) {
            let _ = host.shutdown_vm(vm);
            return Err(e);
        }
        Ok(vm)
    }

    /// Dispatch the task. Strict SLAs additionally push the host
    /// machine's core 0 to P0 right away.
    fn commit(&self, host: &mut dyn Host, req: &TaskRequest, vm: VmId) -> Placement {
        let machine = match host.vm_info(vm).ok().and_then(|i| i.machine_id) {
            Some(m) => m,
            None => return Placement::Deferred { waking: None },
        };
        match host.add_task(vm, req.task, req.priority) {
            Ok(()) => {
                if req.sla.is_strict() {
                    let _ = host.set_core_performance(machine, 0, voltgrid_host::PState::P0);
                }
                info!(task = req.task, vm, machine, sla = ?req.sla, "task placed");
                Placement::Assigned { vm, machine }
            }
            Err(HostError::OutOfMemory { machine, .. }) => {
                warn!(task = req.task, vm, machine, "commit lost memory race");
                Placement::MemoryRace { machine }
            }
            Err(e) => {
                warn!(task = req.task, vm, error = %e, "dispatch failed");
                Placement::Deferred { waking: None }
            }
        }
    }

    /// First sleeping machine (efficiency order) that matches the CPU
    /// family and could hold the task once awake. A machine already
    /// being woken means capacity is coming — nothing new is issued.
    fn wake_candidate(
        &self,
        host: &dyn Host,
        fleet: &FleetRegistry,
        req: &TaskRequest,
    ) -> Option<MachineId> {
        for &m in fleet.efficiency_order() {
            let Ok(info) = host.machine_info(m) else {
                continue;
            };
            if info.s_state == SState::S0 || info.cpu != req.cpu {
                continue;
            }
            if info.memory_used + req.memory + host.vm_overhead() > info.memory_size {
                continue;
            }
            if fleet.is_waking(m) {
                // A wake is already in flight; the task just waits.
                return None;
            }
            return Some(m);
        }
        None
    }
}
