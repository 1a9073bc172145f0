//! voltgrid-host — the interface the scheduler drives the fleet through.
//!
//! The host is the event-driven simulator that owns machines, VMs, and
//! tasks. The scheduler only ever talks to it synchronously, inside a
//! callback, through the [`Host`] trait:
//!
//! - **Inspectors** snapshot an entity's state
//! - **Mutators** request changes; long-running effects (migration,
//!   sleep-state transitions) complete later via dedicated callbacks
//!
//! The crate also ships [`SimHost`], an in-memory host with a
//! discrete-event queue, used by the integration tests and the `voltd`
//! demo driver.

pub mod error;
pub mod sim;
pub mod types;

pub use error::{HostError, HostResult};
pub use sim::{HostEvent, Mutation, SimHost, SimMachineSpec, SimTaskSpec};
pub use types::*;

/// Synchronous interface onto the fleet.
///
/// Every call either succeeds or returns a [`HostError`]; callers
/// treat any error as "this entity is not a candidate for the rest of
/// the callback". No call blocks: migrations and S-state transitions
/// return immediately and report completion through the host's
/// callback surface.
pub trait Host {
    // ── Inspectors ─────────────────────────────────────────────────

    /// Number of machines in the fleet. Machine ids are `0..count`.
    fn machine_count(&self) -> u32;

    fn machine_info(&self, machine: MachineId) -> HostResult<MachineInfo>;

    fn vm_info(&self, vm: VmId) -> HostResult<VmInfo>;

    fn task_info(&self, task: TaskId) -> HostResult<TaskInfo>;

    /// Aggregate cluster energy consumed so far, in kWh.
    fn cluster_energy(&self) -> f64;

    /// Violation percentage for an SLA class over completed tasks.
    fn sla_report(&self, sla: SlaClass) -> f64;

    /// Fixed memory overhead (MB) a VM consumes on its host machine.
    fn vm_overhead(&self) -> u64;

    // ── Mutators ───────────────────────────────────────────────────

    /// Create an unattached VM of the given type and CPU family.
    fn create_vm(&mut self, vm_type: VmType, cpu: CpuFamily) -> HostResult<VmId>;

    /// Attach an unattached VM to an S0 machine (synchronous).
    fn attach_vm(&mut self, vm: VmId, machine: MachineId) -> HostResult<()>;

    /// Dispatch a task onto a VM at the given priority.
    fn add_task(&mut self, vm: VmId, task: TaskId, priority: Priority) -> HostResult<()>;

    fn remove_task(&mut self, vm: VmId, task: TaskId) -> HostResult<()>;

    /// Destroy a VM, releasing its memory on the host machine.
    fn shutdown_vm(&mut self, vm: VmId) -> HostResult<()>;

    /// Start migrating a VM to another machine. Completion is reported
    /// via the `MigrationComplete` callback.
    fn migrate_vm(&mut self, vm: VmId, target: MachineId) -> HostResult<()>;

    /// Request an S-state transition. Completion is reported via the
    /// `StateChangeComplete` callback.
    fn set_machine_state(&mut self, machine: MachineId, state: SState) -> HostResult<()>;

    /// Set a core's P-state; the host propagates to sibling cores.
    fn set_core_performance(
        &mut self,
        machine: MachineId,
        core: u32,
        pstate: PState,
    ) -> HostResult<()>;

    fn set_task_priority(&mut self, task: TaskId, priority: Priority) -> HostResult<()>;
}
