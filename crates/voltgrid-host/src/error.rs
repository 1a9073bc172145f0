//! Host error types.
//!
//! Any `Err` from an inspector or mutator means the entity is
//! unavailable for the rest of the current callback; the scheduler
//! skips it and never propagates the failure back to the host.

use thiserror::Error;

use crate::types::{MachineId, TaskId, VmId};

/// Errors a host inspector or mutator can report.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("unknown machine: {0}")]
    UnknownMachine(MachineId),

    #[error("unknown vm: {0}")]
    UnknownVm(VmId),

    #[error("unknown task: {0}")]
    UnknownTask(TaskId),

    #[error("machine {0} is not active")]
    MachineNotActive(MachineId),

    #[error("machine {machine} out of memory ({needed} MB needed, {free} MB free)")]
    OutOfMemory {
        machine: MachineId,
        needed: u64,
        free: u64,
    },

    #[error("vm {0} is not attached to a machine")]
    VmNotAttached(VmId),

    #[error("vm {0} has a migration in flight")]
    VmMigrating(VmId),

    #[error("task {task} is not running on vm {vm}")]
    TaskNotOnVm { task: TaskId, vm: VmId },
}

pub type HostResult<T> = Result<T, HostError>;
