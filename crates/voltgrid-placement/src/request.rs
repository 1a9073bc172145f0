//! Per-task placement request and priority derivation.

use voltgrid_host::{CpuFamily, Priority, SlaClass, TaskId, TaskInfo, Time, VmType};

/// Everything a policy needs to know about one incoming task.
#[derive(Debug, Clone)]
pub struct TaskRequest {
    pub task: TaskId,
    pub cpu: CpuFamily,
    pub vm_type: VmType,
    /// Memory footprint in MB.
    pub memory: u64,
    pub sla: SlaClass,
    pub target_completion: Time,
    pub priority: Priority,
}

impl TaskRequest {
    /// Build a request from a host task snapshot, deriving priority.
    pub fn from_info(info: &TaskInfo, now: Time, urgent_window: Time) -> Self {
        let priority = derive_priority(info.sla, info.target_completion, now, urgent_window);
        TaskRequest {
            task: info.id,
            cpu: info.cpu,
            vm_type: info.vm_type,
            memory: info.memory,
            sla: info.sla,
            target_completion: info.target_completion,
            priority,
        }
    }
}

/// Dispatch priority for a task.
///
/// HIGH for SLA0 or any task inside the urgent window (a deadline the
/// clock has already passed counts as urgent — it cannot get less
/// late); MID for SLA1; LOW for SLA2/SLA3. A zero target means "no
/// deadline" and never triggers the urgency override.
pub fn derive_priority(sla: SlaClass, target_completion: Time, now: Time, urgent_window: Time) -> Priority {
    let urgent = target_completion > 0 && target_completion.saturating_sub(now) <= urgent_window;
    if urgent || sla == SlaClass::Sla0 {
        Priority::High
    } else if sla == SlaClass::Sla1 {
        Priority::Mid
    } else {
        Priority::Low
    }
}
