//! Domain types shared between the host and the scheduler.
//!
//! These mirror what the host driver reports through its inspectors:
//! machines (physical hosts with sleep and performance states), VMs
//! (typed runtimes bound to at most one machine), and tasks (units of
//! work with an SLA class and a target completion time).

use serde::{Deserialize, Serialize};

/// Simulated time in microsecond ticks.
pub type Time = u64;

/// Identifier of a physical machine.
pub type MachineId = u32;

/// Identifier of a VM.
pub type VmId = u32;

/// Identifier of a task.
pub type TaskId = u64;

// ── CPU / VM taxonomy ──────────────────────────────────────────────

/// CPU family of a machine, VM, or task requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CpuFamily {
    X86,
    Arm,
    Power,
    RiscV,
}

/// Operating-system flavor a VM runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VmType {
    Linux,
    LinuxRt,
    Windows,
    Aix,
}

// ── Power states ───────────────────────────────────────────────────

/// Machine sleep state. `S0` is the only state that accepts work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SState {
    S0,
    S0i1,
    S1,
    S2,
    S3,
    S4,
    S5,
}

impl SState {
    /// Index into a machine's per-S-state cost table.
    pub fn cost_index(self) -> usize {
        match self {
            SState::S0 => 0,
            SState::S0i1 => 1,
            SState::S1 => 2,
            SState::S2 => 3,
            SState::S3 => 4,
            SState::S4 => 5,
            SState::S5 => 6,
        }
    }

    pub fn is_active(self) -> bool {
        self == SState::S0
    }
}

/// Number of entries a complete S-state cost table carries.
pub const S_STATE_COUNT: usize = 7;

/// Per-core performance state. `P0` is maximum frequency, `P3` minimum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PState {
    P0,
    P1,
    P2,
    P3,
}

// ── SLA and priority ───────────────────────────────────────────────

/// Service-level class, strictest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlaClass {
    Sla0,
    Sla1,
    Sla2,
    Sla3,
}

impl SlaClass {
    pub const ALL: [SlaClass; 4] = [SlaClass::Sla0, SlaClass::Sla1, SlaClass::Sla2, SlaClass::Sla3];

    /// Index 0..4, Sla0 first.
    pub fn index(self) -> usize {
        match self {
            SlaClass::Sla0 => 0,
            SlaClass::Sla1 => 1,
            SlaClass::Sla2 => 2,
            SlaClass::Sla3 => 3,
        }
    }

    /// SLA0 and SLA1 drive P-state overrides and placement short-circuits.
    pub fn is_strict(self) -> bool {
        matches!(self, SlaClass::Sla0 | SlaClass::Sla1)
    }
}

/// Dispatch priority of a task on its VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Mid,
    Low,
}

// ── Inspector snapshots ────────────────────────────────────────────

/// Snapshot of one machine as reported by the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineInfo {
    pub id: MachineId,
    pub cpu: CpuFamily,
    pub num_cpus: u32,
    /// Total memory in MB.
    pub memory_size: u64,
    /// Memory in use (host-maintained), in MB.
    pub memory_used: u64,
    pub s_state: SState,
    pub p_state: PState,
    /// Power draw per S-state, indexed by [`SState::cost_index`].
    pub s_state_costs: Vec<u64>,
    pub gpus: bool,
    pub active_tasks: u32,
    pub active_vms: u32,
}

impl MachineInfo {
    /// S0 power draw, used to rank machines by efficiency.
    pub fn s0_cost(&self) -> u64 {
        self.s_state_costs
            .get(SState::S0.cost_index())
            .copied()
            .unwrap_or(u64::MAX)
    }

    /// `active_tasks / num_cpus`; zero when the machine has no cores.
    pub fn utilization(&self) -> f64 {
        if self.num_cpus == 0 {
            0.0
        } else {
            f64::from(self.active_tasks) / f64::from(self.num_cpus)
        }
    }
}

/// Snapshot of one VM as reported by the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmInfo {
    pub id: VmId,
    pub vm_type: VmType,
    pub cpu: CpuFamily,
    /// The machine this VM is attached to, if any.
    pub machine_id: Option<MachineId>,
    pub active_tasks: Vec<TaskId>,
}

impl VmInfo {
    pub fn is_idle(&self) -> bool {
        self.active_tasks.is_empty()
    }
}

/// Immutable task attributes as reported by the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInfo {
    pub id: TaskId,
    pub cpu: CpuFamily,
    pub vm_type: VmType,
    /// Memory footprint in MB.
    pub memory: u64,
    pub sla: SlaClass,
    pub target_completion: Time,
    pub priority: Priority,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utilization_counts_tasks_per_core() {
        let info = MachineInfo {
            id: 0,
            cpu: CpuFamily::X86,
            num_cpus: 4,
            memory_size: 1024,
            memory_used: 0,
            s_state: SState::S0,
            p_state: PState::P3,
            s_state_costs: vec![120, 60, 40, 30, 20, 10, 0],
            gpus: false,
            active_tasks: 1,
            active_vms: 1,
        };
        assert_eq!(info.utilization(), 0.25);
        assert_eq!(info.s0_cost(), 120);
    }

    #[test]
    fn utilization_zero_without_cores() {
        let info = MachineInfo {
            id: 0,
            cpu: CpuFamily::Arm,
            num_cpus: 0,
            memory_size: 0,
            memory_used: 0,
            s_state: SState::S5,
            p_state: PState::P3,
            s_state_costs: vec![],
            gpus: false,
            active_tasks: 3,
            active_vms: 0,
        };
        assert_eq!(info.utilization(), 0.0);
        assert_eq!(info.s0_cost(), u64::MAX);
    }

    #[test]
    fn strict_sla_classes() {
        assert!(SlaClass::Sla0.is_strict());
        assert!(SlaClass::Sla1.is_strict());
        assert!(!SlaClass::Sla2.is_strict());
        assert!(!SlaClass::Sla3.is_strict());
    }

    #[test]
    fn sstate_cost_indices_are_dense() {
        let states = [
            SState::S0,
            SState::S0i1,
            SState::S1,
            SState::S2,
            SState::S3,
            SState::S4,
            SState::S5,
        ];
        for (i, s) in states.iter().enumerate() {
            assert_eq!(s.cost_index(), i);
        }
        assert_eq!(states.len(), S_STATE_COUNT);
    }
}
