//! In-memory simulated host.
//!
//! `SimHost` implements [`Host`] over a fleet description, with a
//! discrete-event queue for the asynchronous effects the real driver
//! reports through callbacks:
//!
//! - S-state transitions settle after `state_latency` and surface as
//!   [`HostEvent::StateChangeComplete`]
//! - migrations settle after `migration_latency` and surface as
//!   [`HostEvent::MigrationComplete`]
//! - running tasks finish after their duration; a task predicted to
//!   miss its target raises [`HostEvent::SlaWarning`] ahead of time
//! - crossing the memory watermark raises [`HostEvent::MemoryWarning`]
//!
//! Every mutator appends to a [`Mutation`] log so tests can assert
//! exactly which host operations a callback issued. Energy is
//! integrated continuously from each machine's per-S-state power draw,
//! scaled by the current P-state while in S0.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{HostError, HostResult};
use crate::types::*;
use crate::Host;

/// Default VM memory overhead in MB.
const DEFAULT_VM_OVERHEAD: u64 = 8;
/// Default latency of an S-state transition, in ticks.
const DEFAULT_STATE_LATENCY: Time = 100_000;
/// Default latency of a VM migration, in ticks.
const DEFAULT_MIGRATION_LATENCY: Time = 1_000_000;
/// How far ahead of a predicted miss the SLA warning fires.
const DEFAULT_SLA_LEAD: Time = 2_000_000;
/// Fraction of machine memory above which pressure is reported.
const MEMORY_WATERMARK: f64 = 0.9;

/// P-state scaling applied to S0 power draw.
const P_STATE_POWER: [f64; 4] = [1.0, 0.8, 0.65, 0.5];

// ── Fleet and workload descriptions ────────────────────────────────

/// Description of one machine, loadable from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimMachineSpec {
    pub cpu: CpuFamily,
    pub num_cpus: u32,
    /// Total memory in MB.
    pub memory: u64,
    /// Power draw per S-state (S0 first). Padded with zeros if short.
    #[serde(default = "default_costs")]
    pub s_state_costs: Vec<u64>,
    #[serde(default)]
    pub gpus: bool,
    /// Initial sleep state.
    #[serde(default = "default_s_state")]
    pub s_state: SState,
}

fn default_costs() -> Vec<u64> {
    vec![120, 60, 40, 30, 20, 10, 0]
}

fn default_s_state() -> SState {
    SState::S0
}

/// Description of one task, loadable from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimTaskSpec {
    /// Arrival time in ticks (consumed by the driver, not the host).
    pub arrival: Time,
    pub cpu: CpuFamily,
    pub vm_type: VmType,
    /// Memory footprint in MB.
    pub memory: u64,
    pub sla: SlaClass,
    /// Run time once dispatched, in ticks.
    pub duration: Time,
    pub target: Time,
}

// ── Events and mutations ───────────────────────────────────────────

/// An asynchronous completion the host reports back to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostEvent {
    TaskComplete(TaskId),
    StateChangeComplete(MachineId),
    MigrationComplete(VmId),
    SlaWarning(TaskId),
    MemoryWarning(MachineId),
}

/// One host mutation, recorded for test assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    CreateVm { vm: VmId, vm_type: VmType, cpu: CpuFamily },
    AttachVm { vm: VmId, machine: MachineId },
    AddTask { vm: VmId, task: TaskId, priority: Priority },
    RemoveTask { vm: VmId, task: TaskId },
    ShutdownVm { vm: VmId },
    Migrate { vm: VmId, target: MachineId },
    SetState { machine: MachineId, state: SState },
    SetCorePerformance { machine: MachineId, core: u32, pstate: PState },
    SetTaskPriority { task: TaskId, priority: Priority },
}

/// Internal pending effect; applied when its time arrives.
#[derive(Debug, Clone, Copy)]
enum Pending {
    TaskFinish { task: TaskId, vm: VmId, finish: Time },
    StateSettle { machine: MachineId, state: SState },
    MigrateSettle { vm: VmId, target: MachineId },
    SlaAlarm { task: TaskId },
    MemPressure { machine: MachineId },
}

struct QueuedEvent {
    at: Time,
    seq: u64,
    pending: Pending,
}

impl PartialEq for QueuedEvent {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl Eq for QueuedEvent {}

impl PartialOrd for QueuedEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedEvent {
    // Reversed so BinaryHeap pops the earliest event first.
    fn cmp(&self, other: &Self) -> Ordering {
        (other.at, other.seq).cmp(&(self.at, self.seq))
    }
}

// ── Internal entity state ──────────────────────────────────────────

struct SimMachine {
    cpu: CpuFamily,
    num_cpus: u32,
    memory_size: u64,
    memory_used: u64,
    s_state: SState,
    p_state: PState,
    s_state_costs: Vec<u64>,
    gpus: bool,
    pending_state: Option<SState>,
    pressure_latched: bool,
}

impl SimMachine {
    fn watts(&self) -> f64 {
        let base = self
            .s_state_costs
            .get(self.s_state.cost_index())
            .copied()
            .unwrap_or(0) as f64;
        if self.s_state == SState::S0 {
            base * P_STATE_POWER[self.p_state as usize]
        } else {
            base
        }
    }
}

struct SimVm {
    vm_type: VmType,
    cpu: CpuFamily,
    machine: Option<MachineId>,
    tasks: Vec<TaskId>,
    migrating_to: Option<MachineId>,
    alive: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskState {
    Waiting,
    Running { vm: VmId, finish: Time },
    Done,
    Killed,
}

struct SimTask {
    info: TaskInfo,
    duration: Time,
    state: TaskState,
}

// ── The host ───────────────────────────────────────────────────────

/// In-memory [`Host`] implementation with a discrete-event queue.
pub struct SimHost {
    machines: Vec<SimMachine>,
    vms: Vec<SimVm>,
    tasks: BTreeMap<TaskId, SimTask>,
    next_task: TaskId,
    queue: BinaryHeap<QueuedEvent>,
    seq: u64,
    clock: Time,
    vm_overhead: u64,
    state_latency: Time,
    migration_latency: Time,
    sla_lead: Time,
    /// Accumulated energy in watt-seconds.
    energy_ws: f64,
    completed: [u64; 4],
    violated: [u64; 4],
    mutations: Vec<Mutation>,
}

impl SimHost {
    pub fn new(specs: Vec<SimMachineSpec>) -> Self {
        let machines = specs
            .into_iter()
            .map(|s| SimMachine {
                cpu: s.cpu,
                num_cpus: s.num_cpus,
                memory_size: s.memory,
                memory_used: 0,
                s_state: s.s_state,
                p_state: PState::P3,
                s_state_costs: s.s_state_costs,
                gpus: s.gpus,
                pending_state: None,
                pressure_latched: false,
            })
            .collect();
        Self {
            machines,
            vms: Vec::new(),
            tasks: BTreeMap::new(),
            next_task: 0,
            queue: BinaryHeap::new(),
            seq: 0,
            clock: 0,
            vm_overhead: DEFAULT_VM_OVERHEAD,
            state_latency: DEFAULT_STATE_LATENCY,
            migration_latency: DEFAULT_MIGRATION_LATENCY,
            sla_lead: DEFAULT_SLA_LEAD,
            energy_ws: 0.0,
            completed: [0; 4],
            violated: [0; 4],
            mutations: Vec::new(),
        }
    }

    pub fn with_vm_overhead(mut self, mb: u64) -> Self {
        self.vm_overhead = mb;
        self
    }

    pub fn with_state_latency(mut self, ticks: Time) -> Self {
        self.state_latency = ticks;
        self
    }

    pub fn with_migration_latency(mut self, ticks: Time) -> Self {
        self.migration_latency = ticks;
        self
    }

    pub fn now(&self) -> Time {
        self.clock
    }

    /// Register a task with the host. Dispatch is the scheduler's job.
    pub fn submit_task(&mut self, spec: &SimTaskSpec) -> TaskId {
        let id = self.next_task;
        self.next_task += 1;
        self.tasks.insert(
            id,
            SimTask {
                info: TaskInfo {
                    id,
                    cpu: spec.cpu,
                    vm_type: spec.vm_type,
                    memory: spec.memory,
                    sla: spec.sla,
                    target_completion: spec.target,
                    priority: Priority::Low,
                },
                duration: spec.duration,
                state: TaskState::Waiting,
            },
        );
        id
    }

    /// Time of the earliest queued event, if any.
    pub fn next_event_at(&self) -> Option<Time> {
        self.queue.peek().map(|e| e.at)
    }

    /// Advance the clock (integrating energy) without popping events.
    pub fn advance_to(&mut self, t: Time) {
        if t <= self.clock {
            return;
        }
        let dt_secs = (t - self.clock) as f64 / 1_000_000.0;
        let watts: f64 = self.machines.iter().map(SimMachine::watts).sum();
        self.energy_ws += watts * dt_secs;
        self.clock = t;
    }

    /// Pop the next due event, advancing the clock to its timestamp.
    ///
    /// Stale entries (a finish for a task that was removed, a settle
    /// for a superseded transition) are dropped silently.
    pub fn pop_event(&mut self) -> Option<(Time, HostEvent)> {
        while let Some(entry) = self.queue.pop() {
            self.advance_to(entry.at);
            if let Some(ev) = self.apply(entry.pending) {
                return Some((entry.at, ev));
            }
        }
        None
    }

    pub fn mutations(&self) -> &[Mutation] {
        &self.mutations
    }

    pub fn take_mutations(&mut self) -> Vec<Mutation> {
        std::mem::take(&mut self.mutations)
    }

    // ── Internal helpers ───────────────────────────────────────────

    fn schedule(&mut self, at: Time, pending: Pending) {
        let seq = self.seq;
        self.seq += 1;
        self.queue.push(QueuedEvent { at, seq, pending });
    }

    fn apply(&mut self, pending: Pending) -> Option<HostEvent> {
        match pending {
            Pending::TaskFinish { task, vm, finish } => {
                let t = self.tasks.get_mut(&task)?;
                match t.state {
                    TaskState::Running { vm: v, finish: f } if v == vm && f == finish => {}
                    _ => return None,
                }
                t.state = TaskState::Done;
                let sla = t.info.sla;
                let late = finish > t.info.target_completion;
                let mem = t.info.memory;
                self.completed[sla.index()] += 1;
                if late {
                    self.violated[sla.index()] += 1;
                }
                let home = self.vms.get_mut(vm as usize).and_then(|simvm| {
                    simvm.tasks.retain(|&id| id != task);
                    simvm.machine
                });
                if let Some(m) = home {
                    self.release_memory(m, mem);
                }
                Some(HostEvent::TaskComplete(task))
            }
            Pending::StateSettle { machine, state } => {
                let m = self.machines.get_mut(machine as usize)?;
                if m.pending_state != Some(state) {
                    return None;
                }
                m.pending_state = None;
                m.s_state = state;
                debug!(machine, ?state, "s-state transition settled");
                Some(HostEvent::StateChangeComplete(machine))
            }
            Pending::MigrateSettle { vm, target } => {
                let simvm = self.vms.get(vm as usize)?;
                if !simvm.alive || simvm.migrating_to != Some(target) {
                    return None;
                }
                let footprint = self.vm_footprint(vm);
                let source = self.vms[vm as usize].machine;
                if let Some(src) = source {
                    self.release_memory(src, footprint);
                }
                if let Some(tgt) = self.machines.get_mut(target as usize) {
                    tgt.memory_used += footprint;
                }
                let simvm = &mut self.vms[vm as usize];
                simvm.machine = Some(target);
                simvm.migrating_to = None;
                debug!(vm, target, "migration settled");
                self.check_pressure(target);
                Some(HostEvent::MigrationComplete(vm))
            }
            Pending::SlaAlarm { task } => {
                let t = self.tasks.get(&task)?;
                match t.state {
                    TaskState::Running { finish, .. } if finish > t.info.target_completion => {
                        Some(HostEvent::SlaWarning(task))
                    }
                    _ => None,
                }
            }
            Pending::MemPressure { machine } => Some(HostEvent::MemoryWarning(machine)),
        }
    }

    /// Overhead plus the memory of every task the VM currently runs.
    fn vm_footprint(&self, vm: VmId) -> u64 {
        let simvm = &self.vms[vm as usize];
        let task_mem: u64 = simvm
            .tasks
            .iter()
            .filter_map(|t| self.tasks.get(t))
            .map(|t| t.info.memory)
            .sum();
        self.vm_overhead + task_mem
    }

    fn release_memory(&mut self, machine: MachineId, mb: u64) {
        if let Some(m) = self.machines.get_mut(machine as usize) {
            m.memory_used = m.memory_used.saturating_sub(mb);
            if (m.memory_used as f64) < MEMORY_WATERMARK * m.memory_size as f64 {
                m.pressure_latched = false;
            }
        }
    }

    fn check_pressure(&mut self, machine: MachineId) {
        let Some(m) = self.machines.get_mut(machine as usize) else {
            return;
        };
        let over = m.memory_used as f64 > MEMORY_WATERMARK * m.memory_size as f64;
        if over && !m.pressure_latched {
            m.pressure_latched = true;
            let at = self.clock;
            self.schedule(at, Pending::MemPressure { machine });
        }
    }

    fn machine_mut(&mut self, id: MachineId) -> HostResult<&mut SimMachine> {
        self.machines
            .get_mut(id as usize)
            .ok_or(HostError::UnknownMachine(id))
    }

    fn live_vm(&self, id: VmId) -> HostResult<&SimVm> {
        match self.vms.get(id as usize) {
            Some(vm) if vm.alive => Ok(vm),
            _ => Err(HostError::UnknownVm(id)),
        }
    }
}

impl Host for SimHost {
    fn machine_count(&self) -> u32 {
        self.machines.len() as u32
    }

    fn machine_info(&self, machine: MachineId) -> HostResult<MachineInfo> {
        let m = self
            .machines
            .get(machine as usize)
            .ok_or(HostError::UnknownMachine(machine))?;
        let mut active_tasks = 0;
        let mut active_vms = 0;
        for vm in &self.vms {
            if vm.alive && vm.machine == Some(machine) {
                active_vms += 1;
                active_tasks += vm.tasks.len() as u32;
            }
        }
        Ok(MachineInfo {
            id: machine,
            cpu: m.cpu,
            num_cpus: m.num_cpus,
            memory_size: m.memory_size,
            memory_used: m.memory_used,
            s_state: m.s_state,
            p_state: m.p_state,
            s_state_costs: m.s_state_costs.clone(),
            gpus: m.gpus,
            active_tasks,
            active_vms,
        })
    }

    fn vm_info(&self, vm: VmId) -> HostResult<VmInfo> {
        let v = self.live_vm(vm)?;
        Ok(VmInfo {
            id: vm,
            vm_type: v.vm_type,
            cpu: v.cpu,
            machine_id: v.machine,
            active_tasks: v.tasks.clone(),
        })
    }

    fn task_info(&self, task: TaskId) -> HostResult<TaskInfo> {
        self.tasks
            .get(&task)
            .map(|t| t.info.clone())
            .ok_or(HostError::UnknownTask(task))
    }

    fn cluster_energy(&self) -> f64 {
        self.energy_ws / 3_600_000.0
    }

    fn sla_report(&self, sla: SlaClass) -> f64 {
        let i = sla.index();
        if self.completed[i] == 0 {
            0.0
        } else {
            100.0 * self.violated[i] as f64 / self.completed[i] as f64
        }
    }

    fn vm_overhead(&self) -> u64 {
        self.vm_overhead
    }

    fn create_vm(&mut self, vm_type: VmType, cpu: CpuFamily) -> HostResult<VmId> {
        let id = self.vms.len() as VmId;
        self.vms.push(SimVm {
            vm_type,
            cpu,
            machine: None,
            tasks: Vec::new(),
            migrating_to: None,
            alive: true,
        });
        self.mutations.push(Mutation::CreateVm { vm: id, vm_type, cpu });
        Ok(id)
    }

    fn attach_vm(&mut self, vm: VmId, machine: MachineId) -> HostResult<()> {
        self.live_vm(vm)?;
        let overhead = self.vm_overhead;
        let m = self.machine_mut(machine)?;
        if m.s_state != SState::S0 {
            return Err(HostError::MachineNotActive(machine));
        }
        if m.memory_used + overhead > m.memory_size {
            return Err(HostError::OutOfMemory {
                machine,
                needed: overhead,
                free: m.memory_size.saturating_sub(m.memory_used),
            });
        }
        m.memory_used += overhead;
        self.vms[vm as usize].machine = Some(machine);
        self.mutations.push(Mutation::AttachVm { vm, machine });
        self.check_pressure(machine);
        Ok(())
    }

    fn add_task(&mut self, vm: VmId, task: TaskId, priority: Priority) -> HostResult<()> {
        let v = self.live_vm(vm)?;
        if v.migrating_to.is_some() {
            return Err(HostError::VmMigrating(vm));
        }
        let machine = v.machine.ok_or(HostError::VmNotAttached(vm))?;
        let (mem, duration, target) = {
            let t = self.tasks.get(&task).ok_or(HostError::UnknownTask(task))?;
            (t.info.memory, t.duration, t.info.target_completion)
        };
        let m = self.machine_mut(machine)?;
        if m.s_state != SState::S0 {
            return Err(HostError::MachineNotActive(machine));
        }
        if m.memory_used + mem > m.memory_size {
            return Err(HostError::OutOfMemory {
                machine,
                needed: mem,
                free: m.memory_size.saturating_sub(m.memory_used),
            });
        }
        m.memory_used += mem;
        self.vms[vm as usize].tasks.push(task);
        let finish = self.clock + duration;
        if let Some(t) = self.tasks.get_mut(&task) {
            t.state = TaskState::Running { vm, finish };
            t.info.priority = priority;
        }
        self.schedule(finish, Pending::TaskFinish { task, vm, finish });
        if finish > target {
            let alarm = target.saturating_sub(self.sla_lead).max(self.clock);
            self.schedule(alarm, Pending::SlaAlarm { task });
        }
        self.mutations.push(Mutation::AddTask { vm, task, priority });
        self.check_pressure(machine);
        Ok(())
    }

    fn remove_task(&mut self, vm: VmId, task: TaskId) -> HostResult<()> {
        let v = self.live_vm(vm)?;
        if !v.tasks.contains(&task) {
            return Err(HostError::TaskNotOnVm { task, vm });
        }
        let machine = v.machine;
        let mem = self
            .tasks
            .get(&task)
            .map(|t| t.info.memory)
            .ok_or(HostError::UnknownTask(task))?;
        self.vms[vm as usize].tasks.retain(|&id| id != task);
        if let Some(m) = machine {
            self.release_memory(m, mem);
        }
        if let Some(t) = self.tasks.get_mut(&task) {
            t.state = TaskState::Waiting;
        }
        self.mutations.push(Mutation::RemoveTask { vm, task });
        Ok(())
    }

    fn shutdown_vm(&mut self, vm: VmId) -> HostResult<()> {
        let v = self.live_vm(vm)?;
        if v.migrating_to.is_some() {
            return Err(HostError::VmMigrating(vm));
        }
        let footprint = self.vm_footprint(vm);
        let v = &mut self.vms[vm as usize];
        let machine = v.machine.take();
        let tasks = std::mem::take(&mut v.tasks);
        v.alive = false;
        for task in tasks {
            if let Some(t) = self.tasks.get_mut(&task) {
                t.state = TaskState::Killed;
            }
        }
        if let Some(m) = machine {
            self.release_memory(m, footprint);
        }
        self.mutations.push(Mutation::ShutdownVm { vm });
        Ok(())
    }

    fn migrate_vm(&mut self, vm: VmId, target: MachineId) -> HostResult<()> {
        let v = self.live_vm(vm)?;
        if v.migrating_to.is_some() {
            return Err(HostError::VmMigrating(vm));
        }
        if v.machine.is_none() {
            return Err(HostError::VmNotAttached(vm));
        }
        if target as usize >= self.machines.len() {
            return Err(HostError::UnknownMachine(target));
        }
        self.vms[vm as usize].migrating_to = Some(target);
        let at = self.clock + self.migration_latency;
        self.schedule(at, Pending::MigrateSettle { vm, target });
        self.mutations.push(Mutation::Migrate { vm, target });
        Ok(())
    }

    fn set_machine_state(&mut self, machine: MachineId, state: SState) -> HostResult<()> {
        let latency = self.state_latency;
        let at = self.clock + latency;
        let m = self.machine_mut(machine)?;
        m.pending_state = Some(state);
        self.schedule(at, Pending::StateSettle { machine, state });
        self.mutations.push(Mutation::SetState { machine, state });
        Ok(())
    }

    fn set_core_performance(
        &mut self,
        machine: MachineId,
        core: u32,
        pstate: PState,
    ) -> HostResult<()> {
        let m = self.machine_mut(machine)?;
        m.p_state = pstate;
        self.mutations
            .push(Mutation::SetCorePerformance { machine, core, pstate });
        Ok(())
    }

    fn set_task_priority(&mut self, task: TaskId, priority: Priority) -> HostResult<()> {
        let t = self
            .tasks
            .get_mut(&task)
            .ok_or(HostError::UnknownTask(task))?;
        t.info.priority = priority;
        self.mutations.push(Mutation::SetTaskPriority { task, priority });
        Ok(())
    }
}
