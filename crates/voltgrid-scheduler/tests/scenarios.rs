//! End-to-end scheduler scenarios against the simulated host.

use voltgrid_host::{
    CpuFamily, Host, HostEvent, Mutation, PState, Priority, SState, SimHost, SimMachineSpec,
    SimTaskSpec, SlaClass, VmType,
};
use voltgrid_scheduler::{Scheduler, SchedulerConfig};

fn machine(cpu: CpuFamily, num_cpus: u32, memory: u64, s0_cost: u64, s_state: SState) -> SimMachineSpec {
    SimMachineSpec {
        cpu,
        num_cpus,
        memory,
        s_state_costs: vec![s0_cost, 60, 40, 30, 20, 10, 0],
        gpus: false,
        s_state,
    }
}

fn task(cpu: CpuFamily, vm_type: VmType, memory: u64, sla: SlaClass, duration: u64, target: u64) -> SimTaskSpec {
    SimTaskSpec {
        arrival: 0,
        cpu,
        vm_type,
        memory,
        sla,
        duration,
        target,
    }
}

fn scheduler_with(warm_pool: u32) -> Scheduler {
    let mut config = SchedulerConfig::default();
    config.warm_pool = warm_pool;
    Scheduler::new(config).unwrap()
}

/// Structural invariants checked after interesting callbacks.
fn assert_invariants(host: &SimHost, s: &Scheduler) {
    for &vm in s.fleet().vms() {
        let Ok(info) = host.vm_info(vm) else { continue };
        if let Some(m) = info.machine_id {
            let minfo = host.machine_info(m).unwrap();
            assert!(
                minfo.memory_used <= minfo.memory_size,
                "machine {m} over-committed"
            );
        }
    }
    for &m in s.fleet().machines() {
        if s.fleet().is_active(m) {
            // One-callback lag tolerated for transitions we initiated.
            let state = host.machine_info(m).unwrap().s_state;
            assert!(
                state == SState::S0 || s.fleet().is_waking(m),
                "active machine {m} reported {state:?}"
            );
        }
    }
}

// ── Scenario 1: warm pool consumes one task ────────────────────────

#[test]
fn warm_pool_consumes_one_task() {
    // Efficiency order is 3, 2, 1, 0.
    let mut host = SimHost::new(vec![
        machine(CpuFamily::X86, 4, 4096, 100, SState::S0),
        machine(CpuFamily::X86, 4, 4096, 90, SState::S0),
        machine(CpuFamily::X86, 4, 4096, 80, SState::S0),
        machine(CpuFamily::X86, 4, 4096, 70, SState::S0),
    ]);
    let mut s = scheduler_with(8);
    s.init(&mut host);
    assert_eq!(s.fleet().vms().len(), 8);
    host.take_mutations();

    let t = host.submit_task(&task(
        CpuFamily::X86,
        VmType::Linux,
        1024,
        SlaClass::Sla2,
        5_000_000,
        1_000_000_000,
    ));
    s.new_task(&mut host, 0, t);

    // First idle compatible VM in insertion order takes the task, at
    // low priority, with no machine state change.
    let mutations = host.take_mutations();
    let first_vm = s.fleet().vms()[0];
    assert!(mutations.contains(&Mutation::AddTask { vm: first_vm, task: t, priority: Priority::Low }));
    assert!(!mutations.iter().any(|m| matches!(m, Mutation::SetState { .. })));
    assert!(!mutations.iter().any(|m| matches!(m, Mutation::CreateVm { .. })));

    // The hosting machine (the most efficient one) settles at P2 on
    // the next sweep: one task over four cores.
    s.periodic_check(&mut host, 1_000_000);
    let mutations = host.take_mutations();
    assert_eq!(
        mutations,
        vec![Mutation::SetCorePerformance { machine: 3, core: 0, pstate: PState::P2 }]
    );
    assert_invariants(&host, &s);
}

// ── Scenario 2: SLA0 urgency forces a wake-up ──────────────────────

#[test]
fn sla0_wakes_sleeping_machine_and_places_on_completion() {
    // The task's CPU family only exists on sleeping machines; the
    // cheapest of them (id 3) must be woken.
    let mut host = SimHost::new(vec![
        machine(CpuFamily::X86, 5, 4096, 50, SState::S0),
        machine(CpuFamily::X86, 5, 4096, 60, SState::S0),
        machine(CpuFamily::Arm, 4, 4096, 90, SState::S5),
        machine(CpuFamily::Arm, 4, 4096, 70, SState::S5),
        machine(CpuFamily::Arm, 4, 4096, 80, SState::S5),
    ]);
    let mut s = scheduler_with(0);
    s.init(&mut host);
    host.take_mutations();

    let t = host.submit_task(&task(
        CpuFamily::Arm,
        VmType::Linux,
        512,
        SlaClass::Sla0,
        2_000_000,
        13_000_000,
    ));
    host.advance_to(1_000_000);
    s.new_task(&mut host, 1_000_000, t);

    let mutations = host.take_mutations();
    assert!(mutations.contains(&Mutation::SetState { machine: 3, state: SState::S0 }));
    assert!(!mutations.iter().any(|m| matches!(m, Mutation::AddTask { .. })));
    assert_eq!(s.fleet().deferred.len(), 1);
    assert!(s.fleet().is_waking(3));

    // The wake settles; the handler builds the VM bouquet, drains the
    // deferred task onto an idle Linux VM, and pins core 0 at P0.
    let (at, ev) = host.pop_event().unwrap();
    assert_eq!(ev, HostEvent::StateChangeComplete(3));
    s.state_change_complete(&mut host, at, 3);

    let mutations = host.take_mutations();
    let vm = match mutations
        .iter()
        .find(|m| matches!(m, Mutation::AddTask { .. }))
    {
        Some(Mutation::AddTask { vm, task, priority }) => {
            assert_eq!(*task, t);
            assert_eq!(*priority, Priority::High);
            *vm
        }
        _ => panic!("deferred task was not placed"),
    };
    assert_eq!(host.vm_info(vm).unwrap().vm_type, VmType::Linux);
    assert_eq!(host.vm_info(vm).unwrap().machine_id, Some(3));
    assert!(mutations.contains(&Mutation::SetCorePerformance { machine: 3, core: 0, pstate: PState::P0 }));
    assert!(s.fleet().deferred.is_empty());
    assert!(!s.fleet().is_waking(3));
    assert_invariants(&host, &s);
}

// ── Scenario 3: reconciliation P-state demotion ────────────────────

#[test]
fn lone_sla3_task_demotes_to_p2() {
    let mut host = SimHost::new(vec![
        machine(CpuFamily::X86, 4, 4096, 50, SState::S0),
        machine(CpuFamily::X86, 4, 4096, 60, SState::S0),
    ]);
    let mut s = scheduler_with(0);
    s.init(&mut host);

    let t = host.submit_task(&task(
        CpuFamily::X86,
        VmType::Linux,
        256,
        SlaClass::Sla3,
        50_000_000,
        1_000_000_000,
    ));
    s.new_task(&mut host, 0, t);
    host.take_mutations();

    // utilization 1/4 = 0.25 ≤ 0.30: the busy machine steps to P2.
    s.periodic_check(&mut host, 1_000_000);
    let mutations = host.take_mutations();
    assert_eq!(
        mutations,
        vec![Mutation::SetCorePerformance { machine: 0, core: 0, pstate: PState::P2 }]
    );
}

// ── Scenario 4: pending migration excludes placement ───────────────

#[test]
fn pending_migration_excludes_vm_from_placement() {
    let mut host = SimHost::new(vec![
        machine(CpuFamily::X86, 4, 4096, 50, SState::S0),
        machine(CpuFamily::X86, 4, 4096, 60, SState::S0),
    ]);
    let mut s = scheduler_with(0);
    s.init(&mut host);

    // V idles on machine 0 but is migrating to machine 1; W idles too.
    let v = host.create_vm(VmType::Linux, CpuFamily::X86).unwrap();
    host.attach_vm(v, 0).unwrap();
    s.fleet_mut().push_vm(v);
    let w = host.create_vm(VmType::Linux, CpuFamily::X86).unwrap();
    host.attach_vm(w, 0).unwrap();
    s.fleet_mut().push_vm(w);
    host.migrate_vm(v, 1).unwrap();
    s.fleet_mut().insert_pending_migration(v, 1, 0);
    host.take_mutations();

    let t = host.submit_task(&task(
        CpuFamily::X86,
        VmType::Linux,
        256,
        SlaClass::Sla1,
        5_000_000,
        1_000_000_000,
    ));
    s.new_task(&mut host, 0, t);

    // V would short-circuit as an idle VM for SLA1 — it must be
    // skipped in favor of W.
    let mutations = host.take_mutations();
    assert!(mutations.contains(&Mutation::AddTask { vm: w, task: t, priority: Priority::Mid }));
    assert!(!mutations.iter().any(|m| matches!(m, Mutation::AddTask { vm, .. } if *vm == v)));
    assert_invariants(&host, &s);
}

// ── Scenario 5: memory-warning handling ────────────────────────────

#[test]
fn memory_warning_raises_all_cores_without_shutdown() {
    let mut host = SimHost::new(vec![machine(CpuFamily::X86, 4, 8192, 50, SState::S0)]);
    let mut s = scheduler_with(0);
    s.init(&mut host);

    // Three VMs carrying 5, 2, and 2 tasks.
    let mut vms = Vec::new();
    for count in [5u32, 2, 2] {
        let vm = host.create_vm(VmType::Linux, CpuFamily::X86).unwrap();
        host.attach_vm(vm, 0).unwrap();
        s.fleet_mut().push_vm(vm);
        for _ in 0..count {
            let t = host.submit_task(&task(
                CpuFamily::X86,
                VmType::Linux,
                64,
                SlaClass::Sla3,
                500_000_000,
                1_000_000_000,
            ));
            host.add_task(vm, t, Priority::Low).unwrap();
        }
        vms.push(vm);
    }
    host.take_mutations();

    s.memory_warning(&mut host, 1_000_000, 0);

    let mutations = host.take_mutations();
    let p0_cores: Vec<u32> = mutations
        .iter()
        .filter_map(|m| match m {
            Mutation::SetCorePerformance { machine: 0, core, pstate: PState::P0 } => Some(*core),
            _ => None,
        })
        .collect();
    assert_eq!(p0_cores, vec![0, 1, 2, 3]);
    assert!(!mutations.iter().any(|m| matches!(m, Mutation::ShutdownVm { .. })));
    // Single machine: nowhere to migrate to.
    assert!(!mutations.iter().any(|m| matches!(m, Mutation::Migrate { .. })));
}

#[test]
fn memory_warning_migrates_largest_vm_when_target_exists() {
    let mut host = SimHost::new(vec![
        machine(CpuFamily::X86, 4, 8192, 50, SState::S0),
        machine(CpuFamily::X86, 4, 8192, 60, SState::S0),
    ]);
    let mut s = scheduler_with(0);
    s.init(&mut host);

    let mut vms = Vec::new();
    for count in [5u32, 2] {
        let vm = host.create_vm(VmType::Linux, CpuFamily::X86).unwrap();
        host.attach_vm(vm, 0).unwrap();
        s.fleet_mut().push_vm(vm);
        for _ in 0..count {
            let t = host.submit_task(&task(
                CpuFamily::X86,
                VmType::Linux,
                64,
                SlaClass::Sla3,
                500_000_000,
                1_000_000_000,
            ));
            host.add_task(vm, t, Priority::Low).unwrap();
        }
        vms.push(vm);
    }
    host.take_mutations();

    s.memory_warning(&mut host, 2_000_000, 0);

    let mutations = host.take_mutations();
    assert!(mutations.contains(&Mutation::Migrate { vm: vms[0], target: 1 }));
    assert!(s.fleet().is_migrating(vms[0]));

    // Completion erases the pending entry and lands the VM on the target.
    let (at, ev) = host.pop_event().unwrap();
    assert_eq!(ev, HostEvent::MigrationComplete(vms[0]));
    s.migration_done(&mut host, at, vms[0]);
    assert!(!s.fleet().is_migrating(vms[0]));
    assert_eq!(host.vm_info(vms[0]).unwrap().machine_id, Some(1));
    assert_invariants(&host, &s);
}

// ── Scenario 6: idempotent periodic sweep ──────────────────────────

#[test]
fn second_periodic_check_is_quiet() {
    let mut host = SimHost::new(vec![
        machine(CpuFamily::X86, 4, 4096, 50, SState::S0),
        machine(CpuFamily::X86, 4, 4096, 60, SState::S0),
        machine(CpuFamily::X86, 4, 4096, 70, SState::S0),
    ]);
    let mut s = scheduler_with(2);
    s.init(&mut host);

    for sla in [SlaClass::Sla1, SlaClass::Sla3] {
        let t = host.submit_task(&task(
            CpuFamily::X86,
            VmType::Linux,
            256,
            sla,
            500_000_000,
            1_000_000_000,
        ));
        s.new_task(&mut host, 0, t);
    }

    s.periodic_check(&mut host, 1_000_000);
    host.take_mutations();

    // Nothing happened in between: the sweep must not mutate.
    s.periodic_check(&mut host, 2_000_000);
    let mutations = host.take_mutations();
    assert!(
        !mutations.iter().any(|m| matches!(
            m,
            Mutation::SetCorePerformance { .. } | Mutation::SetState { .. } | Mutation::Migrate { .. }
        )),
        "second sweep mutated: {mutations:?}"
    );
}

// ── SLA warning paths ──────────────────────────────────────────────

#[test]
fn sla_warning_on_strict_task_pins_p0_and_migrates_off_hot_machine() {
    let mut host = SimHost::new(vec![
        machine(CpuFamily::X86, 2, 4096, 50, SState::S0),
        machine(CpuFamily::X86, 8, 4096, 60, SState::S0),
    ]);
    let mut s = scheduler_with(0);
    s.init(&mut host);

    // Load machine 0 heavily: 2 cores, 2 tasks on one VM.
    let vm = host.create_vm(VmType::Linux, CpuFamily::X86).unwrap();
    host.attach_vm(vm, 0).unwrap();
    s.fleet_mut().push_vm(vm);
    let strict = host.submit_task(&task(
        CpuFamily::X86,
        VmType::Linux,
        128,
        SlaClass::Sla1,
        40_000_000,
        20_000_000,
    ));
    host.add_task(vm, strict, Priority::Mid).unwrap();
    let filler = host.submit_task(&task(
        CpuFamily::X86,
        VmType::Linux,
        128,
        SlaClass::Sla3,
        40_000_000,
        1_000_000_000,
    ));
    host.add_task(vm, filler, Priority::Low).unwrap();

    // Refresh utilization (2 tasks / 2 cores = 1.0 > overload).
    s.periodic_check(&mut host, 1_000_000);
    host.take_mutations();

    s.sla_warning(&mut host, 2_000_000, strict);

    let mutations = host.take_mutations();
    assert!(mutations.contains(&Mutation::SetTaskPriority { task: strict, priority: Priority::High }));
    assert!(mutations.contains(&Mutation::SetCorePerformance { machine: 0, core: 0, pstate: PState::P0 }));
    assert!(mutations.contains(&Mutation::Migrate { vm, target: 1 }));
    assert!(s.fleet().is_migrating(vm));
}

#[test]
fn sla_warning_ignores_sla3() {
    let mut host = SimHost::new(vec![machine(CpuFamily::X86, 4, 4096, 50, SState::S0)]);
    let mut s = scheduler_with(1);
    s.init(&mut host);
    let t = host.submit_task(&task(
        CpuFamily::X86,
        VmType::Linux,
        64,
        SlaClass::Sla3,
        50_000_000,
        10_000_000,
    ));
    s.new_task(&mut host, 0, t);
    host.take_mutations();

    s.sla_warning(&mut host, 1_000_000, t);
    assert!(host.mutations().is_empty());
}

// ── Consolidation ──────────────────────────────────────────────────

#[test]
fn consolidation_drops_idle_machines_to_light_sleep() {
    let mut host = SimHost::new(vec![
        machine(CpuFamily::X86, 4, 4096, 50, SState::S0),
        machine(CpuFamily::X86, 4, 4096, 60, SState::S0),
        machine(CpuFamily::X86, 4, 4096, 70, SState::S0),
        machine(CpuFamily::X86, 4, 4096, 80, SState::S0),
    ]);
    let mut config = SchedulerConfig::default();
    config.warm_pool = 4;
    config.consolidation_interval = 1;
    let mut s = Scheduler::new(config).unwrap();
    s.init(&mut host);
    host.take_mutations();

    s.periodic_check(&mut host, 1_000_000);

    // The two least efficient machines shed their warm VMs and sleep;
    // the floor keeps the other two up.
    let mutations = host.take_mutations();
    assert!(mutations.contains(&Mutation::SetState { machine: 3, state: SState::S0i1 }));
    assert!(mutations.contains(&Mutation::SetState { machine: 2, state: SState::S0i1 }));
    assert!(!mutations.iter().any(|m| matches!(m, Mutation::SetState { machine: 0, .. })));
    assert_eq!(s.fleet().active_count(), 2);
    assert_eq!(
        mutations.iter().filter(|m| matches!(m, Mutation::ShutdownVm { .. })).count(),
        2
    );
}

// ── End of run ─────────────────────────────────────────────────────

#[test]
fn simulation_complete_reports_and_shuts_down() {
    let mut host = SimHost::new(vec![
        machine(CpuFamily::X86, 4, 4096, 50, SState::S0),
        machine(CpuFamily::X86, 4, 4096, 60, SState::S0),
    ]);
    let mut s = scheduler_with(2);
    s.init(&mut host);

    let t = host.submit_task(&task(
        CpuFamily::X86,
        VmType::Linux,
        64,
        SlaClass::Sla2,
        2_000_000,
        50_000_000,
    ));
    s.new_task(&mut host, 0, t);
    let (at, ev) = host.pop_event().unwrap();
    assert_eq!(ev, HostEvent::TaskComplete(t));
    s.task_complete(&mut host, at, t);

    host.advance_to(10_000_000);
    host.take_mutations();
    let report = s.simulation_complete(&mut host, 10_000_000);

    assert_eq!(report.elapsed_secs, 10.0);
    assert_eq!(report.sla_violations[SlaClass::Sla2.index()], 0.0);
    assert!(report.energy_kwh > 0.0);
    let shutdowns = host
        .take_mutations()
        .iter()
        .filter(|m| matches!(m, Mutation::ShutdownVm { .. }))
        .count();
    assert_eq!(shutdowns, 2);
    let text = report.to_string();
    assert!(text.contains("SLA violation report"));
    assert!(text.contains("Finished in 10.00 seconds"));
}
