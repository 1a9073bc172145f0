//! P-state targets and S-state demotion decisions.

use serde::{Deserialize, Serialize};
use tracing::debug;

use voltgrid_fleet::FleetRegistry;
use voltgrid_host::{Host, MachineId, MachineInfo, PState, SState};

/// Tunables for the governor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PowerConfig {
    /// Utilization above which a busy machine runs at P0.
    pub high_watermark: f64,
    /// Utilization at or below which a busy machine drops to P2.
    pub low_watermark: f64,
    /// Idle machines below this utilization may be demoted to sleep.
    pub underload_threshold: f64,
    /// The active tier is never drained below this many machines.
    pub min_active_machines: usize,
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            high_watermark: 0.75,
            low_watermark: 0.30,
            underload_threshold: 0.30,
            min_active_machines: 2,
        }
    }
}

/// Outcome of a P-state evaluation for one machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PStateDecision {
    SetTo(PState),
    NoChange,
}

/// Picks per-machine performance states and demotion candidates.
#[derive(Debug, Clone, Default)]
pub struct PowerGovernor {
    config: PowerConfig,
}

impl PowerGovernor {
    pub fn new(config: PowerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PowerConfig {
        &self.config
    }

    /// Target P-state for a machine, from the ladder:
    /// strict-SLA work or heavy load runs flat out, light load steps
    /// down, an empty machine idles at P3.
    pub fn pstate_target(
        &self,
        info: &MachineInfo,
        utilization: f64,
        has_strict_tasks: bool,
    ) -> PState {
        if has_strict_tasks {
            PState::P0
        } else if info.active_tasks == 0 {
            PState::P3
        } else if utilization > self.config.high_watermark {
            PState::P0
        } else if utilization > self.config.low_watermark {
            PState::P1
        } else {
            PState::P2
        }
    }

    /// Compare the target against what the host reports; only a real
    /// difference produces a mutation, so a quiet fleet stays quiet.
    pub fn evaluate_pstate(
        &self,
        info: &MachineInfo,
        utilization: f64,
        has_strict_tasks: bool,
    ) -> PStateDecision {
        let target = self.pstate_target(info, utilization, has_strict_tasks);
        if info.p_state == target {
            PStateDecision::NoChange
        } else {
            debug!(
                machine = info.id,
                from = ?info.p_state,
                to = ?target,
                utilization,
                "p-state retarget"
            );
            PStateDecision::SetTo(target)
        }
    }

    /// Machines that may be demoted to light sleep this sweep: active,
    /// zero tasks, utilization under the underload threshold, not
    /// involved in any in-flight migration — and never so many that
    /// the active tier would fall below the floor.
    pub fn demotion_candidates(
        &self,
        host: &dyn Host,
        fleet: &FleetRegistry,
    ) -> Vec<MachineId> {
        let mut spare = fleet
            .active_count()
            .saturating_sub(self.config.min_active_machines);
        let mut candidates = Vec::new();
        if spare == 0 {
            return candidates;
        }
        for &m in fleet.efficiency_order().iter().rev() {
            if spare == 0 {
                break;
            }
            if !fleet.is_active(m) {
                continue;
            }
            let Ok(info) = host.machine_info(m) else {
                continue;
            };
            if info.s_state != SState::S0 || info.active_tasks > 0 {
                continue;
            }
            if fleet.utilization(m) >= self.config.underload_threshold {
                continue;
            }
            if fleet.involved_in_migration(m, host) {
                continue;
            }
            candidates.push(m);
            spare -= 1;
        }
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voltgrid_host::{CpuFamily, SimHost, SimMachineSpec, VmType};

    fn info(active_tasks: u32, p_state: PState) -> MachineInfo {
        MachineInfo {
            id: 0,
            cpu: CpuFamily::X86,
            num_cpus: 4,
            memory_size: 1024,
            memory_used: 0,
            s_state: SState::S0,
            p_state,
            s_state_costs: vec![100, 60, 40, 30, 20, 10, 0],
            gpus: false,
            active_tasks,
            active_vms: 1,
        }
    }

    fn governor() -> PowerGovernor {
        PowerGovernor::new(PowerConfig::default())
    }

    #[test]
    fn pstate_ladder_matches_utilization_tiers() {
        let g = governor();
        assert_eq!(g.pstate_target(&info(0, PState::P0), 0.0, false), PState::P3);
        assert_eq!(g.pstate_target(&info(1, PState::P0), 0.25, false), PState::P2);
        assert_eq!(g.pstate_target(&info(2, PState::P0), 0.50, false), PState::P1);
        assert_eq!(g.pstate_target(&info(4, PState::P0), 1.00, false), PState::P0);
    }

    #[test]
    fn strict_tasks_override_everything() {
        let g = governor();
        assert_eq!(g.pstate_target(&info(1, PState::P3), 0.1, true), PState::P0);
    }

    #[test]
    fn boundary_values_step_down() {
        let g = governor();
        // Exactly at the watermarks: the lower tier wins.
        assert_eq!(g.pstate_target(&info(3, PState::P0), 0.75, false), PState::P1);
        assert_eq!(g.pstate_target(&info(1, PState::P0), 0.30, false), PState::P2);
    }

    #[test]
    fn matching_pstate_is_no_change() {
        let g = governor();
        assert_eq!(
            g.evaluate_pstate(&info(1, PState::P2), 0.25, false),
            PStateDecision::NoChange
        );
        assert_eq!(
            g.evaluate_pstate(&info(1, PState::P0), 0.25, false),
            PStateDecision::SetTo(PState::P2)
        );
    }

    fn sim_fleet(n: usize) -> (SimHost, FleetRegistry) {
        let specs = (0..n)
            .map(|i| SimMachineSpec {
                cpu: CpuFamily::X86,
                num_cpus: 4,
                memory: 1024,
                s_state_costs: vec![100 + i as u64, 60, 40, 30, 20, 10, 0],
                gpus: false,
                s_state: SState::S0,
            })
            .collect();
        let host = SimHost::new(specs);
        let fleet = FleetRegistry::from_host(&host);
        (host, fleet)
    }

    #[test]
    fn demotion_respects_active_floor() {
        let (host, fleet) = sim_fleet(4);
        let g = governor();
        // All four idle; only two may go (floor of 2), least efficient
        // machines first.
        let candidates = g.demotion_candidates(&host, &fleet);
        assert_eq!(candidates, vec![3, 2]);
    }

    #[test]
    fn no_demotion_at_or_below_floor() {
        let (host, fleet) = sim_fleet(2);
        let g = governor();
        assert!(g.demotion_candidates(&host, &fleet).is_empty());
    }

    #[test]
    fn busy_machines_are_never_demoted() {
        let (mut host, mut fleet) = sim_fleet(3);
        let vm = host.create_vm(VmType::Linux, CpuFamily::X86).unwrap();
        host.attach_vm(vm, 2).unwrap();
        fleet.push_vm(vm);
        let t = host.submit_task(&voltgrid_host::SimTaskSpec {
            arrival: 0,
            cpu: CpuFamily::X86,
            vm_type: VmType::Linux,
            memory: 64,
            sla: voltgrid_host::SlaClass::Sla3,
            duration: 1_000_000_000,
            target: 2_000_000_000,
        });
        host.add_task(vm, t, voltgrid_host::Priority::Low).unwrap();

        let g = governor();
        // Machine 2 is busy; only machine 1 (next least efficient idle)
        // can go before the floor bites.
        let candidates = g.demotion_candidates(&host, &fleet);
        assert_eq!(candidates, vec![1]);
    }

    #[test]
    fn migration_involvement_blocks_demotion() {
        let (mut host, mut fleet) = sim_fleet(4);
        let vm = host.create_vm(VmType::Linux, CpuFamily::X86).unwrap();
        host.attach_vm(vm, 3).unwrap();
        fleet.push_vm(vm);
        fleet.insert_pending_migration(vm, 2, 0);

        let g = governor();
        // 3 is a migration source, 2 a target; both are pinned.
        let candidates = g.demotion_candidates(&host, &fleet);
        assert_eq!(candidates, vec![1, 0]);
    }
}
