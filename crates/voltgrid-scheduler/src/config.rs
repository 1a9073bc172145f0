//! Scheduler configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use voltgrid_host::Time;
use voltgrid_placement::PlacementTuning;
use voltgrid_power::PowerConfig;

/// All scheduler tunables, TOML-loadable. Defaults carry the
/// simulator's canonical constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Placement policy name (see `voltgrid_placement::policy_names`).
    pub policy: String,
    /// Tasks whose deadline is this close (ticks) are urgent.
    pub urgent_window: Time,
    /// Machines above this utilization take no new VMs or migrations.
    pub overload_threshold: f64,
    /// Idle machines below this utilization may be demoted to sleep.
    pub underload_threshold: f64,
    /// Stricter placement cap applied to SLA0/SLA1 tasks.
    pub strict_utilization_cap: f64,
    /// Minimum ticks between two migrations of the same VM.
    pub migration_cooldown: Time,
    /// The active tier is never drained below this many machines.
    pub min_active_machines: usize,
    /// VMs to pre-create at init, spread over the efficiency order.
    pub warm_pool: u32,
    /// Consolidation runs every this many periodic checks.
    pub consolidation_interval: u32,
    /// Utilization above which a busy machine runs at P0.
    pub pstate_high_watermark: f64,
    /// Utilization at or below which a busy machine drops to P2.
    pub pstate_low_watermark: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            policy: "efficiency".to_string(),
            urgent_window: 12_000_000,
            overload_threshold: 0.80,
            underload_threshold: 0.30,
            strict_utilization_cap: 0.50,
            migration_cooldown: 1_000_000,
            min_active_machines: 2,
            warm_pool: 0,
            consolidation_interval: 4,
            pstate_high_watermark: 0.75,
            pstate_low_watermark: 0.30,
        }
    }
}

impl SchedulerConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SchedulerConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Thresholds the placement policies consult.
    pub fn tuning(&self) -> PlacementTuning {
        PlacementTuning {
            overload_threshold: self.overload_threshold,
            strict_utilization_cap: self.strict_utilization_cap,
        }
    }

    /// The power governor's slice of the configuration.
    pub fn power(&self) -> PowerConfig {
        PowerConfig {
            high_watermark: self.pstate_high_watermark,
            low_watermark: self.pstate_low_watermark,
            underload_threshold: self.underload_threshold,
            min_active_machines: self.min_active_machines,
        }
    }
}
