//! voltgrid-scheduler — the controller the host drives.
//!
//! A [`Scheduler`] is an explicit value (no globals; tests build as
//! many as they like) holding the fleet registry, the placement
//! engine, and the power governor. The host calls its callbacks
//! sequentially in timestamp order; between callbacks the scheduler
//! holds no CPU and keeps no threads.
//!
//! ```text
//! Scheduler
//!   ├── FleetRegistry (machines, VMs, migrations, utilization)
//!   ├── PlacementEngine (policy-driven VM/machine selection)
//!   ├── PowerGovernor (P-state ladder, S-state demotion)
//!   └── callbacks: init / new_task / task_complete / periodic_check
//!       / memory_warning / migration_done / state_change_complete
//!       / sla_warning / simulation_complete
//! ```
//!
//! Every recoverable host failure is absorbed inside the callback it
//! happened in; the affected machine or VM simply stops being a
//! candidate until the next sweep.

pub mod config;
pub mod error;
pub mod report;
pub mod scheduler;

pub use config::SchedulerConfig;
pub use error::{SchedulerError, SchedulerResult};
pub use report::RunReport;
pub use scheduler::Scheduler;
