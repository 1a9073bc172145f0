//! voltgrid-power — the power governor.
//!
//! Two concerns, both evaluated at reconciliation time:
//!
//! - **P-states**: per-machine frequency targets from the observed
//!   utilization and priority mix; only emitted when they differ from
//!   what the host already reports.
//! - **S-states**: demoting idle, underloaded machines to light sleep,
//!   never draining the active tier below its floor.
//!
//! Waking machines is placement's job, not the governor's.

pub mod governor;

pub use governor::{PStateDecision, PowerConfig, PowerGovernor};
