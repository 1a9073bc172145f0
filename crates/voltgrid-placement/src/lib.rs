//! voltgrid-placement — deciding where work runs.
//!
//! Placement is a strategy: a [`PlacementPolicy`] picks an existing VM
//! or a machine for a fresh VM, and the [`PlacementEngine`] drives the
//! full decision for one task:
//!
//! 1. Match an existing compatible VM
//! 2. Otherwise create a VM on an eligible machine
//! 3. Otherwise wake a sleeping machine and defer the task
//! 4. Commit — dispatch the task, raising the host to P0 for strict SLAs
//!
//! Three policies ship: `efficiency` (the default; efficiency-ordered
//! machine scan with utilization gates, migration enabled),
//! `first-fit`, and `load-aware`. The migration-target search used by
//! the SLA and memory-pressure handlers lives in [`migrate`].

pub mod engine;
pub mod migrate;
pub mod policy;
pub mod request;

pub use engine::{Placement, PlacementEngine};
pub use migrate::{find_migration_target, MigrationTarget};
pub use policy::{policy_by_name, policy_names, PlacementPolicy, PlacementTuning};
pub use request::{derive_priority, TaskRequest};
