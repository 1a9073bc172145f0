//! voltgrid-fleet — the scheduler's canonical in-memory fleet state.
//!
//! The [`FleetRegistry`] indexes machines and VMs, tracks which
//! machines are active, caches per-machine utilization between
//! reconciliation sweeps, and owns the two in-flight tables: pending
//! migrations and wake requests. The host remains the source of truth
//! for actual S-states and memory accounting; the registry only
//! mirrors the scheduler's view of the fleet.

pub mod deferred;
pub mod registry;

pub use deferred::DeferredQueue;
pub use registry::FleetRegistry;
