//! Scheduler error types.

use thiserror::Error;

/// Errors surfaced by scheduler construction and configuration.
///
/// Runtime host failures never appear here: they are absorbed inside
/// the callback that hit them.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("unknown placement policy: {0}")]
    UnknownPolicy(String),

    #[error("host error: {0}")]
    Host(#[from] voltgrid_host::HostError),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
