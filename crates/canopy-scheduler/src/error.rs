//! Scheduler error types.

use canopy_placement::PlacementError;
use thiserror::Error;

/// Errors surfaced by scheduler nodes.
///
/// Only configuration misuse reaches callers of
/// [`PlacementScheduler::place`](crate::PlacementScheduler::place); child
/// failures are absorbed during aggregation.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("placement error: {0}")]
    Placement(#[from] PlacementError),

    #[error("node {node} unavailable: {reason}")]
    NodeUnavailable { node: String, reason: String },

    #[error("child {0} did not answer before its deadline")]
    ChildTimedOut(String),

    #[error("unknown host {0}")]
    UnknownHost(String),

    #[error("snapshot for host {got} delivered to agent {expected}")]
    SnapshotMismatch { expected: String, got: String },
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
