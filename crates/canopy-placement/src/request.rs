//! Placement requests.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Resources a workload (VM or disk) needs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDemand {
    pub cpu: u32,
    pub memory_mb: u64,
    #[serde(default)]
    pub disk_gb: u64,
}

/// A hard placement constraint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Constraint {
    Datastore { id: String },
    Network { id: String },
    HostType { name: String },
    Tag { key: String, value: String },
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constraint::Datastore { id } => write!(f, "datastore={id}"),
            Constraint::Network { id } => write!(f, "network={id}"),
            Constraint::HostType { name } => write!(f, "host_type={name}"),
            Constraint::Tag { key, value } => write!(f, "tag:{key}={value}"),
        }
    }
}

/// A request to place one workload.
///
/// Immutable once issued. Every hop down the tree hands its children a copy
/// with a shorter deadline (see [`PlacementRequest::for_child`]).
#[derive(Debug, Clone, PartialEq)]
pub struct PlacementRequest {
    pub id: String,
    pub demand: ResourceDemand,
    pub constraints: Vec<Constraint>,
    pub deadline: Instant,
}

impl PlacementRequest {
    pub fn new(id: impl Into<String>, demand: ResourceDemand, timeout: Duration) -> Self {
        Self {
            id: id.into(),
            demand,
            constraints: Vec::new(),
            deadline: Instant::now() + timeout,
        }
    }

    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = deadline;
        self
    }

    /// Time left before the deadline, zero once it has passed.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// The request as forwarded one hop down, with `hop_latency` taken off
    /// the deadline. `None` when no budget is left for the child.
    pub fn for_child(&self, hop_latency: Duration) -> Option<PlacementRequest> {
        let deadline = self.deadline.checked_sub(hop_latency)?;
        if deadline <= Instant::now() {
            return None;
        }
        Some(self.clone().with_deadline(deadline))
    }
}
