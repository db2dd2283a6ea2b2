//! Nodes of the scheduler tree and what they answer.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use canopy_placement::{CandidateScore, Constrained, PlacementRequest, ResourceSnapshot};
use serde::{Deserialize, Serialize};

use crate::error::SchedulerResult;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A child a scheduler can fan a request out to: a host agent or another
/// scheduler, in process or behind a transport.
pub trait PlacementNode: Constrained + Send + Sync {
    fn id(&self) -> &str;

    /// Decide a placement within `request.deadline`.
    ///
    /// An `Err` means the node itself failed (unreachable, overloaded);
    /// finding no host is `Ok(PlacementDecision::Unschedulable)`.
    fn place(&self, request: PlacementRequest) -> BoxFuture<'_, SchedulerResult<PlacementDecision>>;
}

/// Tree membership: the children of a scheduler node.
pub trait ChildSource: Send + Sync {
    fn children(&self) -> Vec<Arc<dyn PlacementNode>>;
}

impl ChildSource for Vec<Arc<dyn PlacementNode>> {
    fn children(&self) -> Vec<Arc<dyn PlacementNode>> {
        self.clone()
    }
}

/// The latest snapshots of the hosts a leaf scheduler scores itself.
pub trait SnapshotSource: Send + Sync {
    fn snapshots(&self) -> Vec<Arc<ResourceSnapshot>>;
}

impl SnapshotSource for Vec<Arc<ResourceSnapshot>> {
    fn snapshots(&self) -> Vec<Arc<ResourceSnapshot>> {
        self.clone()
    }
}

/// A successful answer from a subtree. Never modified once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementResponse {
    pub score: CandidateScore,
    /// Node ids from the answering scheduler down to the chosen host.
    pub path: Vec<String>,
}

impl PlacementResponse {
    pub fn new(score: CandidateScore, path: Vec<String>) -> Self {
        Self { score, path }
    }

    /// The chosen host.
    pub fn candidate_id(&self) -> &str {
        &self.score.candidate_id
    }

    pub fn combined_score(&self) -> f64 {
        self.score.combined
    }

    /// The same answer as seen one level up.
    pub fn via(mut self, node_id: &str) -> Self {
        self.path.insert(0, node_id.to_string());
        self
    }
}

/// Outcome of one placement decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PlacementDecision {
    Placed(PlacementResponse),
    /// No candidate satisfied the constraints with enough headroom, or no
    /// child answered successfully in time.
    Unschedulable,
    /// The deadline passed before the decision could be attempted.
    TimedOut,
}

impl PlacementDecision {
    pub fn placed(&self) -> Option<&PlacementResponse> {
        match self {
            PlacementDecision::Placed(response) => Some(response),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PlacementDecision::Placed(_) => "placed",
            PlacementDecision::Unschedulable => "unschedulable",
            PlacementDecision::TimedOut => "timed_out",
        }
    }
}
