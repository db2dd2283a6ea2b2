//! Host agent: the per-host placement handler.
//!
//! Holds the host's latest resource snapshot and answers placement requests
//! for that single host. The snapshot is replaced atomically by the refresh
//! feed; requests score whichever snapshot is current when they arrive.
//!
//! When a refresh changes the host's datastore or network inventory, the
//! registered [`InventoryListener`]s are told so the registrant can update
//! its view of the cluster.

use std::collections::BTreeSet;
use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::Semaphore;
use tracing::{debug, info};

use canopy_placement::{
    CandidateScore, Constrained, Constraint, OvercommitPolicy, PlacementRequest, ResourceSnapshot,
    TransferRatio, score_snapshot,
};

use crate::error::{SchedulerError, SchedulerResult};
use crate::node::{BoxFuture, PlacementDecision, PlacementNode, PlacementResponse, SnapshotSource};

/// Receives datastore/network inventory changes of a host.
pub trait InventoryListener: Send + Sync {
    fn inventory_changed(
        &self,
        host_id: &str,
        datastores: &BTreeSet<String>,
        networks: &BTreeSet<String>,
    );
}

/// Default number of placement requests a host serves at once.
const DEFAULT_CONCURRENCY: usize = 4;

pub struct HostAgent {
    id: String,
    snapshot: ArcSwap<ResourceSnapshot>,
    policy: Arc<OvercommitPolicy>,
    transfer: TransferRatio,
    /// Bounds concurrently served placement requests.
    permits: Semaphore,
    listeners: Vec<Arc<dyn InventoryListener>>,
}

impl HostAgent {
    pub fn new(
        snapshot: ResourceSnapshot,
        policy: Arc<OvercommitPolicy>,
        transfer: TransferRatio,
    ) -> Self {
        Self {
            id: snapshot.host_id.clone(),
            snapshot: ArcSwap::from_pointee(snapshot),
            policy,
            transfer,
            permits: Semaphore::new(DEFAULT_CONCURRENCY),
            listeners: Vec::new(),
        }
    }

    /// Set how many placement requests are served concurrently.
    pub fn with_concurrency(mut self, limit: usize) -> Self {
        self.permits = Semaphore::new(limit.max(1));
        self
    }

    /// Register a listener for inventory changes.
    pub fn with_listener(mut self, listener: Arc<dyn InventoryListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn snapshot(&self) -> Arc<ResourceSnapshot> {
        self.snapshot.load_full()
    }

    /// Replace the host's snapshot with a fresh report.
    pub fn update_snapshot(&self, snapshot: ResourceSnapshot) -> SchedulerResult<()> {
        if snapshot.host_id != self.id {
            return Err(SchedulerError::SnapshotMismatch {
                expected: self.id.clone(),
                got: snapshot.host_id,
            });
        }

        let next = Arc::new(snapshot);
        let previous = self.snapshot.swap(next.clone());
        debug!(
            host = %self.id,
            used_cpu = next.used_cpu,
            used_memory_mb = next.used_memory_mb,
            "snapshot refreshed"
        );

        if previous.inventory_differs(&next) {
            info!(
                host = %self.id,
                datastores = next.datastores.len(),
                networks = next.networks.len(),
                "host inventory changed"
            );
            for listener in &self.listeners {
                listener.inventory_changed(&self.id, &next.datastores, &next.networks);
            }
        }
        Ok(())
    }

    /// Score this host against the current snapshot and policy.
    ///
    /// `None` when a constraint fails or the host lacks headroom.
    pub fn score(&self, request: &PlacementRequest) -> Option<CandidateScore> {
        let snapshot = self.snapshot.load();
        if !snapshot.satisfies_all(&request.constraints) {
            return None;
        }
        let ratios = self.policy.current();
        score_snapshot(&snapshot, &request.demand, &ratios, self.transfer)
    }

    async fn decide(&self, request: PlacementRequest) -> SchedulerResult<PlacementDecision> {
        if request.is_expired() {
            return Ok(PlacementDecision::TimedOut);
        }

        let permit = tokio::time::timeout_at(request.deadline, self.permits.acquire()).await;
        let _permit = match permit {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => {
                return Err(SchedulerError::NodeUnavailable {
                    node: self.id.clone(),
                    reason: "host agent is shut down".to_string(),
                });
            }
            Err(_) => return Ok(PlacementDecision::TimedOut),
        };

        let decision = match self.score(&request) {
            Some(score) => {
                PlacementDecision::Placed(PlacementResponse::new(score, vec![self.id.clone()]))
            }
            None => PlacementDecision::Unschedulable,
        };
        debug!(host = %self.id, request = %request.id, outcome = decision.label(), "host answered");
        Ok(decision)
    }

    /// Stop serving placement requests.
    pub fn close(&self) {
        self.permits.close();
    }
}

impl Constrained for HostAgent {
    fn satisfies(&self, constraint: &Constraint) -> bool {
        self.snapshot.load().satisfies(constraint)
    }
}

impl PlacementNode for HostAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn place(&self, request: PlacementRequest) -> BoxFuture<'_, SchedulerResult<PlacementDecision>> {
        Box::pin(self.decide(request))
    }
}

impl SnapshotSource for Vec<Arc<HostAgent>> {
    fn snapshots(&self) -> Vec<Arc<ResourceSnapshot>> {
        self.iter().map(|host| host.snapshot()).collect()
    }
}

impl std::fmt::Debug for HostAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostAgent")
            .field("id", &self.id)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
