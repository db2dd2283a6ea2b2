//! Placement scheduler: one node of the scheduling tree.
//!
//! A request moves through:
//!
//! ```text
//! Received ── expired ──────────────────────────────────▶ TimedOut
//!    │
//!    ▼
//! ConstraintFiltering
//!    ├── no children ─▶ LeafScoring (own snapshots) ──────▶ Placed | Unschedulable
//!    └── children ────▶ Fanout ─▶ Aggregating ────────────▶ Placed | Unschedulable
//! ```
//!
//! There is no retry inside the tree. A caller that loses a placement race
//! (another decision consumed the same headroom between the snapshot and
//! the workload creation) retries the whole request.

use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, info};

use canopy_core::SchedulerSection;
use canopy_placement::{
    Constrained, Constraint, OvercommitPolicy, PlacementRequest, ResourceSnapshot, TransferRatio,
    rank_snapshots,
};

use crate::aggregator::ResponseAggregator;
use crate::error::SchedulerResult;
use crate::fanout::{Fanout, FanoutCoordinator};
use crate::node::{
    BoxFuture, ChildSource, PlacementDecision, PlacementNode, PlacementResponse, SnapshotSource,
};

pub struct PlacementScheduler {
    id: String,
    policy: Arc<OvercommitPolicy>,
    transfer: TransferRatio,
    /// Child nodes to fan out to. Empty means this is a leaf.
    children: Arc<dyn ChildSource>,
    /// Hosts scored directly when there are no children.
    snapshots: Arc<dyn SnapshotSource>,
    coordinator: FanoutCoordinator,
    aggregator: ResponseAggregator,
}

impl PlacementScheduler {
    /// Create a scheduler with no children and no hosts.
    pub fn new(id: impl Into<String>, policy: Arc<OvercommitPolicy>, transfer: TransferRatio) -> Self {
        Self {
            id: id.into(),
            policy,
            transfer,
            children: Arc::new(Vec::<Arc<dyn PlacementNode>>::new()),
            snapshots: Arc::new(Vec::<Arc<ResourceSnapshot>>::new()),
            coordinator: FanoutCoordinator::default(),
            aggregator: ResponseAggregator::new(),
        }
    }

    pub fn with_children(mut self, children: Arc<dyn ChildSource>) -> Self {
        self.children = children;
        self
    }

    pub fn with_snapshots(mut self, snapshots: Arc<dyn SnapshotSource>) -> Self {
        self.snapshots = snapshots;
        self
    }

    pub fn with_coordinator(mut self, coordinator: FanoutCoordinator) -> Self {
        self.coordinator = coordinator;
        self
    }

    /// Take fan-out settings from the `[scheduler]` config section.
    pub fn with_config(self, config: &SchedulerSection) -> Self {
        self.with_coordinator(FanoutCoordinator::from_config(config))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Decide where `request` should run.
    ///
    /// Always returns by the request deadline (plus scheduling overhead)
    /// and never fails for expected conditions: no matching host, failed
    /// children, and slow children all end in a decision.
    pub async fn place(&self, request: PlacementRequest) -> PlacementDecision {
        let started = Instant::now();

        if request.is_expired() {
            info!(scheduler = %self.id, request = %request.id, "request expired on arrival");
            return PlacementDecision::TimedOut;
        }

        let children = self.children.children();
        let decision = if children.is_empty() {
            self.score_locally(&request)
        } else {
            self.fan_out(&request, children).await
        };

        info!(
            scheduler = %self.id,
            request = %request.id,
            outcome = decision.label(),
            candidate = decision.placed().map(|r| r.candidate_id()).unwrap_or("-"),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "placement decided"
        );
        decision
    }

    fn score_locally(&self, request: &PlacementRequest) -> PlacementDecision {
        let snapshots = self.snapshots.snapshots();
        let ratios = self.policy.current();
        let ranked = rank_snapshots(&snapshots, request, &ratios, self.transfer);

        debug!(
            scheduler = %self.id,
            hosts = snapshots.len(),
            schedulable = ranked.len(),
            "scored local hosts"
        );

        match ranked.into_iter().next() {
            Some(best) => {
                let path = vec![self.id.clone(), best.candidate_id.clone()];
                PlacementDecision::Placed(PlacementResponse::new(best, path))
            }
            None => PlacementDecision::Unschedulable,
        }
    }

    async fn fan_out(
        &self,
        request: &PlacementRequest,
        children: Vec<Arc<dyn PlacementNode>>,
    ) -> PlacementDecision {
        let dispatch = match self.coordinator.dispatch(request, children) {
            Fanout::Dispatched(dispatch) => dispatch,
            Fanout::NoEligibleChildren => {
                debug!(scheduler = %self.id, request = %request.id, "no child matches constraints");
                return PlacementDecision::Unschedulable;
            }
            Fanout::NoBudget => return PlacementDecision::TimedOut,
        };

        let aggregate = self.aggregator.aggregate(dispatch).await;
        debug!(
            scheduler = %self.id,
            request = %request.id,
            dispatched = aggregate.dispatched,
            succeeded = aggregate.succeeded,
            declined = aggregate.declined,
            failed = aggregate.failed,
            late = aggregate.late,
            "children aggregated"
        );

        match aggregate.winner {
            Some(winner) => PlacementDecision::Placed(winner.via(&self.id)),
            None => PlacementDecision::Unschedulable,
        }
    }
}

impl Constrained for PlacementScheduler {
    /// A subtree satisfies a constraint if any node below it does.
    fn satisfies(&self, constraint: &Constraint) -> bool {
        let children = self.children.children();
        if children.is_empty() {
            self.snapshots
                .snapshots()
                .iter()
                .any(|s| s.satisfies(constraint))
        } else {
            children.iter().any(|c| c.satisfies(constraint))
        }
    }
}

impl PlacementNode for PlacementScheduler {
    fn id(&self) -> &str {
        &self.id
    }

    fn place(&self, request: PlacementRequest) -> BoxFuture<'_, SchedulerResult<PlacementDecision>> {
        Box::pin(async move { Ok(PlacementScheduler::place(self, request).await) })
    }
}

impl std::fmt::Debug for PlacementScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlacementScheduler")
            .field("id", &self.id)
            .field("transfer", &self.transfer)
            .field("coordinator", &self.coordinator)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostAgent;
    use canopy_placement::{OvercommitRatios, ResourceDemand};
    use std::time::Duration;

    const GB: u64 = 1024;

    fn policy(cpu: f64, memory: f64) -> Arc<OvercommitPolicy> {
        Arc::new(OvercommitPolicy::new(OvercommitRatios::new(cpu, memory).unwrap()))
    }

    fn request(cpu: u32, memory_mb: u64) -> PlacementRequest {
        PlacementRequest::new(
            "req",
            ResourceDemand {
                cpu,
                memory_mb,
                disk_gb: 0,
            },
            Duration::from_secs(1),
        )
    }

    fn leaf(id: &str, policy: Arc<OvercommitPolicy>, hosts: Vec<ResourceSnapshot>) -> PlacementScheduler {
        let snapshots: Vec<Arc<ResourceSnapshot>> = hosts.into_iter().map(Arc::new).collect();
        PlacementScheduler::new(id, policy, TransferRatio::new(0.5).unwrap())
            .with_snapshots(Arc::new(snapshots))
    }

    #[tokio::test]
    async fn leaf_places_on_best_host() {
        let scheduler = leaf(
            "leaf",
            policy(2.0, 1.0),
            vec![
                ResourceSnapshot::new("A", 8, 16 * GB).with_usage(2, 4 * GB),
                ResourceSnapshot::new("B", 8, 16 * GB).with_usage(7, 14 * GB),
            ],
        );

        let decision = scheduler.place(request(4, 2 * GB)).await;
        let placed = decision.placed().unwrap();
        assert_eq!(placed.candidate_id(), "A");
        assert_eq!(placed.combined_score(), 0.625);
        assert_eq!(placed.path, vec!["leaf", "A"]);
    }

    #[tokio::test]
    async fn leaf_without_headroom_is_unschedulable() {
        let scheduler = leaf(
            "leaf",
            policy(2.0, 1.0),
            vec![ResourceSnapshot::new("A", 8, 16 * GB).with_usage(2, 4 * GB)],
        );
        assert_eq!(
            scheduler.place(request(20, GB)).await,
            PlacementDecision::Unschedulable
        );
    }

    #[tokio::test]
    async fn empty_scheduler_is_unschedulable() {
        let scheduler = PlacementScheduler::new("empty", policy(1.0, 1.0), TransferRatio::default());
        assert_eq!(scheduler.place(request(1, GB)).await, PlacementDecision::Unschedulable);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_request_times_out() {
        let scheduler = leaf("leaf", policy(1.0, 1.0), vec![ResourceSnapshot::new("A", 8, 16 * GB)]);
        let req = request(1, GB);
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(scheduler.place(req).await, PlacementDecision::TimedOut);
    }

    #[tokio::test]
    async fn branch_fans_out_to_hosts() {
        let shared = policy(1.0, 1.0);
        let transfer = TransferRatio::new(0.5).unwrap();
        let hosts: Vec<Arc<dyn PlacementNode>> = vec![
            Arc::new(HostAgent::new(
                ResourceSnapshot::new("busy", 8, 16 * GB).with_usage(6, 12 * GB),
                shared.clone(),
                transfer,
            )),
            Arc::new(HostAgent::new(
                ResourceSnapshot::new("idle", 8, 16 * GB),
                shared.clone(),
                transfer,
            )),
        ];

        let scheduler = PlacementScheduler::new("rack", shared, transfer)
            .with_children(Arc::new(hosts))
            .with_coordinator(FanoutCoordinator::new(4, Duration::from_millis(10)));

        let decision = scheduler.place(request(1, GB)).await;
        let placed = decision.placed().unwrap();
        assert_eq!(placed.candidate_id(), "idle");
        assert_eq!(placed.path, vec!["rack", "idle"]);
    }

    #[tokio::test(start_paused = true)]
    async fn branch_without_budget_times_out() {
        let shared = policy(1.0, 1.0);
        let hosts: Vec<Arc<dyn PlacementNode>> = vec![Arc::new(HostAgent::new(
            ResourceSnapshot::new("h", 8, 16 * GB),
            shared.clone(),
            TransferRatio::default(),
        ))];
        let scheduler = PlacementScheduler::new("rack", shared, TransferRatio::default())
            .with_children(Arc::new(hosts))
            .with_coordinator(FanoutCoordinator::new(4, Duration::from_secs(5)));

        assert_eq!(scheduler.place(request(1, GB)).await, PlacementDecision::TimedOut);
    }

    #[test]
    fn subtree_constraints_are_the_union_of_its_hosts() {
        let scheduler = leaf(
            "leaf",
            policy(1.0, 1.0),
            vec![
                ResourceSnapshot::new("A", 8, 16 * GB).with_datastore("ds-1"),
                ResourceSnapshot::new("B", 8, 16 * GB).with_network("vm-net"),
            ],
        );

        assert!(scheduler.satisfies(&Constraint::Datastore {
            id: "ds-1".to_string()
        }));
        assert!(scheduler.satisfies(&Constraint::Network {
            id: "vm-net".to_string()
        }));
        assert!(!scheduler.satisfies(&Constraint::Datastore {
            id: "ds-2".to_string()
        }));
    }
}
