//! Response aggregation: deadline-bounded fan-in.
//!
//! Drains a [`Dispatch`] until every child has answered or the parent
//! deadline passes, whichever comes first, then picks the best successful
//! answer. Children that fail, time out, or find nothing are tolerated as
//! long as one child succeeds.

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::fanout::{ChildOutcome, Dispatch};
use crate::node::{PlacementDecision, PlacementResponse};

/// Summary of one fan-in.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    pub winner: Option<PlacementResponse>,
    pub dispatched: usize,
    /// Children that answered `Placed` in time.
    pub succeeded: usize,
    /// Children that answered in time without a placement.
    pub declined: usize,
    /// Children that errored or whose task died.
    pub failed: usize,
    /// Children still outstanding at the deadline.
    pub late: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseAggregator;

impl ResponseAggregator {
    pub fn new() -> Self {
        Self
    }

    /// Wait for the dispatched children and select the winner.
    pub async fn aggregate(&self, dispatch: Dispatch) -> Aggregate {
        let dispatched = dispatch.dispatched;
        let (outcomes, lost, late) = self.collect(dispatch).await;

        let mut succeeded = 0;
        let mut declined = 0;
        let mut failed = lost;
        for outcome in &outcomes {
            match &outcome.result {
                Ok(PlacementDecision::Placed(_)) => succeeded += 1,
                Ok(_) => declined += 1,
                Err(_) => failed += 1,
            }
        }

        Aggregate {
            winner: self.select(&outcomes),
            dispatched,
            succeeded,
            declined,
            failed,
            late,
        }
    }

    /// Gather the outcomes that arrive before the deadline.
    ///
    /// Returns the on-time outcomes, the number of child tasks that died,
    /// and the number still outstanding when the deadline passed. Those are
    /// cancelled when the dispatch is dropped; scoring is read-only, so an
    /// abandoned child leaves nothing to undo.
    async fn collect(&self, dispatch: Dispatch) -> (Vec<ChildOutcome>, usize, usize) {
        let Dispatch {
            mut tasks,
            deadline,
            dispatched,
        } = dispatch;

        let mut outcomes = Vec::with_capacity(dispatched);
        let mut lost = 0;

        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok(outcome))) => {
                    log_outcome(&outcome);
                    outcomes.push(outcome);
                }
                Ok(Some(Err(e))) => {
                    warn!(error = %e, "child task did not complete");
                    lost += 1;
                }
                Ok(None) => return (outcomes, lost, 0),
                Err(_) => {
                    let late = tasks.len();
                    debug!(
                        late,
                        overrun_ms =
                            Instant::now().saturating_duration_since(deadline).as_millis() as u64,
                        "deadline passed with children outstanding"
                    );
                    tasks.abort_all();
                    return (outcomes, lost, late);
                }
            }
        }
    }

    /// The best `Placed` answer among `outcomes`, if any.
    ///
    /// Depends only on the set of outcomes, not their order.
    pub fn select(&self, outcomes: &[ChildOutcome]) -> Option<PlacementResponse> {
        outcomes
            .iter()
            .filter_map(|outcome| match &outcome.result {
                Ok(PlacementDecision::Placed(response)) => Some(response),
                _ => None,
            })
            .min_by(|a, b| a.score.rank_cmp(&b.score))
            .cloned()
    }
}

fn log_outcome(outcome: &ChildOutcome) {
    match &outcome.result {
        Ok(PlacementDecision::Placed(response)) => debug!(
            child = %outcome.child_id,
            candidate = %response.candidate_id(),
            score = response.combined_score(),
            "child placed"
        ),
        Ok(decision) => debug!(
            child = %outcome.child_id,
            outcome = decision.label(),
            "child declined"
        ),
        Err(e) => warn!(child = %outcome.child_id, error = %e, "child failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{SchedulerError, SchedulerResult};
    use crate::fanout::{Fanout, FanoutCoordinator};
    use crate::node::{BoxFuture, PlacementNode};
    use canopy_placement::{
        CandidateScore, Constrained, Constraint, PlacementRequest, ResourceDemand,
    };
    use std::sync::Arc;
    use std::time::Duration;

    fn response(id: &str, combined: f64, free: f64) -> PlacementResponse {
        PlacementResponse::new(
            CandidateScore {
                candidate_id: id.to_string(),
                cpu_score: combined,
                memory_score: combined,
                combined,
                free_memory_mb: free,
            },
            vec![id.to_string()],
        )
    }

    fn placed(id: &str, combined: f64, free: f64) -> ChildOutcome {
        ChildOutcome {
            child_id: id.to_string(),
            result: Ok(PlacementDecision::Placed(response(id, combined, free))),
        }
    }

    fn failed(id: &str) -> ChildOutcome {
        ChildOutcome {
            child_id: id.to_string(),
            result: Err(SchedulerError::ChildTimedOut(id.to_string())),
        }
    }

    /// Answers after a fixed delay; `None` answers with an error.
    struct Delayed {
        id: String,
        delay: Duration,
        decision: Option<PlacementDecision>,
    }

    impl Delayed {
        fn placed(id: &str, combined: f64, delay_ms: u64) -> Arc<dyn PlacementNode> {
            Arc::new(Self {
                id: id.to_string(),
                delay: Duration::from_millis(delay_ms),
                decision: Some(PlacementDecision::Placed(response(id, combined, 0.0))),
            })
        }

        fn failing(id: &str) -> Arc<dyn PlacementNode> {
            Arc::new(Self {
                id: id.to_string(),
                delay: Duration::ZERO,
                decision: None,
            })
        }
    }

    impl Constrained for Delayed {
        fn satisfies(&self, _constraint: &Constraint) -> bool {
            true
        }
    }

    impl PlacementNode for Delayed {
        fn id(&self) -> &str {
            &self.id
        }

        fn place(
            &self,
            _request: PlacementRequest,
        ) -> BoxFuture<'_, SchedulerResult<PlacementDecision>> {
            Box::pin(async move {
                tokio::time::sleep(self.delay).await;
                self.decision
                    .clone()
                    .ok_or_else(|| SchedulerError::NodeUnavailable {
                        node: self.id.clone(),
                        reason: "connection refused".to_string(),
                    })
            })
        }
    }

    fn request(timeout_ms: u64) -> PlacementRequest {
        PlacementRequest::new(
            "req",
            ResourceDemand {
                cpu: 1,
                memory_mb: 256,
                disk_gb: 0,
            },
            Duration::from_millis(timeout_ms),
        )
    }

    async fn run(children: Vec<Arc<dyn PlacementNode>>, timeout_ms: u64) -> Aggregate {
        let coordinator = FanoutCoordinator::new(8, Duration::from_millis(10));
        match coordinator.dispatch(&request(timeout_ms), children) {
            Fanout::Dispatched(dispatch) => ResponseAggregator::new().aggregate(dispatch).await,
            _ => panic!("expected a dispatch"),
        }
    }

    #[test]
    fn selects_highest_score() {
        let outcomes = vec![placed("a", 0.2, 0.0), placed("b", 0.7, 0.0), failed("c")];
        let winner = ResponseAggregator::new().select(&outcomes).unwrap();
        assert_eq!(winner.candidate_id(), "b");
    }

    #[test]
    fn no_success_selects_nothing() {
        let outcomes = vec![
            failed("a"),
            ChildOutcome {
                child_id: "b".to_string(),
                result: Ok(PlacementDecision::Unschedulable),
            },
        ];
        assert!(ResponseAggregator::new().select(&outcomes).is_none());
        assert!(ResponseAggregator::new().select(&[]).is_none());
    }

    #[test]
    fn selection_ignores_arrival_order() {
        let build = || {
            vec![
                placed("rack-2/h7", 0.5, 100.0),
                placed("rack-1/h3", 0.5, 100.0),
                placed("rack-3/h1", 0.5, 300.0),
                placed("rack-4/h2", 0.4, 900.0),
            ]
        };
        let aggregator = ResponseAggregator::new();
        let expected = aggregator.select(&build()).unwrap();
        assert_eq!(expected.candidate_id(), "rack-3/h1");

        let mut outcomes = build();
        for _ in 0..outcomes.len() {
            outcomes.rotate_left(1);
            assert_eq!(aggregator.select(&outcomes).unwrap(), expected);
        }
        outcomes.reverse();
        assert_eq!(aggregator.select(&outcomes).unwrap(), expected);
    }

    #[test]
    fn equal_scores_fall_back_to_lowest_id() {
        let outcomes = vec![placed("h2", 0.5, 100.0), placed("h1", 0.5, 100.0)];
        let winner = ResponseAggregator::new().select(&outcomes).unwrap();
        assert_eq!(winner.candidate_id(), "h1");
    }

    #[tokio::test(start_paused = true)]
    async fn late_children_are_discarded() {
        let start = Instant::now();
        let aggregate = run(
            vec![
                Delayed::placed("slow-1", 0.9, 5_000),
                Delayed::placed("fast", 0.4, 20),
                Delayed::placed("slow-2", 0.95, 5_000),
            ],
            200,
        )
        .await;

        assert_eq!(aggregate.winner.unwrap().candidate_id(), "fast");
        assert_eq!(aggregate.dispatched, 3);
        assert_eq!(aggregate.succeeded, 1);
        assert_eq!(aggregate.failed + aggregate.late, 2);
        assert!(Instant::now() - start <= Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn partial_failure_is_tolerated() {
        let aggregate = run(
            vec![Delayed::failing("down"), Delayed::placed("up", 0.3, 10)],
            500,
        )
        .await;

        assert_eq!(aggregate.winner.unwrap().candidate_id(), "up");
        assert_eq!(aggregate.failed, 1);
        assert_eq!(aggregate.succeeded, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn all_failed_yields_no_winner() {
        let aggregate = run(vec![Delayed::failing("a"), Delayed::failing("b")], 500).await;
        assert!(aggregate.winner.is_none());
        assert_eq!(aggregate.failed, 2);
        assert_eq!(aggregate.late, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn returns_as_soon_as_everyone_answered() {
        let start = Instant::now();
        let aggregate = run(
            vec![Delayed::placed("a", 0.1, 30), Delayed::placed("b", 0.2, 40)],
            10_000,
        )
        .await;

        assert_eq!(aggregate.winner.unwrap().candidate_id(), "b");
        assert!(Instant::now() - start < Duration::from_millis(100));
    }
}
