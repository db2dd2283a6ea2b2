//! Fan-out: sends one request to a bounded sample of children at once.
//!
//! The coordinator only picks children and starts one task per pick. It
//! hands the running tasks back as a [`Dispatch`] that the
//! [`ResponseAggregator`](crate::aggregator::ResponseAggregator) drains
//! before the parent deadline; nothing outlives that join.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use canopy_core::SchedulerSection;
use canopy_placement::{PlacementRequest, filter};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{SchedulerError, SchedulerResult};
use crate::node::{PlacementDecision, PlacementNode};

/// What a single child answered, tagged with who answered.
#[derive(Debug)]
pub struct ChildOutcome {
    pub child_id: String,
    pub result: SchedulerResult<PlacementDecision>,
}

/// Child calls in flight for one request.
pub struct Dispatch {
    pub(crate) tasks: JoinSet<ChildOutcome>,
    /// The parent's deadline; answers after it are discarded.
    pub(crate) deadline: Instant,
    pub(crate) dispatched: usize,
}

impl Dispatch {
    pub fn dispatched(&self) -> usize {
        self.dispatched
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

/// Result of trying to fan a request out.
pub enum Fanout {
    Dispatched(Dispatch),
    /// No child satisfies the request's constraints.
    NoEligibleChildren,
    /// Not enough time left to forward the request one more hop.
    NoBudget,
}

#[derive(Debug, Clone)]
pub struct FanoutCoordinator {
    /// Maximum children per request.
    fanout: usize,
    /// Taken off the deadline for every hop.
    hop_latency: Duration,
    /// Seeded once; successive requests draw successive samples. Shared by
    /// clones.
    rng: Option<Arc<Mutex<StdRng>>>,
}

impl FanoutCoordinator {
    pub fn new(fanout: usize, hop_latency: Duration) -> Self {
        Self {
            fanout: fanout.max(1),
            hop_latency,
            rng: None,
        }
    }

    pub fn from_config(config: &SchedulerSection) -> Self {
        let coordinator = Self::new(config.fanout, config.hop_latency());
        match config.seed {
            Some(seed) => coordinator.with_seed(seed),
            None => coordinator,
        }
    }

    /// Draw samples from one generator seeded with `seed`, so the sequence
    /// of selections is reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Some(Arc::new(Mutex::new(StdRng::seed_from_u64(seed))));
        self
    }

    pub fn fanout(&self) -> usize {
        self.fanout
    }

    pub fn hop_latency(&self) -> Duration {
        self.hop_latency
    }

    /// Pick the children to ask: those satisfying the request's constraints,
    /// sampled uniformly without replacement down to the fanout limit.
    pub fn select(
        &self,
        request: &PlacementRequest,
        children: Vec<Arc<dyn PlacementNode>>,
    ) -> Vec<Arc<dyn PlacementNode>> {
        let eligible = filter(children, &request.constraints);
        if eligible.len() <= self.fanout {
            return eligible;
        }

        match &self.rng {
            Some(rng) => {
                let mut rng = rng.lock().unwrap_or_else(PoisonError::into_inner);
                eligible.choose_multiple(&mut *rng, self.fanout).cloned().collect()
            }
            None => eligible
                .choose_multiple(&mut rand::rng(), self.fanout)
                .cloned()
                .collect(),
        }
    }

    /// Select children and start one concurrent call per selected child.
    ///
    /// Each child gets the request with the deadline reduced by the hop
    /// latency and is cut off at that reduced deadline.
    pub fn dispatch(
        &self,
        request: &PlacementRequest,
        children: Vec<Arc<dyn PlacementNode>>,
    ) -> Fanout {
        let Some(child_request) = request.for_child(self.hop_latency) else {
            return Fanout::NoBudget;
        };

        let selected = self.select(request, children);
        if selected.is_empty() {
            return Fanout::NoEligibleChildren;
        }

        let mut tasks = JoinSet::new();
        for child in &selected {
            let child = child.clone();
            let request = child_request.clone();
            tasks.spawn(async move {
                let child_id = child.id().to_string();
                let deadline = request.deadline;
                let result = match tokio::time::timeout_at(deadline, child.place(request)).await {
                    Ok(result) => result,
                    Err(_) => Err(SchedulerError::ChildTimedOut(child_id.clone())),
                };
                ChildOutcome { child_id, result }
            });
        }

        debug!(
            request = %request.id,
            dispatched = selected.len(),
            child_budget_ms = child_request.remaining().as_millis() as u64,
            "request fanned out"
        );

        Fanout::Dispatched(Dispatch {
            tasks,
            deadline: request.deadline,
            dispatched: selected.len(),
        })
    }
}

impl Default for FanoutCoordinator {
    fn default() -> Self {
        Self::from_config(&SchedulerSection::default())
    }
}
