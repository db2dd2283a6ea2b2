//! Candidate scoring.
//!
//! A candidate is scored on the headroom it has left after the workload is
//! placed, relative to its effective (overcommit-adjusted) capacity:
//!
//! ```text
//! headroom = effective - used - requested
//! cpu_score = cpu_headroom / effective_cpu
//! memory_score = memory_headroom / effective_memory
//! combined = ratio * cpu_score + (1 - ratio) * memory_score
//! ```
//!
//! where `ratio` is the utilization transfer ratio. A negative headroom on
//! either resource makes the candidate unschedulable.

use std::cmp::Ordering;
use std::sync::Arc;

use canopy_core::error::check_transfer_ratio;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constraints::filter;
use crate::error::PlacementResult;
use crate::overcommit::OvercommitRatios;
use crate::request::{PlacementRequest, ResourceDemand};
use crate::snapshot::ResourceSnapshot;

/// Weight of CPU headroom against memory headroom, within `[0, 1]`.
///
/// 0 scores on memory alone, 1 on CPU alone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransferRatio(f64);

impl TransferRatio {
    pub fn new(value: f64) -> PlacementResult<Self> {
        Ok(Self(check_transfer_ratio(value)?))
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

impl Default for TransferRatio {
    fn default() -> Self {
        Self(0.5)
    }
}

/// Score of one schedulable candidate. Higher `combined` is better.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateScore {
    pub candidate_id: String,
    pub cpu_score: f64,
    pub memory_score: f64,
    pub combined: f64,
    /// Memory left on the candidate after placement, in MB.
    pub free_memory_mb: f64,
}

impl CandidateScore {
    /// Ranking order: best candidate sorts first.
    ///
    /// Higher combined score wins, then more free memory, then the lower
    /// candidate id. This is a total order, so the winner among a fixed set
    /// of scores never depends on the order they were collected in.
    pub fn rank_cmp(&self, other: &CandidateScore) -> Ordering {
        other
            .combined
            .total_cmp(&self.combined)
            .then_with(|| other.free_memory_mb.total_cmp(&self.free_memory_mb))
            .then_with(|| self.candidate_id.cmp(&other.candidate_id))
    }
}

/// Score a single host for the demand. `None` means unschedulable.
pub fn score_snapshot(
    snapshot: &ResourceSnapshot,
    demand: &ResourceDemand,
    ratios: &OvercommitRatios,
    transfer: TransferRatio,
) -> Option<CandidateScore> {
    if demand.disk_gb > snapshot.free_disk_gb {
        return None;
    }

    let effective_cpu = snapshot.effective_cpu(ratios);
    let effective_memory = snapshot.effective_memory_mb(ratios);

    let cpu_headroom = effective_cpu - f64::from(snapshot.used_cpu) - f64::from(demand.cpu);
    let memory_headroom =
        effective_memory - snapshot.used_memory_mb as f64 - demand.memory_mb as f64;

    if cpu_headroom < 0.0 || memory_headroom < 0.0 {
        return None;
    }

    let cpu_score = normalize(cpu_headroom, effective_cpu);
    let memory_score = normalize(memory_headroom, effective_memory);
    let ratio = transfer.value();

    Some(CandidateScore {
        candidate_id: snapshot.host_id.clone(),
        cpu_score,
        memory_score,
        combined: ratio * cpu_score + (1.0 - ratio) * memory_score,
        free_memory_mb: memory_headroom,
    })
}

fn normalize(headroom: f64, capacity: f64) -> f64 {
    if capacity > 0.0 {
        (headroom / capacity).clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Filter snapshots by the request's constraints, score the survivors, and
/// return the schedulable ones best first.
pub fn rank_snapshots(
    snapshots: &[Arc<ResourceSnapshot>],
    request: &PlacementRequest,
    ratios: &OvercommitRatios,
    transfer: TransferRatio,
) -> Vec<CandidateScore> {
    let eligible = filter(snapshots.iter().map(Arc::as_ref), &request.constraints);

    let mut scores: Vec<CandidateScore> = eligible
        .into_iter()
        .filter_map(|snapshot| {
            let score = score_snapshot(snapshot, &request.demand, ratios, transfer);
            if score.is_none() {
                debug!(
                    request = %request.id,
                    host = %snapshot.host_id,
                    "host lacks headroom for request"
                );
            }
            score
        })
        .collect();

    scores.sort_by(CandidateScore::rank_cmp);
    scores
}
