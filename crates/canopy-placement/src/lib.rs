//! Canopy placement primitives.
//!
//! Everything a single scheduler node needs to judge one candidate: the
//! host's resource snapshot, the overcommit policy that turns raw capacity
//! into schedulable capacity, hard constraint filtering, and headroom
//! scoring. Nothing here performs I/O or fans out; that lives in
//! `canopy-scheduler`.
//!
//! # Components
//!
//! - **`snapshot`**: Raw capacity, usage, and inventory of a host
//! - **`overcommit`**: Runtime-swappable CPU/memory overcommit ratios
//! - **`constraints`**: Hard constraint filtering
//! - **`scorer`**: Headroom scoring and the candidate ranking order
//! - **`request`**: Placement requests and their deadlines
//! - **`convert`**: Conversions from inventory entries

pub mod constraints;
pub mod convert;
pub mod error;
pub mod overcommit;
pub mod request;
pub mod scorer;
pub mod snapshot;

pub use constraints::{Constrained, filter};
pub use convert::host_entry_to_snapshot;
pub use error::{PlacementError, PlacementResult};
pub use overcommit::{OvercommitPolicy, OvercommitRatios, Resource};
pub use request::{Constraint, PlacementRequest, ResourceDemand};
pub use scorer::{CandidateScore, TransferRatio, rank_snapshots, score_snapshot};
pub use snapshot::ResourceSnapshot;
