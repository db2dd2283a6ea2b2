//! canopy-scheduler: hierarchical placement across a tree of schedulers.
//!
//! Each scheduler node either scores its own hosts or fans the request out
//! to a sample of its children and keeps the best answer that arrives
//! before the deadline. The tree:
//!
//! - Samples at most `fanout` constraint-satisfying children per request
//! - Shrinks the deadline by the hop latency at every level
//! - Tolerates failed and late children as long as one succeeds
//! - Picks winners with a total, order-independent ranking
//!
//! # Architecture
//!
//! ```text
//! PlacementScheduler (root)
//!   ├── FanoutCoordinator (filter, sample, spawn child calls)
//!   ├── ResponseAggregator (deadline-bounded join, select best)
//!   └── children
//!       ├── PlacementScheduler (rack) ── HostAgent snapshots
//!       └── HostAgent (snapshot + shared OvercommitPolicy)
//! ```

pub mod aggregator;
pub mod error;
pub mod fanout;
pub mod feed;
pub mod host;
pub mod node;
pub mod scheduler;
pub mod tree;

pub use aggregator::{Aggregate, ResponseAggregator};
pub use error::{SchedulerError, SchedulerResult};
pub use fanout::{ChildOutcome, Dispatch, Fanout, FanoutCoordinator};
pub use feed::follow_overcommit;
pub use host::{HostAgent, InventoryListener};
pub use node::{
    BoxFuture, ChildSource, PlacementDecision, PlacementNode, PlacementResponse, SnapshotSource,
};
pub use scheduler::PlacementScheduler;
pub use tree::SchedulerTree;
