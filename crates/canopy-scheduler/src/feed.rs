//! Configuration change feed.
//!
//! Overcommit settings are published on a `watch` channel by whoever owns
//! the configuration (the daemon re-reads its file on SIGHUP). The follower
//! task applies each published value to the shared policy.

use std::sync::Arc;

use canopy_core::OvercommitSettings;
use canopy_placement::OvercommitPolicy;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Apply overcommit settings from `updates` until the sender is dropped.
///
/// The value present when the task starts is applied first. A rejected
/// value leaves the previous ratios in force.
pub async fn follow_overcommit(
    policy: Arc<OvercommitPolicy>,
    mut updates: watch::Receiver<OvercommitSettings>,
) {
    info!("overcommit feed started");

    loop {
        let settings = *updates.borrow_and_update();
        match policy.apply(settings) {
            Ok(true) => info!(cpu = settings.cpu, memory = settings.memory, "overcommit policy changed"),
            Ok(false) => debug!("overcommit settings unchanged"),
            Err(e) => warn!(
                error = %e,
                cpu = settings.cpu,
                memory = settings.memory,
                "rejected overcommit settings"
            ),
        }

        if updates.changed().await.is_err() {
            break;
        }
    }

    info!("overcommit feed closed");
}
