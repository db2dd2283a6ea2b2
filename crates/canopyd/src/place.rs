//! One-shot placement from the command line.

use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use tracing::info;

use canopy_core::{AgentConfig, Inventory};
use canopy_placement::{Constraint, PlacementRequest, ResourceDemand};
use canopy_scheduler::{InventoryListener, SchedulerTree};

use crate::serve::LogRegistrant;

/// Demand and constraints of the workload to place.
#[derive(Debug, Args)]
pub struct RequestArgs {
    /// vCPUs requested.
    #[arg(long)]
    pub cpu: u32,

    /// Memory requested, in MiB.
    #[arg(long)]
    pub memory_mb: u64,

    /// Disk requested, in GiB.
    #[arg(long, default_value = "0")]
    pub disk_gb: u64,

    /// Required datastore (repeatable).
    #[arg(long)]
    pub datastore: Vec<String>,

    /// Required network (repeatable).
    #[arg(long)]
    pub network: Vec<String>,

    /// Required host type.
    #[arg(long)]
    pub host_type: Option<String>,

    /// Required host tag as `key=value` (repeatable).
    #[arg(long, value_parser = parse_tag)]
    pub tag: Vec<(String, String)>,

    /// Decision timeout in milliseconds. Defaults to the configured timeout.
    #[arg(long)]
    pub timeout_ms: Option<u64>,
}

impl RequestArgs {
    pub fn into_request(self, default_timeout: Duration) -> PlacementRequest {
        let timeout = self
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(default_timeout);

        let mut request = PlacementRequest::new(
            "cli",
            ResourceDemand {
                cpu: self.cpu,
                memory_mb: self.memory_mb,
                disk_gb: self.disk_gb,
            },
            timeout,
        );
        for id in self.datastore {
            request = request.with_constraint(Constraint::Datastore { id });
        }
        for id in self.network {
            request = request.with_constraint(Constraint::Network { id });
        }
        if let Some(name) = self.host_type {
            request = request.with_constraint(Constraint::HostType { name });
        }
        for (key, value) in self.tag {
            request = request.with_constraint(Constraint::Tag { key, value });
        }
        request
    }
}

fn parse_tag(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got `{raw}`")),
    }
}

/// Build the tree, decide once, print the decision.
pub async fn run(config: &AgentConfig, inventory: &Inventory, args: RequestArgs) -> anyhow::Result<()> {
    let listeners: Vec<Arc<dyn InventoryListener>> = vec![Arc::new(LogRegistrant)];
    let tree = SchedulerTree::from_inventory(inventory, config, listeners)?;

    let request = args.into_request(tree.default_timeout());
    info!(
        cpu = request.demand.cpu,
        memory_mb = request.demand.memory_mb,
        constraints = request.constraints.len(),
        "placing request"
    );

    let decision = tree.place(request).await;
    println!("{}", serde_json::to_string_pretty(&decision)?);
    Ok(())
}
