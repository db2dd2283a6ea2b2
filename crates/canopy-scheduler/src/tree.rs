//! Assembles a scheduler tree from an [`Inventory`].
//!
//! Every node shares one [`OvercommitPolicy`] and one transfer ratio. Host
//! agents are kept by id so the snapshot feed can reach them after the tree
//! is built.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use canopy_core::{AgentConfig, Inventory};
use canopy_placement::{
    OvercommitPolicy, OvercommitRatios, PlacementError, PlacementRequest, ResourceSnapshot,
    TransferRatio, host_entry_to_snapshot,
};
use tracing::info;

use crate::error::{SchedulerError, SchedulerResult};
use crate::host::{HostAgent, InventoryListener};
use crate::node::{PlacementDecision, PlacementNode};
use crate::scheduler::PlacementScheduler;

pub struct SchedulerTree {
    root: Arc<PlacementScheduler>,
    hosts: HashMap<String, Arc<HostAgent>>,
    policy: Arc<OvercommitPolicy>,
    default_timeout: Duration,
}

impl SchedulerTree {
    /// Build the tree rooted at `inventory.root`.
    ///
    /// `listeners` are registered on every host agent.
    pub fn from_inventory(
        inventory: &Inventory,
        config: &AgentConfig,
        listeners: Vec<Arc<dyn InventoryListener>>,
    ) -> SchedulerResult<Self> {
        inventory.validate().map_err(PlacementError::from)?;
        config.validate().map_err(PlacementError::from)?;

        let ratios = OvercommitRatios::try_from(config.overcommit())?;
        let mut builder = Builder {
            inventory,
            config,
            policy: Arc::new(OvercommitPolicy::new(ratios)),
            transfer: TransferRatio::new(config.agent.utilization_transfer_ratio)?,
            listeners,
            hosts: HashMap::new(),
        };

        let root = builder.scheduler(&inventory.root)?;
        info!(
            root = %inventory.root,
            schedulers = inventory.schedulers.len(),
            hosts = builder.hosts.len(),
            "scheduler tree built"
        );

        Ok(Self {
            root,
            hosts: builder.hosts,
            policy: builder.policy,
            default_timeout: config.scheduler.default_timeout(),
        })
    }

    pub fn root(&self) -> &Arc<PlacementScheduler> {
        &self.root
    }

    pub fn host(&self, id: &str) -> Option<&Arc<HostAgent>> {
        self.hosts.get(id)
    }

    pub fn host_ids(&self) -> impl Iterator<Item = &str> {
        self.hosts.keys().map(String::as_str)
    }

    /// The policy shared by every node; feed configuration changes here.
    pub fn policy(&self) -> &Arc<OvercommitPolicy> {
        &self.policy
    }

    /// Timeout given to requests that do not set one.
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Deliver a refreshed snapshot to the host it describes.
    pub fn update_snapshot(&self, snapshot: ResourceSnapshot) -> SchedulerResult<()> {
        let host = self
            .hosts
            .get(&snapshot.host_id)
            .ok_or_else(|| SchedulerError::UnknownHost(snapshot.host_id.clone()))?;
        host.update_snapshot(snapshot)
    }

    /// Ask the root scheduler for a placement.
    pub async fn place(&self, request: PlacementRequest) -> PlacementDecision {
        self.root.place(request).await
    }

    /// Stop every host agent from serving further placement requests.
    pub fn close(&self) {
        for host in self.hosts.values() {
            host.close();
        }
        info!(hosts = self.hosts.len(), "host agents closed");
    }
}

impl std::fmt::Debug for SchedulerTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerTree")
            .field("root", &self.root.id())
            .field("hosts", &self.hosts.len())
            .finish()
    }
}

// ── Internal helpers ──────────────────────────────────────────

struct Builder<'a> {
    inventory: &'a Inventory,
    config: &'a AgentConfig,
    policy: Arc<OvercommitPolicy>,
    transfer: TransferRatio,
    listeners: Vec<Arc<dyn InventoryListener>>,
    hosts: HashMap<String, Arc<HostAgent>>,
}

impl Builder<'_> {
    fn scheduler(&mut self, id: &str) -> SchedulerResult<Arc<PlacementScheduler>> {
        let entry = self
            .inventory
            .scheduler(id)
            .ok_or_else(|| SchedulerError::NodeUnavailable {
                node: id.to_string(),
                reason: "not in inventory".to_string(),
            })?;

        let mut scheduler = PlacementScheduler::new(id, self.policy.clone(), self.transfer)
            .with_config(&self.config.scheduler);

        if !entry.hosts.is_empty() {
            let hosts = entry
                .hosts
                .iter()
                .map(|host| self.host(host))
                .collect::<SchedulerResult<Vec<_>>>()?;
            scheduler = scheduler.with_snapshots(Arc::new(hosts));
        } else if !entry.children.is_empty() {
            let mut children: Vec<Arc<dyn PlacementNode>> = Vec::with_capacity(entry.children.len());
            for child in &entry.children {
                if self.inventory.scheduler(child).is_some() {
                    children.push(self.scheduler(child)?);
                } else {
                    children.push(self.host(child)?);
                }
            }
            scheduler = scheduler.with_children(Arc::new(children));
        }

        Ok(Arc::new(scheduler))
    }

    fn host(&mut self, id: &str) -> SchedulerResult<Arc<HostAgent>> {
        let entry = self
            .inventory
            .host(id)
            .ok_or_else(|| SchedulerError::UnknownHost(id.to_string()))?;

        let mut agent = HostAgent::new(
            host_entry_to_snapshot(entry),
            self.policy.clone(),
            self.transfer,
        )
        .with_concurrency(self.config.agent.host_service_threads);
        for listener in &self.listeners {
            agent = agent.with_listener(listener.clone());
        }

        let agent = Arc::new(agent);
        self.hosts.insert(id.to_string(), agent.clone());
        Ok(agent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INVENTORY: &str = r#"
root = "root"

[[schedulers]]
id = "root"
children = ["rack-1", "host-c"]

[[schedulers]]
id = "rack-1"
hosts = ["host-a", "host-b"]

[[hosts]]
id = "host-a"
cpu_count = 8
memory_mb = 16384

[[hosts]]
id = "host-b"
cpu_count = 8
memory_mb = 16384

[[hosts]]
id = "host-c"
cpu_count = 4
memory_mb = 8192
"#;

    fn tree() -> SchedulerTree {
        let inventory = Inventory::parse(INVENTORY).unwrap();
        SchedulerTree::from_inventory(&inventory, &AgentConfig::default(), Vec::new()).unwrap()
    }

    #[test]
    fn registers_every_host() {
        let tree = tree();
        let mut ids: Vec<&str> = tree.host_ids().collect();
        ids.sort();
        assert_eq!(ids, vec!["host-a", "host-b", "host-c"]);
        assert_eq!(tree.root().id(), "root");
        assert_eq!(tree.default_timeout(), Duration::from_millis(2000));
    }

    #[test]
    fn snapshots_reach_their_host() {
        let tree = tree();
        tree.update_snapshot(ResourceSnapshot::new("host-b", 16, 32768).with_usage(1, 1024))
            .unwrap();
        assert_eq!(tree.host("host-b").unwrap().snapshot().raw_cpu, 16);

        let err = tree
            .update_snapshot(ResourceSnapshot::new("host-z", 1, 1))
            .unwrap_err();
        assert!(matches!(err, SchedulerError::UnknownHost(id) if id == "host-z"));
    }

    #[test]
    fn shared_host_is_rejected() {
        let mut inventory = Inventory::parse(INVENTORY).unwrap();
        inventory.schedulers.push(canopy_core::SchedulerEntry {
            id: "rack-2".to_string(),
            children: Vec::new(),
            hosts: vec!["host-a".to_string()],
        });
        inventory.schedulers[0].children.push("rack-2".to_string());

        let err = SchedulerTree::from_inventory(&inventory, &AgentConfig::default(), Vec::new())
            .unwrap_err();
        assert!(matches!(err, SchedulerError::Placement(_)));
    }

    #[tokio::test]
    async fn close_stops_every_host() {
        let tree = tree();
        tree.close();

        for id in ["host-a", "host-b", "host-c"] {
            let request = PlacementRequest::new(
                "req",
                canopy_placement::ResourceDemand {
                    cpu: 1,
                    memory_mb: 128,
                    disk_gb: 0,
                },
                Duration::from_secs(1),
            );
            let err = tree.host(id).unwrap().place(request).await.unwrap_err();
            assert!(matches!(err, SchedulerError::NodeUnavailable { .. }));
        }
    }

    #[test]
    fn invalid_overcommit_is_rejected() {
        let inventory = Inventory::parse(INVENTORY).unwrap();
        let mut config = AgentConfig::default();
        config.agent.cpu_overcommit = 0.5;
        let err = SchedulerTree::from_inventory(&inventory, &config, Vec::new()).unwrap_err();
        assert!(matches!(err, SchedulerError::Placement(_)));
    }

    #[test]
    fn policy_is_shared_with_the_tree() {
        let inventory = Inventory::parse(INVENTORY).unwrap();
        let mut config = AgentConfig::default();
        config.agent.cpu_overcommit = 3.0;
        let tree = SchedulerTree::from_inventory(&inventory, &config, Vec::new()).unwrap();
        assert_eq!(tree.policy().current().cpu(), 3.0);
    }
}
