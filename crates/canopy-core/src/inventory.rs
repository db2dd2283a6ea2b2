//! Scheduler tree inventory.
//!
//! Describes the topology the scheduler answers for: scheduler nodes, the
//! children they fan out to, and the hosts with their last reported usage.
//!
//! ```toml
//! root = "root"
//!
//! [[schedulers]]
//! id = "root"
//! children = ["rack-1", "host-c"]
//!
//! [[schedulers]]
//! id = "rack-1"
//! hosts = ["host-a", "host-b"]
//!
//! [[hosts]]
//! id = "host-a"
//! cpu_count = 8
//! memory_mb = 16384
//! datastores = ["ds-1"]
//! ```
//!
//! A scheduler lists either `children` (nodes it fans out to, schedulers or
//! hosts) or `hosts` (snapshots it scores itself), never both.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::Path;

use crate::error::{ConfigError, ConfigResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Inventory {
    pub root: String,
    #[serde(default)]
    pub schedulers: Vec<SchedulerEntry>,
    #[serde(default)]
    pub hosts: Vec<HostEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerEntry {
    pub id: String,
    #[serde(default)]
    pub children: Vec<String>,
    #[serde(default)]
    pub hosts: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostEntry {
    pub id: String,
    pub cpu_count: u32,
    pub memory_mb: u64,
    #[serde(default)]
    pub used_cpu: u32,
    #[serde(default)]
    pub used_memory_mb: u64,
    #[serde(default)]
    pub free_disk_gb: u64,
    #[serde(default)]
    pub datastores: BTreeSet<String>,
    #[serde(default)]
    pub networks: BTreeSet<String>,
    pub host_type: Option<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl Inventory {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let inventory = Self::parse(&content)?;
        Ok(inventory)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let inventory: Inventory = toml::from_str(content)?;
        inventory.validate()?;
        Ok(inventory)
    }

    pub fn scheduler(&self, id: &str) -> Option<&SchedulerEntry> {
        self.schedulers.iter().find(|s| s.id == id)
    }

    pub fn host(&self, id: &str) -> Option<&HostEntry> {
        self.hosts.iter().find(|h| h.id == id)
    }

    /// Check ids are unique, references resolve, and the schedulers
    /// reachable from the root form a tree.
    pub fn validate(&self) -> ConfigResult<()> {
        let mut ids = HashSet::new();
        for id in self
            .schedulers
            .iter()
            .map(|s| &s.id)
            .chain(self.hosts.iter().map(|h| &h.id))
        {
            if !ids.insert(id.as_str()) {
                return Err(ConfigError::Inventory(format!("duplicate id `{id}`")));
            }
        }

        let hosts: HashSet<&str> = self.hosts.iter().map(|h| h.id.as_str()).collect();
        let schedulers: HashMap<&str, &SchedulerEntry> =
            self.schedulers.iter().map(|s| (s.id.as_str(), s)).collect();

        if !schedulers.contains_key(self.root.as_str()) {
            return Err(ConfigError::Inventory(format!(
                "root scheduler `{}` is not defined",
                self.root
            )));
        }

        for entry in &self.schedulers {
            if !entry.children.is_empty() && !entry.hosts.is_empty() {
                return Err(ConfigError::Inventory(format!(
                    "scheduler `{}` lists both children and hosts",
                    entry.id
                )));
            }
            for child in &entry.children {
                if !ids.contains(child.as_str()) {
                    return Err(ConfigError::Inventory(format!(
                        "scheduler `{}` references unknown child `{child}`",
                        entry.id
                    )));
                }
            }
            for host in &entry.hosts {
                if !hosts.contains(host.as_str()) {
                    return Err(ConfigError::Inventory(format!(
                        "scheduler `{}` references unknown host `{host}`",
                        entry.id
                    )));
                }
            }
        }

        // Every node, hosts included, may have at most one parent below the root.
        let mut seen = HashSet::new();
        let mut stack = vec![self.root.as_str()];
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                return Err(ConfigError::Inventory(format!(
                    "node `{id}` is reachable more than once"
                )));
            }
            if let Some(entry) = schedulers.get(id) {
                stack.extend(entry.children.iter().map(String::as_str));
                stack.extend(entry.hosts.iter().map(String::as_str));
            }
        }

        Ok(())
    }
}
