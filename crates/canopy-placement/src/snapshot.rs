//! Host resource snapshots.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::overcommit::{OvercommitRatios, Resource};

/// Raw capacity and usage reported by a host.
///
/// Owned by the host agent that reports it and replaced wholesale on every
/// refresh. Schedulers read whatever snapshot is current and never lock it
/// for the length of a decision, so a placement may be decided against
/// usage figures another decision has already consumed. That race is
/// accepted: the workload creation fails downstream and the caller retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub host_id: String,
    /// Physical CPU count.
    pub raw_cpu: u32,
    pub raw_memory_mb: u64,
    /// vCPUs already allocated on the host.
    pub used_cpu: u32,
    pub used_memory_mb: u64,
    pub free_disk_gb: u64,
    pub datastores: BTreeSet<String>,
    pub networks: BTreeSet<String>,
    pub host_type: Option<String>,
    pub tags: BTreeMap<String, String>,
}

impl ResourceSnapshot {
    /// A snapshot with capacity only: nothing used, no inventory.
    pub fn new(host_id: impl Into<String>, raw_cpu: u32, raw_memory_mb: u64) -> Self {
        Self {
            host_id: host_id.into(),
            raw_cpu,
            raw_memory_mb,
            used_cpu: 0,
            used_memory_mb: 0,
            free_disk_gb: 0,
            datastores: BTreeSet::new(),
            networks: BTreeSet::new(),
            host_type: None,
            tags: BTreeMap::new(),
        }
    }

    pub fn with_usage(mut self, used_cpu: u32, used_memory_mb: u64) -> Self {
        self.used_cpu = used_cpu;
        self.used_memory_mb = used_memory_mb;
        self
    }

    pub fn with_datastore(mut self, id: impl Into<String>) -> Self {
        self.datastores.insert(id.into());
        self
    }

    pub fn with_network(mut self, id: impl Into<String>) -> Self {
        self.networks.insert(id.into());
        self
    }

    pub fn with_host_type(mut self, host_type: impl Into<String>) -> Self {
        self.host_type = Some(host_type.into());
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_free_disk(mut self, gb: u64) -> Self {
        self.free_disk_gb = gb;
        self
    }

    pub fn effective_cpu(&self, ratios: &OvercommitRatios) -> f64 {
        ratios.effective_capacity(Resource::Cpu, f64::from(self.raw_cpu))
    }

    pub fn effective_memory_mb(&self, ratios: &OvercommitRatios) -> f64 {
        ratios.effective_capacity(Resource::Memory, self.raw_memory_mb as f64)
    }

    /// Whether the datastore or network inventory differs from `other`.
    pub fn inventory_differs(&self, other: &ResourceSnapshot) -> bool {
        self.datastores != other.datastores || self.networks != other.networks
    }
}
