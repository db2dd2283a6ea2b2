//! Conversions from inventory entries to placement types.

use canopy_core::HostEntry;

use crate::snapshot::ResourceSnapshot;

/// Build the initial [`ResourceSnapshot`] for a host listed in the inventory.
pub fn host_entry_to_snapshot(entry: &HostEntry) -> ResourceSnapshot {
    ResourceSnapshot {
        host_id: entry.id.clone(),
        raw_cpu: entry.cpu_count,
        raw_memory_mb: entry.memory_mb,
        used_cpu: entry.used_cpu,
        used_memory_mb: entry.used_memory_mb,
        free_disk_gb: entry.free_disk_gb,
        datastores: entry.datastores.clone(),
        networks: entry.networks.clone(),
        host_type: entry.host_type.clone(),
        tags: entry.tags.clone(),
    }
}
