//! Overcommit policy: raw host capacity to schedulable capacity.
//!
//! Ratios are published as immutable snapshots through an `ArcSwap`.
//! Decisions load the current snapshot once and keep using it, so a ratio
//! change never alters a decision that is already scoring.

use std::sync::Arc;

use arc_swap::ArcSwap;
use canopy_core::OvercommitSettings;
use canopy_core::error::check_overcommit_ratio;
use tracing::info;

use crate::error::PlacementResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Cpu,
    Memory,
}

/// One consistent pair of overcommit ratios. Both are >= 1.0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OvercommitRatios {
    cpu: f64,
    memory: f64,
}

impl OvercommitRatios {
    pub fn new(cpu: f64, memory: f64) -> PlacementResult<Self> {
        Ok(Self {
            cpu: check_overcommit_ratio("cpu", cpu)?,
            memory: check_overcommit_ratio("memory", memory)?,
        })
    }

    pub fn cpu(&self) -> f64 {
        self.cpu
    }

    pub fn memory(&self) -> f64 {
        self.memory
    }

    pub fn ratio(&self, resource: Resource) -> f64 {
        match resource {
            Resource::Cpu => self.cpu,
            Resource::Memory => self.memory,
        }
    }

    /// `raw * ratio` for the given resource.
    pub fn effective_capacity(&self, resource: Resource, raw: f64) -> f64 {
        raw * self.ratio(resource)
    }
}

impl Default for OvercommitRatios {
    fn default() -> Self {
        Self {
            cpu: 1.0,
            memory: 1.0,
        }
    }
}

impl TryFrom<OvercommitSettings> for OvercommitRatios {
    type Error = crate::error::PlacementError;

    fn try_from(settings: OvercommitSettings) -> PlacementResult<Self> {
        Self::new(settings.cpu, settings.memory)
    }
}

/// Shared, runtime-updatable overcommit policy.
///
/// Many concurrent readers, one writer (the configuration change path).
pub struct OvercommitPolicy {
    ratios: ArcSwap<OvercommitRatios>,
}

impl OvercommitPolicy {
    pub fn new(ratios: OvercommitRatios) -> Self {
        Self {
            ratios: ArcSwap::from_pointee(ratios),
        }
    }

    /// The ratios in force right now.
    pub fn current(&self) -> Arc<OvercommitRatios> {
        self.ratios.load_full()
    }

    pub fn effective_capacity(&self, resource: Resource, raw: f64) -> f64 {
        self.ratios.load().effective_capacity(resource, raw)
    }

    pub fn set_cpu_ratio(&self, ratio: f64) -> PlacementResult<()> {
        let ratio = check_overcommit_ratio("cpu", ratio)?;
        self.ratios.rcu(|current| OvercommitRatios {
            cpu: ratio,
            ..**current
        });
        info!(ratio, "cpu overcommit ratio updated");
        Ok(())
    }

    pub fn set_memory_ratio(&self, ratio: f64) -> PlacementResult<()> {
        let ratio = check_overcommit_ratio("memory", ratio)?;
        self.ratios.rcu(|current| OvercommitRatios {
            memory: ratio,
            ..**current
        });
        info!(ratio, "memory overcommit ratio updated");
        Ok(())
    }

    /// Apply published settings, touching only the ratios that changed.
    ///
    /// Both values are checked before either is written. Returns whether
    /// anything changed.
    pub fn apply(&self, settings: OvercommitSettings) -> PlacementResult<bool> {
        let next = OvercommitRatios::try_from(settings)?;
        let current = self.current();
        let mut changed = false;

        if next.cpu != current.cpu {
            self.set_cpu_ratio(next.cpu)?;
            changed = true;
        }
        if next.memory != current.memory {
            self.set_memory_ratio(next.memory)?;
            changed = true;
        }
        Ok(changed)
    }
}

impl Default for OvercommitPolicy {
    fn default() -> Self {
        Self::new(OvercommitRatios::default())
    }
}

impl std::fmt::Debug for OvercommitPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("OvercommitPolicy")
            .field(&*self.ratios.load())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PlacementError;
    use canopy_core::ConfigError;

    #[test]
    fn rejects_ratio_below_one() {
        let err = OvercommitRatios::new(0.5, 1.0).unwrap_err();
        assert_eq!(
            err,
            PlacementError::InvalidConfig(ConfigError::InvalidOvercommit {
                resource: "cpu",
                value: 0.5
            })
        );
        assert!(OvercommitRatios::new(1.0, 0.0).is_err());
    }

    #[test]
    fn no_upper_bound() {
        let ratios = OvercommitRatios::new(100.0, 50.0).unwrap();
        assert_eq!(ratios.effective_capacity(Resource::Cpu, 8.0), 800.0);
    }

    #[test]
    fn set_ratio_is_seen_by_later_reads_only() {
        let policy = OvercommitPolicy::default();
        let captured = policy.current();

        policy.set_cpu_ratio(4.0).unwrap();

        assert_eq!(captured.cpu(), 1.0);
        assert_eq!(policy.current().cpu(), 4.0);
        assert_eq!(policy.current().memory(), 1.0);
        assert_eq!(policy.effective_capacity(Resource::Cpu, 2.0), 8.0);
    }

    #[test]
    fn invalid_update_keeps_previous_policy() {
        let policy = OvercommitPolicy::new(OvercommitRatios::new(2.0, 1.5).unwrap());

        assert!(policy.set_memory_ratio(0.9).is_err());
        assert_eq!(policy.current().memory(), 1.5);
    }

    #[test]
    fn apply_only_changes_what_differs() {
        let policy = OvercommitPolicy::default();

        let changed = policy
            .apply(OvercommitSettings {
                cpu: 1.0,
                memory: 2.0,
            })
            .unwrap();
        assert!(changed);
        assert_eq!(*policy.current(), OvercommitRatios::new(1.0, 2.0).unwrap());

        let unchanged = policy
            .apply(OvercommitSettings {
                cpu: 1.0,
                memory: 2.0,
            })
            .unwrap();
        assert!(!unchanged);
    }

    #[test]
    fn apply_rejects_whole_update_when_one_ratio_is_bad() {
        let policy = OvercommitPolicy::default();
        let result = policy.apply(OvercommitSettings {
            cpu: 3.0,
            memory: 0.2,
        });

        assert!(result.is_err());
        assert_eq!(policy.current().cpu(), 1.0);
    }

    #[test]
    fn concurrent_readers_never_see_invalid_ratios() {
        use std::thread;

        let policy = Arc::new(OvercommitPolicy::default());
        let writer = {
            let policy = policy.clone();
            thread::spawn(move || {
                for i in 0..200 {
                    let r = 1.0 + f64::from(i);
                    policy
                        .apply(OvercommitSettings { cpu: r, memory: r })
                        .unwrap();
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let policy = policy.clone();
                thread::spawn(move || {
                    for _ in 0..200 {
                        let ratios = policy.current();
                        assert!(ratios.cpu() >= 1.0 && ratios.memory() >= 1.0);
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for r in readers {
            r.join().unwrap();
        }
        assert_eq!(policy.current().cpu(), 200.0);
    }
}
