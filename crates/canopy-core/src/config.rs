//! agent.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{ConfigError, ConfigResult, check_overcommit_ratio, check_transfer_ratio};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub agent: AgentSection,
    pub scheduler: SchedulerSection,
}

/// Settings shared by the host and scheduler handlers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    /// Concurrent placement calls a single host agent serves.
    pub host_service_threads: usize,
    /// Worker threads of the daemon runtime.
    pub scheduler_service_threads: usize,
    pub utilization_transfer_ratio: f64,
    pub cpu_overcommit: f64,
    pub memory_overcommit: f64,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            host_service_threads: 4,
            scheduler_service_threads: 8,
            utilization_transfer_ratio: 0.5,
            cpu_overcommit: 1.0,
            memory_overcommit: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSection {
    /// Maximum number of children a request is fanned out to.
    pub fanout: usize,
    /// Latency budget subtracted from the deadline at every hop.
    pub hop_latency_ms: u64,
    /// Deadline applied to requests that don't carry one.
    pub default_timeout_ms: u64,
    /// Seed for child sampling. Unset means a fresh random sample per call.
    pub seed: Option<u64>,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            fanout: 4,
            hop_latency_ms: 50,
            default_timeout_ms: 2000,
            seed: None,
        }
    }
}

impl SchedulerSection {
    pub fn hop_latency(&self) -> Duration {
        Duration::from_millis(self.hop_latency_ms)
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

/// The overcommit part of the configuration, published on every change.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OvercommitSettings {
    pub cpu: f64,
    pub memory: f64,
}

impl Default for OvercommitSettings {
    fn default() -> Self {
        Self {
            cpu: 1.0,
            memory: 1.0,
        }
    }
}

impl AgentConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::parse(&content)?;
        Ok(config)
    }

    /// Parse and validate a configuration document.
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: AgentConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        check_overcommit_ratio("cpu", self.agent.cpu_overcommit)?;
        check_overcommit_ratio("memory", self.agent.memory_overcommit)?;
        check_transfer_ratio(self.agent.utilization_transfer_ratio)?;

        if self.agent.host_service_threads == 0 {
            return Err(ConfigError::InvalidValue {
                key: "agent.host_service_threads",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.agent.scheduler_service_threads == 0 {
            return Err(ConfigError::InvalidValue {
                key: "agent.scheduler_service_threads",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.scheduler.fanout == 0 {
            return Err(ConfigError::InvalidValue {
                key: "scheduler.fanout",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.scheduler.default_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "scheduler.default_timeout_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    pub fn overcommit(&self) -> OvercommitSettings {
        OvercommitSettings {
            cpu: self.agent.cpu_overcommit,
            memory: self.agent.memory_overcommit,
        }
    }
}
