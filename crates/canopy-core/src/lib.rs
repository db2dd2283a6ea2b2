pub mod config;
pub mod error;
pub mod inventory;

pub use config::{AgentConfig, AgentSection, OvercommitSettings, SchedulerSection};
pub use error::{ConfigError, ConfigResult};
pub use inventory::{HostEntry, Inventory, SchedulerEntry};
