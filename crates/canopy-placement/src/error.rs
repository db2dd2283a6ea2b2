//! Placement error types.

use canopy_core::ConfigError;
use thiserror::Error;

pub type PlacementResult<T> = Result<T, PlacementError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlacementError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
}
