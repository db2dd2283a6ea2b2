//! Configuration error types.

use thiserror::Error;

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Rejected configuration values.
///
/// A failed validation is fatal to the configuration update that carried
/// it, never to placement decisions already in flight.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("invalid overcommit ratio for {resource}: {value} (must be a finite value >= 1.0)")]
    InvalidOvercommit { resource: &'static str, value: f64 },

    #[error("invalid utilization transfer ratio: {0} (must be within [0.0, 1.0])")]
    InvalidTransferRatio(f64),

    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },

    #[error("invalid inventory: {0}")]
    Inventory(String),
}

/// Check a CPU or memory overcommit ratio.
pub fn check_overcommit_ratio(resource: &'static str, value: f64) -> ConfigResult<f64> {
    if value.is_finite() && value >= 1.0 {
        Ok(value)
    } else {
        Err(ConfigError::InvalidOvercommit { resource, value })
    }
}

/// Check the CPU-vs-memory weight used when scoring candidates.
pub fn check_transfer_ratio(value: f64) -> ConfigResult<f64> {
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(ConfigError::InvalidTransferRatio(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overcommit_ratio_bounds() {
        assert_eq!(check_overcommit_ratio("cpu", 1.0), Ok(1.0));
        assert_eq!(check_overcommit_ratio("cpu", 64.0), Ok(64.0));
        assert!(check_overcommit_ratio("memory", 0.99).is_err());
        assert!(check_overcommit_ratio("memory", f64::NAN).is_err());
        assert!(check_overcommit_ratio("memory", f64::INFINITY).is_err());
    }

    #[test]
    fn transfer_ratio_bounds() {
        assert!(check_transfer_ratio(0.0).is_ok());
        assert!(check_transfer_ratio(1.0).is_ok());
        assert!(check_transfer_ratio(-0.1).is_err());
        assert!(check_transfer_ratio(1.5).is_err());
        assert!(check_transfer_ratio(f64::NAN).is_err());
    }
}
