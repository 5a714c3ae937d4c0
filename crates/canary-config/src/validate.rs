//! Range validation for canary and rollback configs.
//!
//! Invalid configs are rejected before anything is persisted.

use canary_state::{CanaryConfig, RollbackConfig};

use crate::store::ConfigError;

/// Validate a canary config's range invariants.
pub fn validate_canary(config: &CanaryConfig) -> Result<(), ConfigError> {
    if config.max_percentage > 100 {
        return Err(ConfigError::Validation(format!(
            "max_percentage {} exceeds 100",
            config.max_percentage
        )));
    }
    if config.initial_percentage > config.max_percentage {
        return Err(ConfigError::Validation(format!(
            "initial_percentage {} exceeds max_percentage {}",
            config.initial_percentage, config.max_percentage
        )));
    }
    if config.increment_step == 0 {
        return Err(ConfigError::Validation(
            "increment_step must be positive".to_string(),
        ));
    }
    if config.increment_interval_secs == 0 {
        return Err(ConfigError::Validation(
            "increment_interval_secs must be positive".to_string(),
        ));
    }
    if config.auto_promote && config.promote_sustain_secs < config.increment_interval_secs {
        return Err(ConfigError::Validation(format!(
            "promote_sustain_secs {} is shorter than increment_interval_secs {}",
            config.promote_sustain_secs, config.increment_interval_secs
        )));
    }
    Ok(())
}

/// Validate a rollback config's range invariants.
pub fn validate_rollback(config: &RollbackConfig) -> Result<(), ConfigError> {
    if config.error_rate_threshold < 0.0 {
        return Err(ConfigError::Validation(format!(
            "error_rate_threshold {} is negative",
            config.error_rate_threshold
        )));
    }
    if config.latency_threshold_ms < 0.0 {
        return Err(ConfigError::Validation(format!(
            "latency_threshold_ms {} is negative",
            config.latency_threshold_ms
        )));
    }
    if config.evaluation_window_secs == 0 {
        return Err(ConfigError::Validation(
            "evaluation_window_secs must be positive".to_string(),
        ));
    }
    if config.min_sample_size == 0 {
        return Err(ConfigError::Validation(
            "min_sample_size must be positive".to_string(),
        ));
    }
    Ok(())
}
