//! ConfigStore — per-target config reads with defaults, validated
//! versioned writes.

use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tracing::info;

use canary_state::{CanaryConfig, RollbackConfig, StateError, StateStore, Versioned};

use crate::validate;

/// Result type alias for config store operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors that can occur during config operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config violates a range invariant; nothing was persisted.
    #[error("invalid config: {0}")]
    Validation(String),

    #[error("state store error: {0}")]
    State(#[from] StateError),
}

/// Validated, versioned config access for deployment targets.
#[derive(Clone)]
pub struct ConfigStore {
    state: StateStore,
}

impl ConfigStore {
    pub fn new(state: StateStore) -> Self {
        Self { state }
    }

    /// Get the effective canary and rollback configs for a target.
    ///
    /// Falls back to the documented defaults for whichever config has never
    /// been stored.
    pub fn get(&self, target_id: &str) -> ConfigResult<(CanaryConfig, RollbackConfig)> {
        let canary = self
            .state
            .get_canary_config(target_id)?
            .map(|v| v.config)
            .unwrap_or_else(|| CanaryConfig::default_for(target_id));
        let rollback = self
            .state
            .get_rollback_config(target_id)?
            .map(|v| v.config)
            .unwrap_or_else(|| RollbackConfig::default_for(target_id));
        Ok((canary, rollback))
    }

    /// Validate and store a new canary config version. Returns the version.
    pub fn put_canary(&self, config: &CanaryConfig) -> ConfigResult<u64> {
        validate::validate_canary(config)?;
        let version = self.state.put_canary_config(config, epoch_secs())?;
        info!(target_id = %config.target_id, version, "canary config updated");
        Ok(version)
    }

    /// Validate and store a new rollback config version. Returns the version.
    pub fn put_rollback(&self, config: &RollbackConfig) -> ConfigResult<u64> {
        validate::validate_rollback(config)?;
        let version = self.state.put_rollback_config(config, epoch_secs())?;
        info!(target_id = %config.target_id, version, "rollback config updated");
        Ok(version)
    }

    /// All stored canary config versions for a target, oldest first.
    pub fn canary_versions(&self, target_id: &str) -> ConfigResult<Vec<Versioned<CanaryConfig>>> {
        Ok(self.state.list_canary_config_versions(target_id)?)
    }

    /// All stored rollback config versions for a target, oldest first.
    pub fn rollback_versions(
        &self,
        target_id: &str,
    ) -> ConfigResult<Vec<Versioned<RollbackConfig>>> {
        Ok(self.state.list_rollback_config_versions(target_id)?)
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
