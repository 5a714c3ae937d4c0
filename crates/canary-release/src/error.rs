//! Release manager error types.

use thiserror::Error;

/// Errors that can occur during release operations.
#[derive(Debug, Error)]
pub enum ReleaseError {
    /// A non-terminal release already exists for the target.
    #[error("active release already exists for target: {0}")]
    Conflict(String),

    #[error("release not found: {0}")]
    NotFound(String),

    #[error("config error: {0}")]
    Config(#[from] canary_config::ConfigError),

    #[error("state store error: {0}")]
    State(#[from] canary_state::StateError),
}

pub type ReleaseResult<T> = Result<T, ReleaseError>;
