//! canary-config — validated, versioned canary and rollback configuration.
//!
//! `ConfigStore` fronts the state store for per-target `CanaryConfig` and
//! `RollbackConfig`: reads fall back to documented defaults, writes are
//! range-validated at the boundary and stored as a new version with prior
//! versions retained for audit.

pub mod store;
pub mod validate;

pub use store::{ConfigError, ConfigResult, ConfigStore};
