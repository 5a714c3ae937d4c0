//! canary-rollback — rollback execution for canary releases.
//!
//! The `RollbackController` reverts a release to zero canary traffic,
//! records an immutable `RollbackEvent`, and notifies an external
//! collaborator. A per-target cooldown suppresses repeated event recording
//! during rollback flapping; the release transition itself is never
//! suppressed.

pub mod controller;

pub use controller::{NotifyCallback, RollbackController, RollbackOutcome};
