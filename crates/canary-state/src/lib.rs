//! canary-state — redb-backed state persistence for the canary controller.
//!
//! Holds everything the controller must remember across restarts:
//! releases (with an active-release index per target), versioned configs,
//! rollback events, deployment history entries (with per-target sequence
//! counters), rollback cooldowns, and pushed metric samples.
//!
//! # Components
//!
//! - **`types`** — Persisted domain types (releases, configs, events, entries)
//! - **`tables`** — redb table definitions and composite-key layout
//! - **`store`** — Typed CRUD plus compound check-then-write transactions
//! - **`error`** — `StateError` taxonomy

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
