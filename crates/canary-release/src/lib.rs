//! canary-release — orchestration of the canary release lifecycle.
//!
//! The `ReleaseManager` owns every state transition a release can make:
//! creation, scheduled ramp ticks, automatic promotion, rollback on failed
//! health, and manual overrides. The `RampScheduler` drives ticks with one
//! cancellable background task per active release.
//!
//! Operations on the same release are serialized through a per-release
//! mutex; the loser of a tick/manual-action race observes a terminal
//! release and becomes a no-op.
//!
//! # Components
//!
//! - **`manager`** — release state machine and manual overrides
//! - **`scheduler`** — per-release ramp timer tasks
//! - **`error`** — `ReleaseError` taxonomy

pub mod error;
pub mod manager;
pub mod scheduler;

pub use error::{ReleaseError, ReleaseResult};
pub use manager::{ReleaseManager, TickOutcome, TrafficCallback, TrafficCommand};
pub use scheduler::RampScheduler;
