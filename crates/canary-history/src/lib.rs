//! canary-history — the append-only deployment history log.
//!
//! Every state transition of a canary release is recorded as an immutable
//! `HistoryEntry`, strictly ordered per target. Appends are transition-first:
//! if the store is temporarily unavailable the caller's transition still
//! stands, and the write is retried in the background until durable.
//!
//! # Components
//!
//! - **`log`** — `HistoryLog`: durable appends, filtered/paginated queries,
//!   retention pruning
//! - **`replay`** — reconstruct a release's final `(percentage, status)` from
//!   its entry sequence

pub mod log;
pub mod replay;

pub use log::HistoryLog;
pub use replay::{replay, ReplayedState};
