//! canary-health — health evaluation for canary releases.
//!
//! The `HealthEvaluator` compares the canary cohort against the stable
//! cohort over an evaluation window and returns a PASS/FAIL/INSUFFICIENT_DATA
//! verdict. Metric samples come from a pluggable `MetricsSource`: store-backed
//! (push ingestion) or HTTP pull. Source failures and timeouts always degrade
//! to INSUFFICIENT_DATA — they never halt a release.
//!
//! # Components
//!
//! - **`source`** — `MetricsSource` trait and implementations
//! - **`evaluator`** — verdict computation and cohort aggregation

pub mod evaluator;
pub mod source;

pub use evaluator::{Evaluation, HealthEvaluator, Verdict};
pub use source::{HttpMetricsSource, MetricsError, MetricsSource, StaticMetricsSource, StoreMetricsSource};
