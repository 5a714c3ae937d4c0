//! Domain types for the canary controller state store.
//!
//! These types represent the persisted state of canary releases, their
//! configs, rollback events, and deployment history. All types are
//! serializable to/from JSON for storage in redb tables.

use serde::{Deserialize, Serialize};

/// Unique identifier for a deployment target (app + environment).
///
/// Opaque single-segment string; must not contain `:` (the composite-key
/// separator).
pub type TargetId = String;

/// Unique identifier for a canary release within a target.
pub type ReleaseId = String;

// ── Configs ───────────────────────────────────────────────────────

/// Ramp configuration for canary releases on a target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CanaryConfig {
    pub target_id: TargetId,
    /// Traffic percentage a new release starts at (0-100).
    pub initial_percentage: u32,
    /// Percentage points added per passing tick.
    pub increment_step: u32,
    /// Seconds between scheduler ticks for a release.
    pub increment_interval_secs: u64,
    /// Ceiling the ramp stops at before promotion (0-100).
    pub max_percentage: u32,
    /// Whether to promote automatically after a sustained pass at max.
    pub auto_promote: bool,
    /// Seconds of uninterrupted passing required before auto-promotion.
    pub promote_sustain_secs: u64,
}

impl CanaryConfig {
    /// Documented defaults for a target with no stored config.
    pub fn default_for(target_id: &str) -> Self {
        Self {
            target_id: target_id.to_string(),
            initial_percentage: 10,
            increment_step: 15,
            increment_interval_secs: 1800,
            max_percentage: 50,
            auto_promote: true,
            promote_sustain_secs: 900,
        }
    }
}

/// Automatic rollback configuration for a target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RollbackConfig {
    pub target_id: TargetId,
    /// Maximum tolerated canary-minus-stable error rate delta (percentage points).
    pub error_rate_threshold: f64,
    /// Maximum tolerated canary-minus-stable p95 latency delta (milliseconds).
    pub latency_threshold_ms: f64,
    /// Seconds of metric history evaluated per tick.
    pub evaluation_window_secs: u64,
    /// Minimum seconds between recorded rollback events for this target.
    pub cooldown_secs: u64,
    /// Minimum combined request count before a verdict is rendered.
    pub min_sample_size: u64,
}

impl RollbackConfig {
    /// Documented defaults for a target with no stored config.
    pub fn default_for(target_id: &str) -> Self {
        Self {
            target_id: target_id.to_string(),
            error_rate_threshold: 2.0,
            latency_threshold_ms: 300.0,
            evaluation_window_secs: 900,
            cooldown_secs: 300,
            min_sample_size: 100,
        }
    }
}

/// A stored config version. Prior versions are retained for audit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Versioned<T> {
    pub version: u64,
    /// Unix timestamp (seconds) when this version was written.
    pub updated_at: u64,
    pub config: T,
}

// ── Releases ──────────────────────────────────────────────────────

/// Lifecycle status of a canary release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseStatus {
    Initializing,
    Ramping,
    Promoted,
    RolledBack,
    Cancelled,
}

impl ReleaseStatus {
    /// Terminal states are immutable; ticks and manual actions no-op on them.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReleaseStatus::Promoted | ReleaseStatus::RolledBack | ReleaseStatus::Cancelled
        )
    }
}

/// A canary release for a deployment target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CanaryRelease {
    pub id: ReleaseId,
    pub target_id: TargetId,
    /// The deployment this release is ramping traffic toward.
    pub deployment_id: String,
    /// Current canary traffic percentage (0-100). Monotonically
    /// non-decreasing while ramping; reset to 0 only on rollback.
    pub percentage: u32,
    pub status: ReleaseStatus,
    /// Unix timestamp (seconds) when the release was created.
    pub created_at: u64,
    /// Unix timestamp of the last state transition.
    pub last_transition_at: u64,
    /// Start of the current uninterrupted PASS streak, if any.
    pub sustained_pass_since: Option<u64>,
}

impl CanaryRelease {
    /// Build the composite key for the releases table.
    pub fn table_key(&self) -> String {
        format!("{}:{}", self.target_id, self.id)
    }
}

// ── Rollback events ───────────────────────────────────────────────

/// Who triggered a rollback.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggeredBy {
    System,
    User { actor: String },
}

/// Immutable record of an executed rollback.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RollbackEvent {
    pub id: String,
    pub release_id: ReleaseId,
    pub target_id: TargetId,
    /// Machine-readable reason, e.g. `health_check_failed`.
    pub reason: String,
    /// Cohort metrics captured by the failing evaluation, if any.
    pub metrics_snapshot: Option<EvaluationSnapshot>,
    pub triggered_by: TriggeredBy,
    /// Unix timestamp (seconds) when the rollback was triggered.
    pub triggered_at: u64,
}

impl RollbackEvent {
    /// Build the composite key for the rollback events table.
    pub fn table_key(&self) -> String {
        format!("{}:{:020}:{}", self.target_id, self.triggered_at, self.release_id)
    }
}

// ── Deployment history ────────────────────────────────────────────

/// Kind of state transition recorded in the history log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryEventType {
    Created,
    Ramped,
    Promoted,
    RolledBack,
    Cancelled,
}

impl HistoryEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryEventType::Created => "created",
            HistoryEventType::Ramped => "ramped",
            HistoryEventType::Promoted => "promoted",
            HistoryEventType::RolledBack => "rolled_back",
            HistoryEventType::Cancelled => "cancelled",
        }
    }

    /// Parse the wire form used in query filters.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(HistoryEventType::Created),
            "ramped" => Some(HistoryEventType::Ramped),
            "promoted" => Some(HistoryEventType::Promoted),
            "rolled_back" => Some(HistoryEventType::RolledBack),
            "cancelled" => Some(HistoryEventType::Cancelled),
            _ => None,
        }
    }
}

/// One immutable entry in a target's deployment history.
///
/// Entries are strictly ordered by `sequence_no` within a target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntry {
    pub sequence_no: u64,
    pub target_id: TargetId,
    pub release_id: ReleaseId,
    pub event: HistoryEventType,
    /// Event-specific detail; carries enough state for replay.
    pub payload: serde_json::Value,
    /// Unix timestamp (seconds) when the transition happened.
    pub timestamp: u64,
}

impl HistoryEntry {
    /// Build the composite key for the history table.
    pub fn table_key(&self) -> String {
        format!("{}:{:020}", self.target_id, self.sequence_no)
    }
}

// ── Metrics ───────────────────────────────────────────────────────

/// Which traffic cohort a metric sample describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cohort {
    Stable,
    Canary,
}

/// One ingested metric sample for a target cohort.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricSample {
    /// Unix timestamp (seconds) of the sample window.
    pub timestamp: u64,
    pub cohort: Cohort,
    pub error_count: u64,
    pub request_count: u64,
    /// P95 latency in milliseconds over the sample window.
    pub latency_p95_ms: f64,
}

/// Aggregated cohort comparison captured by one health evaluation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvaluationSnapshot {
    /// Error rates as percentages (0-100).
    pub stable_error_rate: f64,
    pub canary_error_rate: f64,
    /// Request-weighted p95 latencies in milliseconds.
    pub stable_latency_p95_ms: f64,
    pub canary_latency_p95_ms: f64,
    /// Combined request count across both cohorts.
    pub sample_count: u64,
}

impl EvaluationSnapshot {
    /// Canary-minus-stable error rate delta in percentage points.
    pub fn error_rate_delta(&self) -> f64 {
        self.canary_error_rate - self.stable_error_rate
    }

    /// Canary-minus-stable p95 latency delta in milliseconds.
    pub fn latency_delta_ms(&self) -> f64 {
        self.canary_latency_p95_ms - self.stable_latency_p95_ms
    }
}
