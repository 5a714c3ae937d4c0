//! Verdict computation — canary vs. stable cohort comparison.
//!
//! The evaluator renders PASS when the canary's error-rate and latency
//! deltas stay within the configured thresholds, FAIL when either is
//! exceeded, and INSUFFICIENT_DATA when there is not enough signal to
//! decide. Insufficient signal never ramps and never rolls back.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use canary_state::{CanaryRelease, Cohort, EvaluationSnapshot, MetricSample, RollbackConfig};

use crate::source::MetricsSource;

/// Outcome of one health evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Canary is within thresholds; the ramp may advance.
    Pass,
    /// Canary breaches a threshold; roll back.
    Fail,
    /// Not enough signal to decide; hold and retry next tick.
    InsufficientData,
}

/// A verdict plus the cohort aggregates it was based on.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub verdict: Verdict,
    /// Present whenever both cohorts had traffic; used for rollback events.
    pub snapshot: Option<EvaluationSnapshot>,
}

impl Evaluation {
    fn insufficient() -> Self {
        Self {
            verdict: Verdict::InsufficientData,
            snapshot: None,
        }
    }
}

/// Compares canary and stable cohorts over the evaluation window.
pub struct HealthEvaluator {
    source: Arc<dyn MetricsSource>,
    /// Upper bound on source I/O per evaluation.
    fetch_timeout: Duration,
}

impl HealthEvaluator {
    pub fn new(source: Arc<dyn MetricsSource>) -> Self {
        Self {
            source,
            fetch_timeout: Duration::from_secs(5),
        }
    }

    /// Override the source I/O timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Evaluate a release's canary cohort against its stable cohort.
    ///
    /// Source failures and timeouts return INSUFFICIENT_DATA — the scheduler
    /// retries on the next tick.
    pub async fn evaluate(
        &self,
        release: &CanaryRelease,
        config: &RollbackConfig,
    ) -> Evaluation {
        let fetch = self
            .source
            .fetch(&release.target_id, config.evaluation_window_secs);
        let samples = match tokio::time::timeout(self.fetch_timeout, fetch).await {
            Ok(Ok(samples)) => samples,
            Ok(Err(e)) => {
                debug!(
                    target_id = %release.target_id,
                    error = %e,
                    "metrics fetch failed, deferring verdict"
                );
                return Evaluation::insufficient();
            }
            Err(_) => {
                warn!(
                    target_id = %release.target_id,
                    timeout_ms = self.fetch_timeout.as_millis() as u64,
                    "metrics fetch timed out, deferring verdict"
                );
                return Evaluation::insufficient();
            }
        };

        let stable = aggregate(&samples, Cohort::Stable);
        let canary = aggregate(&samples, Cohort::Canary);
        let combined = stable.requests + canary.requests;

        // A silent cohort leaves its rate undefined; defer rather than guess.
        if combined < config.min_sample_size || stable.requests == 0 || canary.requests == 0 {
            debug!(
                target_id = %release.target_id,
                combined,
                min = config.min_sample_size,
                "insufficient sample size, deferring verdict"
            );
            return Evaluation::insufficient();
        }

        let snapshot = EvaluationSnapshot {
            stable_error_rate: stable.error_rate(),
            canary_error_rate: canary.error_rate(),
            stable_latency_p95_ms: stable.weighted_p95,
            canary_latency_p95_ms: canary.weighted_p95,
            sample_count: combined,
        };

        if snapshot.error_rate_delta() > config.error_rate_threshold {
            warn!(
                target_id = %release.target_id,
                delta = snapshot.error_rate_delta(),
                threshold = config.error_rate_threshold,
                "canary error rate exceeds threshold"
            );
            return Evaluation {
                verdict: Verdict::Fail,
                snapshot: Some(snapshot),
            };
        }
        if snapshot.latency_delta_ms() > config.latency_threshold_ms {
            warn!(
                target_id = %release.target_id,
                delta_ms = snapshot.latency_delta_ms(),
                threshold_ms = config.latency_threshold_ms,
                "canary p95 latency exceeds threshold"
            );
            return Evaluation {
                verdict: Verdict::Fail,
                snapshot: Some(snapshot),
            };
        }

        Evaluation {
            verdict: Verdict::Pass,
            snapshot: Some(snapshot),
        }
    }
}

/// Aggregated request totals for one cohort.
struct CohortStats {
    requests: u64,
    errors: u64,
    /// Request-weighted mean of per-sample p95 latencies.
    weighted_p95: f64,
}

impl CohortStats {
    /// Error rate as a percentage (0-100).
    fn error_rate(&self) -> f64 {
        if self.requests == 0 {
            return 0.0;
        }
        100.0 * self.errors as f64 / self.requests as f64
    }
}

fn aggregate(samples: &[MetricSample], cohort: Cohort) -> CohortStats {
    let mut requests = 0u64;
    let mut errors = 0u64;
    let mut latency_sum = 0.0f64;
    for sample in samples.iter().filter(|s| s.cohort == cohort) {
        requests += sample.request_count;
        errors += sample.error_count;
        latency_sum += sample.latency_p95_ms * sample.request_count as f64;
    }
    let weighted_p95 = if requests == 0 {
        0.0
    } else {
        latency_sum / requests as f64
    };
    CohortStats {
        requests,
        errors,
        weighted_p95,
    }
}
