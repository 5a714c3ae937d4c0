//! Metric sample sources for health evaluation.
//!
//! Sources return raw cohort samples over a window; the evaluator does the
//! aggregation and comparison. All source failures are `MetricsError`s the
//! evaluator downgrades to an INSUFFICIENT_DATA verdict.

use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tracing::debug;

use canary_state::{MetricSample, StateStore};

/// Errors from fetching metric samples. Always transient from the state
/// machine's point of view — the next tick retries.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("metrics source i/o error: {0}")]
    Io(String),

    #[error("metrics endpoint returned status {0}")]
    Status(u16),

    #[error("failed to decode metrics payload: {0}")]
    Decode(String),
}

/// Boxed future returned by `MetricsSource::fetch`.
pub type SourceFuture<'a> = std::pin::Pin<
    Box<dyn std::future::Future<Output = Result<Vec<MetricSample>, MetricsError>> + Send + 'a>,
>;

/// A provider of cohort metric samples for a target.
pub trait MetricsSource: Send + Sync {
    /// Fetch samples for both cohorts covering the last `window_secs`.
    fn fetch<'a>(&'a self, target_id: &'a str, window_secs: u64) -> SourceFuture<'a>;
}

// ── Store-backed source (push ingestion) ──────────────────────────

/// Reads samples that were pushed into the state store via the API.
#[derive(Clone)]
pub struct StoreMetricsSource {
    state: StateStore,
}

impl StoreMetricsSource {
    pub fn new(state: StateStore) -> Self {
        Self { state }
    }
}

impl MetricsSource for StoreMetricsSource {
    fn fetch<'a>(&'a self, target_id: &'a str, window_secs: u64) -> SourceFuture<'a> {
        Box::pin(async move {
            let cutoff = epoch_secs().saturating_sub(window_secs);
            self.state
                .samples_since(target_id, cutoff)
                .map_err(|e| MetricsError::Io(e.to_string()))
        })
    }
}

// ── HTTP pull source ──────────────────────────────────────────────

/// Pulls samples from an external metrics endpoint over HTTP/1.
///
/// Expects `GET {path_prefix}/{target_id}/samples?window_secs={n}` to return
/// a JSON array of samples. Connection, status, and decode failures map to
/// `MetricsError`; the evaluator bounds the whole fetch with a timeout.
pub struct HttpMetricsSource {
    /// Endpoint authority (`host:port`).
    authority: String,
    /// Path prefix the sample route is mounted under.
    path_prefix: String,
}

impl HttpMetricsSource {
    pub fn new(authority: &str, path_prefix: &str) -> Self {
        Self {
            authority: authority.to_string(),
            path_prefix: path_prefix.trim_end_matches('/').to_string(),
        }
    }
}

impl MetricsSource for HttpMetricsSource {
    fn fetch<'a>(&'a self, target_id: &'a str, window_secs: u64) -> SourceFuture<'a> {
        Box::pin(async move {
            let uri = format!(
                "http://{}{}/{}/samples?window_secs={}",
                self.authority, self.path_prefix, target_id, window_secs
            );

            let stream = tokio::net::TcpStream::connect(&self.authority)
                .await
                .map_err(|e| {
                    debug!(error = %e, %uri, "metrics fetch connection failed");
                    MetricsError::Io(e.to_string())
                })?;

            let io = hyper_util::rt::TokioIo::new(stream);
            let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
                .await
                .map_err(|e| {
                    debug!(error = %e, %uri, "metrics fetch handshake failed");
                    MetricsError::Io(e.to_string())
                })?;

            // Drive the connection in the background.
            tokio::spawn(async move {
                let _ = conn.await;
            });

            let req = http::Request::builder()
                .method("GET")
                .uri(&uri)
                .header("host", self.authority.as_str())
                .header("user-agent", "canary-health/0.1")
                .body(http_body_util::Empty::<bytes::Bytes>::new())
                .map_err(|e| MetricsError::Io(e.to_string()))?;

            let resp = sender.send_request(req).await.map_err(|e| {
                debug!(error = %e, %uri, "metrics fetch request failed");
                MetricsError::Io(e.to_string())
            })?;

            let status = resp.status();
            if !status.is_success() {
                debug!(%status, %uri, "metrics fetch non-2xx");
                return Err(MetricsError::Status(status.as_u16()));
            }

            use http_body_util::BodyExt;
            let body = resp
                .into_body()
                .collect()
                .await
                .map_err(|e| MetricsError::Io(e.to_string()))?
                .to_bytes();

            serde_json::from_slice::<Vec<MetricSample>>(&body)
                .map_err(|e| MetricsError::Decode(e.to_string()))
        })
    }
}

// ── Fixed source ──────────────────────────────────────────────────

/// A source backed by a fixed, swappable sample set (for tests and demos).
#[derive(Clone, Default)]
pub struct StaticMetricsSource {
    samples: Arc<Mutex<Vec<MetricSample>>>,
}

impl StaticMetricsSource {
    pub fn new(samples: Vec<MetricSample>) -> Self {
        Self {
            samples: Arc::new(Mutex::new(samples)),
        }
    }

    /// Replace the sample set returned by subsequent fetches.
    pub fn set(&self, samples: Vec<MetricSample>) {
        *self.samples.lock().expect("sample lock poisoned") = samples;
    }
}

impl MetricsSource for StaticMetricsSource {
    fn fetch<'a>(&'a self, _target_id: &'a str, _window_secs: u64) -> SourceFuture<'a> {
        let samples = self.samples.lock().expect("sample lock poisoned").clone();
        Box::pin(async move { Ok(samples) })
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
