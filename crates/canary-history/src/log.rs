//! HistoryLog — durable appends over the state store's history tables.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{error, info};

use canary_state::{HistoryEntry, HistoryEventType, StateResult, StateStore};

/// Starting delay for deferred append retries.
const RETRY_BASE: Duration = Duration::from_secs(1);
/// Ceiling for the retry backoff.
const RETRY_MAX: Duration = Duration::from_secs(60);

/// Append-only access to per-target deployment history.
#[derive(Clone)]
pub struct HistoryLog {
    state: StateStore,
}

impl HistoryLog {
    pub fn new(state: StateStore) -> Self {
        Self { state }
    }

    /// Append a history entry, never failing the caller.
    ///
    /// On a store error the entry is handed to a background task that
    /// retries with capped exponential backoff until the write lands. The
    /// safety-critical transition the entry describes has already executed;
    /// an executed-but-unlogged transition beats a logged-but-unexecuted one.
    ///
    /// Returns the entry when the immediate write succeeded, `None` when it
    /// was deferred.
    pub fn append(
        &self,
        target_id: &str,
        release_id: &str,
        event: HistoryEventType,
        payload: serde_json::Value,
    ) -> Option<HistoryEntry> {
        let timestamp = epoch_secs();
        match self
            .state
            .append_history(target_id, release_id, event, payload.clone(), timestamp)
        {
            Ok(entry) => Some(entry),
            Err(e) => {
                error!(
                    %target_id,
                    %release_id,
                    event = event.as_str(),
                    error = %e,
                    "history append failed, deferring write"
                );
                self.retry_in_background(
                    target_id.to_string(),
                    release_id.to_string(),
                    event,
                    payload,
                    timestamp,
                );
                None
            }
        }
    }

    fn retry_in_background(
        &self,
        target_id: String,
        release_id: String,
        event: HistoryEventType,
        payload: serde_json::Value,
        timestamp: u64,
    ) {
        let state = self.state.clone();
        tokio::spawn(async move {
            let mut backoff = RETRY_BASE;
            loop {
                tokio::time::sleep(backoff).await;
                match state.append_history(
                    &target_id,
                    &release_id,
                    event,
                    payload.clone(),
                    timestamp,
                ) {
                    Ok(entry) => {
                        info!(
                            %target_id,
                            %release_id,
                            sequence_no = entry.sequence_no,
                            "deferred history entry recorded"
                        );
                        break;
                    }
                    Err(e) => {
                        error!(%target_id, error = %e, "deferred history append failed, retrying");
                        backoff = (backoff * 2).min(RETRY_MAX);
                    }
                }
            }
        });
    }

    /// Query entries for a target, ascending by sequence number.
    pub fn query(
        &self,
        target_id: &str,
        event: Option<HistoryEventType>,
        after_seq: Option<u64>,
        limit: usize,
    ) -> StateResult<Vec<HistoryEntry>> {
        self.state.query_history(target_id, event, after_seq, limit)
    }

    /// Delete entries older than the cutoff. Returns the number deleted.
    pub fn prune_older_than(&self, target_id: &str, cutoff_epoch: u64) -> StateResult<u32> {
        self.state.prune_history_older_than(target_id, cutoff_epoch)
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
