//! Rollback controller — executes rollbacks with per-target cooldown.
//!
//! Safety takes precedence over bookkeeping: the release is always reverted
//! when a rollback is requested on a non-terminal release. The cooldown only
//! rate-limits `RollbackEvent` recording and notifications, so a flapping
//! target does not flood the audit log.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{info, warn};

use canary_history::HistoryLog;
use canary_state::{
    CanaryRelease, EvaluationSnapshot, HistoryEventType, ReleaseStatus, RollbackConfig,
    RollbackEvent, StateResult, StateStore, TriggeredBy,
};

/// Callback invoked when a rollback event is recorded.
///
/// This is the seam to the notification subsystem; failures are logged and
/// dropped.
pub type NotifyCallback = Arc<dyn Fn(RollbackEvent) -> BoxFuture + Send + Sync>;

type BoxFuture = std::pin::Pin<
    Box<dyn std::future::Future<Output = anyhow::Result<()>> + Send>,
>;

/// Result of a rollback attempt.
#[derive(Debug, Clone)]
pub enum RollbackOutcome {
    /// The release was reverted and an event recorded.
    RolledBack(RollbackEvent),
    /// The release was reverted but event recording was suppressed by the
    /// per-target cooldown.
    Suppressed,
    /// The release was already terminal; nothing happened.
    AlreadyTerminal,
}

/// Executes rollbacks and enforces the per-target cooldown.
pub struct RollbackController {
    state: StateStore,
    history: HistoryLog,
    notify: Option<NotifyCallback>,
}

impl RollbackController {
    pub fn new(state: StateStore, history: HistoryLog) -> Self {
        Self {
            state,
            history,
            notify: None,
        }
    }

    /// Set the callback invoked for recorded rollback events.
    pub fn with_notify_fn(mut self, callback: NotifyCallback) -> Self {
        self.notify = Some(callback);
        self
    }

    /// Roll a release back to zero canary traffic.
    ///
    /// No-op on terminal releases. The cooldown check-and-set is atomic per
    /// target, so concurrent rollbacks record at most one event within
    /// `cooldown_secs`.
    pub async fn rollback(
        &self,
        release: &mut CanaryRelease,
        config: &RollbackConfig,
        reason: &str,
        snapshot: Option<EvaluationSnapshot>,
        triggered_by: TriggeredBy,
    ) -> StateResult<RollbackOutcome> {
        if release.status.is_terminal() {
            return Ok(RollbackOutcome::AlreadyTerminal);
        }

        let now = epoch_secs();

        // Revert the release first — this must happen whether or not the
        // cooldown allows recording another event.
        release.percentage = 0;
        release.status = ReleaseStatus::RolledBack;
        release.last_transition_at = now;
        release.sustained_pass_since = None;
        self.state.transition_release(release)?;

        let recorded =
            self.state
                .check_and_set_cooldown(&release.target_id, now, config.cooldown_secs)?;

        self.history.append(
            &release.target_id,
            &release.id,
            HistoryEventType::RolledBack,
            serde_json::json!({ "reason": reason, "suppressed": !recorded }),
        );

        if !recorded {
            warn!(
                target_id = %release.target_id,
                release_id = %release.id,
                reason,
                cooldown_secs = config.cooldown_secs,
                "rollback event suppressed by cooldown"
            );
            return Ok(RollbackOutcome::Suppressed);
        }

        let event = RollbackEvent {
            id: format!("rbk-{}", release.id),
            release_id: release.id.clone(),
            target_id: release.target_id.clone(),
            reason: reason.to_string(),
            metrics_snapshot: snapshot,
            triggered_by,
            triggered_at: now,
        };
        self.state.append_rollback_event(&event)?;

        info!(
            target_id = %release.target_id,
            release_id = %release.id,
            reason,
            "release rolled back"
        );

        if let Some(ref notify) = self.notify
            && let Err(e) = notify(event.clone()).await
        {
            warn!(
                target_id = %release.target_id,
                error = %e,
                "rollback notification failed"
            );
        }

        Ok(RollbackOutcome::RolledBack(event))
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_setup() -> (StateStore, RollbackController) {
        let state = StateStore::open_in_memory().unwrap();
        let history = HistoryLog::new(state.clone());
        let controller = RollbackController::new(state.clone(), history);
        (state, controller)
    }

    fn test_release(state: &StateStore, seq: u64, percentage: u32) -> CanaryRelease {
        let release = CanaryRelease {
            id: format!("web-prod-{seq}"),
            target_id: "web-prod".to_string(),
            deployment_id: "dep-42".to_string(),
            percentage,
            status: ReleaseStatus::Ramping,
            created_at: 1000,
            last_transition_at: 1000,
            sustained_pass_since: Some(1000),
        };
        assert!(state.insert_release_exclusive(&release).unwrap());
        release
    }

    fn test_config(cooldown_secs: u64) -> RollbackConfig {
        RollbackConfig {
            cooldown_secs,
            ..RollbackConfig::default_for("web-prod")
        }
    }

    #[tokio::test]
    async fn rollback_reverts_release_and_records_event() {
        let (state, controller) = test_setup();
        let mut release = test_release(&state, 1, 50);

        let outcome = controller
            .rollback(
                &mut release,
                &test_config(600),
                "health_check_failed",
                None,
                TriggeredBy::System,
            )
            .await
            .unwrap();

        assert!(matches!(outcome, RollbackOutcome::RolledBack(_)));
        assert_eq!(release.percentage, 0);
        assert_eq!(release.status, ReleaseStatus::RolledBack);
        assert!(release.sustained_pass_since.is_none());

        // Durable state matches, and the active index was cleared.
        let stored = state.get_release("web-prod", "web-prod-1").unwrap().unwrap();
        assert_eq!(stored.status, ReleaseStatus::RolledBack);
        assert!(state.active_release("web-prod").unwrap().is_none());

        let events = state.list_rollback_events("web-prod").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].reason, "health_check_failed");
        assert_eq!(events[0].triggered_by, TriggeredBy::System);

        // History shows the transition.
        let entries = state
            .query_history("web-prod", Some(HistoryEventType::RolledBack), None, 10)
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].payload["suppressed"], serde_json::json!(false));
    }

    #[tokio::test]
    async fn terminal_release_is_a_noop() {
        let (state, controller) = test_setup();
        let mut release = test_release(&state, 1, 50);
        release.status = ReleaseStatus::Promoted;

        let outcome = controller
            .rollback(
                &mut release,
                &test_config(600),
                "health_check_failed",
                None,
                TriggeredBy::System,
            )
            .await
            .unwrap();

        assert!(matches!(outcome, RollbackOutcome::AlreadyTerminal));
        assert!(state.list_rollback_events("web-prod").unwrap().is_empty());
    }

    #[tokio::test]
    async fn second_rollback_within_cooldown_is_suppressed() {
        let (state, controller) = test_setup();

        let mut first = test_release(&state, 1, 30);
        controller
            .rollback(
                &mut first,
                &test_config(600),
                "health_check_failed",
                None,
                TriggeredBy::System,
            )
            .await
            .unwrap();

        // A fresh release for the same target inherits the risk window.
        let mut second = test_release(&state, 2, 10);
        let outcome = controller
            .rollback(
                &mut second,
                &test_config(600),
                "health_check_failed",
                None,
                TriggeredBy::System,
            )
            .await
            .unwrap();

        assert!(matches!(outcome, RollbackOutcome::Suppressed));
        // Safety: the release still transitioned.
        assert_eq!(second.status, ReleaseStatus::RolledBack);
        assert_eq!(second.percentage, 0);
        // But only one event was recorded.
        assert_eq!(state.list_rollback_events("web-prod").unwrap().len(), 1);

        // Both transitions are in the history, the second one flagged.
        let entries = state
            .query_history("web-prod", Some(HistoryEventType::RolledBack), None, 10)
            .unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].payload["suppressed"], serde_json::json!(true));
    }

    #[tokio::test]
    async fn zero_cooldown_records_every_event() {
        let (state, controller) = test_setup();

        for seq in 1..=2 {
            let mut release = test_release(&state, seq, 30);
            controller
                .rollback(
                    &mut release,
                    &test_config(0),
                    "health_check_failed",
                    None,
                    TriggeredBy::System,
                )
                .await
                .unwrap();
        }

        assert_eq!(state.list_rollback_events("web-prod").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn notify_fires_only_for_recorded_events() {
        let (state, controller) = test_setup();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in_cb = calls.clone();
        let controller = controller.with_notify_fn(Arc::new(move |_event| {
            let calls = calls_in_cb.clone();
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                anyhow::Ok(())
            })
        }));

        let mut first = test_release(&state, 1, 30);
        controller
            .rollback(
                &mut first,
                &test_config(600),
                "health_check_failed",
                None,
                TriggeredBy::System,
            )
            .await
            .unwrap();

        let mut second = test_release(&state, 2, 10);
        controller
            .rollback(
                &mut second,
                &test_config(600),
                "health_check_failed",
                None,
                TriggeredBy::System,
            )
            .await
            .unwrap();

        // Suppressed rollback did not notify.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn manual_rollback_records_actor() {
        let (state, controller) = test_setup();
        let mut release = test_release(&state, 1, 40);

        controller
            .rollback(
                &mut release,
                &test_config(600),
                "manual_rollback",
                None,
                TriggeredBy::User {
                    actor: "ops@example.com".to_string(),
                },
            )
            .await
            .unwrap();

        let events = state.list_rollback_events("web-prod").unwrap();
        assert_eq!(
            events[0].triggered_by,
            TriggeredBy::User {
                actor: "ops@example.com".to_string()
            }
        );
    }
}
