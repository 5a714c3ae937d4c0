//! Release manager — the canary release state machine.
//!
//! A release is created at the configured initial percentage and advanced
//! by scheduler ticks: PASS verdicts ramp the percentage toward the
//! configured maximum and eventually promote; FAIL verdicts route to the
//! rollback controller; INSUFFICIENT_DATA holds. Manual overrides bypass
//! health evaluation but flow through the same transition and logging path.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use canary_config::ConfigStore;
use canary_health::{HealthEvaluator, Verdict};
use canary_history::HistoryLog;
use canary_rollback::RollbackController;
use canary_state::{
    CanaryRelease, HistoryEventType, ReleaseId, ReleaseStatus, StateStore, TriggeredBy,
};

use crate::error::{ReleaseError, ReleaseResult};

/// Command for the external traffic-shifting collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrafficCommand {
    /// Route `percentage` of the target's traffic to the canary.
    SetSplit { target_id: String, percentage: u32 },
    /// The canary is now the stable version; route all traffic to it.
    Promote { target_id: String },
    /// Route all traffic back to the stable version.
    Revert { target_id: String },
}

/// Callback invoked to apply traffic changes.
///
/// Failures are logged and never fatal — the state machine is the source of
/// truth and the collaborator is expected to reconcile.
pub type TrafficCallback = Arc<dyn Fn(TrafficCommand) -> BoxFuture + Send + Sync>;

type BoxFuture = std::pin::Pin<
    Box<dyn std::future::Future<Output = anyhow::Result<()>> + Send>,
>;

/// What a scheduler tick did to a release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The release was already terminal; nothing happened.
    Terminal,
    /// Insufficient data — no state change this tick.
    Held,
    /// Percentage advanced to the contained value.
    Ramped(u32),
    /// At max percentage, accruing sustain time before auto-promotion.
    Sustaining,
    /// Auto-promoted to 100%.
    Promoted,
    /// Health failed; the release was rolled back.
    RolledBack,
}

impl TickOutcome {
    /// Whether the release is terminal after this tick (the ramp loop stops).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TickOutcome::Terminal | TickOutcome::Promoted | TickOutcome::RolledBack
        )
    }
}

/// Orchestrates canary releases for all targets.
pub struct ReleaseManager {
    state: StateStore,
    config: ConfigStore,
    evaluator: HealthEvaluator,
    rollback: RollbackController,
    history: HistoryLog,
    /// Per-release mutexes serializing ticks against manual actions.
    locks: RwLock<HashMap<ReleaseId, Arc<Mutex<()>>>>,
    /// Optional callback to the traffic-shifting collaborator.
    traffic: Option<TrafficCallback>,
}

impl ReleaseManager {
    pub fn new(
        state: StateStore,
        config: ConfigStore,
        evaluator: HealthEvaluator,
        rollback: RollbackController,
        history: HistoryLog,
    ) -> Self {
        Self {
            state,
            config,
            evaluator,
            rollback,
            history,
            locks: RwLock::new(HashMap::new()),
            traffic: None,
        }
    }

    /// Set the callback used to apply traffic changes.
    pub fn with_traffic_fn(mut self, callback: TrafficCallback) -> Self {
        self.traffic = Some(callback);
        self
    }

    /// Create a release for a target at the configured initial percentage.
    ///
    /// Fails with `Conflict` if the target already has a non-terminal
    /// release.
    pub async fn create_release(
        &self,
        target_id: &str,
        deployment_id: &str,
    ) -> ReleaseResult<CanaryRelease> {
        let (canary_cfg, _) = self.config.get(target_id)?;
        let now = epoch_secs();
        let seq = self.state.next_release_seq(target_id)?;
        let release = CanaryRelease {
            id: format!("{target_id}-{seq}"),
            target_id: target_id.to_string(),
            deployment_id: deployment_id.to_string(),
            percentage: canary_cfg.initial_percentage,
            status: ReleaseStatus::Ramping,
            created_at: now,
            last_transition_at: now,
            sustained_pass_since: None,
        };

        if !self.state.insert_release_exclusive(&release)? {
            return Err(ReleaseError::Conflict(target_id.to_string()));
        }

        self.history.append(
            target_id,
            &release.id,
            HistoryEventType::Created,
            serde_json::json!({
                "deployment_id": deployment_id,
                "percentage": release.percentage,
            }),
        );
        self.send_traffic(TrafficCommand::SetSplit {
            target_id: target_id.to_string(),
            percentage: release.percentage,
        })
        .await;

        info!(
            %target_id,
            release_id = %release.id,
            %deployment_id,
            percentage = release.percentage,
            "canary release created"
        );
        Ok(release)
    }

    /// The current non-terminal release for a target, if any.
    pub fn current_release(&self, target_id: &str) -> ReleaseResult<Option<CanaryRelease>> {
        Ok(self.state.active_release(target_id)?)
    }

    /// Non-terminal releases across all targets (for ramp resume).
    pub fn active_releases(&self) -> ReleaseResult<Vec<CanaryRelease>> {
        Ok(self.state.list_active_releases()?)
    }

    /// The tick interval configured for a target's releases.
    pub fn ramp_interval(&self, target_id: &str) -> ReleaseResult<Duration> {
        let (canary_cfg, _) = self.config.get(target_id)?;
        Ok(Duration::from_secs(canary_cfg.increment_interval_secs))
    }

    /// Run one scheduled evaluation for a release.
    ///
    /// A tick on a terminal release is a no-op, never an error — ticks race
    /// with manual actions, and the terminal-state check under the
    /// per-release lock is the synchronization guard.
    pub async fn tick(&self, target_id: &str, release_id: &str) -> ReleaseResult<TickOutcome> {
        let lock = self.lock_for(release_id).await;
        let _guard = lock.lock().await;

        let mut release = self
            .state
            .get_release(target_id, release_id)?
            .ok_or_else(|| ReleaseError::NotFound(release_id.to_string()))?;
        if release.status.is_terminal() {
            return Ok(TickOutcome::Terminal);
        }

        let (canary_cfg, rollback_cfg) = self.config.get(target_id)?;
        let evaluation = self.evaluator.evaluate(&release, &rollback_cfg).await;

        match evaluation.verdict {
            Verdict::Fail => {
                self.rollback
                    .rollback(
                        &mut release,
                        &rollback_cfg,
                        "health_check_failed",
                        evaluation.snapshot,
                        TriggeredBy::System,
                    )
                    .await?;
                self.send_traffic(TrafficCommand::Revert {
                    target_id: target_id.to_string(),
                })
                .await;
                Ok(TickOutcome::RolledBack)
            }

            Verdict::InsufficientData => {
                debug!(%target_id, %release_id, "verdict deferred, holding ramp");
                Ok(TickOutcome::Held)
            }

            Verdict::Pass => {
                let now = epoch_secs();
                if release.sustained_pass_since.is_none() {
                    release.sustained_pass_since = Some(now);
                }

                if release.percentage < canary_cfg.max_percentage {
                    release.percentage = (release.percentage + canary_cfg.increment_step)
                        .min(canary_cfg.max_percentage);
                    release.last_transition_at = now;
                    self.state.transition_release(&release)?;
                    self.history.append(
                        target_id,
                        release_id,
                        HistoryEventType::Ramped,
                        serde_json::json!({ "percentage": release.percentage }),
                    );
                    self.send_traffic(TrafficCommand::SetSplit {
                        target_id: target_id.to_string(),
                        percentage: release.percentage,
                    })
                    .await;
                    info!(
                        %target_id,
                        %release_id,
                        percentage = release.percentage,
                        "ramp advanced"
                    );
                    return Ok(TickOutcome::Ramped(release.percentage));
                }

                // At max percentage: accrue sustain time, then promote.
                let sustained_since = release.sustained_pass_since.unwrap_or(now);
                if canary_cfg.auto_promote
                    && now.saturating_sub(sustained_since) >= canary_cfg.promote_sustain_secs
                {
                    self.promote_locked(&mut release, None).await?;
                    return Ok(TickOutcome::Promoted);
                }

                self.state.transition_release(&release)?;
                self.history.append(
                    target_id,
                    release_id,
                    HistoryEventType::Ramped,
                    serde_json::json!({ "percentage": release.percentage }),
                );
                debug!(
                    %target_id,
                    %release_id,
                    sustained_secs = now.saturating_sub(sustained_since),
                    "passing at max percentage"
                );
                Ok(TickOutcome::Sustaining)
            }
        }
    }

    /// Manually promote a release. Idempotent no-op if already terminal.
    pub async fn force_promote(
        &self,
        target_id: &str,
        release_id: &str,
        actor: &str,
    ) -> ReleaseResult<CanaryRelease> {
        let lock = self.lock_for(release_id).await;
        let _guard = lock.lock().await;

        let mut release = self
            .state
            .get_release(target_id, release_id)?
            .ok_or_else(|| ReleaseError::NotFound(release_id.to_string()))?;
        if release.status.is_terminal() {
            return Ok(release);
        }

        self.promote_locked(&mut release, Some(actor)).await?;
        Ok(release)
    }

    /// Manually roll a release back. Idempotent no-op if already terminal.
    pub async fn force_rollback(
        &self,
        target_id: &str,
        release_id: &str,
        actor: &str,
        reason: &str,
    ) -> ReleaseResult<CanaryRelease> {
        let lock = self.lock_for(release_id).await;
        let _guard = lock.lock().await;

        let mut release = self
            .state
            .get_release(target_id, release_id)?
            .ok_or_else(|| ReleaseError::NotFound(release_id.to_string()))?;
        if release.status.is_terminal() {
            return Ok(release);
        }

        let (_, rollback_cfg) = self.config.get(target_id)?;
        self.rollback
            .rollback(
                &mut release,
                &rollback_cfg,
                reason,
                None,
                TriggeredBy::User {
                    actor: actor.to_string(),
                },
            )
            .await?;
        self.send_traffic(TrafficCommand::Revert {
            target_id: target_id.to_string(),
        })
        .await;
        Ok(release)
    }

    /// Cancel an in-flight release. Idempotent no-op if already terminal.
    pub async fn cancel(
        &self,
        target_id: &str,
        release_id: &str,
        actor: &str,
    ) -> ReleaseResult<CanaryRelease> {
        let lock = self.lock_for(release_id).await;
        let _guard = lock.lock().await;

        let mut release = self
            .state
            .get_release(target_id, release_id)?
            .ok_or_else(|| ReleaseError::NotFound(release_id.to_string()))?;
        if release.status.is_terminal() {
            return Ok(release);
        }

        release.status = ReleaseStatus::Cancelled;
        release.last_transition_at = epoch_secs();
        self.state.transition_release(&release)?;
        self.history.append(
            target_id,
            release_id,
            HistoryEventType::Cancelled,
            serde_json::json!({ "actor": actor }),
        );
        self.send_traffic(TrafficCommand::Revert {
            target_id: target_id.to_string(),
        })
        .await;

        info!(%target_id, %release_id, actor, "release cancelled");
        Ok(release)
    }

    /// Promote a release. Caller must hold the release lock and have
    /// verified the release is non-terminal.
    async fn promote_locked(
        &self,
        release: &mut CanaryRelease,
        actor: Option<&str>,
    ) -> ReleaseResult<()> {
        release.status = ReleaseStatus::Promoted;
        release.percentage = 100;
        release.last_transition_at = epoch_secs();
        self.state.transition_release(release)?;

        let payload = match actor {
            Some(actor) => serde_json::json!({ "actor": actor }),
            None => serde_json::json!({}),
        };
        self.history.append(
            &release.target_id,
            &release.id,
            HistoryEventType::Promoted,
            payload,
        );
        self.send_traffic(TrafficCommand::Promote {
            target_id: release.target_id.clone(),
        })
        .await;

        info!(
            target_id = %release.target_id,
            release_id = %release.id,
            "release promoted"
        );
        Ok(())
    }

    async fn lock_for(&self, release_id: &str) -> Arc<Mutex<()>> {
        {
            let locks = self.locks.read().await;
            if let Some(lock) = locks.get(release_id) {
                return lock.clone();
            }
        }
        let mut locks = self.locks.write().await;
        locks
            .entry(release_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn send_traffic(&self, command: TrafficCommand) {
        if let Some(ref traffic) = self.traffic
            && let Err(e) = traffic(command.clone()).await
        {
            warn!(?command, error = %e, "traffic shift failed");
        }
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
    use canary_health::StaticMetricsSource;
    use canary_history::{replay, ReplayedState};
    use canary_state::{CanaryConfig, Cohort, MetricSample};

    fn sample(cohort: Cohort, errors: u64, requests: u64, p95: f64) -> MetricSample {
        MetricSample {
            timestamp: 1000,
            cohort,
            error_count: errors,
            request_count: requests,
            latency_p95_ms: p95,
        }
    }

    fn passing_samples() -> Vec<MetricSample> {
        vec![
            sample(Cohort::Stable, 5, 500, 120.0),
            sample(Cohort::Canary, 5, 500, 125.0),
        ]
    }

    fn failing_samples() -> Vec<MetricSample> {
        // Canary error rate 10% vs stable 1% — way past the 2-point threshold.
        vec![
            sample(Cohort::Stable, 5, 500, 120.0),
            sample(Cohort::Canary, 50, 500, 125.0),
        ]
    }

    fn setup(samples: Vec<MetricSample>) -> (StateStore, StaticMetricsSource, ReleaseManager) {
        let state = StateStore::open_in_memory().unwrap();
        let source = StaticMetricsSource::new(samples);
        let config = ConfigStore::new(state.clone());
        let history = HistoryLog::new(state.clone());
        let evaluator = HealthEvaluator::new(Arc::new(source.clone()));
        let rollback = RollbackController::new(state.clone(), history.clone());
        let manager = ReleaseManager::new(state.clone(), config, evaluator, rollback, history);
        (state, source, manager)
    }

    fn put_canary_config(
        state: &StateStore,
        target_id: &str,
        initial: u32,
        step: u32,
        max: u32,
        auto_promote: bool,
    ) {
        let config = CanaryConfig {
            target_id: target_id.to_string(),
            initial_percentage: initial,
            increment_step: step,
            increment_interval_secs: 300,
            max_percentage: max,
            auto_promote,
            promote_sustain_secs: 900,
        };
        state.put_canary_config(&config, 1000).unwrap();
    }

    fn backdate_sustain(state: &StateStore, target_id: &str, release_id: &str, secs: u64) {
        let mut release = state.get_release(target_id, release_id).unwrap().unwrap();
        let now = epoch_secs();
        release.sustained_pass_since = Some(now.saturating_sub(secs));
        state.transition_release(&release).unwrap();
    }

    #[tokio::test]
    async fn create_release_starts_at_initial_percentage() {
        let (state, _source, manager) = setup(passing_samples());
        put_canary_config(&state, "web-prod", 10, 20, 100, true);

        let release = manager.create_release("web-prod", "dep-42").await.unwrap();
        assert_eq!(release.percentage, 10);
        assert_eq!(release.status, ReleaseStatus::Ramping);
        assert_eq!(release.id, "web-prod-1");
        assert!(release.sustained_pass_since.is_none());

        let entries = state.query_history("web-prod", None, None, 10).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].event, HistoryEventType::Created);
    }

    #[tokio::test]
    async fn duplicate_active_release_conflicts() {
        let (_state, _source, manager) = setup(passing_samples());

        manager.create_release("web-prod", "dep-42").await.unwrap();
        let second = manager.create_release("web-prod", "dep-43").await;
        assert!(matches!(second, Err(ReleaseError::Conflict(_))));

        // A different target is unaffected.
        assert!(manager.create_release("api-prod", "dep-44").await.is_ok());
    }

    #[tokio::test]
    async fn pass_ticks_ramp_to_max_then_sustain_then_promote() {
        let (state, _source, manager) = setup(passing_samples());
        put_canary_config(&state, "web-prod", 10, 20, 100, true);

        let release = manager.create_release("web-prod", "dep-42").await.unwrap();

        // 10 → 30 → 50 → 70 → 90 → 100, monotonically non-decreasing.
        for want in [30, 50, 70, 90, 100] {
            let outcome = manager.tick("web-prod", &release.id).await.unwrap();
            assert_eq!(outcome, TickOutcome::Ramped(want));
        }

        // At max but the pass streak hasn't sustained long enough yet.
        let outcome = manager.tick("web-prod", &release.id).await.unwrap();
        assert_eq!(outcome, TickOutcome::Sustaining);
        let current = state.get_release("web-prod", &release.id).unwrap().unwrap();
        assert_eq!(current.status, ReleaseStatus::Ramping);

        // Once the streak covers the sustain duration, the tick promotes.
        backdate_sustain(&state, "web-prod", &release.id, 900);
        let outcome = manager.tick("web-prod", &release.id).await.unwrap();
        assert_eq!(outcome, TickOutcome::Promoted);

        let promoted = state.get_release("web-prod", &release.id).unwrap().unwrap();
        assert_eq!(promoted.status, ReleaseStatus::Promoted);
        assert_eq!(promoted.percentage, 100);
        assert!(state.active_release("web-prod").unwrap().is_none());
    }

    #[tokio::test]
    async fn no_auto_promote_means_no_automatic_promotion() {
        let (state, _source, manager) = setup(passing_samples());
        put_canary_config(&state, "web-prod", 10, 40, 50, false);

        let release = manager.create_release("web-prod", "dep-42").await.unwrap();
        assert_eq!(
            manager.tick("web-prod", &release.id).await.unwrap(),
            TickOutcome::Ramped(50)
        );

        // Sustained long past the duration — still no promotion.
        backdate_sustain(&state, "web-prod", &release.id, 86_400);
        for _ in 0..3 {
            assert_eq!(
                manager.tick("web-prod", &release.id).await.unwrap(),
                TickOutcome::Sustaining
            );
        }
        let current = state.get_release("web-prod", &release.id).unwrap().unwrap();
        assert_eq!(current.status, ReleaseStatus::Ramping);
    }

    #[tokio::test]
    async fn ramp_clamps_at_max_percentage() {
        let (state, _source, manager) = setup(passing_samples());
        put_canary_config(&state, "web-prod", 10, 50, 50, true);

        let release = manager.create_release("web-prod", "dep-42").await.unwrap();
        // 10 + 50 would overshoot; clamped to max.
        assert_eq!(
            manager.tick("web-prod", &release.id).await.unwrap(),
            TickOutcome::Ramped(50)
        );
    }

    #[tokio::test]
    async fn fail_verdict_rolls_back_immediately() {
        let (state, source, manager) = setup(passing_samples());
        put_canary_config(&state, "web-prod", 10, 20, 100, true);

        let release = manager.create_release("web-prod", "dep-42").await.unwrap();
        manager.tick("web-prod", &release.id).await.unwrap();
        manager.tick("web-prod", &release.id).await.unwrap();
        let current = state.get_release("web-prod", &release.id).unwrap().unwrap();
        assert_eq!(current.percentage, 50);

        // The canary starts failing at 50%.
        source.set(failing_samples());
        let outcome = manager.tick("web-prod", &release.id).await.unwrap();
        assert_eq!(outcome, TickOutcome::RolledBack);

        let rolled = state.get_release("web-prod", &release.id).unwrap().unwrap();
        assert_eq!(rolled.percentage, 0);
        assert_eq!(rolled.status, ReleaseStatus::RolledBack);

        let events = state.list_rollback_events("web-prod").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].reason, "health_check_failed");
        let snapshot = events[0].metrics_snapshot.as_ref().unwrap();
        assert!(snapshot.error_rate_delta() > 2.0);
    }

    #[tokio::test]
    async fn insufficient_data_holds_without_state_change() {
        let (state, _source, manager) = setup(vec![]);
        put_canary_config(&state, "web-prod", 10, 20, 100, true);

        let release = manager.create_release("web-prod", "dep-42").await.unwrap();
        assert_eq!(
            manager.tick("web-prod", &release.id).await.unwrap(),
            TickOutcome::Held
        );

        let current = state.get_release("web-prod", &release.id).unwrap().unwrap();
        assert_eq!(current.percentage, 10);
        assert!(current.sustained_pass_since.is_none());
    }

    #[tokio::test]
    async fn tick_on_terminal_release_is_a_noop() {
        let (state, source, manager) = setup(failing_samples());
        put_canary_config(&state, "web-prod", 10, 20, 100, true);

        let release = manager.create_release("web-prod", "dep-42").await.unwrap();
        assert_eq!(
            manager.tick("web-prod", &release.id).await.unwrap(),
            TickOutcome::RolledBack
        );

        // Later ticks — even passing ones — change nothing.
        source.set(passing_samples());
        assert_eq!(
            manager.tick("web-prod", &release.id).await.unwrap(),
            TickOutcome::Terminal
        );
        let current = state.get_release("web-prod", &release.id).unwrap().unwrap();
        assert_eq!(current.percentage, 0);
        assert_eq!(current.status, ReleaseStatus::RolledBack);
    }

    #[tokio::test]
    async fn tick_unknown_release_is_not_found() {
        let (_state, _source, manager) = setup(passing_samples());
        let result = manager.tick("web-prod", "web-prod-9").await;
        assert!(matches!(result, Err(ReleaseError::NotFound(_))));
    }

    #[tokio::test]
    async fn force_promote_and_idempotent_repeat() {
        let (state, _source, manager) = setup(passing_samples());
        let release = manager.create_release("web-prod", "dep-42").await.unwrap();

        let promoted = manager
            .force_promote("web-prod", &release.id, "ops@example.com")
            .await
            .unwrap();
        assert_eq!(promoted.status, ReleaseStatus::Promoted);
        assert_eq!(promoted.percentage, 100);

        // Re-invoking on a terminal release is a no-op, not an error.
        let again = manager
            .force_promote("web-prod", &release.id, "ops@example.com")
            .await
            .unwrap();
        assert_eq!(again.status, ReleaseStatus::Promoted);

        let entries = state
            .query_history("web-prod", Some(HistoryEventType::Promoted), None, 10)
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].payload["actor"], serde_json::json!("ops@example.com"));
    }

    #[tokio::test]
    async fn force_rollback_records_actor_and_reason() {
        let (state, _source, manager) = setup(passing_samples());
        let release = manager.create_release("web-prod", "dep-42").await.unwrap();

        let rolled = manager
            .force_rollback("web-prod", &release.id, "ops@example.com", "bad_deploy")
            .await
            .unwrap();
        assert_eq!(rolled.status, ReleaseStatus::RolledBack);
        assert_eq!(rolled.percentage, 0);

        let events = state.list_rollback_events("web-prod").unwrap();
        assert_eq!(events[0].reason, "bad_deploy");
        assert_eq!(
            events[0].triggered_by,
            TriggeredBy::User {
                actor: "ops@example.com".to_string()
            }
        );
    }

    #[tokio::test]
    async fn cancel_freezes_release_and_frees_target() {
        let (state, _source, manager) = setup(passing_samples());
        put_canary_config(&state, "web-prod", 10, 20, 100, true);
        let release = manager.create_release("web-prod", "dep-42").await.unwrap();
        manager.tick("web-prod", &release.id).await.unwrap();

        let cancelled = manager
            .cancel("web-prod", &release.id, "ops@example.com")
            .await
            .unwrap();
        assert_eq!(cancelled.status, ReleaseStatus::Cancelled);
        // Cancellation does not zero the percentage; only rollback does.
        assert_eq!(cancelled.percentage, 30);

        // The target is free for a new release.
        assert!(manager.create_release("web-prod", "dep-43").await.is_ok());

        // Cancel again: idempotent no-op.
        let again = manager
            .cancel("web-prod", &release.id, "ops@example.com")
            .await
            .unwrap();
        assert_eq!(again.status, ReleaseStatus::Cancelled);
    }

    #[tokio::test]
    async fn manual_actions_on_unknown_release_are_not_found() {
        let (_state, _source, manager) = setup(passing_samples());
        assert!(matches!(
            manager.force_promote("web-prod", "web-prod-9", "ops").await,
            Err(ReleaseError::NotFound(_))
        ));
        assert!(matches!(
            manager.force_rollback("web-prod", "web-prod-9", "ops", "r").await,
            Err(ReleaseError::NotFound(_))
        ));
        assert!(matches!(
            manager.cancel("web-prod", "web-prod-9", "ops").await,
            Err(ReleaseError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn replay_reconstructs_promoted_release() {
        let (state, _source, manager) = setup(passing_samples());
        put_canary_config(&state, "web-prod", 10, 30, 70, true);

        let release = manager.create_release("web-prod", "dep-42").await.unwrap();
        manager.tick("web-prod", &release.id).await.unwrap(); // 40
        manager.tick("web-prod", &release.id).await.unwrap(); // 70
        backdate_sustain(&state, "web-prod", &release.id, 900);
        manager.tick("web-prod", &release.id).await.unwrap(); // promoted

        let entries = state.query_history("web-prod", None, None, 100).unwrap();
        assert_eq!(
            replay(&entries),
            Some(ReplayedState {
                percentage: 100,
                status: ReleaseStatus::Promoted,
            })
        );
    }

    #[tokio::test]
    async fn replay_reconstructs_rolled_back_release() {
        let (state, source, manager) = setup(passing_samples());
        put_canary_config(&state, "web-prod", 10, 20, 100, true);

        let release = manager.create_release("web-prod", "dep-42").await.unwrap();
        manager.tick("web-prod", &release.id).await.unwrap();
        source.set(failing_samples());
        manager.tick("web-prod", &release.id).await.unwrap();

        let entries = state.query_history("web-prod", None, None, 100).unwrap();
        assert_eq!(
            replay(&entries),
            Some(ReplayedState {
                percentage: 0,
                status: ReleaseStatus::RolledBack,
            })
        );
    }

    #[tokio::test]
    async fn traffic_callback_sees_split_and_promote() {
        use std::sync::Mutex as StdMutex;

        let commands: Arc<StdMutex<Vec<TrafficCommand>>> = Arc::new(StdMutex::new(Vec::new()));
        let (state, _source, manager) = setup(passing_samples());
        put_canary_config(&state, "web-prod", 10, 40, 50, true);

        let sink = commands.clone();
        let manager = manager.with_traffic_fn(Arc::new(move |command| {
            let sink = sink.clone();
            Box::pin(async move {
                sink.lock().expect("sink lock poisoned").push(command);
                anyhow::Ok(())
            })
        }));

        let release = manager.create_release("web-prod", "dep-42").await.unwrap();
        manager.tick("web-prod", &release.id).await.unwrap();
        manager
            .force_promote("web-prod", &release.id, "ops")
            .await
            .unwrap();

        let seen = commands.lock().expect("sink lock poisoned").clone();
        assert_eq!(
            seen,
            vec![
                TrafficCommand::SetSplit {
                    target_id: "web-prod".to_string(),
                    percentage: 10
                },
                TrafficCommand::SetSplit {
                    target_id: "web-prod".to_string(),
                    percentage: 50
                },
                TrafficCommand::Promote {
                    target_id: "web-prod".to_string()
                },
            ]
        );
    }
}
