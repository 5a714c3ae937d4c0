//! Ramp scheduler — per-release background tick loops.
//!
//! Each active release gets one cancellable timer task keyed by release id.
//! The task ticks the manager at the configured interval and exits when the
//! release reaches a terminal state. A failing tick is logged and retried on
//! the next interval; it never affects other releases' loops.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use canary_state::{CanaryRelease, ReleaseId};

use crate::error::ReleaseResult;
use crate::manager::ReleaseManager;

/// Per-release ramp loop state.
struct RampSlot {
    /// Handle to the background tick task.
    handle: JoinHandle<()>,
    /// Shutdown signal for this loop.
    shutdown_tx: watch::Sender<bool>,
}

/// Manages ramp tick loops for all active releases.
pub struct RampScheduler {
    manager: Arc<ReleaseManager>,
    /// Active loops: release_id → slot.
    slots: Arc<RwLock<HashMap<ReleaseId, RampSlot>>>,
}

impl RampScheduler {
    pub fn new(manager: Arc<ReleaseManager>) -> Self {
        Self {
            manager,
            slots: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Start the ramp loop for a release.
    ///
    /// Replaces any existing loop for the same release id.
    pub async fn start_ramp(&self, release: &CanaryRelease, interval: Duration) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let manager = self.manager.clone();
        let slots = self.slots.clone();
        let target_id = release.target_id.clone();
        let release_id = release.id.clone();

        let handle = tokio::spawn(async move {
            run_ramp_loop(manager, &target_id, &release_id, interval, shutdown_rx).await;
            // The loop finished on its own (terminal release or shutdown);
            // drop the slot so active_ramps() stays accurate.
            slots.write().await.remove(&release_id);
        });

        let mut slots = self.slots.write().await;
        if let Some(old) = slots.insert(
            release.id.clone(),
            RampSlot {
                handle,
                shutdown_tx,
            },
        ) {
            // Stop the old loop if one was running.
            let _ = old.shutdown_tx.send(true);
            old.handle.abort();
        }

        info!(
            target_id = %release.target_id,
            release_id = %release.id,
            interval_secs = interval.as_secs(),
            "ramp loop started"
        );
    }

    /// Stop the ramp loop for a release.
    pub async fn stop_ramp(&self, release_id: &str) {
        let mut slots = self.slots.write().await;
        if let Some(slot) = slots.remove(release_id) {
            let _ = slot.shutdown_tx.send(true);
            slot.handle.abort();
            info!(%release_id, "ramp loop stopped");
        }
    }

    /// Stop all ramp loops (for graceful shutdown).
    pub async fn stop_all(&self) {
        let mut slots = self.slots.write().await;
        for (release_id, slot) in slots.drain() {
            let _ = slot.shutdown_tx.send(true);
            slot.handle.abort();
            debug!(%release_id, "ramp loop stopped");
        }
        info!("all ramp loops stopped");
    }

    /// Release ids with active ramp loops.
    pub async fn active_ramps(&self) -> Vec<ReleaseId> {
        let slots = self.slots.read().await;
        slots.keys().cloned().collect()
    }

    /// Check if a release has an active ramp loop.
    pub async fn is_ramping(&self, release_id: &str) -> bool {
        let slots = self.slots.read().await;
        slots.contains_key(release_id)
    }

    /// Restart ramp loops for every non-terminal release.
    ///
    /// Called once at daemon startup so in-flight ramps survive restarts.
    /// Returns the number of loops started.
    pub async fn resume_active(&self) -> ReleaseResult<u32> {
        let releases = self.manager.active_releases()?;
        let mut count = 0;
        for release in &releases {
            let interval = self.manager.ramp_interval(&release.target_id)?;
            self.start_ramp(release, interval).await;
            count += 1;
        }
        if count > 0 {
            info!(count, "resumed ramp loops for active releases");
        }
        Ok(count)
    }
}

/// The tick loop for a single release.
async fn run_ramp_loop(
    manager: Arc<ReleaseManager>,
    target_id: &str,
    release_id: &str,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!(%target_id, %release_id, "ramp loop starting");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                match manager.tick(target_id, release_id).await {
                    Ok(outcome) if outcome.is_terminal() => {
                        info!(%target_id, %release_id, ?outcome, "ramp loop finished");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        // Contained to this release; retried next interval.
                        error!(%target_id, %release_id, error = %e, "tick failed");
                    }
                }
            }
            _ = shutdown.changed() => {
                debug!(%target_id, %release_id, "ramp loop shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canary_config::ConfigStore;
    use canary_health::{HealthEvaluator, StaticMetricsSource};
    use canary_history::HistoryLog;
    use canary_rollback::RollbackController;
    use canary_state::{Cohort, MetricSample, ReleaseStatus, StateStore};

    fn sample(cohort: Cohort, errors: u64, requests: u64) -> MetricSample {
        MetricSample {
            timestamp: 1000,
            cohort,
            error_count: errors,
            request_count: requests,
            latency_p95_ms: 120.0,
        }
    }

    fn setup(samples: Vec<MetricSample>) -> (StateStore, Arc<ReleaseManager>, RampScheduler) {
        let state = StateStore::open_in_memory().unwrap();
        let source = StaticMetricsSource::new(samples);
        let config = ConfigStore::new(state.clone());
        let history = HistoryLog::new(state.clone());
        let evaluator = HealthEvaluator::new(Arc::new(source));
        let rollback = RollbackController::new(state.clone(), history.clone());
        let manager = Arc::new(ReleaseManager::new(
            state.clone(),
            config,
            evaluator,
            rollback,
            history,
        ));
        let scheduler = RampScheduler::new(manager.clone());
        (state, manager, scheduler)
    }

    #[tokio::test]
    async fn ramp_loop_starts_and_stops() {
        let (_state, manager, scheduler) = setup(vec![]);
        let release = manager.create_release("web-prod", "dep-42").await.unwrap();

        assert!(scheduler.active_ramps().await.is_empty());

        scheduler
            .start_ramp(&release, Duration::from_secs(3600))
            .await;
        assert!(scheduler.is_ramping(&release.id).await);

        scheduler.stop_ramp(&release.id).await;
        assert!(!scheduler.is_ramping(&release.id).await);
    }

    #[tokio::test]
    async fn stop_all_clears_every_loop() {
        let (_state, manager, scheduler) = setup(vec![]);
        let a = manager.create_release("web-prod", "dep-42").await.unwrap();
        let b = manager.create_release("api-prod", "dep-43").await.unwrap();

        scheduler.start_ramp(&a, Duration::from_secs(3600)).await;
        scheduler.start_ramp(&b, Duration::from_secs(3600)).await;
        assert_eq!(scheduler.active_ramps().await.len(), 2);

        scheduler.stop_all().await;
        assert!(scheduler.active_ramps().await.is_empty());
    }

    #[tokio::test]
    async fn loop_exits_after_terminal_tick() {
        // Failing canary: the first tick rolls the release back and the
        // loop removes itself.
        let (state, manager, scheduler) = setup(vec![
            sample(Cohort::Stable, 5, 500),
            sample(Cohort::Canary, 50, 500),
        ]);
        let release = manager.create_release("web-prod", "dep-42").await.unwrap();

        scheduler
            .start_ramp(&release, Duration::from_millis(5))
            .await;

        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(!scheduler.is_ramping(&release.id).await);
        let rolled = state.get_release("web-prod", &release.id).unwrap().unwrap();
        assert_eq!(rolled.status, ReleaseStatus::RolledBack);
    }

    #[tokio::test]
    async fn resume_active_restarts_only_non_terminal_releases() {
        let (_state, manager, scheduler) = setup(vec![]);
        let live = manager.create_release("web-prod", "dep-42").await.unwrap();
        let done = manager.create_release("api-prod", "dep-43").await.unwrap();
        manager
            .force_promote("api-prod", &done.id, "ops")
            .await
            .unwrap();

        let resumed = scheduler.resume_active().await.unwrap();
        assert_eq!(resumed, 1);
        assert!(scheduler.is_ramping(&live.id).await);
        assert!(!scheduler.is_ramping(&done.id).await);

        scheduler.stop_all().await;
    }
}
