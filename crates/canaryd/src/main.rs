//! canaryd — the canary release controller daemon.
//!
//! Single binary that assembles all controller subsystems:
//! - State store (redb)
//! - Config store (validated, versioned)
//! - Health evaluator (store-backed or HTTP-pull metrics source)
//! - Rollback controller
//! - Release manager + ramp scheduler
//! - REST API
//! - History/sample retention loop
//!
//! # Usage
//!
//! ```text
//! canaryd run --port 8090 --data-dir /var/lib/canaryd
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info};

use canary_health::{HealthEvaluator, HttpMetricsSource, MetricsSource, StoreMetricsSource};
use canary_release::{RampScheduler, ReleaseManager};
use canary_state::StateStore;

#[derive(Parser)]
#[command(name = "canaryd", about = "Canary release controller daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the controller (API server + ramp scheduler).
    Run {
        /// Port to listen on.
        #[arg(long, default_value = "8090")]
        port: u16,

        /// Data directory for persistent state.
        #[arg(long, default_value = "/var/lib/canaryd")]
        data_dir: PathBuf,

        /// Pull cohort metrics from this endpoint (host:port) instead of
        /// the push-ingestion store.
        #[arg(long)]
        metrics_endpoint: Option<String>,

        /// Path prefix the metrics endpoint serves samples under.
        #[arg(long, default_value = "/api/v1/cohorts")]
        metrics_path: String,

        /// Health evaluator I/O timeout in seconds.
        #[arg(long, default_value = "5")]
        eval_timeout: u64,

        /// History and sample retention in days.
        #[arg(long, default_value = "30")]
        retention_days: u64,

        /// Retention sweep interval in seconds.
        #[arg(long, default_value = "3600")]
        retention_interval: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,canaryd=debug,canary=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            port,
            data_dir,
            metrics_endpoint,
            metrics_path,
            eval_timeout,
            retention_days,
            retention_interval,
        } => {
            run_controller(
                port,
                data_dir,
                metrics_endpoint,
                metrics_path,
                eval_timeout,
                retention_days,
                retention_interval,
            )
            .await
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_controller(
    port: u16,
    data_dir: PathBuf,
    metrics_endpoint: Option<String>,
    metrics_path: String,
    eval_timeout: u64,
    retention_days: u64,
    retention_interval: u64,
) -> anyhow::Result<()> {
    info!("canaryd starting");

    // Ensure data directory exists.
    std::fs::create_dir_all(&data_dir)?;
    let db_path = data_dir.join("canaryd.redb");

    // ── Initialize subsystems ──────────────────────────────────

    // State store.
    let state = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    // Config store.
    let config = canary_config::ConfigStore::new(state.clone());
    info!("config store initialized");

    // Metrics source.
    let source: Arc<dyn MetricsSource> = match metrics_endpoint {
        Some(endpoint) => {
            info!(%endpoint, "using HTTP metrics source");
            Arc::new(HttpMetricsSource::new(&endpoint, &metrics_path))
        }
        None => {
            info!("using store-backed metrics source (push ingestion)");
            Arc::new(StoreMetricsSource::new(state.clone()))
        }
    };
    let evaluator =
        HealthEvaluator::new(source).with_timeout(Duration::from_secs(eval_timeout));
    info!(timeout_secs = eval_timeout, "health evaluator initialized");

    // History log.
    let history = canary_history::HistoryLog::new(state.clone());

    // Rollback controller. Notification delivery is an external concern;
    // standalone mode records the event stream in the log.
    let rollback = canary_rollback::RollbackController::new(state.clone(), history.clone())
        .with_notify_fn(Arc::new(|event| {
            Box::pin(async move {
                info!(
                    target_id = %event.target_id,
                    release_id = %event.release_id,
                    reason = %event.reason,
                    "rollback notification"
                );
                anyhow::Ok(())
            })
        }));
    info!("rollback controller initialized");

    // Release manager. Traffic shifting is delegated to the external
    // ingress controller; standalone mode records the issued commands.
    let manager = Arc::new(
        ReleaseManager::new(state.clone(), config.clone(), evaluator, rollback, history)
            .with_traffic_fn(Arc::new(|command| {
                Box::pin(async move {
                    info!(?command, "traffic command issued");
                    anyhow::Ok(())
                })
            })),
    );

    // Ramp scheduler — restart loops for releases that were mid-ramp.
    let scheduler = Arc::new(RampScheduler::new(manager.clone()));
    let resumed = scheduler.resume_active().await?;
    info!(resumed, "ramp scheduler initialized");

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let retention_shutdown = shutdown_rx.clone();

    // ── Start background tasks ─────────────────────────────────

    // Retention sweep loop.
    let retention_state = state.clone();
    let retention_handle = tokio::spawn(async move {
        run_retention_loop(
            retention_state,
            Duration::from_secs(retention_interval),
            retention_days,
            retention_shutdown,
        )
        .await;
    });

    // ── Start API server ───────────────────────────────────────

    let router = canary_api::build_router(canary_api::ApiState {
        state,
        config,
        manager,
        scheduler: scheduler.clone(),
    });
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    // Wind down background work.
    scheduler.stop_all().await;
    let _ = retention_handle.await;

    info!("canaryd stopped");
    Ok(())
}

/// Periodically prune history entries and metric samples past retention.
async fn run_retention_loop(
    state: StateStore,
    interval: Duration,
    retention_days: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(
        interval_secs = interval.as_secs(),
        retention_days, "retention loop started"
    );

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                let cutoff = epoch_secs().saturating_sub(retention_days * 86_400);
                if let Err(e) = sweep(&state, cutoff) {
                    error!(error = %e, "retention sweep failed");
                }
            }
            _ = shutdown.changed() => {
                info!("retention loop shutting down");
                break;
            }
        }
    }
}

fn sweep(state: &StateStore, cutoff: u64) -> canary_state::StateResult<()> {
    let mut pruned_entries = 0;
    for target in state.history_targets()? {
        pruned_entries += state.prune_history_older_than(&target, cutoff)?;
    }
    let mut pruned_samples = 0;
    for target in state.sample_targets()? {
        pruned_samples += state.prune_samples_older_than(&target, cutoff)?;
    }
    if pruned_entries > 0 || pruned_samples > 0 {
        info!(pruned_entries, pruned_samples, "retention sweep completed");
    }
    Ok(())
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
