//! REST API handlers for canary release management.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use tracing::error;

use canary_config::ConfigError;
use canary_release::ReleaseError;
use canary_state::{
    CanaryConfig, HistoryEntry, HistoryEventType, MetricSample, RollbackConfig,
};

use crate::ApiState;

/// Response wrapper for all endpoints.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn api_error(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

fn release_error(e: &ReleaseError) -> (StatusCode, String) {
    let status = match e {
        ReleaseError::Conflict(_) => StatusCode::CONFLICT,
        ReleaseError::NotFound(_) => StatusCode::NOT_FOUND,
        ReleaseError::Config(ConfigError::Validation(_)) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string())
}

// ── Releases ──────────────────────────────────────────────────────

/// Request body to create a canary release.
#[derive(serde::Deserialize)]
pub struct CreateCanaryRequest {
    pub deployment_id: String,
}

/// POST /api/v1/targets/:target/canary
pub async fn create_canary(
    State(api): State<ApiState>,
    Path(target): Path<String>,
    Json(req): Json<CreateCanaryRequest>,
) -> impl IntoResponse {
    let release = match api.manager.create_release(&target, &req.deployment_id).await {
        Ok(release) => release,
        Err(e) => {
            let (status, msg) = release_error(&e);
            return api_error(&msg, status).into_response();
        }
    };

    let interval = match api.manager.ramp_interval(&target) {
        Ok(interval) => interval,
        Err(e) => {
            error!(%target, error = %e, "failed to read ramp interval");
            let (status, msg) = release_error(&e);
            return api_error(&msg, status).into_response();
        }
    };
    api.scheduler.start_ramp(&release, interval).await;

    (StatusCode::CREATED, ApiResponse::ok(release)).into_response()
}

/// GET /api/v1/targets/:target/canary
pub async fn get_canary(
    State(api): State<ApiState>,
    Path(target): Path<String>,
) -> impl IntoResponse {
    match api.manager.current_release(&target) {
        Ok(Some(release)) => ApiResponse::ok(release).into_response(),
        Ok(None) => api_error("no active release", StatusCode::NOT_FOUND).into_response(),
        Err(e) => {
            let (status, msg) = release_error(&e);
            api_error(&msg, status).into_response()
        }
    }
}

/// Manual override actions.
#[derive(Debug, Clone, Copy, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManualAction {
    Promote,
    Rollback,
    Cancel,
}

/// Request body for manual overrides.
#[derive(serde::Deserialize)]
pub struct ManualActionRequest {
    pub action: ManualAction,
    pub actor: String,
    pub reason: Option<String>,
}

/// PATCH /api/v1/targets/:target/canary/:release_id
///
/// Idempotent: acting on an already-terminal release returns 200 with the
/// release unchanged.
pub async fn manual_action(
    State(api): State<ApiState>,
    Path((target, release_id)): Path<(String, String)>,
    Json(req): Json<ManualActionRequest>,
) -> impl IntoResponse {
    let result = match req.action {
        ManualAction::Promote => {
            api.manager
                .force_promote(&target, &release_id, &req.actor)
                .await
        }
        ManualAction::Rollback => {
            let reason = req.reason.as_deref().unwrap_or("manual_rollback");
            api.manager
                .force_rollback(&target, &release_id, &req.actor, reason)
                .await
        }
        ManualAction::Cancel => api.manager.cancel(&target, &release_id, &req.actor).await,
    };

    match result {
        Ok(release) => {
            if release.status.is_terminal() {
                api.scheduler.stop_ramp(&release_id).await;
            }
            ApiResponse::ok(release).into_response()
        }
        Err(e) => {
            let (status, msg) = release_error(&e);
            api_error(&msg, status).into_response()
        }
    }
}

// ── History ───────────────────────────────────────────────────────

/// Query parameters for history pagination.
#[derive(serde::Deserialize)]
pub struct HistoryQuery {
    /// Entry type filter (`created`, `ramped`, ...).
    #[serde(rename = "type")]
    pub entry_type: Option<String>,
    /// Exclusive sequence-number cursor.
    pub cursor: Option<u64>,
    pub limit: Option<usize>,
}

/// One page of history entries.
#[derive(serde::Serialize)]
pub struct HistoryPage {
    pub entries: Vec<HistoryEntry>,
    /// Cursor for the next page; absent on the last page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<u64>,
}

const DEFAULT_PAGE: usize = 50;
const MAX_PAGE: usize = 500;

/// GET /api/v1/targets/:target/canary/history
pub async fn get_history(
    State(api): State<ApiState>,
    Path(target): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> impl IntoResponse {
    let event = match query.entry_type.as_deref() {
        Some(s) => match HistoryEventType::parse(s) {
            Some(event) => Some(event),
            None => {
                return api_error(
                    &format!("unknown history entry type: {s}"),
                    StatusCode::BAD_REQUEST,
                )
                .into_response()
            }
        },
        None => None,
    };
    let limit = query.limit.unwrap_or(DEFAULT_PAGE).min(MAX_PAGE);

    match api.state.query_history(&target, event, query.cursor, limit) {
        Ok(entries) => {
            let next_cursor = if entries.len() == limit {
                entries.last().map(|e| e.sequence_no)
            } else {
                None
            };
            ApiResponse::ok(HistoryPage {
                entries,
                next_cursor,
            })
            .into_response()
        }
        Err(e) => api_error(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

// ── Configs ───────────────────────────────────────────────────────

/// Request body for canary config updates (target comes from the path).
#[derive(serde::Deserialize)]
pub struct CanaryConfigBody {
    pub initial_percentage: u32,
    pub increment_step: u32,
    pub increment_interval_secs: u64,
    pub max_percentage: u32,
    pub auto_promote: bool,
    pub promote_sustain_secs: u64,
}

/// Request body for rollback config updates.
#[derive(serde::Deserialize)]
pub struct RollbackConfigBody {
    pub error_rate_threshold: f64,
    pub latency_threshold_ms: f64,
    pub evaluation_window_secs: u64,
    pub cooldown_secs: u64,
    pub min_sample_size: u64,
}

#[derive(serde::Serialize)]
pub struct ConfigUpdated {
    pub version: u64,
}

/// GET /api/v1/targets/:target/canary-config
pub async fn get_canary_config(
    State(api): State<ApiState>,
    Path(target): Path<String>,
) -> impl IntoResponse {
    match api.config.get(&target) {
        Ok((canary, _)) => ApiResponse::ok(canary).into_response(),
        Err(e) => api_error(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// PUT /api/v1/targets/:target/canary-config
pub async fn put_canary_config(
    State(api): State<ApiState>,
    Path(target): Path<String>,
    Json(body): Json<CanaryConfigBody>,
) -> impl IntoResponse {
    let config = CanaryConfig {
        target_id: target,
        initial_percentage: body.initial_percentage,
        increment_step: body.increment_step,
        increment_interval_secs: body.increment_interval_secs,
        max_percentage: body.max_percentage,
        auto_promote: body.auto_promote,
        promote_sustain_secs: body.promote_sustain_secs,
    };
    match api.config.put_canary(&config) {
        Ok(version) => ApiResponse::ok(ConfigUpdated { version }).into_response(),
        Err(ConfigError::Validation(msg)) => {
            api_error(&msg, StatusCode::BAD_REQUEST).into_response()
        }
        Err(e) => api_error(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// GET /api/v1/targets/:target/rollback-config
pub async fn get_rollback_config(
    State(api): State<ApiState>,
    Path(target): Path<String>,
) -> impl IntoResponse {
    match api.config.get(&target) {
        Ok((_, rollback)) => ApiResponse::ok(rollback).into_response(),
        Err(e) => api_error(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// PUT /api/v1/targets/:target/rollback-config
pub async fn put_rollback_config(
    State(api): State<ApiState>,
    Path(target): Path<String>,
    Json(body): Json<RollbackConfigBody>,
) -> impl IntoResponse {
    let config = RollbackConfig {
        target_id: target,
        error_rate_threshold: body.error_rate_threshold,
        latency_threshold_ms: body.latency_threshold_ms,
        evaluation_window_secs: body.evaluation_window_secs,
        cooldown_secs: body.cooldown_secs,
        min_sample_size: body.min_sample_size,
    };
    match api.config.put_rollback(&config) {
        Ok(version) => ApiResponse::ok(ConfigUpdated { version }).into_response(),
        Err(ConfigError::Validation(msg)) => {
            api_error(&msg, StatusCode::BAD_REQUEST).into_response()
        }
        Err(e) => api_error(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

// ── Rollback audit ────────────────────────────────────────────────

/// GET /api/v1/targets/:target/rollback-events
pub async fn list_rollback_events(
    State(api): State<ApiState>,
    Path(target): Path<String>,
) -> impl IntoResponse {
    match api.state.list_rollback_events(&target) {
        Ok(events) => ApiResponse::ok(events).into_response(),
        Err(e) => api_error(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

// ── Metric ingestion ──────────────────────────────────────────────

#[derive(serde::Serialize)]
pub struct SamplesAccepted {
    pub accepted: usize,
}

/// POST /api/v1/targets/:target/metrics
pub async fn push_metrics(
    State(api): State<ApiState>,
    Path(target): Path<String>,
    Json(samples): Json<Vec<MetricSample>>,
) -> impl IntoResponse {
    match api.state.push_samples(&target, &samples) {
        Ok(()) => ApiResponse::ok(SamplesAccepted {
            accepted: samples.len(),
        })
        .into_response(),
        Err(e) => api_error(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}
