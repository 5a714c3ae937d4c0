//! canary-api — REST API for the canary controller.
//!
//! Provides axum route handlers for creating releases, manual overrides,
//! deployment history, config management, rollback audit, and metric
//! ingestion.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/api/v1/targets/{target}/canary` | Create a canary release |
//! | GET | `/api/v1/targets/{target}/canary` | Current active release |
//! | PATCH | `/api/v1/targets/{target}/canary/{release_id}` | Manual promote/rollback/cancel |
//! | GET | `/api/v1/targets/{target}/canary/history` | Paginated deployment history |
//! | GET/PUT | `/api/v1/targets/{target}/canary-config` | Canary config |
//! | GET/PUT | `/api/v1/targets/{target}/rollback-config` | Rollback config |
//! | GET | `/api/v1/targets/{target}/rollback-events` | Rollback audit log |
//! | POST | `/api/v1/targets/{target}/metrics` | Push cohort metric samples |

pub mod handlers;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use canary_config::ConfigStore;
use canary_release::{RampScheduler, ReleaseManager};
use canary_state::StateStore;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub state: StateStore,
    pub config: ConfigStore,
    pub manager: Arc<ReleaseManager>,
    pub scheduler: Arc<RampScheduler>,
}

/// Build the complete API router.
pub fn build_router(api: ApiState) -> Router {
    let api_routes = Router::new()
        .route(
            "/targets/{target}/canary",
            post(handlers::create_canary).get(handlers::get_canary),
        )
        .route(
            "/targets/{target}/canary/{release_id}",
            axum::routing::patch(handlers::manual_action),
        )
        .route("/targets/{target}/canary/history", get(handlers::get_history))
        .route(
            "/targets/{target}/canary-config",
            get(handlers::get_canary_config).put(handlers::put_canary_config),
        )
        .route(
            "/targets/{target}/rollback-config",
            get(handlers::get_rollback_config).put(handlers::put_rollback_config),
        )
        .route(
            "/targets/{target}/rollback-events",
            get(handlers::list_rollback_events),
        )
        .route("/targets/{target}/metrics", post(handlers::push_metrics))
        .with_state(api);

    Router::new().nest("/api/v1", api_routes)
}
