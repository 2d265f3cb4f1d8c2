//! HTTP router construction.

use std::sync::Arc;

use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;

use crate::state::AppState;
use crate::{api, live};

/// Build the complete application router with all routes and middleware.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.server.cors_origin);
    Router::new()
        .route("/health", get(api::health))
        .route("/config", get(api::config_summary))
        .route("/scheduler/status", get(api::scheduler_status))
        .route("/scheduler/metrics", get(api::scheduler_metrics))
        .route("/scheduler/jobs/{name}/enable", post(api::enable_job))
        .route("/scheduler/jobs/{name}/disable", post(api::disable_job))
        .route("/scheduler/jobs/{name}/run", post(api::run_job))
        .route("/realtime/connection", get(api::connection))
        .route("/realtime/events", post(api::post_event))
        .route("/realtime/activity", get(api::activity))
        .route("/realtime/feed", get(live::feed_upgrade))
        .route("/ws", get(live::ws_upgrade))
        .layer(cors)
        .with_state(state)
}

fn cors_layer(origin: &str) -> CorsLayer {
    if origin == "*" {
        return CorsLayer::permissive();
    }
    match origin.parse::<HeaderValue>() {
        Ok(value) => CorsLayer::new()
            .allow_origin(value)
            .allow_methods(Any)
            .allow_headers(Any),
        Err(e) => {
            warn!(origin, error = %e, "Invalid CORS_ORIGIN, allowing any origin");
            CorsLayer::permissive()
        }
    }
}
