//! Scheduler status, metrics, and job control endpoints.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use farmkonnect_scheduler::{SchedulerError, SchedulerMetrics, SchedulerStatus};
use serde::Serialize;

use super::{api_error, ApiError};
use crate::state::AppState;

pub async fn scheduler_status(State(state): State<Arc<AppState>>) -> Json<SchedulerStatus> {
    Json(state.scheduler.get_status())
}

pub async fn scheduler_metrics(State(state): State<Arc<AppState>>) -> Json<SchedulerMetrics> {
    Json(state.scheduler.metrics())
}

// ── Enable / disable ──────────────────────────────────────────

#[derive(Serialize)]
pub struct ToggleResponse {
    pub name: String,
    pub changed: bool,
}

/// Unknown names answer 200 with `changed: false`.
pub async fn enable_job(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Json<ToggleResponse> {
    let changed = state.scheduler.enable_job(&name);
    Json(ToggleResponse { name, changed })
}

pub async fn disable_job(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Json<ToggleResponse> {
    let changed = state.scheduler.disable_job(&name);
    Json(ToggleResponse { name, changed })
}

// ── Manual run ────────────────────────────────────────────────

#[derive(Serialize)]
pub struct RunResponse {
    pub name: String,
    pub success: bool,
    pub message: Option<String>,
}

/// Run a job now and wait for its result. A handler failure is still a
/// 200; only unknown or busy jobs are errors.
pub async fn run_job(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<RunResponse>, ApiError> {
    match state.scheduler.trigger_job(&name).await {
        Ok(result) => Ok(Json(RunResponse {
            name,
            success: result.success,
            message: result.message,
        })),
        Err(e @ SchedulerError::NotFound(_)) => Err(api_error(StatusCode::NOT_FOUND, e.to_string())),
        Err(e @ SchedulerError::AlreadyRunning(_)) => Err(api_error(StatusCode::CONFLICT, e.to_string())),
        Err(e) => Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}
