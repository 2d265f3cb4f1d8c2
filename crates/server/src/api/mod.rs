//! Admin API endpoint modules.
//!
//! Each sub-module owns a single responsibility area.
//! Shared types live here in mod.rs.

mod health;
mod realtime;
mod scheduler;

use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

// ── Shared types ─────────────────────────────────────────────────

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub(crate) type ApiError = (StatusCode, Json<ErrorResponse>);

pub(crate) fn api_error(status: StatusCode, error: impl Into<String>) -> ApiError {
    (status, Json(ErrorResponse { error: error.into() }))
}

// ── Re-exports ───────────────────────────────────────────────────

pub use health::{config_summary, health};
pub use realtime::{activity, connection, post_event};
pub use scheduler::{disable_job, enable_job, run_job, scheduler_metrics, scheduler_status};
