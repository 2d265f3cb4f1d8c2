//! Live pipeline endpoints: connection state, event submission, and the
//! activity ledger.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use farmkonnect_realtime::{ConnectionState, ConnectionStatus, DisplayState, IngestStats};
use farmkonnect_scheduler::jobs::WorkerActivity;
use serde::Serialize;

use super::{api_error, ApiError};
use crate::state::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionResponse {
    #[serde(flatten)]
    pub status: ConnectionStatus,
    pub state: ConnectionState,
    pub display: DisplayState,
    pub last_transition_at: Option<DateTime<Utc>>,
}

pub async fn connection(State(state): State<Arc<AppState>>) -> Json<ConnectionResponse> {
    let snapshot = state.tracker.current();
    Json(ConnectionResponse {
        status: snapshot.status(),
        state: snapshot.state,
        display: snapshot.display,
        last_transition_at: snapshot.last_transition_at,
    })
}

#[derive(Serialize)]
pub struct EventAccepted {
    /// False when the kind is unknown and the event was dropped.
    pub forwarded: bool,
}

/// Accept one raw wire frame as the body.
pub async fn post_event(
    State(state): State<Arc<AppState>>,
    body: String,
) -> Result<(StatusCode, Json<EventAccepted>), ApiError> {
    match state.ingest.submit_frame(&body) {
        Ok(forwarded) => Ok((StatusCode::ACCEPTED, Json(EventAccepted { forwarded }))),
        Err(e) => Err(api_error(StatusCode::BAD_REQUEST, e.to_string())),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityResponse {
    pub subjects: Vec<WorkerActivity>,
    pub batches_applied: u64,
    pub pending: usize,
    pub ingest: IngestStats,
}

pub async fn activity(State(state): State<Arc<AppState>>) -> Json<ActivityResponse> {
    Json(ActivityResponse {
        subjects: state.ledger.snapshot(),
        batches_applied: state.ledger.batches_applied(),
        pending: state.ingest.aggregator().pending(),
        ingest: state.ingest.stats(),
    })
}
