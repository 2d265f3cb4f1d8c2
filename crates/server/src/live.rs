//! WebSocket surfaces: the inbound live feed that drives the pipeline, and
//! the outbound dashboard stream of batches, connection changes and job
//! completions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use farmkonnect_realtime::{
    run_live_channel, ChannelSignal, ConnectionTracker, PerformanceUpdate, UpdateBatch, UpdateSubscriber,
};
use farmkonnect_scheduler::Scheduler;
use futures::{SinkExt, Stream, StreamExt};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::api::api_error;
use crate::ledger::ActivityLedger;
use crate::state::AppState;

const FEED_BUFFER: usize = 256;

// ── WebSocket Messages ──────────────────────────────────────────

#[derive(Serialize)]
struct WsMessage<T: Serialize> {
    #[serde(rename = "type")]
    msg_type: &'static str,
    data: T,
}

pub fn ws_json<T: Serialize>(msg_type: &'static str, data: T) -> String {
    serde_json::to_string(&WsMessage { msg_type, data }).unwrap_or_default()
}

// ── Aggregator subscriber ───────────────────────────────────────

/// Folds batches into the ledger and fans them out to dashboard sockets.
pub struct LiveSubscriber {
    ledger: Arc<ActivityLedger>,
    broadcast: broadcast::Sender<String>,
}

impl LiveSubscriber {
    pub fn new(ledger: Arc<ActivityLedger>, broadcast: broadcast::Sender<String>) -> Self {
        Self { ledger, broadcast }
    }
}

impl UpdateSubscriber for LiveSubscriber {
    fn on_update(&self, update: &PerformanceUpdate) {
        let _ = self.broadcast.send(ws_json("performance-update", update));
    }

    fn on_batch_update(&self, batch: UpdateBatch) {
        self.ledger.apply(&batch);
        // No receivers is fine; nobody is watching.
        let _ = self.broadcast.send(ws_json("performance-batch", &batch));
    }
}

/// Relay scheduler completions and connection transitions onto the
/// dashboard broadcast until both sources close.
pub fn spawn_forwarders(
    scheduler: &Scheduler,
    tracker: &ConnectionTracker,
    broadcast: broadcast::Sender<String>,
) {
    let mut completions = scheduler.subscribe();
    let tx = broadcast.clone();
    tokio::spawn(async move {
        loop {
            match completions.recv().await {
                Ok(done) => {
                    let _ = tx.send(ws_json("job-completed", &done));
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "Dashboard relay lagged behind job completions");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let mut transitions = tracker.subscribe();
    tokio::spawn(async move {
        while transitions.changed().await.is_ok() {
            let snapshot = transitions.borrow_and_update().clone();
            let _ = broadcast.send(ws_json("connection", &snapshot));
        }
    });
}

// ── Inbound live feed ───────────────────────────────────────────

/// At most one upstream publisher drives the connection tracker at a time.
#[derive(Debug, Default)]
pub struct FeedSlot {
    active: AtomicBool,
}

impl FeedSlot {
    /// Take the slot, or `None` while another feed holds it.
    pub fn claim(self: &Arc<Self>) -> Option<FeedClaim> {
        self.active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FeedClaim(Arc::clone(self)))
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

/// Releases the feed slot on drop.
#[derive(Debug)]
pub struct FeedClaim(Arc<FeedSlot>);

impl Drop for FeedClaim {
    fn drop(&mut self) {
        self.0.active.store(false, Ordering::Release);
    }
}

pub async fn feed_upgrade(
    State(state): State<Arc<AppState>>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let Some(claim) = state.feed.claim() else {
        warn!("Rejecting live feed, another publisher is connected");
        return api_error(StatusCode::CONFLICT, "a live feed is already connected").into_response();
    };
    match ws {
        Ok(ws) => ws
            .on_upgrade(move |socket| handle_feed(socket, state, claim))
            .into_response(),
        Err(rejection) => rejection.into_response(),
    }
}

/// Pump one publisher's JSON frames into the pipeline. The stream's
/// lifetime is the live channel's connection; the slot is released only
/// after the tracker has seen the disconnect.
async fn handle_feed<S>(frames: S, state: Arc<AppState>, claim: FeedClaim)
where
    S: Stream<Item = Result<Message, axum::Error>>,
{
    let mut frames = std::pin::pin!(frames);
    let (tx, rx) = mpsc::channel(FEED_BUFFER);
    let pump = {
        let ingest = Arc::clone(&state.ingest);
        let tracker = state.tracker.clone();
        tokio::spawn(async move { run_live_channel(rx, &ingest, &tracker).await })
    };

    if tx.send(ChannelSignal::Connected).await.is_ok() {
        while let Some(msg) = frames.next().await {
            let signal = match msg {
                Ok(Message::Text(text)) => ChannelSignal::Frame(text.as_str().to_owned()),
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    warn!(error = %e, "Live feed socket error");
                    break;
                }
            };
            if tx.send(signal).await.is_err() {
                break;
            }
        }
    }

    drop(tx);
    match pump.await {
        Ok(handled) => info!(handled, "Live feed closed"),
        Err(e) => warn!(error = %e, "Live feed pump task failed"),
    }
    drop(claim);
}

// ── Outbound dashboard stream ───────────────────────────────────

pub async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

async fn handle_ws(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut rx = state.broadcast.subscribe();

    // Current connection state first, so the client can render its banner.
    let initial = ws_json("connection", state.tracker.current());
    if sender.send(Message::Text(initial.into())).await.is_err() {
        return;
    }

    let send_task = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(msg) => {
                    if sender.send(Message::Text(msg.into())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!(skipped = n, "Dashboard client lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // Consume incoming messages (pings, close frames) but ignore content.
    let recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if matches!(msg, Message::Close(_)) {
                break;
            }
        }
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }
}
