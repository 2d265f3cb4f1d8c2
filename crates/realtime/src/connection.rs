//! Live-channel connection state tracker.
//!
//! Tracks {Disconnected, Reconnecting, Connected} plus the display state
//! presentation layers use to decide which banner, if any, to show. A
//! recovery from a lost connection shows `ShowReconnected` for a grace
//! window before settling on `ShowNothing`; a first-ever connect never does.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub const DEFAULT_RECONNECT_GRACE: Duration = Duration::from_millis(3000);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    Disconnected,
    Reconnecting,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DisplayState {
    ShowNothing,
    ShowReconnected,
    ShowReconnecting,
    ShowLost,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSnapshot {
    pub state: ConnectionState,
    pub display: DisplayState,
    /// Set when an established connection drops; cleared once the
    /// reconnected grace window has elapsed.
    pub was_ever_connected: bool,
    pub last_transition_at: Option<DateTime<Utc>>,
}

impl ConnectionSnapshot {
    fn initial() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            display: DisplayState::ShowNothing,
            was_ever_connected: false,
            last_transition_at: None,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        ConnectionStatus {
            is_connected: self.state == ConnectionState::Connected,
            is_reconnecting: self.state == ConnectionState::Reconnecting,
        }
    }
}

/// The read accessor presentation collaborators consume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub is_connected: bool,
    pub is_reconnecting: bool,
}

struct TrackerState {
    snapshot: ConnectionSnapshot,
    grace_generation: u64,
    grace_timer: Option<JoinHandle<()>>,
}

impl TrackerState {
    fn cancel_grace(&mut self) {
        self.grace_generation += 1;
        if let Some(timer) = self.grace_timer.take() {
            timer.abort();
        }
    }
}

struct Inner {
    grace: Duration,
    state: Mutex<TrackerState>,
    tx: watch::Sender<ConnectionSnapshot>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, snapshot: &ConnectionSnapshot) {
        self.tx.send_replace(snapshot.clone());
    }

    fn end_grace(&self, generation: u64) {
        let mut state = self.lock();
        if state.grace_generation != generation {
            return;
        }
        state.grace_timer = None;
        state.snapshot.display = DisplayState::ShowNothing;
        state.snapshot.was_ever_connected = false;
        debug!("Reconnected grace window elapsed");
        self.publish(&state.snapshot);
    }
}

/// Owns the connection state; mutated only through the lifecycle callbacks.
///
/// Clones share state. [`on_connected`](ConnectionTracker::on_connected)
/// may spawn the grace timer and must run inside a Tokio runtime.
#[derive(Clone)]
pub struct ConnectionTracker {
    inner: Arc<Inner>,
}

impl ConnectionTracker {
    pub fn new(grace: Duration) -> Self {
        let snapshot = ConnectionSnapshot::initial();
        let (tx, _) = watch::channel(snapshot.clone());
        Self {
            inner: Arc::new(Inner {
                grace,
                state: Mutex::new(TrackerState {
                    snapshot,
                    grace_generation: 0,
                    grace_timer: None,
                }),
                tx,
            }),
        }
    }

    pub fn on_connected(&self) {
        let mut state = self.inner.lock();
        if state.snapshot.state == ConnectionState::Connected {
            return;
        }
        state.cancel_grace();
        state.snapshot.state = ConnectionState::Connected;
        state.snapshot.last_transition_at = Some(Utc::now());

        if state.snapshot.was_ever_connected {
            state.snapshot.display = DisplayState::ShowReconnected;
            let generation = state.grace_generation;
            let inner = Arc::clone(&self.inner);
            let grace = self.inner.grace;
            state.grace_timer = Some(tokio::spawn(async move {
                tokio::time::sleep(grace).await;
                inner.end_grace(generation);
            }));
            info!(grace_ms = grace.as_millis() as u64, "Live channel reconnected");
        } else {
            state.snapshot.display = DisplayState::ShowNothing;
            info!("Live channel connected");
        }
        self.inner.publish(&state.snapshot);
    }

    pub fn on_reconnecting(&self) {
        let mut state = self.inner.lock();
        let previous = state.snapshot.state;
        if previous == ConnectionState::Connected {
            state.snapshot.was_ever_connected = true;
        }
        if previous == ConnectionState::Reconnecting {
            return;
        }
        state.cancel_grace();
        state.snapshot.state = ConnectionState::Reconnecting;
        state.snapshot.display = DisplayState::ShowReconnecting;
        state.snapshot.last_transition_at = Some(Utc::now());
        info!(from = ?previous, "Live channel reconnecting");
        self.inner.publish(&state.snapshot);
    }

    pub fn on_disconnected(&self) {
        let mut state = self.inner.lock();
        let previous = state.snapshot.state;
        if previous == ConnectionState::Connected {
            state.snapshot.was_ever_connected = true;
        }
        if previous == ConnectionState::Disconnected && state.snapshot.last_transition_at.is_some() {
            return;
        }
        state.cancel_grace();
        state.snapshot.state = ConnectionState::Disconnected;
        // Nothing was lost if the channel never came up.
        state.snapshot.display = if state.snapshot.was_ever_connected {
            DisplayState::ShowLost
        } else {
            DisplayState::ShowNothing
        };
        state.snapshot.last_transition_at = Some(Utc::now());
        info!(from = ?previous, "Live channel disconnected");
        self.inner.publish(&state.snapshot);
    }

    pub fn current(&self) -> ConnectionSnapshot {
        self.inner.lock().snapshot.clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.lock().snapshot.status()
    }

    pub fn display(&self) -> DisplayState {
        self.inner.lock().snapshot.display
    }

    /// Watch every transition, including the end of the grace window.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionSnapshot> {
        self.inner.tx.subscribe()
    }
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new(DEFAULT_RECONNECT_GRACE)
    }
}
