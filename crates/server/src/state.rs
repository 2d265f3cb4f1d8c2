use std::sync::Arc;

use farmkonnect_core::Config;
use farmkonnect_realtime::{ConnectionTracker, IngestQueue};
use farmkonnect_scheduler::Scheduler;
use tokio::sync::broadcast;

use crate::ledger::ActivityLedger;
use crate::live::FeedSlot;

/// Shared handles behind every route.
pub struct AppState {
    pub config: Config,
    pub scheduler: Arc<Scheduler>,
    pub ingest: Arc<IngestQueue>,
    pub tracker: ConnectionTracker,
    pub ledger: Arc<ActivityLedger>,
    /// Held by the connected upstream feed, if any.
    pub feed: Arc<FeedSlot>,
    /// Pre-serialized messages for dashboard sockets.
    pub broadcast: broadcast::Sender<String>,
}
