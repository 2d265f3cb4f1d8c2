//! Pump between the live channel transport and the pipeline.

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::connection::ConnectionTracker;
use crate::event::RawEvent;
use crate::ingest::IngestQueue;

/// What the transport reports: decoded events, raw text frames, and
/// lifecycle changes.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelSignal {
    Event(RawEvent),
    Frame(String),
    Connected,
    Reconnecting,
    Disconnected,
}

/// Route signals until the sender side closes, then mark the channel
/// disconnected. Returns the number of signals handled.
pub async fn run_live_channel(
    mut rx: mpsc::Receiver<ChannelSignal>,
    ingest: &IngestQueue,
    tracker: &ConnectionTracker,
) -> u64 {
    let mut handled = 0u64;
    while let Some(signal) = rx.recv().await {
        handled += 1;
        match signal {
            ChannelSignal::Event(event) => {
                ingest.submit(event);
            }
            ChannelSignal::Frame(frame) => {
                if let Err(e) = ingest.submit_frame(&frame) {
                    warn!(error = %e, "Dropping malformed frame");
                }
            }
            ChannelSignal::Connected => tracker.on_connected(),
            ChannelSignal::Reconnecting => tracker.on_reconnecting(),
            ChannelSignal::Disconnected => tracker.on_disconnected(),
        }
    }
    tracker.on_disconnected();
    info!(handled, "Live channel closed");
    handled
}
