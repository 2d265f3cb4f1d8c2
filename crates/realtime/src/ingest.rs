//! Event ingest queue: classify, normalize, forward.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tracing::debug;

use crate::aggregator::BatchAggregator;
use crate::error::RealtimeError;
use crate::event::{normalize, parse_frame, RawEvent};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestStats {
    pub accepted: u64,
    pub dropped: u64,
}

/// Normalizes raw events and hands them to the aggregator.
pub struct IngestQueue {
    aggregator: BatchAggregator,
    accepted: AtomicU64,
    dropped: AtomicU64,
}

impl IngestQueue {
    pub fn new(aggregator: BatchAggregator) -> Self {
        Self {
            aggregator,
            accepted: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Normalize and forward one event. Unknown kinds are dropped
    /// silently. Returns whether the event was forwarded.
    pub fn submit(&self, event: RawEvent) -> bool {
        match normalize(&event) {
            Some(update) => {
                self.accepted.fetch_add(1, Ordering::Relaxed);
                self.aggregator.enqueue(update);
                true
            }
            None => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(kind = %event.kind, "Dropping event of unknown kind");
                false
            }
        }
    }

    /// Parse a wire frame and submit it. Malformed frames count as dropped.
    pub fn submit_frame(&self, frame: &str) -> Result<bool, RealtimeError> {
        match parse_frame(frame) {
            Ok(event) => Ok(self.submit(event)),
            Err(e) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    pub fn stats(&self) -> IngestStats {
        IngestStats {
            accepted: self.accepted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    pub fn aggregator(&self) -> &BatchAggregator {
        &self.aggregator
    }
}
