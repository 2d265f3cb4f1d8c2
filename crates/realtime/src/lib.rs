//! Real-time event aggregation pipeline.
//!
//! live channel → [`IngestQueue`] → [`BatchAggregator`] → [`UpdateSubscriber`],
//! with a [`ConnectionTracker`] observing the channel's lifecycle.

pub mod aggregator;
pub mod channel;
pub mod connection;
pub mod error;
pub mod event;
pub mod ingest;

pub use aggregator::{
    AggregatorConfig, BatchAggregator, ChannelSubscriber, UpdateBatch, UpdateSubscriber, DEFAULT_DEBOUNCE,
};
pub use channel::{run_live_channel, ChannelSignal};
pub use connection::{
    ConnectionSnapshot, ConnectionState, ConnectionStatus, ConnectionTracker, DisplayState,
    DEFAULT_RECONNECT_GRACE,
};
pub use error::RealtimeError;
pub use event::{normalize, parse_frame, EventKind, PerformanceUpdate, RawEvent};
pub use ingest::{IngestQueue, IngestStats};
