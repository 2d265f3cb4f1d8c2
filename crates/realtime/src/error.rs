//! Realtime pipeline error types.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RealtimeError {
    #[error("frame parse error: {0}")]
    Parse(String),
}
