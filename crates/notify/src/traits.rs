//! Channel abstraction and the types every channel shares.

use std::collections::HashMap;

use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Template rendering failed: {0}")]
    Template(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// The endpoint answered, but not with success.
    #[error("Delivery rejected: {0}")]
    Rejected(String),

    #[error("Insight generation failed: {0}")]
    Insight(String),
}

/// Final text of an alert or digest, plus flat string metadata such as
/// `farm_id`, `category` or `topic` that channels may forward.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub subject: String,
    pub body: String,
    pub metadata: HashMap<String, String>,
}

impl Notification {
    pub fn new(subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            body: body.into(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A delivery channel (webhook, log, ...).
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError>;

    /// Send a fixed sample so operators can check a channel end to end.
    async fn test(&self) -> Result<(), NotifyError> {
        let sample = Notification::new(
            "[TEST] FarmKonnect notification test",
            "If you can read this, scheduled alerts will reach this channel.",
        )
        .with_meta("topic", "test");
        self.send(&sample).await
    }

    /// Short identifier used in logs and dispatch results.
    fn channel_name(&self) -> &str;
}

/// Outcome of one channel delivery within a dispatch.
#[derive(Debug, Clone)]
pub struct DispatchResult {
    pub channel: String,
    pub topic: String,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
}
