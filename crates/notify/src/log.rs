//! Notifier that writes notifications to the tracing log.

use crate::traits::{Notification, Notifier, NotifyError};

/// Emits each notification as an `info` event. Used as the default channel
/// when no webhook is configured, so alerts still show up in the logs.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        tracing::info!(
            subject = %notification.subject,
            body = %notification.body,
            metadata = ?notification.metadata,
            "notification"
        );
        Ok(())
    }

    fn channel_name(&self) -> &str {
        "log"
    }
}
