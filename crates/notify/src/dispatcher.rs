//! Topic routing for notifications.
//!
//! Jobs publish to a topic (`budget-alerts`, `digest`). A topic with its
//! own channel list uses it; every other topic falls back to the default
//! channels. Channels are delivered to concurrently and one failing channel
//! never affects another.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;

use crate::traits::{DispatchResult, Notification, Notifier, NotifyError};

#[derive(Default)]
pub struct Dispatcher {
    topics: HashMap<String, Vec<Arc<dyn Notifier>>>,
    defaults: Vec<Arc<dyn Notifier>>,
}

impl Dispatcher {
    pub fn new(topics: HashMap<String, Vec<Arc<dyn Notifier>>>) -> Self {
        Self {
            topics,
            defaults: Vec::new(),
        }
    }

    /// No channels at all; every dispatch is a no-op until some are set.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The same channels for every topic.
    pub fn with_defaults(channels: Vec<Arc<dyn Notifier>>) -> Self {
        Self {
            topics: HashMap::new(),
            defaults: channels,
        }
    }

    pub fn set_topic_channels(&mut self, topic: impl Into<String>, channels: Vec<Arc<dyn Notifier>>) {
        self.topics.insert(topic.into(), channels);
    }

    /// Drop a topic's own channels so it uses the defaults again.
    pub fn remove_topic(&mut self, topic: &str) {
        self.topics.remove(topic);
    }

    pub fn channel_count(&self, topic: &str) -> usize {
        self.route(topic).len()
    }

    fn route(&self, topic: &str) -> &[Arc<dyn Notifier>] {
        match self.topics.get(topic) {
            Some(channels) => channels,
            None => &self.defaults,
        }
    }

    /// Deliver to every channel routed for `topic`, one result per channel
    /// in routing order. An empty result means nothing was configured.
    pub async fn dispatch(&self, topic: &str, notification: &Notification) -> Vec<DispatchResult> {
        let channels = self.route(topic);
        if channels.is_empty() {
            tracing::debug!(topic, "No notification channels for topic");
            return Vec::new();
        }
        join_all(channels.iter().map(|channel| deliver(channel.as_ref(), topic, notification))).await
    }

    /// Send the channel's test notification through one of a topic's own
    /// channels.
    pub async fn test_notify(&self, topic: &str, channel_index: usize) -> Result<(), NotifyError> {
        let channel = self
            .topics
            .get(topic)
            .ok_or_else(|| NotifyError::Config(format!("no channels for topic '{topic}'")))?
            .get(channel_index)
            .ok_or_else(|| NotifyError::Config(format!("no channel {channel_index} for topic '{topic}'")))?;
        channel.test().await
    }
}

async fn deliver(channel: &dyn Notifier, topic: &str, notification: &Notification) -> DispatchResult {
    let started = Instant::now();
    let outcome = channel.send(notification).await;
    let duration_ms = started.elapsed().as_millis() as u64;
    let name = channel.channel_name();

    let error = match outcome {
        Ok(()) => {
            tracing::info!(topic, channel = name, duration_ms, "Notification delivered");
            None
        }
        Err(e) => {
            tracing::warn!(topic, channel = name, duration_ms, error = %e, "Notification delivery failed");
            Some(e.to_string())
        }
    };

    DispatchResult {
        channel: name.to_string(),
        topic: topic.to_string(),
        success: error.is_none(),
        error,
        duration_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        name: &'static str,
        sent: AtomicUsize,
        fail: bool,
    }

    impl Counting {
        fn ok(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                sent: AtomicUsize::new(0),
                fail: false,
            })
        }

        fn failing(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                sent: AtomicUsize::new(0),
                fail: true,
            })
        }

        fn sent(&self) -> usize {
            self.sent.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl Notifier for Counting {
        async fn send(&self, _notification: &Notification) -> Result<(), NotifyError> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(NotifyError::Rejected("503 Service Unavailable".into()))
            } else {
                Ok(())
            }
        }

        fn channel_name(&self) -> &str {
            self.name
        }
    }

    fn alert() -> Notification {
        Notification::new("Budget alert: Feed", "farm-2 has spent 96% of Feed").with_meta("farm_id", "farm-2")
    }

    #[tokio::test]
    async fn topic_channels_all_receive() {
        let (a, b) = (Counting::ok("a"), Counting::ok("b"));
        let mut dispatcher = Dispatcher::empty();
        dispatcher.set_topic_channels(
            "budget-alerts",
            vec![a.clone() as Arc<dyn Notifier>, b.clone() as Arc<dyn Notifier>],
        );

        let results = dispatcher.dispatch("budget-alerts", &alert()).await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.success && r.topic == "budget-alerts"));
        assert_eq!((a.sent(), b.sent()), (1, 1));
    }

    #[tokio::test]
    async fn one_failing_channel_does_not_stop_the_others() {
        let (bad, good) = (Counting::failing("bad"), Counting::ok("good"));
        let mut dispatcher = Dispatcher::empty();
        dispatcher.set_topic_channels(
            "digest",
            vec![bad.clone() as Arc<dyn Notifier>, good.clone() as Arc<dyn Notifier>],
        );

        let results = dispatcher.dispatch("digest", &alert()).await;
        assert_eq!(results[0].channel, "bad");
        assert!(!results[0].success);
        assert_eq!(results[0].error.as_deref(), Some("Delivery rejected: 503 Service Unavailable"));
        assert!(results[1].success);
        assert_eq!(good.sent(), 1);
    }

    #[tokio::test]
    async fn nothing_configured_means_no_results() {
        let dispatcher = Dispatcher::empty();
        assert!(dispatcher.dispatch("digest", &alert()).await.is_empty());
        assert_eq!(dispatcher.channel_count("digest"), 0);
    }

    #[tokio::test]
    async fn topics_fall_back_to_defaults_until_overridden() {
        let (fallback, own) = (Counting::ok("log"), Counting::ok("webhook"));
        let mut dispatcher = Dispatcher::with_defaults(vec![fallback.clone() as Arc<dyn Notifier>]);

        dispatcher.dispatch("digest", &alert()).await;
        dispatcher.set_topic_channels("digest", vec![own.clone() as Arc<dyn Notifier>]);
        dispatcher.dispatch("digest", &alert()).await;
        dispatcher.remove_topic("digest");
        dispatcher.dispatch("digest", &alert()).await;

        assert_eq!(fallback.sent(), 2);
        assert_eq!(own.sent(), 1);
        assert_eq!(dispatcher.channel_count("budget-alerts"), 1);
    }

    #[tokio::test]
    async fn test_notify_targets_one_topic_channel() {
        let channel = Counting::ok("a");
        let mut dispatcher = Dispatcher::empty();
        dispatcher.set_topic_channels("digest", vec![channel.clone() as Arc<dyn Notifier>]);

        assert!(dispatcher.test_notify("digest", 0).await.is_ok());
        assert_eq!(channel.sent(), 1);
        assert!(matches!(dispatcher.test_notify("digest", 3).await, Err(NotifyError::Config(_))));
        assert!(dispatcher.test_notify("budget-alerts", 0).await.is_err());
    }
}
