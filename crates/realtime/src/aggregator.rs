//! Debounced batch aggregator for performance updates.
//!
//! Every enqueue appends to a single queue and restarts the flush timer.
//! When the timer fires with no further input, the whole queue is handed
//! to the subscriber as one [`UpdateBatch`] and cleared. A continuous
//! stream keeps postponing delivery unless a max-wait bound is set.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

use crate::event::PerformanceUpdate;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Updates accumulated during one debounce window, in arrival order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateBatch {
    pub window_id: u64,
    pub updates: Vec<PerformanceUpdate>,
    pub flushed_at: DateTime<Utc>,
}

impl UpdateBatch {
    pub fn len(&self) -> usize {
        self.updates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }
}

/// Receives aggregator output.
///
/// Callbacks run on the aggregator's caller or timer task and must not
/// block. No aggregator lock is held while they run, so a callback may
/// enqueue or flush; a batch flushed from inside `on_batch_update` is
/// delivered after that callback returns. The batch is moved into the
/// subscriber; the aggregator keeps no reference to it.
pub trait UpdateSubscriber: Send + Sync {
    /// Low-latency path, called once per enqueued update.
    fn on_update(&self, _update: &PerformanceUpdate) {}

    fn on_batch_update(&self, batch: UpdateBatch);
}

/// Forwards batches (and optionally single updates) into channels.
#[derive(Debug, Clone)]
pub struct ChannelSubscriber {
    batches: mpsc::UnboundedSender<UpdateBatch>,
    updates: Option<mpsc::UnboundedSender<PerformanceUpdate>>,
}

impl ChannelSubscriber {
    pub fn new(batches: mpsc::UnboundedSender<UpdateBatch>) -> Self {
        Self {
            batches,
            updates: None,
        }
    }

    pub fn with_updates(mut self, updates: mpsc::UnboundedSender<PerformanceUpdate>) -> Self {
        self.updates = Some(updates);
        self
    }
}

impl UpdateSubscriber for ChannelSubscriber {
    fn on_update(&self, update: &PerformanceUpdate) {
        if let Some(tx) = &self.updates {
            let _ = tx.send(update.clone());
        }
    }

    fn on_batch_update(&self, batch: UpdateBatch) {
        if self.batches.send(batch).is_err() {
            debug!("Batch receiver dropped");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregatorConfig {
    /// Quiet period after the latest enqueue before a flush.
    pub debounce: Duration,
    /// Upper bound on how long the first queued update may wait.
    /// `None` keeps pure debounce behaviour.
    pub max_wait: Option<Duration>,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            max_wait: None,
        }
    }
}

#[derive(Default)]
struct State {
    queue: Vec<PerformanceUpdate>,
    /// Bumped whenever the pending timer is replaced or cancelled; a timer
    /// that wakes with a stale generation does nothing.
    generation: u64,
    timer: Option<JoinHandle<()>>,
    first_enqueued: Option<Instant>,
    next_window: u64,
    /// Batches taken from the queue but not yet handed over, in window order.
    outbox: VecDeque<(UpdateBatch, &'static str)>,
    /// Some caller is handing the outbox to the subscriber.
    delivering: bool,
}

impl State {
    fn cancel_timer(&mut self) {
        self.generation += 1;
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }

    /// Move the queue into the outbox as the next window. Returns the
    /// number of updates staged.
    fn stage_batch(&mut self, reason: &'static str) -> usize {
        self.first_enqueued = None;
        if self.queue.is_empty() {
            return 0;
        }
        let window_id = self.next_window;
        self.next_window += 1;
        let batch = UpdateBatch {
            window_id,
            updates: std::mem::take(&mut self.queue),
            flushed_at: Utc::now(),
        };
        let staged = batch.len();
        self.outbox.push_back((batch, reason));
        staged
    }
}

struct Inner {
    config: AggregatorConfig,
    state: Mutex<State>,
    subscriber: Arc<dyn UpdateSubscriber>,
}

impl Inner {
    fn lock_state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn fire(&self, generation: u64) {
        {
            let mut state = self.lock_state();
            if state.generation != generation {
                return;
            }
            state.timer = None;
            if state.stage_batch("debounce") == 0 {
                return;
            }
        }
        self.drain();
    }

    /// Hand staged batches to the subscriber one at a time with the state
    /// lock released. Only one caller drains; anything staged meanwhile is
    /// picked up by that caller's loop.
    fn drain(&self) {
        {
            let mut state = self.lock_state();
            if state.delivering {
                return;
            }
            state.delivering = true;
        }
        let mut draining = Draining {
            inner: self,
            finished: false,
        };
        loop {
            let (batch, reason) = {
                let mut state = self.lock_state();
                match state.outbox.pop_front() {
                    Some(next) => next,
                    None => {
                        state.delivering = false;
                        draining.finished = true;
                        return;
                    }
                }
            };
            info!(window_id = batch.window_id, updates = batch.len(), reason, "Flushing update batch");
            self.subscriber.on_batch_update(batch);
        }
    }
}

/// Clears the `delivering` flag if a subscriber panics mid-drain.
struct Draining<'a> {
    inner: &'a Inner,
    finished: bool,
}

impl Drop for Draining<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.inner.lock_state().delivering = false;
        }
    }
}

/// Coalesces bursts of updates into batch deliveries.
///
/// Cheap to clone; clones share one queue. Enqueue spawns the flush timer
/// and must be called from inside a Tokio runtime.
#[derive(Clone)]
pub struct BatchAggregator {
    inner: Arc<Inner>,
}

impl BatchAggregator {
    pub fn new(config: AggregatorConfig, subscriber: Arc<dyn UpdateSubscriber>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(State::default()),
                subscriber,
            }),
        }
    }

    pub fn config(&self) -> AggregatorConfig {
        self.inner.config
    }

    /// Append an update and restart the flush timer. Never fails.
    pub fn enqueue(&self, update: PerformanceUpdate) {
        let (queued, deadline) = {
            let mut state = self.inner.lock_state();
            state.queue.push(update.clone());

            let now = Instant::now();
            let first = *state.first_enqueued.get_or_insert(now);
            let mut deadline = now + self.inner.config.debounce;
            if let Some(max_wait) = self.inner.config.max_wait {
                deadline = deadline.min(first + max_wait);
            }

            state.cancel_timer();
            let generation = state.generation;
            let inner = Arc::clone(&self.inner);
            state.timer = Some(tokio::spawn(async move {
                sleep_until(deadline).await;
                inner.fire(generation);
            }));
            (state.queue.len(), deadline)
        };

        debug!(
            subject_id = %update.subject_id,
            queued,
            flush_in_ms = deadline.saturating_duration_since(Instant::now()).as_millis() as u64,
            "Update enqueued"
        );
        self.inner.subscriber.on_update(&update);
    }

    /// Deliver whatever is queued right now and cancel the pending timer.
    /// Returns the number of updates flushed.
    pub fn flush(&self) -> usize {
        let staged = {
            let mut state = self.inner.lock_state();
            state.cancel_timer();
            state.stage_batch("explicit")
        };
        if staged > 0 {
            self.inner.drain();
        }
        staged
    }

    /// Updates waiting for the next flush.
    pub fn pending(&self) -> usize {
        self.inner.lock_state().queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(subject: &str, minutes: f64) -> PerformanceUpdate {
        PerformanceUpdate {
            subject_id: subject.to_string(),
            total_hours: minutes / 60.0,
            total_entries: 1,
            avg_duration: minutes,
            last_active: Utc::now(),
        }
    }

    fn aggregator(
        config: AggregatorConfig,
    ) -> (
        BatchAggregator,
        mpsc::UnboundedReceiver<UpdateBatch>,
        mpsc::UnboundedReceiver<PerformanceUpdate>,
    ) {
        let (batch_tx, batch_rx) = mpsc::unbounded_channel();
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        let subscriber = ChannelSubscriber::new(batch_tx).with_updates(update_tx);
        (BatchAggregator::new(config, Arc::new(subscriber)), batch_rx, update_rx)
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[tokio::test(start_paused = true)]
    async fn burst_within_window_yields_one_batch() {
        let (agg, mut batches, _) = aggregator(AggregatorConfig::default());

        agg.enqueue(update("7", 10.0));
        tokio::time::sleep(ms(40)).await;
        agg.enqueue(update("7", 20.0));
        tokio::time::sleep(ms(40)).await;
        agg.enqueue(update("7", 30.0));
        assert_eq!(agg.pending(), 3);

        tokio::time::sleep(ms(499)).await;
        assert!(batches.try_recv().is_err());

        tokio::time::sleep(ms(2)).await;
        let batch = batches.try_recv().unwrap();
        let minutes: Vec<f64> = batch.updates.iter().map(|u| u.avg_duration).collect();
        assert_eq!(minutes, [10.0, 20.0, 30.0]);
        assert_eq!(agg.pending(), 0);
        assert!(batches.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn spaced_updates_yield_one_batch_each() {
        let (agg, mut batches, _) = aggregator(AggregatorConfig::default());

        for i in 0..3 {
            agg.enqueue(update("12", i as f64));
            tokio::time::sleep(ms(600)).await;
        }

        let mut windows = Vec::new();
        while let Ok(batch) = batches.try_recv() {
            assert_eq!(batch.len(), 1);
            windows.push(batch.window_id);
        }
        assert_eq!(windows, [0, 1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn every_enqueue_triggers_the_update_callback() {
        let (agg, _batches, mut updates) = aggregator(AggregatorConfig::default());
        agg.enqueue(update("a", 1.0));
        agg.enqueue(update("b", 2.0));
        assert_eq!(updates.try_recv().unwrap().subject_id, "a");
        assert_eq!(updates.try_recv().unwrap().subject_id, "b");
    }

    #[tokio::test(start_paused = true)]
    async fn continuous_input_postpones_delivery_without_max_wait() {
        let (agg, mut batches, _) = aggregator(AggregatorConfig::default());
        for _ in 0..10 {
            agg.enqueue(update("7", 1.0));
            tokio::time::sleep(ms(400)).await;
        }
        assert!(batches.try_recv().is_err());
        assert_eq!(agg.pending(), 10);

        tokio::time::sleep(ms(101)).await;
        assert_eq!(batches.try_recv().unwrap().len(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn max_wait_bounds_latency() {
        let (agg, mut batches, _) = aggregator(AggregatorConfig {
            debounce: ms(500),
            max_wait: Some(ms(1000)),
        });

        // Enqueues at 0, 400, 800; the 800 one would push the flush to 1300.
        for _ in 0..3 {
            agg.enqueue(update("7", 1.0));
            tokio::time::sleep(ms(400)).await;
        }
        // now = 1200; flush happened at 1000.
        let batch = batches.try_recv().unwrap();
        assert_eq!(batch.len(), 3);

        // The window restarts with the next update.
        agg.enqueue(update("7", 1.0));
        tokio::time::sleep(ms(501)).await;
        assert_eq!(batches.try_recv().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_flush_delivers_and_cancels_timer() {
        let (agg, mut batches, _) = aggregator(AggregatorConfig::default());
        agg.enqueue(update("7", 1.0));
        agg.enqueue(update("8", 2.0));

        assert_eq!(agg.flush(), 2);
        assert_eq!(batches.try_recv().unwrap().len(), 2);

        tokio::time::sleep(ms(1000)).await;
        assert!(batches.try_recv().is_err());
        assert_eq!(agg.flush(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn batch_is_not_redelivered() {
        let (agg, mut batches, _) = aggregator(AggregatorConfig::default());
        agg.enqueue(update("7", 1.0));
        tokio::time::sleep(ms(600)).await;
        let first = batches.try_recv().unwrap();
        assert_eq!(first.window_id, 0);

        tokio::time::sleep(ms(5000)).await;
        assert!(batches.try_recv().is_err());
        assert_eq!(agg.flush(), 0);
    }

    /// Enqueues and flushes again from inside its first batch callback.
    #[derive(Default)]
    struct Reentrant {
        aggregator: std::sync::OnceLock<BatchAggregator>,
        seen: Mutex<Vec<(u64, usize)>>,
    }

    impl UpdateSubscriber for Reentrant {
        fn on_batch_update(&self, batch: UpdateBatch) {
            let first = {
                let mut seen = self.seen.lock().unwrap();
                seen.push((batch.window_id, batch.len()));
                seen.len() == 1
            };
            if let (true, Some(agg)) = (first, self.aggregator.get()) {
                agg.enqueue(update("9", 5.0));
                assert_eq!(agg.flush(), 1);
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn flush_from_inside_a_batch_callback_is_delivered_next() {
        let subscriber = Arc::new(Reentrant::default());
        let agg = BatchAggregator::new(AggregatorConfig::default(), subscriber.clone());
        subscriber.aggregator.set(agg.clone()).ok().unwrap();

        agg.enqueue(update("7", 1.0));
        assert_eq!(agg.flush(), 1);
        assert_eq!(*subscriber.seen.lock().unwrap(), [(0, 1), (1, 1)]);

        agg.enqueue(update("7", 1.0));
        tokio::time::sleep(ms(501)).await;
        assert_eq!(subscriber.seen.lock().unwrap().last(), Some(&(2, 1)));
        assert_eq!(agg.pending(), 0);
    }
}
