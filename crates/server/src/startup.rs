//! Server startup: wire config into the dispatcher, scheduler and realtime
//! pipeline, then start the background parts.

use std::sync::Arc;
use std::time::Duration;

use farmkonnect_core::Config;
use farmkonnect_notify::{
    Dispatcher, LogNotifier, Notifier, TemplateRenderer, WebhookConfig, WebhookNotifier,
};
use farmkonnect_realtime::{AggregatorConfig, BatchAggregator, ConnectionTracker, IngestQueue};
use farmkonnect_scheduler::jobs::{BudgetCheckJob, DigestJob, BUDGET_CHECK_JOB, DIGEST_JOB};
use farmkonnect_scheduler::{JobDefinition, JsonFileStateStore, Scheduler};
use tokio::sync::broadcast;
use tracing::info;

use crate::budgets::JsonBudgetSource;
use crate::ledger::ActivityLedger;
use crate::live::{self, FeedSlot, LiveSubscriber};
use crate::state::AppState;

const BROADCAST_CAPACITY: usize = 256;

/// Notifications always go to the log; a configured webhook is added
/// alongside it for every topic.
pub fn build_dispatcher(config: &Config) -> anyhow::Result<Dispatcher> {
    let mut channels: Vec<Arc<dyn Notifier>> = vec![Arc::new(LogNotifier::new())];
    if let Some(url) = &config.notify.webhook_url {
        let webhook = WebhookNotifier::new(
            WebhookConfig::new(url.clone()).method(config.notify.webhook_method.clone()),
            Arc::new(TemplateRenderer::new()),
        )?;
        channels.push(Arc::new(webhook));
        info!("Webhook notification channel enabled");
    }
    Ok(Dispatcher::with_defaults(channels))
}

/// Register the built-in jobs. Persisted enable flags override the config
/// defaults when a state file is configured.
pub fn build_scheduler(
    config: &Config,
    dispatcher: Arc<Dispatcher>,
    ledger: Arc<ActivityLedger>,
) -> anyhow::Result<Scheduler> {
    let sched = &config.scheduler;
    let scheduler = match &sched.job_state_file {
        Some(path) => {
            info!(path = %path.display(), "Persisting job state");
            Scheduler::with_store(Arc::new(JsonFileStateStore::new(path)))
        }
        None => Scheduler::new(),
    };

    let budget_check = BudgetCheckJob::new(
        Arc::new(JsonBudgetSource::new(sched.budgets_file.clone())),
        Arc::clone(&dispatcher),
        sched.budget_threshold_pct as f64,
    );
    scheduler.register(
        JobDefinition::from_millis(BUDGET_CHECK_JOB, sched.budget_check_interval_ms, Arc::new(budget_check))
            .enabled(sched.budget_check_enabled),
    )?;

    let digest = DigestJob::new(ledger, dispatcher);
    scheduler.register(
        JobDefinition::from_millis(DIGEST_JOB, sched.digest_interval_ms, Arc::new(digest))
            .enabled(sched.digest_enabled),
    )?;

    Ok(scheduler)
}

/// Build `AppState`. Nothing is started yet; see [`start`].
pub fn build_app_state(config: Config) -> anyhow::Result<Arc<AppState>> {
    let dispatcher = Arc::new(build_dispatcher(&config)?);
    let ledger = Arc::new(ActivityLedger::new());
    let scheduler = Arc::new(build_scheduler(&config, dispatcher, Arc::clone(&ledger))?);

    let (broadcast_tx, _) = broadcast::channel::<String>(BROADCAST_CAPACITY);
    let aggregator = BatchAggregator::new(
        AggregatorConfig {
            debounce: Duration::from_millis(config.realtime.debounce_ms),
            max_wait: config.realtime.max_wait_ms.map(Duration::from_millis),
        },
        Arc::new(LiveSubscriber::new(Arc::clone(&ledger), broadcast_tx.clone())),
    );
    let tracker = ConnectionTracker::new(Duration::from_millis(config.realtime.reconnect_grace_ms));

    Ok(Arc::new(AppState {
        config,
        scheduler,
        ingest: Arc::new(IngestQueue::new(aggregator)),
        tracker,
        ledger,
        feed: Arc::new(FeedSlot::default()),
        broadcast: broadcast_tx,
    }))
}

/// Arm the job timers and the dashboard relays.
pub fn start(state: &AppState) {
    state.scheduler.initialize();
    live::spawn_forwarders(&state.scheduler, &state.tracker, state.broadcast.clone());
}

/// Flush what the aggregator still holds and stop the scheduler.
pub fn shutdown(state: &AppState) {
    let flushed = state.ingest.aggregator().flush();
    if flushed > 0 {
        info!(updates = flushed, "Flushed pending updates on shutdown");
    }
    state.scheduler.stop();
}
