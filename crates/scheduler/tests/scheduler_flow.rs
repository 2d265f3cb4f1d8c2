//! End-to-end scheduler behaviour through the public API.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use farmkonnect_notify::{Dispatcher, Notification, Notifier, NotifyError};
use farmkonnect_scheduler::jobs::{BudgetCheckJob, BudgetSnapshot, BudgetSource, BUDGET_ALERTS_TOPIC, BUDGET_CHECK_JOB};
use farmkonnect_scheduler::{
    handler_fn, JobDefinition, JobError, JobOutcome, JsonFileStateStore, Scheduler, Trigger,
};

struct Budgets(Vec<BudgetSnapshot>);

#[async_trait::async_trait]
impl BudgetSource for Budgets {
    async fn snapshots(&self) -> Result<Vec<BudgetSnapshot>, JobError> {
        Ok(self.0.clone())
    }
}

#[derive(Default)]
struct Inbox {
    received: Mutex<Vec<Notification>>,
}

#[async_trait::async_trait]
impl Notifier for Inbox {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.received.lock().unwrap().push(notification.clone());
        Ok(())
    }
    fn channel_name(&self) -> &str {
        "inbox"
    }
}

#[tokio::test(start_paused = true)]
async fn budget_check_runs_on_its_interval_and_alerts_once() {
    let inbox = Arc::new(Inbox::default());
    let mut dispatcher = Dispatcher::empty();
    dispatcher.set_topic_channels(BUDGET_ALERTS_TOPIC, vec![inbox.clone() as Arc<dyn Notifier>]);

    let budgets = Budgets(vec![
        BudgetSnapshot {
            farm_id: "farm-2".into(),
            category: "Fertilizer".into(),
            budgeted: 500.0,
            spent: 480.0,
        },
        BudgetSnapshot {
            farm_id: "farm-2".into(),
            category: "Labor".into(),
            budgeted: 2000.0,
            spent: 300.0,
        },
    ]);
    let job = BudgetCheckJob::new(Arc::new(budgets), Arc::new(dispatcher), 80.0);

    let scheduler = Scheduler::new();
    scheduler
        .register(JobDefinition::from_millis(BUDGET_CHECK_JOB, 1000, Arc::new(job)))
        .unwrap();
    let mut completions = scheduler.subscribe();
    scheduler.initialize();

    tokio::time::sleep(Duration::from_millis(3500)).await;

    let mut messages = Vec::new();
    while let Ok(done) = completions.try_recv() {
        assert_eq!(done.trigger, Trigger::Scheduled);
        messages.push(done.message.unwrap_or_default());
    }
    assert_eq!(
        messages,
        [
            "1 budget alert(s) raised",
            "0 budget alert(s) raised",
            "0 budget alert(s) raised"
        ]
    );
    assert_eq!(inbox.received.lock().unwrap().len(), 1);

    let status = scheduler.get_status();
    assert!(status.running);
    assert_eq!(
        status.job(BUDGET_CHECK_JOB).unwrap().last_result.as_ref().unwrap().message.as_deref(),
        Some("0 budget alert(s) raised")
    );

    scheduler.stop();
}

#[tokio::test(start_paused = true)]
async fn disabled_state_survives_restart_via_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("job-state.json");
    let calls = Arc::new(AtomicUsize::new(0));
    let counting = {
        let calls = Arc::clone(&calls);
        handler_fn(move |_| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(JobOutcome::empty())
            }
        })
    };

    {
        let scheduler = Scheduler::with_store(Arc::new(JsonFileStateStore::new(&path)));
        scheduler
            .register(JobDefinition::from_millis("digest", 1000, counting.clone()))
            .unwrap();
        assert!(scheduler.disable_job("digest"));
    }

    let scheduler = Scheduler::with_store(Arc::new(JsonFileStateStore::new(&path)));
    scheduler
        .register(JobDefinition::from_millis("digest", 1000, counting))
        .unwrap();
    scheduler.initialize();
    tokio::time::sleep(Duration::from_millis(2500)).await;

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(!scheduler.get("digest").unwrap().enabled);

    assert!(scheduler.enable_job("digest"));
    tokio::time::sleep(Duration::from_millis(1001)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
