//! Periodic worker activity digest.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use farmkonnect_notify::{Dispatcher, InsightGenerator, Notification, TemplateRenderer};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::job::{JobContext, JobError, JobHandler, JobOutcome};

pub const DIGEST_JOB: &str = "activity-digest";
pub const DIGEST_TOPIC: &str = "digest";

const SUMMARY_TEMPLATE: &str = "{{ workers }} worker(s) logged {{ total_hours | round(1) }}h \
across {{ total_entries }} entries.";
const LINES_TEMPLATE: &str = "{% for w in activity %}- {{ w.subjectId }}: \
{{ w.totalHours | round(1) }}h in {{ w.totalEntries }} entries\n{% endfor %}";

/// Accumulated activity for one worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerActivity {
    pub subject_id: String,
    pub total_hours: f64,
    pub total_entries: u64,
    pub last_active: Option<DateTime<Utc>>,
}

#[async_trait::async_trait]
pub trait DigestSource: Send + Sync {
    async fn activity(&self) -> Result<Vec<WorkerActivity>, JobError>;
}

#[derive(Serialize)]
struct DigestContext<'a> {
    workers: usize,
    total_hours: f64,
    total_entries: u64,
    activity: &'a [WorkerActivity],
}

/// Sends a `digest` notification summarizing worker activity.
///
/// With an [`InsightGenerator`] configured, its text becomes the digest
/// headline; when generation fails the plain summary is used instead.
pub struct DigestJob {
    source: Arc<dyn DigestSource>,
    dispatcher: Arc<Dispatcher>,
    renderer: TemplateRenderer,
    insight: Option<Arc<dyn InsightGenerator>>,
}

impl DigestJob {
    pub fn new(source: Arc<dyn DigestSource>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            source,
            dispatcher,
            renderer: TemplateRenderer::new(),
            insight: None,
        }
    }

    pub fn with_insight(mut self, insight: Arc<dyn InsightGenerator>) -> Self {
        self.insight = Some(insight);
        self
    }

    async fn headline(&self, summary: &str, lines: &str) -> String {
        let Some(insight) = &self.insight else {
            return summary.to_string();
        };
        let prompt = format!(
            "Write a one-sentence headline for this farm activity digest.\n{summary}\n{lines}"
        );
        match insight.generate(&prompt).await {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => {
                debug!("Insight generator returned empty text, using summary");
                summary.to_string()
            }
            Err(e) => {
                warn!(error = %e, "Insight generation failed, using summary");
                summary.to_string()
            }
        }
    }
}

#[async_trait::async_trait]
impl JobHandler for DigestJob {
    async fn run(&self, ctx: &JobContext) -> Result<JobOutcome, JobError> {
        let mut activity = self.source.activity().await?;
        if activity.is_empty() {
            return Ok(JobOutcome::new("no activity"));
        }
        activity.sort_by(|a, b| b.total_hours.total_cmp(&a.total_hours));

        let digest = DigestContext {
            workers: activity.len(),
            total_hours: activity.iter().map(|w| w.total_hours).sum(),
            total_entries: activity.iter().map(|w| w.total_entries).sum(),
            activity: &activity,
        };
        let summary = self
            .renderer
            .render(SUMMARY_TEMPLATE, &digest)
            .map_err(|e| JobError::failed(e.to_string()))?;
        let lines = self
            .renderer
            .render(LINES_TEMPLATE, &digest)
            .map_err(|e| JobError::failed(e.to_string()))?;

        if ctx.is_cancelled() {
            return Err(JobError::Cancelled);
        }
        let headline = self.headline(&summary, &lines).await;

        let notification = Notification::new("Farm activity digest", format!("{headline}\n\n{lines}"))
            .with_meta("topic", DIGEST_TOPIC)
            .with_meta("workers", digest.workers.to_string());
        let results = self.dispatcher.dispatch(DIGEST_TOPIC, &notification).await;
        let delivered = results.iter().filter(|r| r.success).count();
        if !results.is_empty() && delivered == 0 {
            return Err(JobError::failed("digest delivery failed on every channel"));
        }
        Ok(JobOutcome::new(format!(
            "digest of {} worker(s) sent to {delivered} channel(s)",
            digest.workers
        )))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use farmkonnect_notify::{Notifier, NotifyError};
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::job::Trigger;

    struct FixedActivity(Vec<WorkerActivity>);

    #[async_trait::async_trait]
    impl DigestSource for FixedActivity {
        async fn activity(&self) -> Result<Vec<WorkerActivity>, JobError> {
            Ok(self.0.clone())
        }
    }

    #[derive(Default)]
    struct Capture {
        sent: Mutex<Vec<Notification>>,
    }

    #[async_trait::async_trait]
    impl Notifier for Capture {
        async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
            self.sent.lock().unwrap().push(notification.clone());
            Ok(())
        }
        fn channel_name(&self) -> &str {
            "capture"
        }
    }

    struct Broken;

    #[async_trait::async_trait]
    impl Notifier for Broken {
        async fn send(&self, _notification: &Notification) -> Result<(), NotifyError> {
            Err(NotifyError::Rejected("503".into()))
        }
        fn channel_name(&self) -> &str {
            "broken"
        }
    }

    struct StaticInsight(Result<String, String>);

    #[async_trait::async_trait]
    impl InsightGenerator for StaticInsight {
        async fn generate(&self, prompt: &str) -> Result<String, NotifyError> {
            assert!(prompt.contains("worker(s) logged"));
            self.0.clone().map_err(NotifyError::Insight)
        }
    }

    fn worker(id: &str, hours: f64, entries: u64) -> WorkerActivity {
        WorkerActivity {
            subject_id: id.into(),
            total_hours: hours,
            total_entries: entries,
            last_active: None,
        }
    }

    fn dispatcher_with(channel: Arc<dyn Notifier>) -> Arc<Dispatcher> {
        let mut dispatcher = Dispatcher::empty();
        dispatcher.set_topic_channels(DIGEST_TOPIC, vec![channel]);
        Arc::new(dispatcher)
    }

    fn ctx() -> JobContext {
        JobContext::new(DIGEST_JOB, Trigger::Scheduled, CancellationToken::new())
    }

    #[tokio::test]
    async fn empty_activity_sends_nothing() {
        let capture = Arc::new(Capture::default());
        let job = DigestJob::new(Arc::new(FixedActivity(vec![])), dispatcher_with(capture.clone()));
        let outcome = job.run(&ctx()).await.unwrap();
        assert_eq!(outcome.message.as_deref(), Some("no activity"));
        assert!(capture.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn plain_summary_without_insight() {
        let capture = Arc::new(Capture::default());
        let source = FixedActivity(vec![worker("7", 1.5, 2), worker("12", 4.0, 3)]);
        let job = DigestJob::new(Arc::new(source), dispatcher_with(capture.clone()));

        let outcome = job.run(&ctx()).await.unwrap();
        assert_eq!(
            outcome.message.as_deref(),
            Some("digest of 2 worker(s) sent to 1 channel(s)")
        );

        let sent = capture.sent.lock().unwrap();
        assert_eq!(
            sent[0].body,
            "2 worker(s) logged 5.5h across 5 entries.\n\n- 12: 4.0h in 3 entries\n- 7: 1.5h in 2 entries\n"
        );
        assert_eq!(sent[0].metadata["workers"], "2");
    }

    #[tokio::test]
    async fn insight_text_becomes_headline() {
        let capture = Arc::new(Capture::default());
        let job = DigestJob::new(
            Arc::new(FixedActivity(vec![worker("7", 2.0, 1)])),
            dispatcher_with(capture.clone()),
        )
        .with_insight(Arc::new(StaticInsight(Ok("  A quiet day in the barn.  ".into()))));

        job.run(&ctx()).await.unwrap();
        let sent = capture.sent.lock().unwrap();
        assert!(sent[0].body.starts_with("A quiet day in the barn.\n\n"));
    }

    #[tokio::test]
    async fn insight_failure_falls_back_to_summary() {
        let capture = Arc::new(Capture::default());
        let job = DigestJob::new(
            Arc::new(FixedActivity(vec![worker("7", 2.0, 1)])),
            dispatcher_with(capture.clone()),
        )
        .with_insight(Arc::new(StaticInsight(Err("quota exceeded".into()))));

        assert!(job.run(&ctx()).await.is_ok());
        let sent = capture.sent.lock().unwrap();
        assert!(sent[0].body.starts_with("1 worker(s) logged 2.0h across 1 entries."));
    }

    #[tokio::test]
    async fn all_channels_failing_fails_the_run() {
        let job = DigestJob::new(
            Arc::new(FixedActivity(vec![worker("7", 2.0, 1)])),
            dispatcher_with(Arc::new(Broken)),
        );
        assert_eq!(
            job.run(&ctx()).await.unwrap_err(),
            JobError::failed("digest delivery failed on every channel")
        );
    }
}
