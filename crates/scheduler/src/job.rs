//! Job definitions, handlers, and the per-run execution context.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Failure reported by a job handler.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobError {
    #[error("{0}")]
    Failed(String),
    #[error("cancelled")]
    Cancelled,
}

impl JobError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

/// What started a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    Scheduled,
    Manual,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Scheduled => f.write_str("scheduled"),
            Trigger::Manual => f.write_str("manual"),
        }
    }
}

/// Handed to every handler invocation.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_name: String,
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub trigger: Trigger,
    /// Cancelled when the scheduler stops. Handlers may poll it between
    /// units of work; the scheduler never interrupts a run on its own.
    pub cancellation: CancellationToken,
}

impl JobContext {
    pub fn new(job_name: impl Into<String>, trigger: Trigger, cancellation: CancellationToken) -> Self {
        Self {
            job_name: job_name.into(),
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            trigger,
            cancellation,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// Successful handler outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobOutcome {
    pub message: Option<String>,
}

impl JobOutcome {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}

/// The unit of work a job runs on every tick.
///
/// Handlers should be idempotent: a run may be repeated by a manual
/// trigger right after a scheduled one.
#[async_trait::async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, ctx: &JobContext) -> Result<JobOutcome, JobError>;
}

pub type BoxedJobFuture = Pin<Box<dyn Future<Output = Result<JobOutcome, JobError>> + Send>>;

struct FnHandler {
    f: Box<dyn Fn(JobContext) -> BoxedJobFuture + Send + Sync>,
}

#[async_trait::async_trait]
impl JobHandler for FnHandler {
    async fn run(&self, ctx: &JobContext) -> Result<JobOutcome, JobError> {
        (self.f)(ctx.clone()).await
    }
}

/// Wrap an async closure as a [`JobHandler`].
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn JobHandler>
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<JobOutcome, JobError>> + Send + 'static,
{
    Arc::new(FnHandler {
        f: Box::new(move |ctx| Box::pin(f(ctx))),
    })
}

/// Recorded outcome of the most recent run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    pub success: bool,
    pub message: Option<String>,
}

impl JobResult {
    pub fn success(message: Option<String>) -> Self {
        Self {
            success: true,
            message,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
        }
    }
}

/// A named, independently toggleable recurring job.
#[derive(Clone)]
pub struct JobDefinition {
    pub name: String,
    pub interval: Duration,
    pub enabled: bool,
    pub handler: Arc<dyn JobHandler>,
}

impl JobDefinition {
    /// New enabled job.
    pub fn new(name: impl Into<String>, interval: Duration, handler: Arc<dyn JobHandler>) -> Self {
        Self {
            name: name.into(),
            interval,
            enabled: true,
            handler,
        }
    }

    pub fn from_millis(name: impl Into<String>, interval_ms: u64, handler: Arc<dyn JobHandler>) -> Self {
        Self::new(name, Duration::from_millis(interval_ms), handler)
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval.as_millis() as u64
    }
}

impl fmt::Debug for JobDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobDefinition")
            .field("name", &self.name)
            .field("interval", &self.interval)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}
