use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::Utc;
use futures::FutureExt;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::SchedulerError;
use crate::job::{JobContext, JobHandler, JobResult, Trigger};
use crate::metrics::SchedulerMetrics;
use crate::registry::{JobRegistry, RunGuard};
use crate::state::{JobStateStore, PersistedJob, PersistedState};
use crate::status::JobCompletion;

/// Shared handles needed to run a job, cloned into every timer task and
/// every spawned run.
#[derive(Clone)]
pub(crate) struct JobExecutor {
    pub(crate) registry: Arc<RwLock<JobRegistry>>,
    pub(crate) metrics: Arc<RwLock<SchedulerMetrics>>,
    pub(crate) completions: broadcast::Sender<JobCompletion>,
    pub(crate) store: Option<Arc<dyn JobStateStore>>,
    /// Serializes snapshot + save so an older snapshot never lands last.
    pub(crate) persist_lock: Arc<Mutex<()>>,
    /// Token handed to handlers; replaced with a fresh one on every stop.
    pub(crate) cancellation: Arc<Mutex<CancellationToken>>,
}

impl JobExecutor {
    pub(crate) fn new(store: Option<Arc<dyn JobStateStore>>) -> Self {
        let (completions, _) = broadcast::channel(64);
        Self {
            registry: Arc::new(RwLock::new(JobRegistry::new())),
            metrics: Arc::new(RwLock::new(SchedulerMetrics::default())),
            completions,
            store,
            persist_lock: Arc::new(Mutex::new(())),
            cancellation: Arc::new(Mutex::new(CancellationToken::new())),
        }
    }

    pub(crate) fn current_token(&self) -> CancellationToken {
        self.cancellation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn is_enabled(&self, name: &str) -> bool {
        let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
        registry.get(name).is_ok_and(|e| e.definition.enabled)
    }

    /// Claim the job's run slot and spawn one execution.
    ///
    /// Fails with [`SchedulerError::AlreadyRunning`] instead of queuing when
    /// a run is in flight.
    pub(crate) fn launch(
        &self,
        name: &str,
        trigger: Trigger,
    ) -> Result<JoinHandle<JobResult>, SchedulerError> {
        let (handler, guard) = {
            let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
            let entry = registry.get(name)?;
            let guard = entry
                .try_acquire()
                .ok_or_else(|| SchedulerError::AlreadyRunning(name.to_string()))?;
            (Arc::clone(&entry.definition.handler), guard)
        };

        let ctx = JobContext::new(name, trigger, self.current_token());
        let executor = self.clone();
        Ok(tokio::spawn(async move { executor.execute(handler, ctx, guard).await }))
    }

    async fn execute(&self, handler: Arc<dyn JobHandler>, ctx: JobContext, guard: RunGuard) -> JobResult {
        debug!(job = %ctx.job_name, run_id = %ctx.run_id, trigger = %ctx.trigger, "Job started");
        let start = Instant::now();

        let result = match AssertUnwindSafe(handler.run(&ctx)).catch_unwind().await {
            Ok(Ok(outcome)) => JobResult::success(outcome.message),
            Ok(Err(e)) => {
                warn!(job = %ctx.job_name, run_id = %ctx.run_id, error = %e, "Job failed");
                JobResult::failure(e.to_string())
            }
            Err(_) => {
                warn!(job = %ctx.job_name, run_id = %ctx.run_id, "Job handler panicked");
                JobResult::failure("handler panicked")
            }
        };
        let duration = start.elapsed();

        {
            let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
            if let Ok(entry) = registry.get_mut(&ctx.job_name) {
                entry.last_run_at = Some(ctx.started_at);
                entry.last_result = Some(result.clone());
            }
        }
        self.metrics
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .record_execution(&ctx.job_name, duration, result.success, ctx.started_at);
        self.persist();
        drop(guard);

        info!(
            job = %ctx.job_name,
            run_id = %ctx.run_id,
            trigger = %ctx.trigger,
            success = result.success,
            duration_ms = duration.as_millis() as u64,
            "Job finished"
        );

        // No subscribers is fine.
        let _ = self.completions.send(JobCompletion {
            job_name: ctx.job_name,
            run_id: ctx.run_id,
            trigger: ctx.trigger,
            success: result.success,
            message: result.message.clone(),
            finished_at: Utc::now(),
        });

        result
    }

    pub(crate) fn snapshot(&self) -> PersistedState {
        let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
        PersistedState {
            jobs: registry
                .entries()
                .map(|e| {
                    (
                        e.definition.name.clone(),
                        PersistedJob {
                            enabled: e.definition.enabled,
                            last_run_at: e.last_run_at,
                            last_result: e.last_result.clone(),
                        },
                    )
                })
                .collect(),
        }
    }

    /// Save the current snapshot. Failures are logged, never returned.
    pub(crate) fn persist(&self) {
        let Some(store) = &self.store else {
            return;
        };
        let _lock = self.persist_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = store.save(&self.snapshot()) {
            warn!(error = %e, "Failed to persist job state");
        }
    }
}
