use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::SchedulerError;
use crate::job::{JobDefinition, JobResult, Trigger};
use crate::metrics::SchedulerMetrics;
use crate::state::{JobStateStore, PersistedState};
use crate::status::{JobCompletion, JobStatus, SchedulerStatus};

use super::execution::JobExecutor;

/// Runs registered jobs on their own recurring timers.
///
/// A single owned instance; callers share it behind an `Arc`. Timers only
/// exist between [`initialize`](Scheduler::initialize) and
/// [`stop`](Scheduler::stop), and must be started from inside a Tokio
/// runtime.
pub struct Scheduler {
    pub(super) executor: JobExecutor,
    /// Armed timer task per job name.
    pub(super) timers: Mutex<HashMap<String, JoinHandle<()>>>,
    pub(super) running: AtomicBool,
    /// State loaded from the store at construction, applied on register.
    persisted: PersistedState,
}

impl Scheduler {
    /// Scheduler with in-memory job state only.
    pub fn new() -> Self {
        Self {
            executor: JobExecutor::new(None),
            timers: Mutex::new(HashMap::new()),
            running: AtomicBool::new(false),
            persisted: PersistedState::default(),
        }
    }

    /// Scheduler backed by a state store. A store that fails to load is
    /// logged and treated as empty.
    pub fn with_store(store: Arc<dyn JobStateStore>) -> Self {
        let persisted = store.load().unwrap_or_else(|e| {
            warn!(error = %e, "Failed to load job state, starting fresh");
            PersistedState::default()
        });
        info!(jobs = persisted.jobs.len(), "Loaded persisted job state");
        Self {
            executor: JobExecutor::new(Some(store)),
            timers: Mutex::new(HashMap::new()),
            running: AtomicBool::new(false),
            persisted,
        }
    }

    /// Register a job. Persisted state for the same name overrides the
    /// definition's enabled flag and seeds its last run record.
    pub fn register(&self, mut definition: JobDefinition) -> Result<(), SchedulerError> {
        let name = definition.name.clone();
        let saved = self.persisted.jobs.get(&name);
        if let Some(saved) = saved {
            definition.enabled = saved.enabled;
        }
        let enabled = definition.enabled;
        let interval_ms = definition.interval_ms();

        {
            let mut registry = self.executor.registry.write().unwrap_or_else(PoisonError::into_inner);
            let entry = registry.register(definition)?;
            if let Some(saved) = saved {
                entry.last_run_at = saved.last_run_at;
                entry.last_result = saved.last_result.clone();
            }
        }
        info!(job = %name, interval_ms, enabled, restored = saved.is_some(), "Registered job");

        if enabled {
            self.start_timer(&name);
        }
        Ok(())
    }

    /// Status of one job.
    pub fn get(&self, name: &str) -> Result<JobStatus, SchedulerError> {
        let registry = self.executor.registry.read().unwrap_or_else(PoisonError::into_inner);
        Ok(JobStatus::from_entry(registry.get(name)?, self.is_running()))
    }

    /// Registered job names in registration order.
    pub fn job_names(&self) -> Vec<String> {
        let registry = self.executor.registry.read().unwrap_or_else(PoisonError::into_inner);
        registry.list().map(|d| d.name.clone()).collect()
    }

    /// Snapshot of every job. Holds the registry lock only while copying.
    pub fn get_status(&self) -> SchedulerStatus {
        let running = self.is_running();
        let registry = self.executor.registry.read().unwrap_or_else(PoisonError::into_inner);
        SchedulerStatus {
            running,
            jobs: registry
                .entries()
                .map(|e| (e.definition.name.clone(), JobStatus::from_entry(e, running)))
                .collect(),
        }
    }

    /// Run a job once, outside its cadence, and wait for it.
    ///
    /// Returns whether the handler succeeded. Fails with
    /// [`SchedulerError::AlreadyRunning`] if a run is in flight and
    /// [`SchedulerError::NotFound`] for unknown names.
    pub async fn run_job_now(&self, name: &str) -> Result<bool, SchedulerError> {
        Ok(self.trigger_job(name).await?.success)
    }

    /// Like [`run_job_now`](Scheduler::run_job_now) but returns the full result.
    pub async fn trigger_job(&self, name: &str) -> Result<JobResult, SchedulerError> {
        info!(job = %name, "Manual job run requested");
        let handle = self.executor.launch(name, Trigger::Manual)?;
        Ok(handle
            .await
            .unwrap_or_else(|e| JobResult::failure(format!("job task aborted: {e}"))))
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Get a snapshot of the current scheduler metrics.
    pub fn metrics(&self) -> SchedulerMetrics {
        self.executor
            .metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Receive a [`JobCompletion`] for every finished run.
    pub fn subscribe(&self) -> broadcast::Receiver<JobCompletion> {
        self.executor.completions.subscribe()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        let timers = self.timers.get_mut().unwrap_or_else(PoisonError::into_inner);
        for (_, handle) in timers.drain() {
            handle.abort();
        }
    }
}
