use std::sync::atomic::Ordering;
use std::sync::PoisonError;
use std::time::Duration;

use chrono::Utc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::SchedulerError;
use crate::job::Trigger;

use super::execution::JobExecutor;
use super::Scheduler;

impl Scheduler {
    /// Arm a timer for every enabled job. Calling it again while running
    /// is a no-op.
    pub fn initialize(&self) {
        if self.running.swap(true, Ordering::AcqRel) {
            debug!("Scheduler already running");
            return;
        }

        let enabled: Vec<String> = {
            let registry = self.executor.registry.read().unwrap_or_else(PoisonError::into_inner);
            registry
                .list()
                .filter(|d| d.enabled)
                .map(|d| d.name.clone())
                .collect()
        };
        for name in &enabled {
            self.start_timer(name);
        }
        info!(timers = enabled.len(), "Scheduler started");
    }

    /// Cancel every timer. In-flight runs finish on their own; their
    /// context token is cancelled so long handlers can bail out early.
    pub fn stop(&self) {
        let stopped = {
            // Flipped under the timers lock so no timer can be armed after the drain.
            let mut timers = self.timers.lock().unwrap_or_else(PoisonError::into_inner);
            if !self.running.swap(false, Ordering::AcqRel) {
                return;
            }
            let count = timers.len();
            for (_, handle) in timers.drain() {
                handle.abort();
            }
            count
        };

        let old = {
            let mut token = self.executor.cancellation.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *token, CancellationToken::new())
        };
        old.cancel();

        let mut registry = self.executor.registry.write().unwrap_or_else(PoisonError::into_inner);
        for entry in registry.entries_mut() {
            entry.next_run_at = None;
        }
        info!(timers = stopped, "Scheduler stopped");
    }

    /// Enable a job, arming its timer if the scheduler is running.
    /// Returns false for unknown names.
    pub fn enable_job(&self, name: &str) -> bool {
        if !self.set_enabled(name, true) {
            return false;
        }
        self.start_timer(name);
        self.executor.persist();
        info!(job = %name, "Job enabled");
        true
    }

    /// Disable a job and cancel its timer. A run already in flight
    /// completes. Returns false for unknown names.
    pub fn disable_job(&self, name: &str) -> bool {
        if !self.set_enabled(name, false) {
            return false;
        }
        self.cancel_timer(name);
        self.executor.persist();
        info!(job = %name, "Job disabled");
        true
    }

    fn set_enabled(&self, name: &str, enabled: bool) -> bool {
        let mut registry = self.executor.registry.write().unwrap_or_else(PoisonError::into_inner);
        match registry.get_mut(name) {
            Ok(entry) => {
                entry.definition.enabled = enabled;
                if !enabled {
                    entry.next_run_at = None;
                }
                true
            }
            Err(_) => false,
        }
    }

    /// Arm a job's timer. A no-op while the scheduler is stopped.
    pub(super) fn start_timer(&self, name: &str) {
        let interval = {
            let registry = self.executor.registry.read().unwrap_or_else(PoisonError::into_inner);
            match registry.get(name) {
                Ok(entry) => entry.definition.interval,
                Err(_) => return,
            }
        };

        let mut timers = self.timers.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.is_running() {
            return;
        }
        if timers.get(name).is_some_and(|h| !h.is_finished()) {
            return;
        }
        let executor = self.executor.clone();
        let job = name.to_string();
        timers.insert(
            name.to_string(),
            tokio::spawn(async move { run_timer(executor, job, interval).await }),
        );
        debug!(job = %name, interval_ms = interval.as_millis() as u64, "Timer armed");
    }

    pub(super) fn cancel_timer(&self, name: &str) {
        let handle = self
            .timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
        if let Some(handle) = handle {
            handle.abort();
            debug!(job = %name, "Timer cancelled");
        }
    }
}

fn set_next_run(executor: &JobExecutor, name: &str, period: Duration) {
    let next = chrono::Duration::from_std(period)
        .ok()
        .and_then(|d| Utc::now().checked_add_signed(d));
    let mut registry = executor.registry.write().unwrap_or_else(PoisonError::into_inner);
    if let Ok(entry) = registry.get_mut(name) {
        entry.next_run_at = next;
    }
}

/// Fires the job every `period`, first tick one period after arming.
/// A tick that finds the previous run still going is skipped.
async fn run_timer(executor: JobExecutor, name: String, period: Duration) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    set_next_run(&executor, &name, period);

    loop {
        ticker.tick().await;
        set_next_run(&executor, &name, period);
        if !executor.is_enabled(&name) {
            continue;
        }

        match executor.launch(&name, Trigger::Scheduled) {
            Ok(_) => {}
            Err(SchedulerError::AlreadyRunning(_)) => {
                debug!(job = %name, "Previous run still in flight, skipping tick");
            }
            Err(e) => {
                warn!(job = %name, error = %e, "Timer stopping");
                break;
            }
        }
    }
}
