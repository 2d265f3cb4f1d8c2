use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Execution counters for one job.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobMetrics {
    pub executions: u64,
    pub failures: u64,
    /// Rolling mean of handler wall time.
    pub avg_duration_ms: f64,
    pub last_run: Option<DateTime<Utc>>,
}

/// Scheduler operational metrics exposed to the admin API.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerMetrics {
    pub jobs: HashMap<String, JobMetrics>,
    pub total_executions: u64,
    pub total_failures: u64,
}

impl SchedulerMetrics {
    /// Record one finished run.
    pub fn record_execution(
        &mut self,
        job_name: &str,
        duration: Duration,
        success: bool,
        started_at: DateTime<Utc>,
    ) {
        let job = self.jobs.entry(job_name.to_string()).or_default();
        job.executions += 1;
        if !success {
            job.failures += 1;
            self.total_failures += 1;
        }
        self.total_executions += 1;
        job.last_run = Some(started_at);

        // Incremental mean: new_avg = prev_avg + (duration - prev_avg) / count
        let cur_ms = duration.as_secs_f64() * 1000.0;
        job.avg_duration_ms = if job.executions == 1 {
            cur_ms
        } else {
            job.avg_duration_ms + (cur_ms - job.avg_duration_ms) / job.executions as f64
        };
    }

    pub fn job(&self, name: &str) -> Option<&JobMetrics> {
        self.jobs.get(name)
    }
}
