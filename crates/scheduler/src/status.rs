//! Read-only snapshots derived from the live registry.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use uuid::Uuid;

use crate::job::{JobResult, Trigger};
use crate::registry::JobEntry;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub enabled: bool,
    pub running: bool,
    pub interval_ms: u64,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_result: Option<JobResult>,
    pub next_run_estimate: Option<DateTime<Utc>>,
}

impl JobStatus {
    pub(crate) fn from_entry(entry: &JobEntry, scheduler_running: bool) -> Self {
        let enabled = entry.definition.enabled;
        Self {
            enabled,
            running: entry.is_running(),
            interval_ms: entry.definition.interval_ms(),
            last_run_at: entry.last_run_at,
            last_result: entry.last_result.clone(),
            next_run_estimate: if scheduler_running && enabled {
                entry.next_run_at
            } else {
                None
            },
        }
    }
}

/// Job statuses keyed by name, in registration order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    pub running: bool,
    pub jobs: IndexMap<String, JobStatus>,
}

impl SchedulerStatus {
    pub fn job(&self, name: &str) -> Option<&JobStatus> {
        self.jobs.get(name)
    }
}

/// Published on the completion channel after every run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobCompletion {
    pub job_name: String,
    pub run_id: Uuid,
    pub trigger: Trigger,
    pub success: bool,
    pub message: Option<String>,
    pub finished_at: DateTime<Utc>,
}
