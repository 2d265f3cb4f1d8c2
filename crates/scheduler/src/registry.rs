//! Job registry: definitions plus the mutable run record of each job.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;

use crate::error::SchedulerError;
use crate::job::{JobDefinition, JobResult};

/// A registered job and its run record.
#[derive(Debug)]
pub struct JobEntry {
    pub definition: JobDefinition,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_result: Option<JobResult>,
    /// Next timer tick, set while the job's timer is armed.
    pub next_run_at: Option<DateTime<Utc>>,
    running: Arc<AtomicBool>,
}

impl JobEntry {
    fn new(definition: JobDefinition) -> Self {
        Self {
            definition,
            last_run_at: None,
            last_result: None,
            next_run_at: None,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Claim the job's single execution slot.
    pub(crate) fn try_acquire(&self) -> Option<RunGuard> {
        RunGuard::acquire(&self.running)
    }
}

/// Holds a job's in-flight flag; released on drop, including on panic.
#[derive(Debug)]
pub(crate) struct RunGuard {
    flag: Arc<AtomicBool>,
}

impl RunGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self {
                flag: Arc::clone(flag),
            })
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Job definitions keyed by name, kept in registration order.
#[derive(Debug, Default)]
pub struct JobRegistry {
    entries: IndexMap<String, JobEntry>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, definition: JobDefinition) -> Result<&mut JobEntry, SchedulerError> {
        if self.entries.contains_key(&definition.name) {
            return Err(SchedulerError::DuplicateJob(definition.name));
        }
        if definition.interval.is_zero() {
            return Err(SchedulerError::InvalidInterval(definition.name));
        }
        let name = definition.name.clone();
        let entry = self.entries.entry(name).or_insert(JobEntry::new(definition));
        Ok(entry)
    }

    pub fn get(&self, name: &str) -> Result<&JobEntry, SchedulerError> {
        self.entries
            .get(name)
            .ok_or_else(|| SchedulerError::NotFound(name.to_string()))
    }

    pub fn get_mut(&mut self, name: &str) -> Result<&mut JobEntry, SchedulerError> {
        self.entries
            .get_mut(name)
            .ok_or_else(|| SchedulerError::NotFound(name.to_string()))
    }

    /// All definitions in registration order. Each call starts a fresh pass.
    pub fn list(&self) -> impl Iterator<Item = &JobDefinition> + '_ {
        self.entries.values().map(|e| &e.definition)
    }

    pub fn entries(&self) -> impl Iterator<Item = &JobEntry> + '_ {
        self.entries.values()
    }

    pub fn entries_mut(&mut self) -> impl Iterator<Item = &mut JobEntry> + '_ {
        self.entries.values_mut()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
