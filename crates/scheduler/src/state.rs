//! Job state reload contract.
//!
//! Without a store the scheduler keeps job state in memory only and resets
//! it on restart. With one, the enabled flag and last run record of every
//! job survive a restart: the scheduler saves after enable/disable and
//! after each run, and applies the persisted values when a job registers.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SchedulerError;
use crate::job::JobResult;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    #[serde(default)]
    pub jobs: BTreeMap<String, PersistedJob>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedJob {
    pub enabled: bool,
    #[serde(default)]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_result: Option<JobResult>,
}

pub trait JobStateStore: Send + Sync {
    fn load(&self) -> Result<PersistedState, SchedulerError>;
    fn save(&self, state: &PersistedState) -> Result<(), SchedulerError>;
}

/// Stores the snapshot as a JSON file, replaced atomically on each save.
#[derive(Debug)]
pub struct JsonFileStateStore {
    path: PathBuf,
}

impl JsonFileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "job-state".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

fn store_err(context: &str, path: &Path, e: impl std::fmt::Display) -> SchedulerError {
    SchedulerError::StateStore(format!("{context} {}: {e}", path.display()))
}

impl JobStateStore for JsonFileStateStore {
    /// A missing file is an empty state.
    fn load(&self) -> Result<PersistedState, SchedulerError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(PersistedState::default())
            }
            Err(e) => return Err(store_err("failed to read", &self.path, e)),
        };
        serde_json::from_str(&raw).map_err(|e| store_err("failed to parse", &self.path, e))
    }

    fn save(&self, state: &PersistedState) -> Result<(), SchedulerError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| store_err("failed to create", parent, e))?;
        }
        let json = serde_json::to_vec_pretty(state)
            .map_err(|e| store_err("failed to serialize", &self.path, e))?;
        let tmp = self.tmp_path();
        std::fs::write(&tmp, json).map_err(|e| store_err("failed to write", &tmp, e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| store_err("failed to replace", &self.path, e))
    }
}

/// In-process store; state lives as long as the store does.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    state: Mutex<PersistedState>,
}

impl MemoryStateStore {
    pub fn new(initial: PersistedState) -> Self {
        Self {
            state: Mutex::new(initial),
        }
    }

    pub fn snapshot(&self) -> PersistedState {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl JobStateStore for MemoryStateStore {
    fn load(&self) -> Result<PersistedState, SchedulerError> {
        Ok(self.snapshot())
    }

    fn save(&self, state: &PersistedState) -> Result<(), SchedulerError> {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PersistedState {
        let mut state = PersistedState::default();
        state.jobs.insert(
            "budget-check".into(),
            PersistedJob {
                enabled: false,
                last_run_at: Some(Utc::now()),
                last_result: Some(JobResult::failure("source offline")),
            },
        );
        state
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStateStore::new(dir.path().join("jobs.json"));
        assert_eq!(store.load().unwrap(), PersistedState::default());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStateStore::new(dir.path().join("nested/jobs.json"));
        let state = sample();
        store.save(&state).unwrap();

        assert_eq!(store.load().unwrap(), state);
        assert!(!store.tmp_path().exists());
    }

    #[test]
    fn file_uses_camel_case_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStateStore::new(dir.path().join("jobs.json"));
        store.save(&sample()).unwrap();

        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert!(raw.contains("\"lastRunAt\""));
        assert!(raw.contains("\"lastResult\""));
    }

    #[test]
    fn corrupt_file_is_state_store_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");
        std::fs::write(&path, "{not json").unwrap();
        let store = JsonFileStateStore::new(&path);
        assert!(matches!(store.load(), Err(SchedulerError::StateStore(_))));
    }

    #[test]
    fn memory_store_keeps_last_save() {
        let store = MemoryStateStore::default();
        store.save(&sample()).unwrap();
        assert!(!store.load().unwrap().jobs["budget-check"].enabled);
    }
}
