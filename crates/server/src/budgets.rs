//! Budget lines read from a JSON file for the budget check.

use std::io::ErrorKind;
use std::path::PathBuf;

use farmkonnect_scheduler::jobs::{BudgetSnapshot, BudgetSource};
use farmkonnect_scheduler::JobError;
use tracing::debug;

/// Reads a JSON array of budget lines on every run, so edits to the file
/// are picked up without a restart. No path, or a missing file, means no
/// budget lines.
pub struct JsonBudgetSource {
    path: Option<PathBuf>,
}

impl JsonBudgetSource {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }
}

#[async_trait::async_trait]
impl BudgetSource for JsonBudgetSource {
    async fn snapshots(&self) -> Result<Vec<BudgetSnapshot>, JobError> {
        let Some(path) = &self.path else {
            return Ok(Vec::new());
        };
        let text = match tokio::fs::read_to_string(path).await {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "Budgets file not found");
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(JobError::failed(format!(
                    "failed to read {}: {e}",
                    path.display()
                )))
            }
        };
        serde_json::from_str(&text)
            .map_err(|e| JobError::failed(format!("invalid budgets file {}: {e}", path.display())))
    }
}
