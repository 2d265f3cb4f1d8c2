//! Periodic budget threshold check.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use farmkonnect_notify::{Dispatcher, Notification, TemplateRenderer};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::job::{JobContext, JobError, JobHandler, JobOutcome};

pub const BUDGET_CHECK_JOB: &str = "budget-check";
pub const BUDGET_ALERTS_TOPIC: &str = "budget-alerts";

const SUBJECT_TEMPLATE: &str = "Budget alert: {{ category }} at {{ percent | round(0) }}%";
const BODY_TEMPLATE: &str = "Farm {{ farm_id }} has spent {{ spent | round(2) }} of its \
{{ budgeted | round(2) }} {{ category | lower }} budget ({{ percent | round(1) }}%, \
threshold {{ threshold | round(0) }}%).";

/// Spend against one budget line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetSnapshot {
    pub farm_id: String,
    pub category: String,
    pub budgeted: f64,
    pub spent: f64,
}

impl BudgetSnapshot {
    /// Percent of budget spent; `None` for a non-positive budget.
    pub fn percent_used(&self) -> Option<f64> {
        (self.budgeted > 0.0).then(|| self.spent / self.budgeted * 100.0)
    }

    fn key(&self) -> (String, String) {
        (self.farm_id.clone(), self.category.clone())
    }
}

#[async_trait::async_trait]
pub trait BudgetSource: Send + Sync {
    async fn snapshots(&self) -> Result<Vec<BudgetSnapshot>, JobError>;
}

#[derive(Serialize)]
struct AlertContext<'a> {
    farm_id: &'a str,
    category: &'a str,
    budgeted: f64,
    spent: f64,
    percent: f64,
    threshold: f64,
}

/// Raises one `budget-alerts` notification per budget line that crosses
/// the threshold. A line re-arms once it drops back below.
pub struct BudgetCheckJob {
    source: Arc<dyn BudgetSource>,
    dispatcher: Arc<Dispatcher>,
    renderer: TemplateRenderer,
    threshold_pct: f64,
    alerted: Mutex<HashSet<(String, String)>>,
}

impl BudgetCheckJob {
    pub fn new(source: Arc<dyn BudgetSource>, dispatcher: Arc<Dispatcher>, threshold_pct: f64) -> Self {
        Self {
            source,
            dispatcher,
            renderer: TemplateRenderer::new(),
            threshold_pct,
            alerted: Mutex::new(HashSet::new()),
        }
    }

    fn render(&self, line: &BudgetSnapshot, percent: f64) -> Result<Notification, JobError> {
        let ctx = AlertContext {
            farm_id: &line.farm_id,
            category: &line.category,
            budgeted: line.budgeted,
            spent: line.spent,
            percent,
            threshold: self.threshold_pct,
        };
        let subject = self
            .renderer
            .render(SUBJECT_TEMPLATE, &ctx)
            .map_err(|e| JobError::failed(e.to_string()))?;
        let body = self
            .renderer
            .render(BODY_TEMPLATE, &ctx)
            .map_err(|e| JobError::failed(e.to_string()))?;
        Ok(Notification::new(subject, body)
            .with_meta("topic", BUDGET_ALERTS_TOPIC)
            .with_meta("farm_id", line.farm_id.as_str())
            .with_meta("category", line.category.as_str()))
    }

    fn is_alerted(&self, key: &(String, String)) -> bool {
        self.alerted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key)
    }

    /// Forget lines that are no longer reported.
    fn retain_present(&self, lines: &[BudgetSnapshot]) {
        let present: HashSet<(String, String)> = lines.iter().map(BudgetSnapshot::key).collect();
        self.alerted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|key| present.contains(key));
    }

    #[cfg(test)]
    fn alerted_count(&self) -> usize {
        self.alerted.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn set_alerted(&self, key: (String, String), alerted: bool) {
        let mut set = self.alerted.lock().unwrap_or_else(PoisonError::into_inner);
        if alerted {
            set.insert(key);
        } else {
            set.remove(&key);
        }
    }
}

#[async_trait::async_trait]
impl JobHandler for BudgetCheckJob {
    async fn run(&self, ctx: &JobContext) -> Result<JobOutcome, JobError> {
        let lines = self.source.snapshots().await?;
        self.retain_present(&lines);
        let mut raised = 0usize;
        let mut undelivered = 0usize;

        for line in &lines {
            if ctx.is_cancelled() {
                return Err(JobError::Cancelled);
            }
            let Some(percent) = line.percent_used() else {
                debug!(farm_id = %line.farm_id, category = %line.category, "Skipping line without budget");
                continue;
            };
            let key = line.key();
            if percent < self.threshold_pct {
                self.set_alerted(key, false);
                continue;
            }
            if self.is_alerted(&key) {
                continue;
            }

            let notification = self.render(line, percent)?;
            let results = self.dispatcher.dispatch(BUDGET_ALERTS_TOPIC, &notification).await;
            // Only mark delivered lines, so a failed alert is retried next tick.
            if results.is_empty() || results.iter().any(|r| r.success) {
                self.set_alerted(key, true);
                raised += 1;
            } else {
                undelivered += 1;
            }
        }

        if undelivered > 0 {
            return Err(JobError::failed(format!(
                "{undelivered} budget alert(s) failed to deliver, {raised} raised"
            )));
        }
        Ok(JobOutcome::new(format!("{raised} budget alert(s) raised")))
    }
}
