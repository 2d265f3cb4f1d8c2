//! Running per-worker activity totals, fed by aggregator batches and read
//! by the digest job and `GET /realtime/activity`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use farmkonnect_realtime::UpdateBatch;
use farmkonnect_scheduler::jobs::{DigestSource, WorkerActivity};
use farmkonnect_scheduler::JobError;
use tracing::debug;

#[derive(Default)]
pub struct ActivityLedger {
    totals: RwLock<BTreeMap<String, WorkerActivity>>,
    batches: AtomicU64,
}

impl ActivityLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one batch into the per-subject totals.
    pub fn apply(&self, batch: &UpdateBatch) {
        let mut totals = self.totals.write().unwrap_or_else(PoisonError::into_inner);
        for update in &batch.updates {
            let entry = totals
                .entry(update.subject_id.clone())
                .or_insert_with(|| WorkerActivity {
                    subject_id: update.subject_id.clone(),
                    total_hours: 0.0,
                    total_entries: 0,
                    last_active: None,
                });
            entry.total_hours += update.total_hours;
            entry.total_entries += update.total_entries;
            entry.last_active = match entry.last_active {
                Some(seen) if seen >= update.last_active => Some(seen),
                _ => Some(update.last_active),
            };
        }
        self.batches.fetch_add(1, Ordering::Relaxed);
        debug!(
            window_id = batch.window_id,
            updates = batch.len(),
            subjects = totals.len(),
            "Applied performance batch"
        );
    }

    /// Totals ordered by subject id.
    pub fn snapshot(&self) -> Vec<WorkerActivity> {
        self.totals
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn batches_applied(&self) -> u64 {
        self.batches.load(Ordering::Relaxed)
    }
}

#[async_trait::async_trait]
impl DigestSource for ActivityLedger {
    async fn activity(&self) -> Result<Vec<WorkerActivity>, JobError> {
        Ok(self.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use farmkonnect_realtime::PerformanceUpdate;

    fn update(subject: &str, minutes: f64, hour: u32) -> PerformanceUpdate {
        PerformanceUpdate {
            subject_id: subject.into(),
            total_hours: minutes / 60.0,
            total_entries: 1,
            avg_duration: minutes,
            last_active: Utc.with_ymd_and_hms(2026, 5, 2, hour, 0, 0).unwrap(),
        }
    }

    fn batch(window_id: u64, updates: Vec<PerformanceUpdate>) -> UpdateBatch {
        UpdateBatch {
            window_id,
            updates,
            flushed_at: Utc::now(),
        }
    }

    #[test]
    fn accumulates_per_subject() {
        let ledger = ActivityLedger::new();
        ledger.apply(&batch(1, vec![update("w-2", 30.0, 9), update("w-1", 90.0, 10)]));
        ledger.apply(&batch(2, vec![update("w-2", 60.0, 8)]));

        let totals = ledger.snapshot();
        assert_eq!(totals.len(), 2);
        assert_eq!(totals[0].subject_id, "w-1");
        assert_eq!(totals[0].total_hours, 1.5);

        let w2 = &totals[1];
        assert_eq!(w2.total_hours, 1.5);
        assert_eq!(w2.total_entries, 2);
        // Out-of-order updates never move last_active backwards.
        assert_eq!(w2.last_active, Some(Utc.with_ymd_and_hms(2026, 5, 2, 9, 0, 0).unwrap()));
        assert_eq!(ledger.batches_applied(), 2);
    }

    #[tokio::test]
    async fn serves_as_digest_source() {
        let ledger = ActivityLedger::new();
        assert!(ledger.activity().await.unwrap().is_empty());

        ledger.apply(&batch(1, vec![update("7", 45.0, 12)]));
        let activity = ledger.activity().await.unwrap();
        assert_eq!(activity[0].subject_id, "7");
        assert_eq!(activity[0].total_hours, 0.75);
    }
}
