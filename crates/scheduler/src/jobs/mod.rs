//! Built-in jobs.

pub mod budget_check;
pub mod digest;

pub use budget_check::{BudgetCheckJob, BudgetSnapshot, BudgetSource, BUDGET_ALERTS_TOPIC, BUDGET_CHECK_JOB};
pub use digest::{DigestJob, DigestSource, WorkerActivity, DIGEST_JOB, DIGEST_TOPIC};
