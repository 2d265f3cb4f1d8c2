//! Background job scheduler.
//!
//! Named jobs run on independent recurring timers. Each job can be toggled
//! or run on demand, and at most one execution of a job is ever in flight.

pub mod error;
pub mod job;
pub mod jobs;
pub mod metrics;
pub mod registry;
pub mod runner;
pub mod state;
pub mod status;

pub use error::SchedulerError;
pub use job::{handler_fn, JobContext, JobDefinition, JobError, JobHandler, JobOutcome, JobResult, Trigger};
pub use metrics::{JobMetrics, SchedulerMetrics};
pub use registry::JobRegistry;
pub use runner::Scheduler;
pub use state::{JobStateStore, JsonFileStateStore, MemoryStateStore, PersistedJob, PersistedState};
pub use status::{JobCompletion, JobStatus, SchedulerStatus};
