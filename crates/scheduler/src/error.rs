use thiserror::Error;

/// Errors surfaced by the job registry and scheduler control surface.
///
/// Handler failures are not in here: they are captured into the job's
/// `lastResult` and never cross the scheduler boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("job already registered: {0}")]
    DuplicateJob(String),

    #[error("job not found: {0}")]
    NotFound(String),

    #[error("job is already running: {0}")]
    AlreadyRunning(String),

    #[error("invalid interval for job {0}: must be greater than zero")]
    InvalidInterval(String),

    #[error("job state store error: {0}")]
    StateStore(String),
}
