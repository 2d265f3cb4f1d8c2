//! Job scheduler runner.
//!
//! Split into focused submodules:
//! - `core`: Scheduler struct, registration, status, manual runs
//! - `lifecycle`: initialize/stop, enable/disable, per-job timers
//! - `execution`: spawning a run, capturing its result, persisting state

mod core;
mod execution;
mod lifecycle;

pub use self::core::Scheduler;
