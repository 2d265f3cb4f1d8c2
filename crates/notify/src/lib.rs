//! Notification delivery for scheduled jobs and activity digests.
//!
//! This crate provides:
//! - `Notifier` trait for pluggable notification channels
//! - Webhook and log notifier implementations
//! - Minijinja template rendering for notification messages
//! - Dispatcher that routes notifications to per-topic channels
//! - `InsightGenerator`, the seam for an external text-generation service

pub mod dispatcher;
pub mod insight;
pub mod log;
pub mod templating;
pub mod traits;
pub mod webhook;

pub use dispatcher::Dispatcher;
pub use insight::InsightGenerator;
pub use log::LogNotifier;
pub use templating::TemplateRenderer;
pub use traits::{DispatchResult, Notification, Notifier, NotifyError};
pub use webhook::{WebhookConfig, WebhookNotifier};
