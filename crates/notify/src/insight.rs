//! Seam for an external text-generation service.
//!
//! The digest job asks an [`InsightGenerator`] for a short headline that
//! summarizes the day's activity. No implementation ships with the crate;
//! deployments plug one in and the job falls back to a plain summary when
//! none is configured or generation fails.

use crate::traits::NotifyError;

#[async_trait::async_trait]
pub trait InsightGenerator: Send + Sync {
    /// Produce text for `prompt`. Failures should use [`NotifyError::Insight`].
    async fn generate(&self, prompt: &str) -> Result<String, NotifyError>;
}
