//! Deployment history storage trait.

use thiserror::Error;

use super::types::DeploySummary;

/// Error type for history operations.
#[derive(Debug, Error)]
pub enum HistoryError {
    /// Database error.
    #[error("Database error: {0}")]
    Database(String),

    /// A stored summary could not be decoded.
    #[error("Corrupt summary record: {0}")]
    Corrupt(String),
}

/// Trait for deployment history backends.
///
/// Summaries are append-only; there is deliberately no update operation.
pub trait DeployHistoryStore: Send + Sync {
    /// Append a summary to a deployment's history.
    fn append(&self, summary: &DeploySummary) -> Result<(), HistoryError>;

    /// Summaries for a deployment, most recent first.
    fn for_deployment(
        &self,
        deployment_id: &str,
        limit: usize,
    ) -> Result<Vec<DeploySummary>, HistoryError>;

    /// Most recent summary for a deployment.
    fn latest(&self, deployment_id: &str) -> Result<Option<DeploySummary>, HistoryError>;
}
