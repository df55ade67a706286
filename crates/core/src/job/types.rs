//! Types for the job framework.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::status::StatusSnapshot;

/// Errors surfaced by job construction and execution.
#[derive(Debug, Error)]
pub enum JobError {
    /// Every job must be attributable to an owner.
    #[error("job must be registered with a non-empty owner")]
    MissingOwner,

    /// Job logic failed with the given message.
    #[error("{0}")]
    Failed(String),
}

impl JobError {
    /// Convenience constructor for logic failures.
    pub fn failed(message: impl Into<String>) -> Self {
        JobError::Failed(message.into())
    }
}

/// Kind tag for a job, serialized in status payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Full fleet deployment.
    Deploy,
    /// Health monitoring of a single launched instance.
    MonitorServer,
    /// Background recreation of the graph-build machine image.
    RecreateImage,
    /// Internal maintenance work not triggered by a user.
    System,
}

impl JobType {
    /// Short name used in log lines and cancellation messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Deploy => "deploy",
            JobType::MonitorServer => "monitor_server",
            JobType::RecreateImage => "recreate_image",
            JobType::System => "system",
        }
    }
}

/// The identity a job is attributed to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOwner {
    /// Opaque user id.
    pub user_id: String,
    /// Email, used in instance tags and notifications.
    pub email: String,
}

impl JobOwner {
    /// Create an owner identity.
    pub fn new(user_id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            email: email.into(),
        }
    }

    /// Owner used for jobs the system starts on its own behalf.
    pub fn system() -> Self {
        Self::new("system", "system")
    }
}

/// Reference to the job that enqueued this one as a sub-job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParentRef {
    /// Parent job id.
    pub job_id: String,
    /// Parent job type.
    pub job_type: JobType,
}

/// Snapshot of a job's identity and status, returned to pollers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInfo {
    /// Unique job id.
    pub id: String,
    /// Job type tag.
    pub job_type: JobType,
    /// Display name.
    pub name: String,
    /// Owning user id.
    pub owner: String,
    /// Parent job id, when this job was enqueued as a sub-job.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_job_id: Option<String>,
    /// Current status.
    pub status: StatusSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_type_serialization() {
        let json = serde_json::to_string(&JobType::MonitorServer).unwrap();
        assert_eq!(json, "\"monitor_server\"");
    }

    #[test]
    fn test_job_error_display() {
        let err = JobError::failed("graph build failed");
        assert_eq!(err.to_string(), "graph build failed");
        assert_eq!(
            JobError::MissingOwner.to_string(),
            "job must be registered with a non-empty owner"
        );
    }
}
