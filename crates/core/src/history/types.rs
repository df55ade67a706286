//! Types for the deployment history store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::StatusSnapshot;

/// Immutable record of one deployment run, appended to a deployment's
/// history for audit after the run. Never mutated post-creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploySummary {
    /// Id of the deploy job that produced this summary.
    pub job_id: String,
    /// Deployment that was shipped.
    pub deployment_id: String,
    /// Deployment target (logical server) that was deployed to.
    pub server_id: String,
    /// Bucket the bundle and build artifacts were uploaded to.
    pub bucket: String,
    /// Object-key folder holding this run's artifacts.
    pub artifacts_folder: String,
    /// Final job status, including partial-success notes.
    pub status: StatusSnapshot,
    /// Instances serving traffic at the end of the run.
    pub healthy_instance_count: usize,
    /// Instances whose monitor errored and that were torn down.
    pub failed_instance_count: usize,
    /// Instances that could not be cleanly terminated and need manual
    /// operator cleanup.
    pub unterminated_instance_ids: Vec<String>,
    /// When the run finished.
    pub finished_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_serialization_round_trip() {
        let summary = DeploySummary {
            job_id: "job-1".to_string(),
            deployment_id: "dep-1".to_string(),
            server_id: "srv-1".to_string(),
            bucket: "deploy-bucket".to_string(),
            artifacts_folder: "bundles/proj-1/dep-1/job-1".to_string(),
            status: StatusSnapshot {
                message: "Server setup is complete!".to_string(),
                percent_complete: 100.0,
                error: false,
                completed: true,
                started_at: Utc::now(),
                duration_ms: 1234,
                exception_details: None,
            },
            healthy_instance_count: 3,
            failed_instance_count: 1,
            unterminated_instance_ids: vec!["i-stuck".to_string()],
            finished_at: Utc::now(),
        };

        let json = serde_json::to_string(&summary).unwrap();
        let parsed: DeploySummary = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.job_id, "job-1");
        assert_eq!(parsed.unterminated_instance_ids, vec!["i-stuck"]);
    }
}
