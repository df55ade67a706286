//! Types for the server health monitor.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// State an instance reports about itself in its status artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportState {
    /// The routing server is up and answering.
    Running,
    /// Startup or graph build failed on the instance.
    Failed,
    /// Anything else: still downloading, building, starting.
    #[serde(other)]
    Pending,
}

/// The JSON status artifact an instance writes to its well-known path.
///
/// The nonce binds the report to one deployment run; reports carrying any
/// other nonce are stale artifacts from a previous run on a reused image and
/// are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    /// Nonce generated by the orchestrator for this run.
    pub nonce: String,
    /// Self-reported state.
    pub state: ReportState,
    /// Optional human-readable detail.
    #[serde(default)]
    pub message: Option<String>,
}

/// Terminal outcome of monitoring one instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorOutcome {
    /// The instance reported ready within the deadline.
    Ready,
    /// The instance reported a startup or build failure.
    Failed,
    /// The deadline elapsed without a trusted ready/failed report.
    TimedOut,
}

impl MonitorOutcome {
    /// Whether this outcome means the instance is serving.
    pub fn is_ready(&self) -> bool {
        matches!(self, MonitorOutcome::Ready)
    }

    /// Label used in metrics and log lines.
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorOutcome::Ready => "ready",
            MonitorOutcome::Failed => "failed",
            MonitorOutcome::TimedOut => "timed_out",
        }
    }
}

/// Errors surfaced by status probes.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The instance answered but the artifact could not be parsed.
    #[error("invalid status report: {0}")]
    InvalidReport(String),

    /// The probe itself could not be constructed.
    #[error("probe setup error: {0}")]
    Setup(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_deserialization() {
        let report: StatusReport =
            serde_json::from_str(r#"{"nonce":"abc","state":"running","message":"up"}"#).unwrap();
        assert_eq!(report.state, ReportState::Running);
        assert_eq!(report.message.as_deref(), Some("up"));
    }

    #[test]
    fn test_unknown_state_maps_to_pending() {
        let report: StatusReport =
            serde_json::from_str(r#"{"nonce":"abc","state":"downloading_graph"}"#).unwrap();
        assert_eq!(report.state, ReportState::Pending);
        assert!(report.message.is_none());
    }

    #[test]
    fn test_outcome_labels() {
        assert!(MonitorOutcome::Ready.is_ready());
        assert!(!MonitorOutcome::TimedOut.is_ready());
        assert_eq!(MonitorOutcome::TimedOut.as_str(), "timed_out");
    }
}
