//! Server health monitor implementation.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::cloud::InstanceRecord;
use crate::job::Status;

use super::probe::StatusProbe;
use super::types::{MonitorOutcome, ReportState};

/// Watches one launched instance until it reports ready, reports failure or
/// the deadline elapses.
///
/// One monitor per instance; monitors for a batch run concurrently and only
/// read shared resources. A monitor never terminates its instance; the
/// orchestrator inspects all outcomes after the join point and owns cleanup.
pub struct ServerMonitor {
    probe: Arc<dyn StatusProbe>,
    instance: InstanceRecord,
    nonce: String,
    poll_interval: Duration,
    timeout: Duration,
    status: Status,
}

impl ServerMonitor {
    /// Create a monitor bound to this deployment run's nonce.
    pub fn new(
        probe: Arc<dyn StatusProbe>,
        instance: InstanceRecord,
        nonce: impl Into<String>,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            probe,
            instance,
            nonce: nonce.into(),
            poll_interval,
            timeout,
            status: Status::new(),
        }
    }

    /// Id of the monitored instance.
    pub fn instance_id(&self) -> &str {
        &self.instance.id
    }

    /// The monitored instance record.
    pub fn instance(&self) -> &InstanceRecord {
        &self.instance
    }

    /// Handle to this monitor's status record.
    pub fn status(&self) -> Status {
        self.status.clone()
    }

    /// Poll the instance's status artifact to a terminal outcome.
    pub async fn watch(&self) -> MonitorOutcome {
        let Some(address) = self.instance.public_ip.clone() else {
            self.status
                .fail(format!(
                    "Instance {} has no public address to monitor",
                    self.instance.id
                ))
                .await;
            self.status.mark_completed().await;
            return MonitorOutcome::Failed;
        };

        self.status
            .update(
                format!("Waiting for instance {} to report in", self.instance.id),
                5.0,
            )
            .await;
        let deadline = tokio::time::Instant::now() + self.timeout;

        loop {
            match self.probe.fetch(&address).await {
                Ok(Some(report)) => {
                    if report.nonce != self.nonce {
                        // Stale artifact from a previous run on a reused
                        // image; never trust it.
                        debug!(
                            "Ignoring status report with foreign nonce from instance {}",
                            self.instance.id
                        );
                    } else {
                        match report.state {
                            ReportState::Running => {
                                info!("Instance {} reported ready", self.instance.id);
                                self.status
                                    .complete(format!(
                                        "Instance {} is ready",
                                        self.instance.id
                                    ))
                                    .await;
                                return MonitorOutcome::Ready;
                            }
                            ReportState::Failed => {
                                let detail = report
                                    .message
                                    .unwrap_or_else(|| "no detail reported".to_string());
                                self.status
                                    .fail(format!(
                                        "Instance {} reported failure: {}",
                                        self.instance.id, detail
                                    ))
                                    .await;
                                self.status.mark_completed().await;
                                return MonitorOutcome::Failed;
                            }
                            ReportState::Pending => {
                                if let Some(message) = report.message {
                                    self.status.set_message(message).await;
                                }
                            }
                        }
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        "Could not read status report from instance {}: {}",
                        self.instance.id, e
                    );
                }
            }

            if tokio::time::Instant::now() >= deadline {
                self.status
                    .fail(format!(
                        "Instance {} did not report a trusted status within {} seconds",
                        self.instance.id,
                        self.timeout.as_secs()
                    ))
                    .await;
                self.status.mark_completed().await;
                return MonitorOutcome::TimedOut;
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockStatusProbe;
    use chrono::Utc;
    use std::collections::HashMap;

    fn instance(ip: Option<&str>) -> InstanceRecord {
        InstanceRecord {
            id: "i-monitor".to_string(),
            public_ip: ip.map(str::to_string),
            state: crate::cloud::InstanceState::Running,
            tags: HashMap::new(),
            launched_at: Utc::now(),
        }
    }

    fn monitor(probe: Arc<MockStatusProbe>, timeout_ms: u64) -> ServerMonitor {
        ServerMonitor::new(
            probe,
            instance(Some("203.0.113.10")),
            "nonce-1",
            Duration::from_millis(5),
            Duration::from_millis(timeout_ms),
        )
    }

    #[tokio::test]
    async fn test_ready_after_pending_polls() {
        let probe = Arc::new(MockStatusProbe::new());
        probe
            .script("203.0.113.10", "nonce-1", &["pending", "pending", "running"])
            .await;

        let monitor = monitor(Arc::clone(&probe), 1_000);
        let outcome = monitor.watch().await;

        assert_eq!(outcome, MonitorOutcome::Ready);
        let snapshot = monitor.status().snapshot().await;
        assert!(snapshot.completed);
        assert!(!snapshot.error);
    }

    #[tokio::test]
    async fn test_reported_failure() {
        let probe = Arc::new(MockStatusProbe::new());
        probe
            .script("203.0.113.10", "nonce-1", &["failed"])
            .await;

        let monitor = monitor(Arc::clone(&probe), 1_000);
        let outcome = monitor.watch().await;

        assert_eq!(outcome, MonitorOutcome::Failed);
        let snapshot = monitor.status().snapshot().await;
        assert!(snapshot.error);
        assert!(snapshot.completed);
    }

    #[tokio::test]
    async fn test_foreign_nonce_is_ignored_until_timeout() {
        let probe = Arc::new(MockStatusProbe::new());
        probe
            .script("203.0.113.10", "stale-nonce", &["running"])
            .await;

        let monitor = monitor(Arc::clone(&probe), 50);
        let outcome = monitor.watch().await;

        // A ready report with the wrong nonce must never be trusted.
        assert_eq!(outcome, MonitorOutcome::TimedOut);
        assert!(monitor.status().has_error().await);
    }

    #[tokio::test]
    async fn test_no_report_times_out() {
        let probe = Arc::new(MockStatusProbe::new());
        let monitor = monitor(Arc::clone(&probe), 30);
        let outcome = monitor.watch().await;

        assert_eq!(outcome, MonitorOutcome::TimedOut);
    }

    #[tokio::test]
    async fn test_missing_address_fails_immediately() {
        let probe = Arc::new(MockStatusProbe::new());
        let monitor = ServerMonitor::new(
            probe,
            instance(None),
            "nonce-1",
            Duration::from_millis(5),
            Duration::from_millis(100),
        );

        let outcome = monitor.watch().await;
        assert_eq!(outcome, MonitorOutcome::Failed);
    }
}
