//! Types shared by the cloud API seams.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a compute instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    Pending,
    Running,
    Terminating,
    Terminated,
}

impl InstanceState {
    /// Whether the instance is on its way out or already gone.
    pub fn is_terminating(&self) -> bool {
        matches!(self, InstanceState::Terminating | InstanceState::Terminated)
    }
}

/// A compute instance as reported by the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceRecord {
    /// Provider-assigned instance id.
    pub id: String,
    /// Public address, assigned asynchronously some time after launch.
    pub public_ip: Option<String>,
    /// Current lifecycle state.
    pub state: InstanceState,
    /// Tags attached at launch (deployment id, job id, role, ...).
    pub tags: HashMap<String, String>,
    /// When the instance was launched.
    pub launched_at: DateTime<Utc>,
}

/// State transition reported by a terminate call, used to verify that every
/// instance actually went away.
#[derive(Debug, Clone)]
pub struct InstanceStateChange {
    /// Instance id.
    pub id: String,
    /// State the instance moved to.
    pub state: InstanceState,
}

/// Request to launch a batch of identical instances.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    /// Machine image to boot from.
    pub image_id: String,
    /// Provider instance type string.
    pub instance_type: String,
    /// Number of instances to start.
    pub count: usize,
    /// Subnet to attach the network interface to.
    pub subnet_id: String,
    /// Security group for the network interface.
    pub security_group_id: String,
    /// Key pair name for operator access.
    pub key_name: Option<String>,
    /// Startup script executed by the instance on first boot.
    pub user_data: String,
}

/// Well-known tag keys attached to launched instances.
pub mod tag_keys {
    pub const NAME: &str = "Name";
    pub const PROJECT_ID: &str = "projectId";
    pub const DEPLOYMENT_ID: &str = "deploymentId";
    pub const JOB_ID: &str = "jobId";
    pub const SERVER_ID: &str = "serverId";
    pub const ROUTER_ID: &str = "routerId";
    pub const USER: &str = "user";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_state_terminating() {
        assert!(InstanceState::Terminating.is_terminating());
        assert!(InstanceState::Terminated.is_terminating());
        assert!(!InstanceState::Running.is_terminating());
        assert!(!InstanceState::Pending.is_terminating());
    }

    #[test]
    fn test_instance_record_serialization() {
        let record = InstanceRecord {
            id: "i-abc123".to_string(),
            public_ip: Some("203.0.113.10".to_string()),
            state: InstanceState::Running,
            tags: HashMap::new(),
            launched_at: Utc::now(),
        };

        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"state\":\"running\""));
        let parsed: InstanceRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.id, "i-abc123");
    }
}
