//! Types for the fleet provisioner.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cloud::{CloudError, InstanceRecord};

/// Instance types accepted by the provider.
///
/// Validated before launch so a typo fails the deployment before any spend,
/// not after a long graph build.
pub const KNOWN_INSTANCE_TYPES: &[&str] = &[
    "t2.medium",
    "t2.large",
    "t2.xlarge",
    "t3.medium",
    "t3.large",
    "t3.xlarge",
    "t3.2xlarge",
    "m5.large",
    "m5.xlarge",
    "m5.2xlarge",
    "m5.4xlarge",
    "m6i.large",
    "m6i.xlarge",
    "m6i.2xlarge",
    "r5.large",
    "r5.xlarge",
    "r5.2xlarge",
    "r5.4xlarge",
    "c5.xlarge",
    "c5.2xlarge",
    "c5.4xlarge",
];

/// Whether the given instance type string is a member of the provider's
/// known type enumeration.
pub fn is_known_instance_type(instance_type: &str) -> bool {
    KNOWN_INSTANCE_TYPES.contains(&instance_type)
}

/// Default instance type when a deployment target does not specify one.
pub const DEFAULT_INSTANCE_TYPE: &str = "t3.large";

/// Compute configuration of a deployment target.
///
/// Build and run images/types may differ: graph building generally wants a
/// short-lived, high-memory instance while the serving fleet runs smaller
/// long-lived ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputeSpec {
    /// Region override for this target, when it differs from the account
    /// default.
    #[serde(default)]
    pub region: Option<String>,
    /// Machine image used for the graph-building instance.
    pub build_image_id: String,
    /// Machine image for run instances; falls back to the build image.
    #[serde(default)]
    pub run_image_id: Option<String>,
    /// Instance type for the graph-building instance.
    #[serde(default)]
    pub build_instance_type: Option<String>,
    /// Instance type for run instances; falls back to the build type.
    #[serde(default)]
    pub run_instance_type: Option<String>,
    /// Number of run instances to keep serving traffic.
    pub instance_count: usize,
    /// Subnet for instance network interfaces.
    pub subnet_id: String,
    /// Security group for instance network interfaces.
    pub security_group_id: String,
    /// Key pair name for operator access.
    #[serde(default)]
    pub key_name: Option<String>,
    /// Load-balancer target group serving this deployment target.
    pub target_group: String,
    /// Whether to snapshot the graph-build instance into a fresh machine
    /// image after a successful build.
    #[serde(default)]
    pub recreate_build_image: bool,
}

impl ComputeSpec {
    /// Image to boot depending on whether the graph has already been built.
    pub fn image_for(&self, graph_already_built: bool) -> &str {
        if graph_already_built {
            self.run_image_id.as_deref().unwrap_or(&self.build_image_id)
        } else {
            &self.build_image_id
        }
    }

    /// Instance type depending on whether the graph has already been built.
    pub fn instance_type_for(&self, graph_already_built: bool) -> &str {
        let build_type = self
            .build_instance_type
            .as_deref()
            .unwrap_or(DEFAULT_INSTANCE_TYPE);
        if graph_already_built {
            self.run_instance_type.as_deref().unwrap_or(build_type)
        } else {
            build_type
        }
    }

    /// Whether graph building uses a different image or instance type than
    /// serving. When it does, the builder cannot be kept on as a run
    /// instance.
    pub fn has_separate_build_config(&self) -> bool {
        self.image_for(false) != self.image_for(true)
            || self.instance_type_for(false) != self.instance_type_for(true)
    }
}

/// Errors surfaced by the fleet provisioner.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// Pre-launch validation failed; nothing was started.
    #[error("{0}")]
    Validation(String),

    /// The provider rejected or failed the launch.
    #[error("launch failed: {0}")]
    Launch(#[source] CloudError),

    /// Tagging or status polling failed after instances were started. The
    /// instances observed so far are carried so the caller can terminate
    /// them.
    #[error("{message}")]
    PostLaunch {
        message: String,
        observed: Vec<InstanceRecord>,
    },

    /// Public addresses were not assigned within the bounded wait. The
    /// instances observed so far are carried so the caller can terminate
    /// them.
    #[error("timed out waiting for public address assignment after {waited_secs} seconds")]
    AddressTimeout {
        waited_secs: u64,
        observed: Vec<InstanceRecord>,
    },
}

impl ProvisionError {
    /// Instances that were already started when the error occurred; the
    /// caller owns their termination.
    pub fn observed_instances(&self) -> &[InstanceRecord] {
        match self {
            ProvisionError::Validation(_) | ProvisionError::Launch(_) => &[],
            ProvisionError::PostLaunch { observed, .. } => observed,
            ProvisionError::AddressTimeout { observed, .. } => observed,
        }
    }
}
