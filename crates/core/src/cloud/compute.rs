//! Compute provider trait.

use async_trait::async_trait;

use super::error::CloudError;
use super::types::{InstanceRecord, InstanceStateChange, LaunchRequest};

/// A cloud compute API.
///
/// The deployment pipeline treats the provider as an external collaborator;
/// everything it needs is expressed here so the orchestrator can be exercised
/// end to end against the mock in `testing`.
#[async_trait]
pub trait ComputeClient: Send + Sync {
    /// Returns the name of this compute backend.
    fn name(&self) -> &str;

    /// Whether the given machine image exists and is reachable with the
    /// configured credentials.
    async fn image_exists(&self, image_id: &str) -> Result<bool, CloudError>;

    /// Launch a batch of instances. Returns the records as reported at
    /// launch time; public addresses are typically still unassigned.
    async fn launch_instances(
        &self,
        request: LaunchRequest,
    ) -> Result<Vec<InstanceRecord>, CloudError>;

    /// Current state of the given instances.
    async fn describe_instances(
        &self,
        instance_ids: &[String],
    ) -> Result<Vec<InstanceRecord>, CloudError>;

    /// Block until the provider reports every instance's status checks as
    /// passing.
    async fn wait_for_status_ok(&self, instance_ids: &[String]) -> Result<(), CloudError>;

    /// Attach tags to the given instances.
    async fn create_tags(
        &self,
        instance_ids: &[String],
        tags: &[(String, String)],
    ) -> Result<(), CloudError>;

    /// Terminate the given instances, returning the state change the
    /// provider reported for each one.
    async fn terminate_instances(
        &self,
        instance_ids: &[String],
    ) -> Result<Vec<InstanceStateChange>, CloudError>;

    /// Snapshot an instance into a new machine image and return its id.
    async fn create_image(
        &self,
        instance_id: &str,
        image_name: &str,
    ) -> Result<String, CloudError>;

    /// All non-terminated instances carrying the given tag, used to find the
    /// previous fleet for a deployment target.
    async fn instances_by_tag(
        &self,
        key: &str,
        value: &str,
    ) -> Result<Vec<InstanceRecord>, CloudError>;
}
