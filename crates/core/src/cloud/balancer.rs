//! Load balancer trait.

use async_trait::async_trait;

use super::error::CloudError;

/// A load balancer's target-group API.
///
/// Only the orchestrator task calls the mutating operations; health monitors
/// never touch the balancer.
#[async_trait]
pub trait LoadBalancer: Send + Sync {
    /// Returns the name of this load balancer backend.
    fn name(&self) -> &str;

    /// Register instances with a target group.
    async fn register(
        &self,
        target_group: &str,
        instance_ids: &[String],
    ) -> Result<(), CloudError>;

    /// Deregister instances from a target group.
    async fn deregister(
        &self,
        target_group: &str,
        instance_ids: &[String],
    ) -> Result<(), CloudError>;

    /// Instance ids currently registered with a target group.
    async fn registered_targets(&self, target_group: &str) -> Result<Vec<String>, CloudError>;
}
