//! Mock load balancer for testing.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::cloud::{CloudError, LoadBalancer};

/// A recorded target-group mutation, with the resulting target count so
/// tests can assert the group never went empty mid-swap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BalancerEvent {
    Register {
        target_group: String,
        instance_ids: Vec<String>,
        resulting_count: usize,
    },
    Deregister {
        target_group: String,
        instance_ids: Vec<String>,
        resulting_count: usize,
    },
}

/// Mock implementation of the LoadBalancer trait.
pub struct MockLoadBalancer {
    targets: Arc<RwLock<HashMap<String, Vec<String>>>>,
    events: Arc<RwLock<Vec<BalancerEvent>>>,
    next_register_error: Arc<RwLock<Option<CloudError>>>,
    next_deregister_error: Arc<RwLock<Option<CloudError>>>,
}

impl Default for MockLoadBalancer {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLoadBalancer {
    /// Create a new mock load balancer.
    pub fn new() -> Self {
        Self {
            targets: Arc::new(RwLock::new(HashMap::new())),
            events: Arc::new(RwLock::new(Vec::new())),
            next_register_error: Arc::new(RwLock::new(None)),
            next_deregister_error: Arc::new(RwLock::new(None)),
        }
    }

    /// Pre-register targets, e.g. the previous fleet.
    pub async fn seed_targets(&self, target_group: &str, instance_ids: &[&str]) {
        self.targets.write().await.insert(
            target_group.to_string(),
            instance_ids.iter().map(|s| s.to_string()).collect(),
        );
    }

    /// Fail the next register call.
    pub async fn set_next_register_error(&self, error: CloudError) {
        *self.next_register_error.write().await = Some(error);
    }

    /// Fail the next deregister call.
    pub async fn set_next_deregister_error(&self, error: CloudError) {
        *self.next_deregister_error.write().await = Some(error);
    }

    /// All recorded mutations, in order.
    pub async fn recorded_events(&self) -> Vec<BalancerEvent> {
        self.events.read().await.clone()
    }
}

#[async_trait]
impl LoadBalancer for MockLoadBalancer {
    fn name(&self) -> &str {
        "mock"
    }

    async fn register(
        &self,
        target_group: &str,
        instance_ids: &[String],
    ) -> Result<(), CloudError> {
        if let Some(error) = self.next_register_error.write().await.take() {
            return Err(error);
        }
        let mut targets = self.targets.write().await;
        let group = targets.entry(target_group.to_string()).or_default();
        for id in instance_ids {
            if !group.contains(id) {
                group.push(id.clone());
            }
        }
        let resulting_count = group.len();
        self.events.write().await.push(BalancerEvent::Register {
            target_group: target_group.to_string(),
            instance_ids: instance_ids.to_vec(),
            resulting_count,
        });
        Ok(())
    }

    async fn deregister(
        &self,
        target_group: &str,
        instance_ids: &[String],
    ) -> Result<(), CloudError> {
        if let Some(error) = self.next_deregister_error.write().await.take() {
            return Err(error);
        }
        let mut targets = self.targets.write().await;
        let group = targets.entry(target_group.to_string()).or_default();
        group.retain(|id| !instance_ids.contains(id));
        let resulting_count = group.len();
        self.events.write().await.push(BalancerEvent::Deregister {
            target_group: target_group.to_string(),
            instance_ids: instance_ids.to_vec(),
            resulting_count,
        });
        Ok(())
    }

    async fn registered_targets(&self, target_group: &str) -> Result<Vec<String>, CloudError> {
        Ok(self
            .targets
            .read()
            .await
            .get(target_group)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_then_deregister_records_counts() {
        let balancer = MockLoadBalancer::new();
        balancer.seed_targets("tg-1", &["i-old"]).await;

        balancer
            .register("tg-1", &["i-new-1".to_string(), "i-new-2".to_string()])
            .await
            .unwrap();
        balancer
            .deregister("tg-1", &["i-old".to_string()])
            .await
            .unwrap();

        let events = balancer.recorded_events().await;
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[0],
            BalancerEvent::Register { resulting_count: 3, .. }
        ));
        assert!(matches!(
            events[1],
            BalancerEvent::Deregister { resulting_count: 2, .. }
        ));

        let targets = balancer.registered_targets("tg-1").await.unwrap();
        assert_eq!(targets, vec!["i-new-1", "i-new-2"]);
    }
}
