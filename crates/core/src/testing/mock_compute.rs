//! Mock compute client for testing.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::cloud::{
    CloudError, ComputeClient, InstanceRecord, InstanceState, InstanceStateChange, LaunchRequest,
};

/// Mock implementation of the ComputeClient trait.
///
/// Provides controllable behavior for testing:
/// - Deterministic instance ids (`i-0001`, `i-0002`, ...) and public
///   addresses (`203.0.113.1`, `203.0.113.2`, ...)
/// - Track launches, tags and terminations for assertions
/// - Withhold address assignment to exercise launch timeouts
/// - Mark instances as refusing to terminate
/// - Fail or delay image creation
pub struct MockComputeClient {
    instances: Arc<RwLock<HashMap<String, InstanceRecord>>>,
    counter: AtomicUsize,
    image_exists: Arc<RwLock<bool>>,
    image_checks: AtomicUsize,
    launches: Arc<RwLock<Vec<LaunchRequest>>>,
    tags: Arc<RwLock<Vec<(String, Vec<(String, String)>)>>>,
    terminations: Arc<RwLock<Vec<Vec<String>>>>,
    created_images: Arc<RwLock<Vec<(String, String)>>>,
    withhold_addresses: Arc<RwLock<bool>>,
    next_launch_error: Arc<RwLock<Option<CloudError>>>,
    image_error: Arc<RwLock<Option<CloudError>>>,
    image_delay_ms: Arc<RwLock<u64>>,
    stuck_instances: Arc<RwLock<HashSet<String>>>,
}

impl Default for MockComputeClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockComputeClient {
    /// Create a new mock compute client.
    pub fn new() -> Self {
        Self {
            instances: Arc::new(RwLock::new(HashMap::new())),
            counter: AtomicUsize::new(0),
            image_exists: Arc::new(RwLock::new(true)),
            image_checks: AtomicUsize::new(0),
            launches: Arc::new(RwLock::new(Vec::new())),
            tags: Arc::new(RwLock::new(Vec::new())),
            terminations: Arc::new(RwLock::new(Vec::new())),
            created_images: Arc::new(RwLock::new(Vec::new())),
            withhold_addresses: Arc::new(RwLock::new(false)),
            next_launch_error: Arc::new(RwLock::new(None)),
            image_error: Arc::new(RwLock::new(None)),
            image_delay_ms: Arc::new(RwLock::new(0)),
            stuck_instances: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    /// Whether `image_exists` should confirm images.
    pub async fn set_image_exists(&self, exists: bool) {
        *self.image_exists.write().await = exists;
    }

    /// Never assign public addresses, so launches time out.
    pub async fn set_withhold_addresses(&self, withhold: bool) {
        *self.withhold_addresses.write().await = withhold;
    }

    /// Fail the next launch with the given error.
    pub async fn set_next_launch_error(&self, error: CloudError) {
        *self.next_launch_error.write().await = Some(error);
    }

    /// Fail image creation with the given error.
    pub async fn set_image_error(&self, error: CloudError) {
        *self.image_error.write().await = Some(error);
    }

    /// Delay image creation, to exercise the orchestrator's bounded join.
    pub async fn set_image_delay_ms(&self, delay_ms: u64) {
        *self.image_delay_ms.write().await = delay_ms;
    }

    /// Mark an instance as refusing to terminate: terminate calls report it
    /// still running.
    pub async fn set_terminate_stuck(&self, instance_id: &str) {
        self.stuck_instances.write().await.insert(instance_id.to_string());
    }

    /// Seed a running instance, e.g. the previous fleet of a target.
    /// Seeded instances do not consume the deterministic id/address counter.
    pub async fn seed_running_instance(&self, id: &str, tags: &[(&str, &str)]) {
        let record = InstanceRecord {
            id: id.to_string(),
            public_ip: Some("198.51.100.10".to_string()),
            state: InstanceState::Running,
            tags: tags
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            launched_at: Utc::now(),
        };
        self.instances.write().await.insert(id.to_string(), record);
    }

    /// Number of launch calls made.
    pub async fn launch_count(&self) -> usize {
        self.launches.read().await.len()
    }

    /// Recorded launch requests.
    pub async fn recorded_launches(&self) -> Vec<LaunchRequest> {
        self.launches.read().await.clone()
    }

    /// Number of image existence checks made.
    pub fn image_checks(&self) -> usize {
        self.image_checks.load(Ordering::SeqCst)
    }

    /// Recorded (instance id, tags) pairs.
    pub async fn recorded_tags(&self) -> Vec<(String, Vec<(String, String)>)> {
        self.tags.read().await.clone()
    }

    /// Recorded termination batches.
    pub async fn recorded_terminations(&self) -> Vec<Vec<String>> {
        self.terminations.read().await.clone()
    }

    /// All instance ids terminated so far.
    pub async fn terminated_ids(&self) -> Vec<String> {
        self.terminations.read().await.iter().flatten().cloned().collect()
    }

    /// Recorded (instance id, image name) pairs.
    pub async fn recorded_images(&self) -> Vec<(String, String)> {
        self.created_images.read().await.clone()
    }

    /// Current state of one instance.
    pub async fn instance_state(&self, id: &str) -> Option<InstanceState> {
        self.instances.read().await.get(id).map(|i| i.state)
    }
}

#[async_trait]
impl ComputeClient for MockComputeClient {
    fn name(&self) -> &str {
        "mock"
    }

    async fn image_exists(&self, _image_id: &str) -> Result<bool, CloudError> {
        self.image_checks.fetch_add(1, Ordering::SeqCst);
        Ok(*self.image_exists.read().await)
    }

    async fn launch_instances(
        &self,
        request: LaunchRequest,
    ) -> Result<Vec<InstanceRecord>, CloudError> {
        if let Some(error) = self.next_launch_error.write().await.take() {
            return Err(error);
        }

        let mut launched = Vec::with_capacity(request.count);
        let mut instances = self.instances.write().await;
        for _ in 0..request.count {
            let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
            let record = InstanceRecord {
                id: format!("i-{:04}", n),
                public_ip: None,
                state: InstanceState::Pending,
                tags: HashMap::new(),
                launched_at: Utc::now(),
            };
            instances.insert(record.id.clone(), record.clone());
            launched.push(record);
        }
        self.launches.write().await.push(request);
        Ok(launched)
    }

    async fn describe_instances(
        &self,
        instance_ids: &[String],
    ) -> Result<Vec<InstanceRecord>, CloudError> {
        let withhold = *self.withhold_addresses.read().await;
        let mut instances = self.instances.write().await;
        let mut described = Vec::new();
        for id in instance_ids {
            let Some(record) = instances.get_mut(id) else {
                return Err(CloudError::Api(format!("unknown instance {}", id)));
            };
            if record.state == InstanceState::Pending {
                record.state = InstanceState::Running;
            }
            if record.public_ip.is_none() && !withhold {
                let n: usize = id.trim_start_matches("i-").parse().unwrap_or(0);
                record.public_ip = Some(format!("203.0.113.{}", n));
            }
            described.push(record.clone());
        }
        Ok(described)
    }

    async fn wait_for_status_ok(&self, _instance_ids: &[String]) -> Result<(), CloudError> {
        Ok(())
    }

    async fn create_tags(
        &self,
        instance_ids: &[String],
        tags: &[(String, String)],
    ) -> Result<(), CloudError> {
        let mut instances = self.instances.write().await;
        let mut recorded = self.tags.write().await;
        for id in instance_ids {
            if let Some(record) = instances.get_mut(id) {
                for (k, v) in tags {
                    record.tags.insert(k.clone(), v.clone());
                }
            }
            recorded.push((id.clone(), tags.to_vec()));
        }
        Ok(())
    }

    async fn terminate_instances(
        &self,
        instance_ids: &[String],
    ) -> Result<Vec<InstanceStateChange>, CloudError> {
        self.terminations.write().await.push(instance_ids.to_vec());
        let stuck = self.stuck_instances.read().await;
        let mut instances = self.instances.write().await;
        let mut changes = Vec::new();
        for id in instance_ids {
            let state = if stuck.contains(id) {
                InstanceState::Running
            } else {
                if let Some(record) = instances.get_mut(id) {
                    record.state = InstanceState::Terminated;
                }
                InstanceState::Terminated
            };
            changes.push(InstanceStateChange {
                id: id.clone(),
                state,
            });
        }
        Ok(changes)
    }

    async fn create_image(
        &self,
        instance_id: &str,
        image_name: &str,
    ) -> Result<String, CloudError> {
        let delay_ms = *self.image_delay_ms.read().await;
        if delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
        }
        if let Some(error) = self.image_error.write().await.take() {
            return Err(error);
        }
        self.created_images
            .write()
            .await
            .push((instance_id.to_string(), image_name.to_string()));
        Ok(format!("img-{}", image_name))
    }

    async fn instances_by_tag(
        &self,
        key: &str,
        value: &str,
    ) -> Result<Vec<InstanceRecord>, CloudError> {
        let instances = self.instances.read().await;
        Ok(instances
            .values()
            .filter(|i| !i.state.is_terminating() && i.tags.get(key).map(String::as_str) == Some(value))
            .cloned()
            .collect())
    }
}
