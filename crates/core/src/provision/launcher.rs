//! Fleet provisioner implementation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use crate::cloud::{tag_keys, ComputeClient, InstanceRecord, LaunchRequest};
use crate::job::Status;

use super::types::{is_known_instance_type, ComputeSpec, ProvisionError};

/// Launches batches of compute instances for one deployment run and waits
/// for them to become network-reachable.
///
/// Validation happens before any instance is started, so configuration
/// mistakes cost nothing. After launch the provisioner owns the wait for
/// status checks and public address assignment; it never terminates
/// instances itself. Failed launches surface the observed instances to the
/// caller, which owns cleanup.
pub struct FleetProvisioner {
    compute: Arc<dyn ComputeClient>,
    spec: ComputeSpec,
    name_prefix: String,
    address_wait: Duration,
    address_poll_interval: Duration,
    server_counter: AtomicUsize,
}

impl FleetProvisioner {
    /// Create a provisioner for one deployment run.
    pub fn new(
        compute: Arc<dyn ComputeClient>,
        spec: ComputeSpec,
        name_prefix: impl Into<String>,
        address_wait: Duration,
        address_poll_interval: Duration,
    ) -> Self {
        Self {
            compute,
            spec,
            name_prefix: name_prefix.into(),
            address_wait,
            address_poll_interval,
            server_counter: AtomicUsize::new(0),
        }
    }

    /// The compute configuration this provisioner launches from.
    pub fn spec(&self) -> &ComputeSpec {
        &self.spec
    }

    /// Launch `count` instances and wait until each has passed the
    /// provider's status checks and been assigned a public address.
    ///
    /// `shared_tags` are attached to every instance alongside a generated
    /// name and role tag, so launched instances can be found manually even
    /// when a deployment fails halfway.
    pub async fn launch(
        &self,
        count: usize,
        graph_already_built: bool,
        user_data: String,
        shared_tags: &[(String, String)],
        status: &Status,
    ) -> Result<Vec<InstanceRecord>, ProvisionError> {
        if count == 0 {
            return Ok(Vec::new());
        }

        let image_id = self.spec.image_for(graph_already_built).to_string();
        let instance_type = self.spec.instance_type_for(graph_already_built).to_string();

        // Fail fast on configuration problems before spending anything.
        if !is_known_instance_type(&instance_type) {
            return Err(ProvisionError::Validation(format!(
                "Instance type ({}) is bad. Check the deployment settings.",
                instance_type
            )));
        }
        match self.compute.image_exists(&image_id).await {
            Ok(true) => {}
            Ok(false) => {
                return Err(ProvisionError::Validation(format!(
                    "Machine image ({}) is missing or bad. Check the deployment settings.",
                    image_id
                )));
            }
            Err(e) => {
                return Err(ProvisionError::Validation(format!(
                    "Could not verify machine image ({}): {}",
                    image_id, e
                )));
            }
        }

        status
            .set_message(format!("Starting up {} new instance(s)", count))
            .await;
        let instances = self
            .compute
            .launch_instances(LaunchRequest {
                image_id,
                instance_type,
                count,
                subnet_id: self.spec.subnet_id.clone(),
                security_group_id: self.spec.security_group_id.clone(),
                key_name: self.spec.key_name.clone(),
                user_data,
            })
            .await
            .map_err(ProvisionError::Launch)?;
        crate::metrics::INSTANCES_LAUNCHED.inc_by(instances.len() as u64);
        let instance_ids: Vec<String> = instances.iter().map(|i| i.id.clone()).collect();

        // Wait for status checks before tagging so the tag request does not
        // race instance registration on the provider side.
        status.set_message("Waiting for instance(s) to start").await;
        if let Err(e) = self.compute.wait_for_status_ok(&instance_ids).await {
            return Err(ProvisionError::PostLaunch {
                message: format!(
                    "Waiter for instance status checks failed: {}. You may need to terminate the failed instances.",
                    e
                ),
                observed: instances,
            });
        }

        let role = if graph_already_built { "clone" } else { "builder" };
        for instance in &instances {
            let counter = self.server_counter.fetch_add(1, Ordering::SeqCst);
            let name = format!(
                "{} ({}) {} {}",
                self.name_prefix,
                Utc::now().format("%Y-%m-%d %H:%M:%S"),
                counter,
                role
            );
            info!("Creating tags for new instance {} ({})", instance.id, name);
            let mut tags: Vec<(String, String)> =
                vec![(tag_keys::NAME.to_string(), name), ("role".to_string(), role.to_string())];
            tags.extend(shared_tags.iter().cloned());
            if let Err(e) = self
                .compute
                .create_tags(std::slice::from_ref(&instance.id), &tags)
                .await
            {
                return Err(ProvisionError::PostLaunch {
                    message: format!("Failed to create tags for instances: {}", e),
                    observed: instances,
                });
            }
        }

        self.wait_for_addresses(instances, status).await
    }

    /// Poll until every instance has a public address, bounded by the
    /// configured wait.
    async fn wait_for_addresses(
        &self,
        instances: Vec<InstanceRecord>,
        status: &Status,
    ) -> Result<Vec<InstanceRecord>, ProvisionError> {
        let instance_ids: Vec<String> = instances.iter().map(|i| i.id.clone()).collect();
        let wait_started = tokio::time::Instant::now();
        let deadline = wait_started + self.address_wait;
        status
            .set_message("Checking that public address(es) have initialized for instance(s)")
            .await;

        let mut observed = instances;
        loop {
            match self.compute.describe_instances(&instance_ids).await {
                Ok(described) => {
                    observed = described;
                }
                Err(e) => {
                    return Err(ProvisionError::PostLaunch {
                        message: format!(
                            "Failed while waiting for public addresses to be assigned to new instance(s): {}",
                            e
                        ),
                        observed,
                    });
                }
            }

            let assigned = observed.iter().filter(|i| i.public_ip.is_some()).count();
            if assigned == instance_ids.len() {
                let addresses: Vec<&str> = observed
                    .iter()
                    .filter_map(|i| i.public_ip.as_deref())
                    .collect();
                info!("Public addresses have all been assigned: {}", addresses.join(","));
                crate::metrics::ADDRESS_WAIT.observe(wait_started.elapsed().as_secs_f64());
                return Ok(observed);
            }

            if tokio::time::Instant::now() >= deadline {
                warn!(
                    "{}/{} instance(s) received a public address before the wait elapsed",
                    assigned,
                    instance_ids.len()
                );
                return Err(ProvisionError::AddressTimeout {
                    waited_secs: self.address_wait.as_secs(),
                    observed,
                });
            }

            tokio::time::sleep(self.address_poll_interval).await;
        }
    }
}
