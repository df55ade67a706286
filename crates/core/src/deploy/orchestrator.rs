//! Fleet replacement orchestrator.
//!
//! A [`DeployJob`] drives one deployment run end to end: bundle build and
//! upload, graph building on a dedicated instance, optional machine-image
//! recreation, concurrent health monitoring of the new fleet, the
//! load-balancer target swap and teardown of the previous fleet. Failure at
//! any stage leaves the previous fleet intact whenever possible and records
//! exactly what was leaked.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::bundle::{clean_name, BundleBuilder, BundleSpec};
use crate::cloud::{
    tag_keys, CloudError, ComputeClient, InstanceRecord, InstanceState, LoadBalancer, ObjectStore,
    UploadProgress,
};
use crate::config::{DeployConfig, ImageFailurePolicy};
use crate::history::{DeployHistoryStore, DeploySummary};
use crate::job::{Job, JobError, JobLogic, JobOwner, JobType, Status};
use crate::metrics;
use crate::monitor::{MonitorOutcome, ServerMonitor, StatusProbe};
use crate::provision::{ComputeSpec, FleetProvisioner};

use super::descriptor::{DeployType, DeployTarget, DeploymentSpec};
use super::wire;

/// Clients a deploy job needs to reach the outside world.
#[derive(Clone)]
pub struct CloudServices {
    pub compute: Arc<dyn ComputeClient>,
    pub store: Arc<dyn ObjectStore>,
    pub balancer: Arc<dyn LoadBalancer>,
    pub probe: Arc<dyn StatusProbe>,
}

/// Outcome of the graph-building phase.
enum GraphBuildPhase {
    /// The job already failed; stop.
    Failed,
    /// `build_graph_only` run finished successfully; stop.
    BuildOnlyDone,
    /// Continue with server startup.
    Continue {
        /// Instances already part of the new fleet (the builder, when its
        /// configuration matches the run configuration).
        fleet_seed: Vec<InstanceRecord>,
        /// Builder kept alive only until the image snapshot completes.
        keep_for_imaging: Option<InstanceRecord>,
        /// Detached image-recreation task, running concurrently with server
        /// startup.
        image_task: Option<JoinHandle<Result<String, CloudError>>>,
        /// Run instances still to be launched.
        servers_needed: usize,
    },
}

/// Deploys one deployment to one target: the `JobLogic` of a deploy job.
pub struct DeployJob {
    deployment: DeploymentSpec,
    target: DeployTarget,
    deploy_type: DeployType,
    config: DeployConfig,
    owner: JobOwner,
    services: CloudServices,
    history: Option<Arc<dyn DeployHistoryStore>>,

    /// Run id used in object keys and instance tags.
    job_id: String,
    /// Binds instance status reports to this run.
    nonce: String,
    bundle_dir: PathBuf,
    archive_path: Option<PathBuf>,
    router_config_uploaded: bool,

    healthy_count: usize,
    failed_count: usize,
    unterminated: Vec<String>,
    warnings: Vec<String>,
}

impl DeployJob {
    /// Create the logic for one deployment run.
    pub fn new(
        deployment: DeploymentSpec,
        target: DeployTarget,
        deploy_type: DeployType,
        owner: JobOwner,
        config: DeployConfig,
        services: CloudServices,
        history: Option<Arc<dyn DeployHistoryStore>>,
    ) -> Self {
        let job_id = Uuid::new_v4().to_string();
        let bundle_dir = std::env::temp_dir().join(format!("gantry-deploy-{}", job_id));
        Self {
            deployment,
            target,
            deploy_type,
            config,
            owner,
            services,
            history,
            job_id,
            nonce: Uuid::new_v4().to_string(),
            bundle_dir,
            archive_path: None,
            router_config_uploaded: false,
            healthy_count: 0,
            failed_count: 0,
            unterminated: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Wrap this logic into a runnable, registrable [`Job`].
    pub fn into_job(self) -> Result<Job, JobError> {
        let owner = self.owner.clone();
        let name = format!("Deploying {}", self.deployment.name);
        Job::new(owner, name, JobType::Deploy, self)
    }

    /// Nonce binding instance status reports to this run.
    pub fn nonce(&self) -> &str {
        &self.nonce
    }

    /// Run id used in object keys and instance tags.
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    fn bundle_spec(&self) -> BundleSpec {
        BundleSpec {
            project_id: self.deployment.project_id.clone(),
            project_name: self.deployment.project_name.clone(),
            deployment_id: self.deployment.id.clone(),
            job_id: self.job_id.clone(),
            feed_paths: self.deployment.feed_paths.clone(),
            extract_path: self.deployment.extract_path.clone(),
            build_config: self.deployment.build_config.clone(),
            router_config: self.deployment.router_config.clone(),
        }
    }

    fn artifacts_folder(&self) -> String {
        self.bundle_spec().folder_key(&self.config.bundle_prefix)
    }

    fn shared_tags(&self) -> Vec<(String, String)> {
        vec![
            (tag_keys::PROJECT_ID.to_string(), self.deployment.project_id.clone()),
            (tag_keys::DEPLOYMENT_ID.to_string(), self.deployment.id.clone()),
            (tag_keys::JOB_ID.to_string(), self.job_id.clone()),
            (tag_keys::SERVER_ID.to_string(), self.target.id.clone()),
            (
                tag_keys::ROUTER_ID.to_string(),
                self.deployment.router_id_or_default().to_string(),
            ),
            (tag_keys::USER.to_string(), self.owner.email.clone()),
        ]
    }

    /// Record a non-fatal problem. If the job has already failed the note is
    /// appended to the failure message; either way it ends up in the final
    /// status and summary, never silently dropped.
    async fn note_warning(&mut self, status: &Status, message: String) {
        warn!("{}", message);
        if status.has_error().await {
            status.append_failure(message.clone()).await;
        }
        self.warnings.push(message);
    }

    /// Terminate instances and verify the provider reported each one as on
    /// its way out. Instances that did not are recorded for manual cleanup.
    /// Returns whether every instance terminated properly.
    async fn terminate_instances(&mut self, instances: &[InstanceRecord]) -> bool {
        if instances.is_empty() {
            return true;
        }
        let ids: Vec<String> = instances.iter().map(|i| i.id.clone()).collect();
        match self.services.compute.terminate_instances(&ids).await {
            Ok(changes) => {
                let terminating: HashSet<String> = changes
                    .iter()
                    .filter(|c| c.state.is_terminating())
                    .map(|c| c.id.clone())
                    .collect();
                let mut all_terminated = true;
                for id in &ids {
                    if !terminating.contains(id) {
                        warn!("Instance {} failed to properly terminate!", id);
                        self.unterminated.push(id.clone());
                        all_terminated = false;
                    }
                }
                metrics::INSTANCES_TERMINATED.inc_by(terminating.len() as u64);
                all_terminated
            }
            Err(e) => {
                warn!("During job cleanup, instance(s) were not properly terminated: {}", e);
                self.unterminated.extend(ids);
                false
            }
        }
    }

    /// Upload the runner manifest (and any configuration it references) and
    /// return the user-data script for an instance launch.
    async fn prepare_user_data(
        &mut self,
        graph_already_built: bool,
        bucket: &str,
    ) -> Result<String, CloudError> {
        let folder = self.artifacts_folder();
        let spec = self.bundle_spec();

        let run_server = if graph_already_built {
            true
        } else {
            let separate_build = self
                .target
                .compute
                .as_ref()
                .map(ComputeSpec::has_separate_build_config)
                .unwrap_or(false);
            !(self.deployment.build_graph_only || separate_build)
        };

        // Run instances need the router configuration as its own object; it
        // is uploaded once per run.
        let mut downloads: Vec<String> = Vec::new();
        if !graph_already_built {
            downloads.extend(self.deployment.feed_urls.iter().cloned());
            if let Some(ref extract_url) = self.deployment.extract_url {
                downloads.push(extract_url.clone());
            }
            let build_config_key = format!("{}/build-config.json", folder);
            let body = render_json(&self.deployment.build_config)?;
            self.services
                .store
                .put_bytes(bucket, &build_config_key, body)
                .await?;
            downloads.push(object_url(bucket, &build_config_key));
        }
        if run_server {
            let router_config_key = spec.router_config_key(&self.config.bundle_prefix);
            if !self.router_config_uploaded {
                let router_config = self
                    .deployment
                    .router_config
                    .clone()
                    .unwrap_or_else(|| serde_json::json!({}));
                let body = render_json(&router_config)?;
                self.services
                    .store
                    .put_bytes(bucket, &router_config_key, body)
                    .await?;
                self.router_config_uploaded = true;
            }
            downloads.push(object_url(bucket, &router_config_key));
        }

        let manifest = serde_json::json!({
            "nonce": self.nonce,
            "routerId": self.deployment.router_id_or_default(),
            "buildGraph": !graph_already_built,
            "runServer": run_server,
            "graphUrl": object_url(bucket, &format!("{}/graph.obj", folder)),
            "uploadGraph": !graph_already_built,
            "downloads": downloads,
            "statusFileLocation": self.config.status_artifact_path,
            "artifactsFolder": object_url(bucket, &folder),
        });
        let manifest_name = if graph_already_built {
            "runner-server-manifest.json"
        } else {
            "runner-graph-build-manifest.json"
        };
        let manifest_key = format!("{}/{}", folder, manifest_name);
        self.services
            .store
            .put_bytes(bucket, &manifest_key, render_json(&manifest)?)
            .await?;

        // Startup script: clear any artifacts a reused image may carry, then
        // fetch and run the manifest.
        let manifest_on_instance = "/var/gantry/runner-manifest.json";
        let lines = vec![
            "#!/bin/bash".to_string(),
            format!("rm {} || true", self.config.status_artifact_path),
            format!("rm {} || true", manifest_on_instance),
            "rm /var/log/graph-runner.log || true".to_string(),
            format!(
                "graph-runner fetch {} {}",
                object_url(bucket, &manifest_key),
                manifest_on_instance
            ),
            format!("graph-runner run {}", manifest_on_instance),
        ];
        Ok(lines.join("\n"))
    }

    /// Build, upload and (for wire targets) transfer the bundle. Returns
    /// false when the job failed.
    async fn build_and_ship_bundle(&mut self, status: &Status) -> bool {
        if let Err(e) = tokio::fs::create_dir_all(&self.bundle_dir).await {
            status
                .fail_with("Could not create temp directory for deployment bundle", &e)
                .await;
            return false;
        }

        status.update("Creating transit bundle", 5.0).await;
        let spec = self.bundle_spec();
        let archive_path = self.bundle_dir.join("bundle.zip");
        let Some(bucket) = self.target.bucket.clone() else {
            // Wire-only target: build locally, nothing to upload.
            return self.build_archive_locally(&spec, &archive_path, status).await;
        };

        if !self.build_archive_locally(&spec, &archive_path, status).await {
            return false;
        }

        let builder = BundleBuilder::new(
            Arc::clone(&self.services.store),
            bucket.clone(),
            self.config.bundle_prefix.clone(),
        );
        status
            .update(format!("Uploading bundle to {}", bucket), 12.0)
            .await;
        let progress_status = status.clone();
        let progress: UploadProgress = Arc::new(move |percent| {
            let status = progress_status.clone();
            tokio::spawn(async move {
                status
                    .update(
                        format!("Uploading bundle ({:.0}%)", percent),
                        12.0 + percent * 0.13,
                    )
                    .await;
            });
        });
        match builder.upload(&spec, &archive_path, Some(progress)).await {
            Ok(_) => {
                self.router_config_uploaded = self.deployment.router_config.is_some();
                status.update("Upload complete.", 25.0).await;
                true
            }
            Err(e) => {
                status
                    .fail_with(
                        format!("Error uploading deployment bundle to {}", bucket),
                        &e,
                    )
                    .await;
                false
            }
        }
    }

    async fn build_archive_locally(
        &mut self,
        spec: &BundleSpec,
        archive_path: &std::path::Path,
        status: &Status,
    ) -> bool {
        let builder = BundleBuilder::new(
            Arc::clone(&self.services.store),
            self.target.bucket.clone().unwrap_or_default(),
            self.config.bundle_prefix.clone(),
        );
        match builder.build_archive(spec, archive_path).await {
            Ok(size) => {
                info!(
                    "Created deployment bundle ({} bytes): {}",
                    size,
                    archive_path.display()
                );
                metrics::BUNDLE_BYTES.observe(size as f64);
                self.archive_path = Some(archive_path.to_path_buf());
                status.update("Transit bundle created", 10.0).await;
                true
            }
            Err(e) => {
                status.fail_with("Error building deployment bundle", &e).await;
                false
            }
        }
    }

    /// The full fleet replacement state machine.
    async fn replace_fleet(&mut self, spec: ComputeSpec, status: &Status) {
        // VALIDATING: everything is checked before any instance exists, so
        // a configuration mistake costs nothing.
        status.set_message("Validating deployment configuration").await;
        let Some(bucket) = self.target.bucket.clone() else {
            status
                .fail("Fleet deployments require a bucket on the deployment target.")
                .await;
            return;
        };
        if self.deploy_type == DeployType::Replace && spec.target_group.is_empty() {
            status
                .fail("Replace deployments require a load-balancer target group.")
                .await;
            return;
        }
        if let Err(e) = self.services.store.verify_write_access(&bucket).await {
            status
                .fail_with(format!("Cannot write to bucket {}", bucket), &e)
                .await;
            return;
        }

        // The previous fleet for this logical server, captured before
        // anything new starts.
        let previous = match self
            .services
            .compute
            .instances_by_tag(tag_keys::SERVER_ID, &self.target.id)
            .await
        {
            Ok(instances) => instances,
            Err(e) => {
                status
                    .fail_with("Failed to retrieve previously running instances!", &e)
                    .await;
                return;
            }
        };

        let provisioner = FleetProvisioner::new(
            Arc::clone(&self.services.compute),
            spec.clone(),
            format!("otp {}", self.deployment.name),
            Duration::from_secs(self.config.address_wait_secs),
            Duration::from_secs(self.config.address_poll_interval_secs),
        );
        let shared_tags = self.shared_tags();

        let phase = self
            .build_graph_phase(&spec, &provisioner, &shared_tags, &bucket, status)
            .await;
        let (fleet_seed, keep_for_imaging, image_task, servers_needed) = match phase {
            GraphBuildPhase::Failed => return,
            GraphBuildPhase::BuildOnlyDone => return,
            GraphBuildPhase::Continue {
                fleet_seed,
                keep_for_imaging,
                image_task,
                servers_needed,
            } => (fleet_seed, keep_for_imaging, image_task, servers_needed),
        };

        // From here on the image task (when present) must be joined on every
        // path, even after a failure, so its handle is always reaped.
        self.start_servers_and_swap(
            &spec,
            &provisioner,
            &shared_tags,
            &bucket,
            fleet_seed,
            previous,
            servers_needed,
            status,
        )
        .await;

        if let Some(task) = image_task {
            self.join_image_task(task, keep_for_imaging.as_ref(), status).await;
        }

        if !status.has_error().await {
            let message = if self.warnings.is_empty() {
                "Server setup is complete!".to_string()
            } else {
                format!(
                    "Server setup is complete! (WARNING: {})",
                    self.warnings.join(" ")
                )
            };
            status.update(message, 100.0).await;
        }
    }

    /// BUILDING_GRAPH and the optional start of RECREATING_IMAGE.
    async fn build_graph_phase(
        &mut self,
        spec: &ComputeSpec,
        provisioner: &FleetProvisioner,
        shared_tags: &[(String, String)],
        bucket: &str,
        status: &Status,
    ) -> GraphBuildPhase {
        if self.deploy_type == DeployType::UsePrebuiltGraph {
            return GraphBuildPhase::Continue {
                fleet_seed: Vec::new(),
                keep_for_imaging: None,
                image_task: None,
                servers_needed: spec.instance_count.max(1),
            };
        }

        status.update("Starting up graph building instance", 30.0).await;
        let user_data = match self.prepare_user_data(false, bucket).await {
            Ok(user_data) => user_data,
            Err(e) => {
                status
                    .fail_with("Failed to upload graph build manifest", &e)
                    .await;
                return GraphBuildPhase::Failed;
            }
        };
        let builders = match provisioner
            .launch(1, false, user_data, shared_tags, status)
            .await
        {
            Ok(instances) => instances,
            Err(e) => {
                let observed = e.observed_instances().to_vec();
                status
                    .fail(format!("Failed to start graph building instance: {}", e))
                    .await;
                if !self.terminate_instances(&observed).await {
                    self.note_warning(
                        status,
                        "During job cleanup, an instance was not properly terminated!".to_string(),
                    )
                    .await;
                }
                return GraphBuildPhase::Failed;
            }
        };
        let Some(builder) = builders.into_iter().next() else {
            status
                .fail("Provider returned no instance for the graph build launch.")
                .await;
            return GraphBuildPhase::Failed;
        };

        // Nothing can proceed without the graph artifact, so this monitor
        // runs synchronously on the job's own task.
        status.set_message("Waiting for graph build to complete...").await;
        let monitor = ServerMonitor::new(
            Arc::clone(&self.services.probe),
            builder.clone(),
            self.nonce.clone(),
            Duration::from_secs(self.config.monitor_poll_interval_secs),
            Duration::from_secs(self.config.graph_build_timeout_secs),
        );
        let outcome = monitor.watch().await;
        metrics::MONITOR_OUTCOMES
            .with_label_values(&[outcome.as_str(), "builder"])
            .inc();
        if !outcome.is_ready() {
            status
                .fail("Error encountered while building graph. Inspect build logs.")
                .await;
            if !self.terminate_instances(std::slice::from_ref(&builder)).await {
                self.note_warning(
                    status,
                    "During job cleanup, the graph building instance was not properly terminated!"
                        .to_string(),
                )
                .await;
            }
            return GraphBuildPhase::Failed;
        }
        status.update("Graph build is complete!", 40.0).await;

        if self.deployment.build_graph_only {
            // Terminate the builder and finish without touching the
            // existing fleet.
            if self.terminate_instances(std::slice::from_ref(&builder)).await {
                status.update("Graph build is complete!", 100.0).await;
            } else {
                status
                    .fail("Graph build succeeded but the builder instance was not properly terminated!")
                    .await;
            }
            return GraphBuildPhase::BuildOnlyDone;
        }

        let image_task = if spec.recreate_build_image {
            // Detached task: subsequent deployments can skip graph building,
            // and the serving fleet boots while the image bakes.
            let compute = Arc::clone(&self.services.compute);
            let instance_id = builder.id.clone();
            let image_name = format!(
                "{}-graph-{}",
                clean_name(&self.deployment.name),
                Utc::now().format("%Y%m%d-%H%M%S")
            );
            info!("Recreating graph build image {} from {}", image_name, instance_id);
            Some(tokio::spawn(async move {
                compute.create_image(&instance_id, &image_name).await
            }))
        } else {
            None
        };

        if spec.has_separate_build_config() {
            let keep_for_imaging = if image_task.is_some() {
                // The builder must stay up until the snapshot completes.
                Some(builder)
            } else {
                if !self.terminate_instances(std::slice::from_ref(&builder)).await {
                    status
                        .fail("The graph building instance was not properly terminated!")
                        .await;
                    return GraphBuildPhase::Failed;
                }
                None
            };
            GraphBuildPhase::Continue {
                fleet_seed: Vec::new(),
                keep_for_imaging,
                image_task,
                servers_needed: spec.instance_count.max(1),
            }
        } else {
            // Identical build and run configuration: the builder stays on as
            // a run instance.
            GraphBuildPhase::Continue {
                fleet_seed: vec![builder],
                keep_for_imaging: None,
                image_task,
                servers_needed: spec.instance_count.saturating_sub(1),
            }
        }
    }

    /// STARTING_SERVERS, SWAPPING_FLEET and TERMINATING_OLD.
    #[allow(clippy::too_many_arguments)]
    async fn start_servers_and_swap(
        &mut self,
        spec: &ComputeSpec,
        provisioner: &FleetProvisioner,
        shared_tags: &[(String, String)],
        bucket: &str,
        mut fleet: Vec<InstanceRecord>,
        previous: Vec<InstanceRecord>,
        servers_needed: usize,
        status: &Status,
    ) {
        status.update("Starting server instances", 50.0).await;
        if servers_needed > 0 {
            let user_data = match self.prepare_user_data(true, bucket).await {
                Ok(user_data) => user_data,
                Err(e) => {
                    status
                        .fail_with("Failed to upload server manifest", &e)
                        .await;
                    if !self.terminate_instances(&fleet).await {
                        self.note_warning(
                            status,
                            "During job cleanup, an instance was not properly terminated!"
                                .to_string(),
                        )
                        .await;
                    }
                    return;
                }
            };
            status
                .set_message(format!("Spinning up remaining {} instance(s).", servers_needed))
                .await;
            let launched = match provisioner
                .launch(servers_needed, true, user_data, shared_tags, status)
                .await
            {
                Ok(instances) => instances,
                Err(e) => {
                    // Roll back everything started so far, the kept builder
                    // included; the previous fleet stays untouched.
                    let mut to_terminate = e.observed_instances().to_vec();
                    to_terminate.extend(fleet.clone());
                    status
                        .fail(format!("Failed to start server instance(s): {}", e))
                        .await;
                    if !self.terminate_instances(&to_terminate).await {
                        self.note_warning(
                            status,
                            "During job cleanup, an instance was not properly terminated!"
                                .to_string(),
                        )
                        .await;
                    }
                    return;
                }
            };

            // One monitor per instance, all joined with a hard upper wait
            // bound on the whole batch.
            status
                .set_message(format!(
                    "Waiting for {} instance(s) to start the routing server.",
                    launched.len()
                ))
                .await;
            let mut monitors = JoinSet::new();
            for instance in launched.clone() {
                let monitor = ServerMonitor::new(
                    Arc::clone(&self.services.probe),
                    instance.clone(),
                    self.nonce.clone(),
                    Duration::from_secs(self.config.monitor_poll_interval_secs),
                    Duration::from_secs(self.config.server_monitor_timeout_secs),
                );
                monitors.spawn(async move { (instance, monitor.watch().await) });
            }
            let mut outcomes: HashMap<String, MonitorOutcome> = HashMap::new();
            let join_bound = Duration::from_secs(self.config.fleet_join_wait_secs);
            let _ = tokio::time::timeout(join_bound, async {
                while let Some(joined) = monitors.join_next().await {
                    if let Ok((instance, outcome)) = joined {
                        outcomes.insert(instance.id, outcome);
                    }
                }
            })
            .await;
            monitors.abort_all();

            for instance in launched {
                let outcome = outcomes
                    .get(&instance.id)
                    .copied()
                    .unwrap_or(MonitorOutcome::TimedOut);
                metrics::MONITOR_OUTCOMES
                    .with_label_values(&[outcome.as_str(), "server"])
                    .inc();
                if outcome.is_ready() {
                    fleet.push(instance);
                } else {
                    // Partial tolerance: the failed instance is terminated
                    // and excluded; the deployment continues with the
                    // healthy subset.
                    warn!(
                        "Error encountered while monitoring server {}. Terminating.",
                        instance.id
                    );
                    self.failed_count += 1;
                    if !self.terminate_instances(std::slice::from_ref(&instance)).await {
                        self.note_warning(
                            status,
                            format!(
                                "During job cleanup, instance {} was not properly terminated!",
                                instance.id
                            ),
                        )
                        .await;
                    }
                }
            }
        }

        self.healthy_count = fleet.len();
        if fleet.is_empty() {
            // The previous, working fleet is never torn down with nothing to
            // replace it.
            status
                .fail("Deployment failed because no healthy instances remain.")
                .await;
            return;
        }

        // SWAPPING_FLEET: registration strictly precedes deregistration so
        // the target group never drops to zero healthy targets.
        let fleet_ids: Vec<String> = fleet.iter().map(|i| i.id.clone()).collect();
        status
            .update(
                format!("Registering {} instance(s) with the target group", fleet_ids.len()),
                85.0,
            )
            .await;
        if let Err(e) = self
            .services
            .balancer
            .register(&spec.target_group, &fleet_ids)
            .await
        {
            status
                .fail_with(
                    format!(
                        "Failed to register new instances with target group {}",
                        spec.target_group
                    ),
                    &e,
                )
                .await;
            if !self.terminate_instances(&fleet).await {
                self.note_warning(
                    status,
                    "During job cleanup, an instance was not properly terminated!".to_string(),
                )
                .await;
            }
            return;
        }

        if self.deploy_type == DeployType::Replace {
            let new_ids: HashSet<&str> = fleet_ids.iter().map(String::as_str).collect();
            let previous_running: Vec<InstanceRecord> = previous
                .into_iter()
                .filter(|i| i.state == InstanceState::Running && !new_ids.contains(i.id.as_str()))
                .collect();
            if !previous_running.is_empty() {
                let previous_ids: Vec<String> =
                    previous_running.iter().map(|i| i.id.clone()).collect();
                status
                    .update(
                        format!(
                            "Deregistering and terminating {} previous instance(s)",
                            previous_ids.len()
                        ),
                        90.0,
                    )
                    .await;
                if let Err(e) = self
                    .services
                    .balancer
                    .deregister(&spec.target_group, &previous_ids)
                    .await
                {
                    // The new fleet is serving; a stuck deregistration is a
                    // warning for the operator, not a deployment failure.
                    self.note_warning(
                        status,
                        format!(
                            "Could not deregister previous instances {:?}: {}",
                            previous_ids, e
                        ),
                    )
                    .await;
                } else if !self.terminate_instances(&previous_running).await {
                    let leaked = self.unterminated.join(", ");
                    self.note_warning(
                        status,
                        format!("Could not terminate previous instances: {}.", leaked),
                    )
                    .await;
                }
            }
        }

        if self.failed_count > 0 {
            let failed_count = self.failed_count;
            self.note_warning(
                status,
                format!("{} instance(s) failed to properly start.", failed_count),
            )
            .await;
        }
    }

    /// Join the detached image-recreation task via bounded polling, then
    /// release the builder it was snapshotting.
    async fn join_image_task(
        &mut self,
        task: JoinHandle<Result<String, CloudError>>,
        keep_for_imaging: Option<&InstanceRecord>,
        status: &Status,
    ) {
        status
            .update("Waiting for graph build image recreation to complete", 95.0)
            .await;
        let poll = Duration::from_secs(self.config.image_poll_interval_secs);
        let deadline =
            tokio::time::Instant::now() + Duration::from_secs(self.config.graph_build_timeout_secs);
        while !task.is_finished() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(poll).await;
        }

        if task.is_finished() {
            match task.await {
                Ok(Ok(image_id)) => {
                    info!("Recreated graph build image: {}", image_id);
                }
                Ok(Err(e)) => {
                    self.image_recreation_failed(status, format!(
                        "Failed to recreate graph build image: {}",
                        e
                    ))
                    .await;
                }
                Err(e) => {
                    self.image_recreation_failed(status, format!(
                        "Image recreation task died: {}",
                        e
                    ))
                    .await;
                }
            }
        } else {
            task.abort();
            self.image_recreation_failed(
                status,
                "Timed out waiting for the graph build image to be recreated.".to_string(),
            )
            .await;
        }

        if let Some(builder) = keep_for_imaging {
            if !self.terminate_instances(std::slice::from_ref(builder)).await {
                self.note_warning(
                    status,
                    "During job cleanup, the graph building instance was not properly terminated!"
                        .to_string(),
                )
                .await;
            }
        }
    }

    /// Apply the configured policy for an image-recreation failure observed
    /// after server startup has already been decided.
    async fn image_recreation_failed(&mut self, status: &Status, message: String) {
        match self.config.image_failure_policy {
            ImageFailurePolicy::Warn => self.note_warning(status, message).await,
            ImageFailurePolicy::Fail => {
                self.warnings.push(message.clone());
                status.append_failure(message).await;
            }
        }
    }
}

fn render_json(value: &serde_json::Value) -> Result<Vec<u8>, CloudError> {
    serde_json::to_vec_pretty(value).map_err(|e| CloudError::Api(e.to_string()))
}

fn object_url(bucket: &str, key: &str) -> String {
    format!("s3://{}/{}", bucket, key)
}

#[async_trait]
impl JobLogic for DeployJob {
    async fn execute(&mut self, status: &Status) -> Result<(), JobError> {
        status.update("Initializing deployment...", 1.0).await;

        // Fleet deployments without wire targets skip the local bundle: run
        // instances assemble their inputs from the manifest instead.
        let needs_bundle = self.deploy_type == DeployType::Replace
            && (self.target.compute.is_none() || !self.target.internal_urls.is_empty());
        if needs_bundle && !self.build_and_ship_bundle(status).await {
            return Ok(());
        }

        if let Some(spec) = self.target.compute.clone() {
            if !self.config.enabled {
                status
                    .fail("Cannot complete deployment. Fleet deployment disabled in server configuration.")
                    .await;
                return Ok(());
            }
            self.replace_fleet(spec, status).await;
            return Ok(());
        }

        if !self.target.internal_urls.is_empty() {
            let Some(archive) = self.archive_path.clone() else {
                status
                    .fail("No bundle archive available for wire transfer.")
                    .await;
                return Ok(());
            };
            let urls = self.target.internal_urls.clone();
            let router_id = self.deployment.router_id_or_default().to_string();
            match wire::transfer_bundle(&urls, &router_id, &archive, status).await {
                Ok(count) => {
                    metrics::WIRE_TRANSFERS
                        .with_label_values(&["success"])
                        .inc_by(count as u64);
                    status
                        .update(
                            format!("Deployed bundle to {} server(s) over the wire.", count),
                            100.0,
                        )
                        .await;
                }
                Err(e) => {
                    metrics::WIRE_TRANSFERS.with_label_values(&["error"]).inc();
                    status.fail(e.to_string()).await;
                    return Ok(());
                }
            }
        }

        Ok(())
    }

    async fn finished(&mut self, status: &Status) {
        // Delete the local bundle so the manager's disk does not fill up.
        if self.archive_path.is_some() {
            if let Err(e) = tokio::fs::remove_dir_all(&self.bundle_dir).await {
                error!(
                    "Deployment bundle {} not deleted ({}). Disk space in danger of filling up.",
                    self.bundle_dir.display(),
                    e
                );
            }
        }

        let snapshot = status.snapshot().await;
        let result = if snapshot.error { "error" } else { "success" };
        metrics::DEPLOYS_TOTAL.with_label_values(&[result]).inc();
        metrics::DEPLOY_DURATION
            .with_label_values(&[result])
            .observe(snapshot.duration_ms as f64 / 1000.0);
        if !self.unterminated.is_empty() {
            metrics::UNTERMINATED_INSTANCES.inc_by(self.unterminated.len() as u64);
        }

        if snapshot.error {
            warn!(
                "Deployment {} failed to deploy to {}: {}",
                self.deployment.name, self.target.name, snapshot.message
            );
        } else {
            info!(
                "{} successfully deployed {} to {} in {} ms",
                self.owner.email, self.deployment.name, self.target.name, snapshot.duration_ms
            );
        }

        // The summary is recorded unconditionally: history must reflect the
        // true final state, failures and leaked instances included.
        if let Some(ref history) = self.history {
            let summary = DeploySummary {
                job_id: self.job_id.clone(),
                deployment_id: self.deployment.id.clone(),
                server_id: self.target.id.clone(),
                bucket: self.target.bucket.clone().unwrap_or_default(),
                artifacts_folder: self.artifacts_folder(),
                status: snapshot,
                healthy_instance_count: self.healthy_count,
                failed_instance_count: self.failed_count,
                unterminated_instance_ids: self.unterminated.clone(),
                finished_at: Utc::now(),
            };
            if let Err(e) = history.append(&summary) {
                error!("Failed to record deployment summary: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_url() {
        assert_eq!(
            object_url("deploy-bucket", "bundles/p/d/j/bundle.zip"),
            "s3://deploy-bucket/bundles/p/d/j/bundle.zip"
        );
    }

    #[test]
    fn test_nonce_and_job_id_are_unique_per_run() {
        // Constructing two jobs from the same descriptor must never share
        // nonces, or a stale status artifact could satisfy a new run.
        let deployment = DeploymentSpec {
            id: "dep-1".to_string(),
            name: "Spring 2026".to_string(),
            project_id: "proj-1".to_string(),
            project_name: "Metro".to_string(),
            router_id: None,
            feed_paths: vec![],
            extract_path: None,
            feed_urls: vec![],
            extract_url: None,
            build_graph_only: false,
            build_config: serde_json::json!({}),
            router_config: None,
        };
        let target = DeployTarget {
            id: "srv-1".to_string(),
            name: "production".to_string(),
            bucket: Some("deploy-bucket".to_string()),
            public_url: None,
            internal_urls: vec![],
            compute: None,
        };
        let services = crate::testing::mock_cloud_services();

        let job_a = DeployJob::new(
            deployment.clone(),
            target.clone(),
            DeployType::Replace,
            JobOwner::new("user-1", "user@example.com"),
            DeployConfig::default(),
            services.clone(),
            None,
        );
        let job_b = DeployJob::new(
            deployment,
            target,
            DeployType::Replace,
            JobOwner::new("user-1", "user@example.com"),
            DeployConfig::default(),
            services,
            None,
        );

        assert_ne!(job_a.nonce(), job_b.nonce());
        assert_ne!(job_a.job_id(), job_b.job_id());
    }
}
