//! Deployment lifecycle integration tests.
//!
//! These drive a full DeployJob against the mock cloud: graph building,
//! health-monitor fan-out, fleet swap, teardown and summary recording.
//! Timers run on tokio's paused clock, so the production timeouts apply
//! without slowing the tests down.

use std::sync::Arc;

use tempfile::TempDir;

use gantry_core::testing::fixtures::{self, MockCloud};
use gantry_core::{
    DeployConfig, DeployHistoryStore, DeployJob, DeployTarget, DeployType, DeploymentSpec,
    ImageFailurePolicy, JobOwner, JobRegistry, LoadBalancer, SqliteHistoryStore, StatusSnapshot,
};

struct TestHarness {
    cloud: MockCloud,
    history: Arc<SqliteHistoryStore>,
    temp_dir: TempDir,
}

impl TestHarness {
    fn new() -> Self {
        Self {
            cloud: MockCloud::new(),
            history: Arc::new(SqliteHistoryStore::in_memory().expect("history store")),
            temp_dir: TempDir::new().expect("temp dir"),
        }
    }

    fn deployment(&self) -> DeploymentSpec {
        fixtures::deployment_spec(self.temp_dir.path())
    }

    /// Seed one running previous-fleet instance registered to the target
    /// group.
    async fn seed_previous_fleet(&self) {
        self.cloud
            .compute
            .seed_running_instance("i-old-1", &[("serverId", "srv-1")])
            .await;
        self.cloud.balancer.seed_targets("tg-1", &["i-old-1"]).await;
    }

    fn deploy_job(
        &self,
        deployment: DeploymentSpec,
        target: DeployTarget,
        deploy_type: DeployType,
        config: DeployConfig,
    ) -> DeployJob {
        DeployJob::new(
            deployment,
            target,
            deploy_type,
            JobOwner::new("user-1", "user@example.com"),
            config,
            self.cloud.services(),
            Some(Arc::clone(&self.history) as _),
        )
    }

    /// Run a deploy job to completion and return its final status.
    async fn run(&self, deploy: DeployJob) -> StatusSnapshot {
        let job = deploy.into_job().expect("job construction");
        let status = job.status();
        job.run().await;
        status.snapshot().await
    }
}

// =============================================================================
// Happy path and partial success
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_replace_deployment_all_instances_ready() {
    let harness = TestHarness::new();
    harness.seed_previous_fleet().await;

    let mut target = fixtures::fleet_target(3);
    // Separate run image: builder is torn down, three run instances start.
    target.compute.as_mut().unwrap().run_image_id = Some("img-run".to_string());

    let deploy = harness.deploy_job(
        harness.deployment(),
        target,
        DeployType::Replace,
        DeployConfig::default(),
    );
    harness
        .cloud
        .probe
        .script_default(deploy.nonce(), &["pending", "running"])
        .await;

    let snapshot = harness.run(deploy).await;

    assert!(snapshot.completed);
    assert!(!snapshot.error, "deployment failed: {}", snapshot.message);
    assert!(snapshot.message.contains("Server setup is complete!"));

    // Exactly the three new instances serve traffic; the old fleet is gone.
    let targets = harness
        .cloud
        .balancer
        .registered_targets("tg-1")
        .await
        .unwrap();
    assert_eq!(targets.len(), 3);
    assert!(!targets.contains(&"i-old-1".to_string()));
    let terminated = harness.cloud.compute.terminated_ids().await;
    assert!(terminated.contains(&"i-old-1".to_string()));

    let summary = harness.history.latest("dep-1").unwrap().unwrap();
    assert_eq!(summary.healthy_instance_count, 3);
    assert_eq!(summary.failed_instance_count, 0);
    assert!(summary.unterminated_instance_ids.is_empty());
    assert!(!summary.status.error);
}

#[tokio::test(start_paused = true)]
async fn test_builder_kept_as_run_instance_when_configs_match() {
    let harness = TestHarness::new();

    // Identical build/run config: the builder stays on, so only two more
    // instances are launched for an instance count of three.
    let deploy = harness.deploy_job(
        harness.deployment(),
        fixtures::fleet_target(3),
        DeployType::Replace,
        DeployConfig::default(),
    );
    harness
        .cloud
        .probe
        .script_default(deploy.nonce(), &["running"])
        .await;

    let snapshot = harness.run(deploy).await;
    assert!(!snapshot.error, "deployment failed: {}", snapshot.message);

    let launches = harness.cloud.compute.recorded_launches().await;
    assert_eq!(launches.len(), 2);
    assert_eq!(launches[0].count, 1);
    assert_eq!(launches[1].count, 2);

    let targets = harness
        .cloud
        .balancer
        .registered_targets("tg-1")
        .await
        .unwrap();
    assert_eq!(targets.len(), 3);
    // The builder itself serves traffic.
    assert!(targets.contains(&"i-0001".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_partial_failure_continues_with_healthy_subset() {
    let harness = TestHarness::new();
    harness.seed_previous_fleet().await;

    let mut target = fixtures::fleet_target(3);
    target.compute.as_mut().unwrap().run_image_id = Some("img-run".to_string());

    let deploy = harness.deploy_job(
        harness.deployment(),
        target,
        DeployType::Replace,
        DeployConfig::default(),
    );
    // Builder (i-0001 -> 203.0.113.1) and two run instances succeed; the
    // run instance at 203.0.113.3 reports a startup failure.
    harness
        .cloud
        .probe
        .script_default(deploy.nonce(), &["running"])
        .await;
    harness
        .cloud
        .probe
        .script("203.0.113.3", deploy.nonce(), &["failed"])
        .await;

    let snapshot = harness.run(deploy).await;

    assert!(snapshot.completed);
    assert!(!snapshot.error, "deployment failed: {}", snapshot.message);
    assert!(
        snapshot.message.contains("1 instance(s) failed to properly start."),
        "missing partial-failure note: {}",
        snapshot.message
    );

    let targets = harness
        .cloud
        .balancer
        .registered_targets("tg-1")
        .await
        .unwrap();
    assert_eq!(targets.len(), 2);

    // The failed instance was individually terminated, along with the old
    // fleet.
    let terminated = harness.cloud.compute.terminated_ids().await;
    assert!(terminated.contains(&"i-0003".to_string()));
    assert!(terminated.contains(&"i-old-1".to_string()));

    let summary = harness.history.latest("dep-1").unwrap().unwrap();
    assert_eq!(summary.healthy_instance_count, 2);
    assert_eq!(summary.failed_instance_count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_prebuilt_graph_deployment_skips_graph_build() {
    let harness = TestHarness::new();

    let mut target = fixtures::fleet_target(2);
    target.compute.as_mut().unwrap().run_image_id = Some("img-run".to_string());

    let deploy = harness.deploy_job(
        harness.deployment(),
        target,
        DeployType::UsePrebuiltGraph,
        DeployConfig::default(),
    );
    harness
        .cloud
        .probe
        .script_default(deploy.nonce(), &["running"])
        .await;

    let snapshot = harness.run(deploy).await;
    assert!(!snapshot.error, "deployment failed: {}", snapshot.message);

    // A single launch of two run instances from the run image; no builder.
    let launches = harness.cloud.compute.recorded_launches().await;
    assert_eq!(launches.len(), 1);
    assert_eq!(launches[0].count, 2);
    assert_eq!(launches[0].image_id, "img-run");

    let targets = harness
        .cloud
        .balancer
        .registered_targets("tg-1")
        .await
        .unwrap();
    assert_eq!(targets.len(), 2);
}

// =============================================================================
// Failure paths leave the previous fleet intact
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_all_instances_failing_leaves_previous_fleet_untouched() {
    let harness = TestHarness::new();
    harness.seed_previous_fleet().await;

    let mut target = fixtures::fleet_target(3);
    target.compute.as_mut().unwrap().run_image_id = Some("img-run".to_string());

    let deploy = harness.deploy_job(
        harness.deployment(),
        target,
        DeployType::Replace,
        DeployConfig::default(),
    );
    // Graph build succeeds, every run instance fails.
    harness
        .cloud
        .probe
        .script("203.0.113.1", deploy.nonce(), &["running"])
        .await;
    harness
        .cloud
        .probe
        .script_default(deploy.nonce(), &["failed"])
        .await;

    let snapshot = harness.run(deploy).await;

    assert!(snapshot.error);
    assert!(snapshot.message.contains("no healthy instances remain"));

    // Previous fleet untouched: still registered, never terminated.
    let targets = harness
        .cloud
        .balancer
        .registered_targets("tg-1")
        .await
        .unwrap();
    assert_eq!(targets, vec!["i-old-1".to_string()]);
    let terminated = harness.cloud.compute.terminated_ids().await;
    assert!(!terminated.contains(&"i-old-1".to_string()));

    // All three failed run instances were cleaned up.
    for id in ["i-0002", "i-0003", "i-0004"] {
        assert!(terminated.contains(&id.to_string()), "{} not terminated", id);
    }

    let summary = harness.history.latest("dep-1").unwrap().unwrap();
    assert!(summary.status.error);
    assert_eq!(summary.healthy_instance_count, 0);
    assert_eq!(summary.failed_instance_count, 3);
}

#[tokio::test(start_paused = true)]
async fn test_address_timeout_terminates_observed_instances() {
    let harness = TestHarness::new();
    harness.seed_previous_fleet().await;
    harness.cloud.compute.set_withhold_addresses(true).await;

    let deploy = harness.deploy_job(
        harness.deployment(),
        fixtures::fleet_target(3),
        DeployType::Replace,
        DeployConfig::default(),
    );

    let snapshot = harness.run(deploy).await;

    assert!(snapshot.error);
    assert!(
        snapshot.message.contains("timed out waiting for public address"),
        "unexpected message: {}",
        snapshot.message
    );

    // The builder that never got an address was terminated; the previous
    // fleet was not.
    let terminated = harness.cloud.compute.terminated_ids().await;
    assert!(terminated.contains(&"i-0001".to_string()));
    assert!(!terminated.contains(&"i-old-1".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_graph_build_failure_terminates_builder() {
    let harness = TestHarness::new();
    harness.seed_previous_fleet().await;

    let deploy = harness.deploy_job(
        harness.deployment(),
        fixtures::fleet_target(2),
        DeployType::Replace,
        DeployConfig::default(),
    );
    harness
        .cloud
        .probe
        .script("203.0.113.1", deploy.nonce(), &["pending", "failed"])
        .await;

    let snapshot = harness.run(deploy).await;

    assert!(snapshot.error);
    assert!(snapshot.message.contains("Error encountered while building graph"));
    let terminated = harness.cloud.compute.terminated_ids().await;
    assert_eq!(terminated, vec!["i-0001".to_string()]);
    // Only the builder launch happened; no run instances, no swap.
    assert_eq!(harness.cloud.compute.launch_count().await, 1);
    assert!(harness.cloud.balancer.recorded_events().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_validation_failure_spends_nothing() {
    let harness = TestHarness::new();
    harness
        .cloud
        .store
        .set_write_access_error(gantry_core::CloudError::AccessDenied(
            "bucket is read-only".to_string(),
        ))
        .await;

    let deploy = harness.deploy_job(
        harness.deployment(),
        fixtures::fleet_target(2),
        DeployType::Replace,
        DeployConfig::default(),
    );

    let snapshot = harness.run(deploy).await;

    assert!(snapshot.error);
    assert!(snapshot.message.contains("Cannot write to bucket"));
    assert_eq!(harness.cloud.compute.launch_count().await, 0);
}

// =============================================================================
// Build-only and swap ordering
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_build_only_terminates_builder_and_touches_nothing() {
    let harness = TestHarness::new();
    harness.seed_previous_fleet().await;

    let mut deployment = harness.deployment();
    deployment.build_graph_only = true;

    let deploy = harness.deploy_job(
        deployment,
        fixtures::fleet_target(3),
        DeployType::Replace,
        DeployConfig::default(),
    );
    harness
        .cloud
        .probe
        .script_default(deploy.nonce(), &["running"])
        .await;

    let snapshot = harness.run(deploy).await;

    assert!(snapshot.completed);
    assert!(!snapshot.error, "build-only run failed: {}", snapshot.message);
    assert!(snapshot.message.contains("Graph build is complete!"));

    // Exactly one launch (the builder), which was then terminated; the
    // serving fleet and target group were never touched.
    assert_eq!(harness.cloud.compute.launch_count().await, 1);
    assert_eq!(
        harness.cloud.compute.terminated_ids().await,
        vec!["i-0001".to_string()]
    );
    assert!(harness.cloud.balancer.recorded_events().await.is_empty());
    let targets = harness
        .cloud
        .balancer
        .registered_targets("tg-1")
        .await
        .unwrap();
    assert_eq!(targets, vec!["i-old-1".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_registration_precedes_deregistration() {
    let harness = TestHarness::new();
    harness.seed_previous_fleet().await;

    let deploy = harness.deploy_job(
        harness.deployment(),
        fixtures::fleet_target(2),
        DeployType::Replace,
        DeployConfig::default(),
    );
    harness
        .cloud
        .probe
        .script_default(deploy.nonce(), &["running"])
        .await;

    let snapshot = harness.run(deploy).await;
    assert!(!snapshot.error, "deployment failed: {}", snapshot.message);

    let events = harness.cloud.balancer.recorded_events().await;
    assert_eq!(events.len(), 2);
    assert!(matches!(
        events[0],
        gantry_core::testing::BalancerEvent::Register { .. }
    ));
    assert!(matches!(
        events[1],
        gantry_core::testing::BalancerEvent::Deregister { .. }
    ));
    // At no point did the target group drop to zero targets.
    for event in &events {
        let count = match event {
            gantry_core::testing::BalancerEvent::Register { resulting_count, .. } => resulting_count,
            gantry_core::testing::BalancerEvent::Deregister { resulting_count, .. } => {
                resulting_count
            }
        };
        assert!(*count >= 1, "target group went empty mid-swap: {:?}", events);
    }
}

#[tokio::test(start_paused = true)]
async fn test_stuck_old_instance_is_reported_not_dropped() {
    let harness = TestHarness::new();
    harness.seed_previous_fleet().await;
    harness.cloud.compute.set_terminate_stuck("i-old-1").await;

    let deploy = harness.deploy_job(
        harness.deployment(),
        fixtures::fleet_target(2),
        DeployType::Replace,
        DeployConfig::default(),
    );
    harness
        .cloud
        .probe
        .script_default(deploy.nonce(), &["running"])
        .await;

    let snapshot = harness.run(deploy).await;

    // The new fleet is serving; the leak is a warning, not a failure.
    assert!(!snapshot.error, "deployment failed: {}", snapshot.message);
    assert!(
        snapshot.message.contains("Could not terminate previous instances"),
        "missing leak warning: {}",
        snapshot.message
    );
    let summary = harness.history.latest("dep-1").unwrap().unwrap();
    assert_eq!(summary.unterminated_instance_ids, vec!["i-old-1".to_string()]);
}

// =============================================================================
// Image recreation
// =============================================================================

fn image_recreation_target() -> DeployTarget {
    let mut target = fixtures::fleet_target(2);
    let compute = target.compute.as_mut().unwrap();
    compute.run_image_id = Some("img-run".to_string());
    compute.recreate_build_image = true;
    target
}

#[tokio::test(start_paused = true)]
async fn test_image_recreated_concurrently_and_builder_released() {
    let harness = TestHarness::new();
    harness.cloud.compute.set_image_delay_ms(5_000).await;

    let deploy = harness.deploy_job(
        harness.deployment(),
        image_recreation_target(),
        DeployType::Replace,
        DeployConfig::default(),
    );
    harness
        .cloud
        .probe
        .script_default(deploy.nonce(), &["running"])
        .await;

    let snapshot = harness.run(deploy).await;
    assert!(!snapshot.error, "deployment failed: {}", snapshot.message);

    let images = harness.cloud.compute.recorded_images().await;
    assert_eq!(images.len(), 1);
    assert_eq!(images[0].0, "i-0001");

    // The builder was kept alive for the snapshot and terminated after it.
    let terminated = harness.cloud.compute.terminated_ids().await;
    assert!(terminated.contains(&"i-0001".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_image_failure_is_warning_under_default_policy() {
    let harness = TestHarness::new();
    harness
        .cloud
        .compute
        .set_image_error(gantry_core::CloudError::Api("snapshot quota exceeded".to_string()))
        .await;

    let deploy = harness.deploy_job(
        harness.deployment(),
        image_recreation_target(),
        DeployType::Replace,
        DeployConfig::default(),
    );
    harness
        .cloud
        .probe
        .script_default(deploy.nonce(), &["running"])
        .await;

    let snapshot = harness.run(deploy).await;

    assert!(!snapshot.error, "warn policy must not fail the job: {}", snapshot.message);
    assert!(
        snapshot.message.contains("Failed to recreate graph build image"),
        "missing image warning: {}",
        snapshot.message
    );
}

#[tokio::test(start_paused = true)]
async fn test_image_failure_fails_job_under_fail_policy() {
    let harness = TestHarness::new();
    harness
        .cloud
        .compute
        .set_image_error(gantry_core::CloudError::Api("snapshot quota exceeded".to_string()))
        .await;

    let mut config = DeployConfig::default();
    config.image_failure_policy = ImageFailurePolicy::Fail;

    let deploy = harness.deploy_job(
        harness.deployment(),
        image_recreation_target(),
        DeployType::Replace,
        config,
    );
    harness
        .cloud
        .probe
        .script_default(deploy.nonce(), &["running"])
        .await;

    let snapshot = harness.run(deploy).await;

    assert!(snapshot.error);
    assert!(snapshot.message.contains("Failed to recreate graph build image"));
    // The fleet itself still swapped before the image failure was observed.
    let targets = harness
        .cloud
        .balancer
        .registered_targets("tg-1")
        .await
        .unwrap();
    assert_eq!(targets.len(), 2);
}

// =============================================================================
// Registry integration
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_deploy_submitted_through_registry_is_pollable() {
    let harness = TestHarness::new();
    let registry = Arc::new(JobRegistry::new());

    let deploy = harness.deploy_job(
        harness.deployment(),
        fixtures::fleet_target(1),
        DeployType::Replace,
        DeployConfig::default(),
    );
    harness
        .cloud
        .probe
        .script_default(deploy.nonce(), &["running"])
        .await;

    let job = deploy.into_job().unwrap();
    let job_id = registry.submit(job).await;

    // Poll like an HTTP client would until the job reaches a terminal state.
    let mut last = None;
    for _ in 0..600 {
        if let Some(info) = registry.find(&job_id).await {
            let completed = info.status.completed;
            last = Some(info);
            if completed {
                break;
            }
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }

    let info = last.expect("job observable");
    assert!(info.status.completed);
    assert!(!info.status.error, "deployment failed: {}", info.status.message);
    assert_eq!(info.owner, "user-1");
}
