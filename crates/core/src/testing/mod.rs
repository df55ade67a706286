//! Testing utilities and mock implementations for E2E tests.
//!
//! This module provides mock implementations of all external service traits,
//! allowing comprehensive E2E testing without real infrastructure.
//!
//! # Example
//!
//! ```rust,ignore
//! use gantry_core::testing::{MockComputeClient, MockObjectStore, MockStatusProbe};
//!
//! let compute = MockComputeClient::new();
//! let probe = MockStatusProbe::new();
//!
//! // Configure mock behavior
//! probe.script_default("nonce", &["pending", "running"]).await;
//! compute.set_withhold_addresses(true).await;
//!
//! // Use in a DeployJob...
//! ```

mod mock_balancer;
mod mock_compute;
mod mock_probe;
mod mock_store;

pub use mock_balancer::{BalancerEvent, MockLoadBalancer};
pub use mock_compute::MockComputeClient;
pub use mock_probe::MockStatusProbe;
pub use mock_store::MockObjectStore;

use std::sync::Arc;

use crate::cloud::{ComputeClient, LoadBalancer, ObjectStore};
use crate::deploy::CloudServices;
use crate::monitor::StatusProbe;

/// Bundle fresh mocks into a [`CloudServices`] for tests that do not need to
/// keep handles on the individual mocks.
pub fn mock_cloud_services() -> CloudServices {
    CloudServices {
        compute: Arc::new(MockComputeClient::new()) as Arc<dyn ComputeClient>,
        store: Arc::new(MockObjectStore::new()) as Arc<dyn ObjectStore>,
        balancer: Arc::new(MockLoadBalancer::new()) as Arc<dyn LoadBalancer>,
        probe: Arc::new(MockStatusProbe::new()) as Arc<dyn StatusProbe>,
    }
}

/// Test fixtures and helper functions.
pub mod fixtures {
    use std::path::Path;
    use std::sync::Arc;

    use crate::deploy::{CloudServices, DeployTarget, DeploymentSpec};
    use crate::provision::ComputeSpec;

    use super::{MockComputeClient, MockLoadBalancer, MockObjectStore, MockStatusProbe};

    /// The four mocks behind a [`CloudServices`], kept individually
    /// accessible for assertions.
    pub struct MockCloud {
        pub compute: Arc<MockComputeClient>,
        pub store: Arc<MockObjectStore>,
        pub balancer: Arc<MockLoadBalancer>,
        pub probe: Arc<MockStatusProbe>,
    }

    impl MockCloud {
        pub fn new() -> Self {
            Self {
                compute: Arc::new(MockComputeClient::new()),
                store: Arc::new(MockObjectStore::new()),
                balancer: Arc::new(MockLoadBalancer::new()),
                probe: Arc::new(MockStatusProbe::new()),
            }
        }

        pub fn services(&self) -> CloudServices {
            CloudServices {
                compute: Arc::clone(&self.compute) as _,
                store: Arc::clone(&self.store) as _,
                balancer: Arc::clone(&self.balancer) as _,
                probe: Arc::clone(&self.probe) as _,
            }
        }
    }

    impl Default for MockCloud {
        fn default() -> Self {
            Self::new()
        }
    }

    /// A deployment spec over files that exist under `dir`.
    pub fn deployment_spec(dir: &Path) -> DeploymentSpec {
        let feed = dir.join("feed.zip");
        std::fs::write(&feed, b"gtfs feed data").expect("write feed fixture");
        DeploymentSpec {
            id: "dep-1".to_string(),
            name: "Spring 2026".to_string(),
            project_id: "proj-1".to_string(),
            project_name: "Metro Transit".to_string(),
            router_id: None,
            feed_paths: vec![feed],
            extract_path: None,
            feed_urls: vec!["https://feeds.example.com/feed.zip".to_string()],
            extract_url: None,
            build_graph_only: false,
            build_config: serde_json::json!({"transitServiceStart": "2026-01-01"}),
            router_config: Some(serde_json::json!({"routingDefaults": {}})),
        }
    }

    /// A compute spec with identical build and run configuration.
    pub fn compute_spec(instance_count: usize) -> ComputeSpec {
        ComputeSpec {
            region: None,
            build_image_id: "img-build".to_string(),
            run_image_id: None,
            build_instance_type: Some("r5.xlarge".to_string()),
            run_instance_type: None,
            instance_count,
            subnet_id: "subnet-1".to_string(),
            security_group_id: "sg-1".to_string(),
            key_name: None,
            target_group: "tg-1".to_string(),
            recreate_build_image: false,
        }
    }

    /// A fleet deployment target.
    pub fn fleet_target(instance_count: usize) -> DeployTarget {
        DeployTarget {
            id: "srv-1".to_string(),
            name: "production".to_string(),
            bucket: Some("deploy-bucket".to_string()),
            public_url: Some("https://otp.example.com".to_string()),
            internal_urls: vec![],
            compute: Some(compute_spec(instance_count)),
        }
    }
}
