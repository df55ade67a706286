use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub deploy: DeployConfig,
    #[serde(default)]
    pub cloud: Option<CloudConfig>,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    "0.0.0.0".parse().unwrap()
}

fn default_port() -> u16 {
    8080
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("gantry.db")
}

/// Policy for an image-recreation failure discovered after the serving fleet
/// has already started successfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageFailurePolicy {
    /// Append a warning to the deployment status; the deployment still
    /// succeeds.
    Warn,
    /// Fail the whole deployment.
    Fail,
}

/// Deployment pipeline configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeployConfig {
    /// Whether fleet deployments are enabled at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Key prefix bundles are uploaded under.
    #[serde(default = "default_bundle_prefix")]
    pub bundle_prefix: String,
    /// Bound on waiting for public address assignment after launch.
    #[serde(default = "default_address_wait_secs")]
    pub address_wait_secs: u64,
    /// Interval between public address checks.
    #[serde(default = "default_address_poll_interval_secs")]
    pub address_poll_interval_secs: u64,
    /// Interval between status artifact polls.
    #[serde(default = "default_monitor_poll_interval_secs")]
    pub monitor_poll_interval_secs: u64,
    /// Deadline for a run instance to report ready.
    #[serde(default = "default_server_monitor_timeout_secs")]
    pub server_monitor_timeout_secs: u64,
    /// Deadline for the graph build to report ready. Graph builds dominate
    /// deployment time, so this is much longer than the server timeout.
    #[serde(default = "default_graph_build_timeout_secs")]
    pub graph_build_timeout_secs: u64,
    /// Upper bound on waiting for a whole batch of health monitors.
    #[serde(default = "default_fleet_join_wait_secs")]
    pub fleet_join_wait_secs: u64,
    /// Interval between completion checks on the image-recreation task.
    #[serde(default = "default_image_poll_interval_secs")]
    pub image_poll_interval_secs: u64,
    /// What to do when image recreation fails after server startup already
    /// succeeded.
    #[serde(default = "default_image_failure_policy")]
    pub image_failure_policy: ImageFailurePolicy,
    /// Port the instance-side status artifact is served on.
    #[serde(default = "default_status_artifact_port")]
    pub status_artifact_port: u16,
    /// Path of the instance-side status artifact.
    #[serde(default = "default_status_artifact_path")]
    pub status_artifact_path: String,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bundle_prefix: default_bundle_prefix(),
            address_wait_secs: default_address_wait_secs(),
            address_poll_interval_secs: default_address_poll_interval_secs(),
            monitor_poll_interval_secs: default_monitor_poll_interval_secs(),
            server_monitor_timeout_secs: default_server_monitor_timeout_secs(),
            graph_build_timeout_secs: default_graph_build_timeout_secs(),
            fleet_join_wait_secs: default_fleet_join_wait_secs(),
            image_poll_interval_secs: default_image_poll_interval_secs(),
            image_failure_policy: default_image_failure_policy(),
            status_artifact_port: default_status_artifact_port(),
            status_artifact_path: default_status_artifact_path(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_bundle_prefix() -> String {
    "bundles".to_string()
}

fn default_address_wait_secs() -> u64 {
    600
}

fn default_address_poll_interval_secs() -> u64 {
    10
}

fn default_monitor_poll_interval_secs() -> u64 {
    15
}

fn default_server_monitor_timeout_secs() -> u64 {
    3300
}

fn default_graph_build_timeout_secs() -> u64 {
    4 * 3600
}

fn default_fleet_join_wait_secs() -> u64 {
    4 * 3600
}

fn default_image_poll_interval_secs() -> u64 {
    1
}

fn default_image_failure_policy() -> ImageFailurePolicy {
    ImageFailurePolicy::Warn
}

fn default_status_artifact_port() -> u16 {
    80
}

fn default_status_artifact_path() -> String {
    "/status.json".to_string()
}

/// Cloud provider configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CloudConfig {
    /// Provider backend type
    pub backend: CloudBackend,
    /// Account role to assume for provider calls
    #[serde(default)]
    pub role: Option<String>,
    /// Default region
    #[serde(default)]
    pub region: Option<String>,
}

/// Available cloud provider backends
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CloudBackend {
    Aws,
    // Future: Gcp, Openstack
}
