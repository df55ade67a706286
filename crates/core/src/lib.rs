pub mod bundle;
pub mod cloud;
pub mod config;
pub mod deploy;
pub mod history;
pub mod job;
pub mod metrics;
pub mod monitor;
pub mod provision;
pub mod testing;

pub use bundle::{clean_name, BundleBuilder, BundleError, BundleSpec};
pub use cloud::{
    CloudError, ComputeClient, InstanceRecord, InstanceState, InstanceStateChange, LaunchRequest,
    LoadBalancer, ObjectStore, UploadProgress,
};
pub use config::{
    load_config, load_config_from_str, validate_config, CloudBackend, CloudConfig, Config,
    ConfigError, DatabaseConfig, DeployConfig, ImageFailurePolicy, ServerConfig,
};
pub use deploy::{CloudServices, DeployJob, DeployTarget, DeployType, DeploymentSpec};
pub use history::{DeployHistoryStore, DeploySummary, HistoryError, SqliteHistoryStore};
pub use job::{
    Job, JobError, JobInfo, JobLogic, JobOwner, JobRegistry, JobType, Status, StatusSnapshot,
};
pub use monitor::{HttpStatusProbe, MonitorOutcome, ServerMonitor, StatusProbe, StatusReport};
pub use provision::{ComputeSpec, FleetProvisioner, ProvisionError};
