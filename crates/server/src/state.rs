use std::sync::Arc;

use gantry_core::{CloudServices, Config, DeployHistoryStore, JobRegistry};

/// Shared application state
pub struct AppState {
    config: Config,
    registry: Arc<JobRegistry>,
    history: Arc<dyn DeployHistoryStore>,
    cloud: Option<CloudServices>,
}

impl AppState {
    pub fn new(
        config: Config,
        registry: Arc<JobRegistry>,
        history: Arc<dyn DeployHistoryStore>,
        cloud: Option<CloudServices>,
    ) -> Self {
        Self {
            config,
            registry,
            history,
            cloud,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn history(&self) -> Arc<dyn DeployHistoryStore> {
        Arc::clone(&self.history)
    }

    /// Cloud clients, when a backend is wired. Deployment submission is
    /// rejected without one; status polling and history remain available.
    pub fn cloud(&self) -> Option<&CloudServices> {
        self.cloud.as_ref()
    }
}
