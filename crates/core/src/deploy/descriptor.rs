//! Deployment descriptors.
//!
//! A deployment run is described by the data being shipped
//! ([`DeploymentSpec`]), the logical server it ships to ([`DeployTarget`])
//! and the kind of run ([`DeployType`]). All three are immutable for the
//! life of one run.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::provision::ComputeSpec;

/// Kind of deployment run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployType {
    /// Build a fresh bundle and graph, then replace the serving fleet.
    Replace,
    /// Re-use a bundle already in object storage; still builds the graph.
    UsePreloadedBundle,
    /// Skip graph building entirely and boot run instances from the
    /// prebuilt-graph image; adds capacity without touching the old fleet
    /// unless combined with replace semantics at the target.
    UsePrebuiltGraph,
}

/// The data side of a deployment: which feeds, extract and configuration to
/// ship.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentSpec {
    /// Deployment id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Owning project id.
    pub project_id: String,
    /// Owning project display name, used for the `-latest` alias.
    pub project_name: String,
    /// Router this deployment serves; defaults to `default`.
    #[serde(default)]
    pub router_id: Option<String>,
    /// Transit feed archives (or exploded feed directories).
    pub feed_paths: Vec<PathBuf>,
    /// Optional street-network extract.
    #[serde(default)]
    pub extract_path: Option<PathBuf>,
    /// Public URLs instances can fetch the feeds from directly, for fleet
    /// deployments where instances assemble their own inputs.
    #[serde(default)]
    pub feed_urls: Vec<String>,
    /// Public URL of the street-network extract for instance self-download.
    #[serde(default)]
    pub extract_url: Option<String>,
    /// Build the graph and stop: terminate the builder on success without
    /// touching the existing fleet.
    #[serde(default)]
    pub build_graph_only: bool,
    /// Generated graph build configuration.
    #[serde(default = "default_config")]
    pub build_config: serde_json::Value,
    /// Generated router configuration.
    #[serde(default)]
    pub router_config: Option<serde_json::Value>,
}

fn default_config() -> serde_json::Value {
    serde_json::json!({})
}

impl DeploymentSpec {
    /// Router id, defaulting to `default`.
    pub fn router_id_or_default(&self) -> &str {
        self.router_id.as_deref().unwrap_or("default")
    }
}

/// The target side of a deployment: one logical routing server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployTarget {
    /// Target id; launched instances are tagged with it so the previous
    /// fleet for the same logical server can be found later.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Bucket bundles and build artifacts are uploaded to. Required for
    /// fleet deployments; wire-only targets may omit it.
    #[serde(default)]
    pub bucket: Option<String>,
    /// Public URL the deployed router is reachable at.
    #[serde(default)]
    pub public_url: Option<String>,
    /// Internal routing-server URLs for wire delivery of the bundle. When
    /// set and no compute spec is present, the bundle is POSTed to each of
    /// these instead of booting instances.
    #[serde(default)]
    pub internal_urls: Vec<String>,
    /// Compute configuration for fleet deployments. Absent for targets that
    /// only receive bundles over the wire or into object storage.
    #[serde(default)]
    pub compute: Option<ComputeSpec>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_router_id_default() {
        let spec = DeploymentSpec {
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
        assert_eq!(spec.router_id_or_default(), "default");
    }

    #[test]
    fn test_deploy_type_serialization() {
        let json = serde_json::to_string(&DeployType::UsePrebuiltGraph).unwrap();
        assert_eq!(json, "\"use_prebuilt_graph\"");
    }

    #[test]
    fn test_target_deserializes_without_compute() {
        let target: DeployTarget = serde_json::from_str(
            r#"{"id":"srv-1","name":"production","bucket":"deploy-bucket"}"#,
        )
        .unwrap();
        assert!(target.compute.is_none());
        assert!(target.internal_urls.is_empty());
    }
}
