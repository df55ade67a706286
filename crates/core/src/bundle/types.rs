//! Types for the bundle builder.

use std::path::PathBuf;

use thiserror::Error;

use crate::cloud::CloudError;

/// Errors surfaced by bundle building and upload.
#[derive(Debug, Error)]
pub enum BundleError {
    /// A referenced input file is missing or unreadable.
    #[error("invalid bundle input: {0}")]
    InvalidInput(String),

    /// Local disk I/O failed while writing the archive.
    #[error("archive I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Writing the zip stream failed.
    #[error("archive error: {0}")]
    Archive(String),

    /// Uploading to object storage failed. Fatal: no partial bundle is ever
    /// left referenced.
    #[error("upload error: {0}")]
    Upload(#[from] CloudError),
}

/// Everything needed to assemble and address one deployment bundle.
#[derive(Debug, Clone)]
pub struct BundleSpec {
    /// Project the deployment belongs to.
    pub project_id: String,
    /// Project display name, used for the `-latest` alias key.
    pub project_name: String,
    /// Deployment id.
    pub deployment_id: String,
    /// Id of the job building this bundle.
    pub job_id: String,
    /// Transit feed archives to include.
    pub feed_paths: Vec<PathBuf>,
    /// Optional street-network extract to include.
    pub extract_path: Option<PathBuf>,
    /// Generated graph build configuration.
    pub build_config: serde_json::Value,
    /// Generated router configuration, when the deployment defines one.
    pub router_config: Option<serde_json::Value>,
}

impl BundleSpec {
    /// Object key folder for this bundle:
    /// `{prefix}/{project_id}/{deployment_id}/{job_id}`.
    pub fn folder_key(&self, prefix: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            prefix, self.project_id, self.deployment_id, self.job_id
        )
    }

    /// Object key of the bundle archive.
    pub fn bundle_key(&self, prefix: &str) -> String {
        format!("{}/bundle.zip", self.folder_key(prefix))
    }

    /// Object key of the standalone router configuration.
    pub fn router_config_key(&self, prefix: &str) -> String {
        format!("{}/router-config.json", self.folder_key(prefix))
    }

    /// Object key of the `-latest` alias, overwritten on every successful
    /// build: `{prefix}/{project_id}/{clean-name}-latest.zip`.
    pub fn latest_key(&self, prefix: &str) -> String {
        format!(
            "{}/{}/{}-latest.zip",
            prefix,
            self.project_id,
            clean_name(&self.project_name)
        )
    }
}

/// Lowercase a display name and collapse anything that is not `[a-z0-9]`
/// into single dashes, for use in object keys.
pub fn clean_name(name: &str) -> String {
    let re = regex_lite::Regex::new("[^a-z0-9]+").unwrap();
    re.replace_all(&name.to_lowercase(), "-")
        .trim_matches('-')
        .to_string()
}
