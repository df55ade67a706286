//! Bundle builder implementation.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::cloud::{ObjectStore, UploadProgress};

use super::types::{BundleError, BundleSpec};

/// Packages transit data, the optional street-network extract and generated
/// configuration into a single archive and ships it to object storage.
pub struct BundleBuilder {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    prefix: String,
}

impl BundleBuilder {
    /// Create a builder uploading under `{bucket}/{prefix}/...`.
    pub fn new(store: Arc<dyn ObjectStore>, bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            prefix: prefix.into(),
        }
    }

    /// The bucket this builder uploads to.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// The key prefix bundles are stored under.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Write the bundle archive to `dest` and return its size in bytes.
    ///
    /// The archive is deterministic: entries are sorted by name and carry a
    /// fixed timestamp, so identical inputs produce byte-identical output.
    pub async fn build_archive(
        &self,
        spec: &BundleSpec,
        dest: &Path,
    ) -> Result<u64, BundleError> {
        let spec = spec.clone();
        let dest = dest.to_path_buf();
        tokio::task::spawn_blocking(move || write_archive(&spec, &dest))
            .await
            .map_err(|e| BundleError::Archive(format!("archive task panicked: {}", e)))?
    }

    /// Upload the archive, the standalone router configuration and refresh
    /// the `-latest` alias.
    ///
    /// The alias is only written after the primary upload succeeded, so a
    /// failed build never becomes the referenced latest bundle.
    pub async fn upload(
        &self,
        spec: &BundleSpec,
        archive: &Path,
        progress: Option<UploadProgress>,
    ) -> Result<String, BundleError> {
        let bundle_key = spec.bundle_key(&self.prefix);
        info!("Uploading bundle to {}/{}", self.bucket, bundle_key);
        self.store
            .put_file(&self.bucket, &bundle_key, archive, progress)
            .await?;

        // Router config is uploaded as its own object so run instances that
        // only download the graph can still fetch their configuration.
        if let Some(ref router_config) = spec.router_config {
            let key = spec.router_config_key(&self.prefix);
            let bytes = serde_json::to_vec_pretty(router_config)
                .map_err(|e| BundleError::InvalidInput(e.to_string()))?;
            self.store.put_bytes(&self.bucket, &key, bytes).await?;
        }

        let latest_key = spec.latest_key(&self.prefix);
        self.store
            .copy(&self.bucket, &bundle_key, &latest_key)
            .await?;
        info!("Copied bundle to {}/{}", self.bucket, latest_key);

        Ok(bundle_key)
    }
}

/// Collect the archive entries for a spec: (entry name, source path) for
/// files plus generated configuration, sorted by entry name.
fn collect_entries(spec: &BundleSpec) -> Result<Vec<(String, PathBuf)>, BundleError> {
    let mut entries = Vec::new();
    for feed in &spec.feed_paths {
        add_path(feed, &mut entries)?;
    }
    if let Some(ref extract) = spec.extract_path {
        add_path(extract, &mut entries)?;
    }
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(entries)
}

fn add_path(path: &Path, entries: &mut Vec<(String, PathBuf)>) -> Result<(), BundleError> {
    if !path.exists() {
        return Err(BundleError::InvalidInput(format!(
            "input does not exist: {}",
            path.display()
        )));
    }
    let base_name = path
        .file_name()
        .ok_or_else(|| {
            BundleError::InvalidInput(format!("input has no file name: {}", path.display()))
        })?
        .to_string_lossy()
        .to_string();

    if path.is_dir() {
        // A feed may be an exploded directory of GTFS tables; include it
        // under its directory name.
        for entry in WalkDir::new(path).follow_links(false) {
            let entry = entry.map_err(|e| BundleError::InvalidInput(e.to_string()))?;
            if entry.path().is_dir() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(path)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .replace('\\', "/");
            entries.push((format!("{}/{}", base_name, rel), entry.path().to_path_buf()));
        }
    } else {
        entries.push((base_name, path.to_path_buf()));
    }
    Ok(())
}

fn write_archive(spec: &BundleSpec, dest: &Path) -> Result<u64, BundleError> {
    let entries = collect_entries(spec)?;

    let file = File::create(dest)?;
    let mut zip = ZipWriter::new(file);
    // Fixed timestamp keeps identical inputs byte-identical across builds.
    let options = SimpleFileOptions::default().last_modified_time(zip::DateTime::default());

    for (name, path) in entries {
        zip.start_file(name, options)
            .map_err(|e| BundleError::Archive(e.to_string()))?;
        let mut input = File::open(&path)?;
        std::io::copy(&mut input, &mut zip)?;
    }

    zip.start_file("build-config.json", options)
        .map_err(|e| BundleError::Archive(e.to_string()))?;
    zip.write_all(&render_config(&spec.build_config)?)?;

    if let Some(ref router_config) = spec.router_config {
        zip.start_file("router-config.json", options)
            .map_err(|e| BundleError::Archive(e.to_string()))?;
        zip.write_all(&render_config(router_config)?)?;
    }

    let file = zip
        .finish()
        .map_err(|e| BundleError::Archive(e.to_string()))?;
    Ok(file.metadata()?.len())
}

fn render_config(value: &serde_json::Value) -> Result<Vec<u8>, BundleError> {
    serde_json::to_vec_pretty(value).map_err(|e| BundleError::InvalidInput(e.to_string()))
}

/// Read an archive back into (entry name, contents) pairs. Used by tests to
/// assert on archive contents.
pub fn read_archive_entries(path: &Path) -> Result<Vec<(String, Vec<u8>)>, BundleError> {
    let file = File::open(path)?;
    let mut archive =
        zip::ZipArchive::new(file).map_err(|e| BundleError::Archive(e.to_string()))?;
    let mut entries = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| BundleError::Archive(e.to_string()))?;
        let mut contents = Vec::new();
        entry.read_to_end(&mut contents)?;
        entries.push((entry.name().to_string(), contents));
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockObjectStore;
    use tempfile::TempDir;

    fn write_input(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn spec(dir: &Path) -> BundleSpec {
        BundleSpec {
            project_id: "proj-1".to_string(),
            project_name: "Metro Transit".to_string(),
            deployment_id: "dep-1".to_string(),
            job_id: "job-1".to_string(),
            feed_paths: vec![
                write_input(dir, "feed-b.zip", "feed b data"),
                write_input(dir, "feed-a.zip", "feed a data"),
            ],
            extract_path: Some(write_input(dir, "streets.pbf", "osm data")),
            build_config: serde_json::json!({"transitServiceStart": "2024-01-01"}),
            router_config: Some(serde_json::json!({"routingDefaults": {}})),
        }
    }

    fn builder() -> (BundleBuilder, Arc<MockObjectStore>) {
        let store = Arc::new(MockObjectStore::new());
        let builder = BundleBuilder::new(
            Arc::clone(&store) as Arc<dyn ObjectStore>,
            "deploy-bucket",
            "bundles",
        );
        (builder, store)
    }

    #[tokio::test]
    async fn test_archive_contains_sorted_inputs_and_configs() {
        let dir = TempDir::new().unwrap();
        let spec = spec(dir.path());
        let (builder, _) = builder();

        let archive_path = dir.path().join("bundle.zip");
        let size = builder.build_archive(&spec, &archive_path).await.unwrap();
        assert!(size > 0);

        let entries = read_archive_entries(&archive_path).unwrap();
        let names: Vec<&str> = entries.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "feed-a.zip",
                "feed-b.zip",
                "streets.pbf",
                "build-config.json",
                "router-config.json"
            ]
        );
    }

    #[tokio::test]
    async fn test_identical_inputs_produce_identical_archives() {
        let dir = TempDir::new().unwrap();
        let spec = spec(dir.path());
        let (builder, _) = builder();

        let first = dir.path().join("first.zip");
        let second = dir.path().join("second.zip");
        builder.build_archive(&spec, &first).await.unwrap();
        builder.build_archive(&spec, &second).await.unwrap();

        let first_bytes = std::fs::read(&first).unwrap();
        let second_bytes = std::fs::read(&second).unwrap();
        assert_eq!(first_bytes, second_bytes);
    }

    #[tokio::test]
    async fn test_directory_feed_is_walked() {
        let dir = TempDir::new().unwrap();
        let feed_dir = dir.path().join("metro-gtfs");
        std::fs::create_dir(&feed_dir).unwrap();
        write_input(&feed_dir, "stops.txt", "stop_id,stop_name\n");
        write_input(&feed_dir, "routes.txt", "route_id\n");

        let mut spec = spec(dir.path());
        spec.feed_paths = vec![feed_dir];
        spec.extract_path = None;
        spec.router_config = None;

        let (builder, _) = builder();
        let archive_path = dir.path().join("bundle.zip");
        builder.build_archive(&spec, &archive_path).await.unwrap();

        let entries = read_archive_entries(&archive_path).unwrap();
        let names: Vec<&str> = entries.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(
            names,
            vec!["metro-gtfs/routes.txt", "metro-gtfs/stops.txt", "build-config.json"]
        );
    }

    #[tokio::test]
    async fn test_missing_input_is_fatal() {
        let dir = TempDir::new().unwrap();
        let mut spec = spec(dir.path());
        spec.feed_paths.push(dir.path().join("missing.zip"));

        let (builder, _) = builder();
        let result = builder
            .build_archive(&spec, &dir.path().join("bundle.zip"))
            .await;
        assert!(matches!(result, Err(BundleError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_upload_writes_bundle_config_and_latest_alias() {
        let dir = TempDir::new().unwrap();
        let spec = spec(dir.path());
        let (builder, store) = builder();

        let archive_path = dir.path().join("bundle.zip");
        builder.build_archive(&spec, &archive_path).await.unwrap();
        builder.upload(&spec, &archive_path, None).await.unwrap();

        assert!(store
            .object("deploy-bucket", "bundles/proj-1/dep-1/job-1/bundle.zip")
            .await
            .is_some());
        assert!(store
            .object(
                "deploy-bucket",
                "bundles/proj-1/dep-1/job-1/router-config.json"
            )
            .await
            .is_some());

        // Alias matches the uploaded bundle bytes.
        let bundle = store
            .object("deploy-bucket", "bundles/proj-1/dep-1/job-1/bundle.zip")
            .await
            .unwrap();
        let latest = store
            .object("deploy-bucket", "bundles/proj-1/metro-transit-latest.zip")
            .await
            .unwrap();
        assert_eq!(bundle, latest);
    }

    #[tokio::test]
    async fn test_upload_failure_leaves_latest_untouched() {
        let dir = TempDir::new().unwrap();
        let spec = spec(dir.path());
        let (builder, store) = builder();

        let archive_path = dir.path().join("bundle.zip");
        builder.build_archive(&spec, &archive_path).await.unwrap();
        store
            .set_next_error(crate::cloud::CloudError::Api("upload refused".to_string()))
            .await;

        let result = builder.upload(&spec, &archive_path, None).await;
        assert!(matches!(result, Err(BundleError::Upload(_))));
        assert!(store
            .object("deploy-bucket", "bundles/proj-1/metro-transit-latest.zip")
            .await
            .is_none());
    }
}
