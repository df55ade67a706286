//! Object storage trait.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use super::error::CloudError;

/// Callback receiving upload progress in [0, 100].
pub type UploadProgress = Arc<dyn Fn(f64) + Send + Sync>;

/// An object storage API (bucket/key addressed blobs).
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Returns the name of this storage backend.
    fn name(&self) -> &str;

    /// Upload a local file, reporting progress through the callback when one
    /// is provided.
    async fn put_file(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        progress: Option<UploadProgress>,
    ) -> Result<(), CloudError>;

    /// Upload a small in-memory object.
    async fn put_bytes(&self, bucket: &str, key: &str, bytes: Vec<u8>) -> Result<(), CloudError>;

    /// Server-side copy within a bucket, used to maintain the `-latest`
    /// alias without re-uploading.
    async fn copy(&self, bucket: &str, src_key: &str, dst_key: &str) -> Result<(), CloudError>;

    /// Whether an object exists.
    async fn exists(&self, bucket: &str, key: &str) -> Result<bool, CloudError>;

    /// Verify that the credentials can write to the bucket, before any
    /// compute is spent on a deployment that would fail at upload time.
    async fn verify_write_access(&self, bucket: &str) -> Result<(), CloudError>;
}
