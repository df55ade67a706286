//! Mock object store for testing.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::cloud::{CloudError, ObjectStore, UploadProgress};

/// Mock implementation of the ObjectStore trait.
///
/// Keeps objects in memory, records every write in order, emits upload
/// progress and supports one-shot error injection.
pub struct MockObjectStore {
    objects: Arc<RwLock<HashMap<(String, String), Vec<u8>>>>,
    writes: Arc<RwLock<Vec<String>>>,
    next_error: Arc<RwLock<Option<CloudError>>>,
    write_access_error: Arc<RwLock<Option<CloudError>>>,
}

impl Default for MockObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MockObjectStore {
    /// Create a new mock object store.
    pub fn new() -> Self {
        Self {
            objects: Arc::new(RwLock::new(HashMap::new())),
            writes: Arc::new(RwLock::new(Vec::new())),
            next_error: Arc::new(RwLock::new(None)),
            write_access_error: Arc::new(RwLock::new(None)),
        }
    }

    /// Configure the next mutating operation to fail with the given error.
    pub async fn set_next_error(&self, error: CloudError) {
        *self.next_error.write().await = Some(error);
    }

    /// Make `verify_write_access` fail with the given error.
    pub async fn set_write_access_error(&self, error: CloudError) {
        *self.write_access_error.write().await = Some(error);
    }

    /// Contents of one stored object.
    pub async fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.objects
            .read()
            .await
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    /// Keys written (puts and copies), in order.
    pub async fn write_order(&self) -> Vec<String> {
        self.writes.read().await.clone()
    }

    /// All keys currently stored in a bucket.
    pub async fn keys(&self, bucket: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .objects
            .read()
            .await
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    async fn take_error(&self) -> Option<CloudError> {
        self.next_error.write().await.take()
    }
}

#[async_trait]
impl ObjectStore for MockObjectStore {
    fn name(&self) -> &str {
        "mock"
    }

    async fn put_file(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        progress: Option<UploadProgress>,
    ) -> Result<(), CloudError> {
        if let Some(error) = self.take_error().await {
            return Err(error);
        }
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| CloudError::Api(format!("could not read {}: {}", path.display(), e)))?;
        if let Some(ref progress) = progress {
            progress(0.0);
            progress(50.0);
            progress(100.0);
        }
        self.objects
            .write()
            .await
            .insert((bucket.to_string(), key.to_string()), bytes);
        self.writes.write().await.push(key.to_string());
        Ok(())
    }

    async fn put_bytes(&self, bucket: &str, key: &str, bytes: Vec<u8>) -> Result<(), CloudError> {
        if let Some(error) = self.take_error().await {
            return Err(error);
        }
        self.objects
            .write()
            .await
            .insert((bucket.to_string(), key.to_string()), bytes);
        self.writes.write().await.push(key.to_string());
        Ok(())
    }

    async fn copy(&self, bucket: &str, src_key: &str, dst_key: &str) -> Result<(), CloudError> {
        if let Some(error) = self.take_error().await {
            return Err(error);
        }
        let source = self
            .objects
            .read()
            .await
            .get(&(bucket.to_string(), src_key.to_string()))
            .cloned()
            .ok_or_else(|| CloudError::ObjectNotFound(format!("{}/{}", bucket, src_key)))?;
        self.objects
            .write()
            .await
            .insert((bucket.to_string(), dst_key.to_string()), source);
        self.writes.write().await.push(dst_key.to_string());
        Ok(())
    }

    async fn exists(&self, bucket: &str, key: &str) -> Result<bool, CloudError> {
        Ok(self
            .objects
            .read()
            .await
            .contains_key(&(bucket.to_string(), key.to_string())))
    }

    async fn verify_write_access(&self, bucket: &str) -> Result<(), CloudError> {
        if let Some(error) = self.write_access_error.write().await.take() {
            return Err(error);
        }
        let _ = bucket;
        Ok(())
    }
}
