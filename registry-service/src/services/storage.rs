use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::fs;

use crate::config::{StorageBackend, StorageConfig};
use crate::services::error::ServiceError;

/// Object store holding artifact bytes. Keys look like `/<name>/artifact`.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn upload(&self, key: &str, data: Vec<u8>) -> Result<(), ServiceError>;
    async fn download(&self, key: &str) -> Result<Vec<u8>, ServiceError>;
    async fn delete(&self, key: &str) -> Result<(), ServiceError>;
    /// Bucket recorded on every package row.
    fn bucket(&self) -> &str;
}

/// Build the backend selected by configuration.
pub async fn from_config(config: &StorageConfig) -> Result<Box<dyn Storage>, ServiceError> {
    match config.backend {
        StorageBackend::Local => Ok(Box::new(
            LocalStorage::new(&config.local_path, &config.bucket).await?,
        )),
        StorageBackend::S3 => Ok(Box::new(S3Storage::from_config(config).await)),
    }
}

fn storage_error(op: &str, key: &str, e: impl std::fmt::Display) -> ServiceError {
    ServiceError::Storage(anyhow::anyhow!("{} of '{}' failed: {}", op, key, e))
}

/// Directory-backed store, laid out as `<base>/<bucket>/<key>`.
pub struct LocalStorage {
    base_path: PathBuf,
    bucket: String,
}

impl LocalStorage {
    pub async fn new(base_path: impl AsRef<Path>, bucket: &str) -> Result<Self, ServiceError> {
        let base_path = base_path.as_ref().join(bucket);
        if !base_path.exists() {
            fs::create_dir_all(&base_path)
                .await
                .map_err(|e| storage_error("create", &base_path.display().to_string(), e))?;
        }
        Ok(Self {
            base_path,
            bucket: bucket.to_string(),
        })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.base_path.join(key.trim_start_matches('/'))
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn upload(&self, key: &str, data: Vec<u8>) -> Result<(), ServiceError> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| storage_error("upload", key, e))?;
        }
        fs::write(path, data)
            .await
            .map_err(|e| storage_error("upload", key, e))
    }

    async fn download(&self, key: &str) -> Result<Vec<u8>, ServiceError> {
        fs::read(self.path_for(key))
            .await
            .map_err(|e| storage_error("download", key, e))
    }

    async fn delete(&self, key: &str) -> Result<(), ServiceError> {
        let path = self.path_for(key);
        if path.exists() {
            fs::remove_file(path)
                .await
                .map_err(|e| storage_error("delete", key, e))?;
        }
        Ok(())
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }
}

pub struct S3Storage {
    client: S3Client,
    bucket: String,
}

impl S3Storage {
    pub fn new(client: S3Client, bucket: String) -> Self {
        Self { client, bucket }
    }

    /// Credentials come from the default AWS provider chain. A custom
    /// endpoint (MinIO, localstack) switches to path-style addressing.
    pub async fn from_config(config: &StorageConfig) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = &config.s3_region {
            loader = loader.region(aws_config::Region::new(region.clone()));
        }
        let shared = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = &config.s3_endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        tracing::info!(
            bucket = %config.bucket,
            region = ?config.s3_region,
            endpoint = ?config.s3_endpoint,
            "S3 storage configured"
        );

        Self::new(S3Client::from_conf(builder.build()), config.bucket.clone())
    }
}

#[async_trait]
impl Storage for S3Storage {
    async fn upload(&self, key: &str, data: Vec<u8>) -> Result<(), ServiceError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| storage_error("S3 upload", key, e))?;
        Ok(())
    }

    async fn download(&self, key: &str) -> Result<Vec<u8>, ServiceError> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| storage_error("S3 download", key, e))?;

        let data = output
            .body
            .collect()
            .await
            .map_err(|e| storage_error("S3 body collection", key, e))?
            .into_bytes()
            .to_vec();

        Ok(data)
    }

    async fn delete(&self, key: &str) -> Result<(), ServiceError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| storage_error("S3 delete", key, e))?;
        Ok(())
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }
}

/// In-memory store with switchable failures for exercising rollback paths.
#[derive(Default)]
pub struct MockStorage {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    fail_uploads: AtomicBool,
    fail_deletes: AtomicBool,
    upload_calls: AtomicUsize,
    delete_calls: AtomicUsize,
}

impl MockStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub fn upload_calls(&self) -> usize {
        self.upload_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects
            .lock()
            .map(|objects| objects.contains_key(key))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.objects.lock().map(|objects| objects.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn objects(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>>, ServiceError> {
        self.objects
            .lock()
            .map_err(|_| ServiceError::Storage(anyhow::anyhow!("Mock storage lock poisoned")))
    }
}

#[async_trait]
impl Storage for MockStorage {
    async fn upload(&self, key: &str, data: Vec<u8>) -> Result<(), ServiceError> {
        self.upload_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(storage_error("upload", key, "injected failure"));
        }
        self.objects()?.insert(key.to_string(), data);
        Ok(())
    }

    async fn download(&self, key: &str) -> Result<Vec<u8>, ServiceError> {
        self.objects()?
            .get(key)
            .cloned()
            .ok_or_else(|| storage_error("download", key, "no such key"))
    }

    async fn delete(&self, key: &str) -> Result<(), ServiceError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(storage_error("delete", key, "injected failure"));
        }
        self.objects()?.remove(key);
        Ok(())
    }

    fn bucket(&self) -> &str {
        "mock"
    }
}
