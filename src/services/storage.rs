use async_trait::async_trait;
use chrono::Duration;
use s3::creds::Credentials;
use s3::{Bucket, Region};
use std::collections::HashMap;
use std::sync::Mutex;

/// Longest lifetime a V4 signed URL may have.
const MAX_SIGNED_URL_SECS: i64 = 7 * 24 * 60 * 60;

/// Object storage for generated outputs.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write bytes at `path` inside the store's bucket; returns the `gs://` URI.
    async fn upload(&self, bytes: &[u8], path: &str, content_type: &str) -> Result<String, StorageError>;

    /// Temporary download URL for a `gs://` URI.
    async fn sign_url(&self, uri: &str, ttl: Duration) -> Result<String, StorageError>;
}

/// Split `gs://bucket/path` into its bucket and object path.
pub fn parse_storage_uri(uri: &str) -> Result<(&str, &str), StorageError> {
    uri.strip_prefix("gs://")
        .and_then(|rest| rest.split_once('/'))
        .filter(|(bucket, path)| !bucket.is_empty() && !path.is_empty())
        .ok_or_else(|| StorageError::InvalidUri(uri.to_string()))
}

fn clamp_expiry(ttl: Duration) -> u32 {
    ttl.num_seconds().clamp(1, MAX_SIGNED_URL_SECS) as u32
}

/// Client for Google Cloud Storage through its S3-compatible XML API.
pub struct GcsClient {
    bucket: Box<Bucket>,
    region: Region,
    credentials: Credentials,
}

impl GcsClient {
    pub fn new(
        bucket_name: &str,
        endpoint: &str,
        access_key: &str,
        secret_key: &str,
    ) -> Result<Self, StorageError> {
        let region = Region::Custom {
            region: "auto".to_string(),
            endpoint: endpoint.to_string(),
        };

        let credentials =
            Credentials::new(Some(access_key), Some(secret_key), None, None, None)
                .map_err(|e| StorageError::Config(e.to_string()))?;

        let bucket = Bucket::new(bucket_name, region.clone(), credentials.clone())
            .map_err(|e| StorageError::Config(e.to_string()))?
            .with_path_style();

        Ok(Self {
            bucket,
            region,
            credentials,
        })
    }

    pub fn bucket_name(&self) -> String {
        self.bucket.name()
    }

    /// Handle for a bucket named in a URI; outputs may land in other buckets.
    fn bucket_for(&self, name: &str) -> Result<Box<Bucket>, StorageError> {
        if name == self.bucket.name() {
            return Ok(self.bucket.clone());
        }
        Bucket::new(name, self.region.clone(), self.credentials.clone())
            .map(|b| b.with_path_style())
            .map_err(|e| StorageError::Config(e.to_string()))
    }
}

#[async_trait]
impl ObjectStore for GcsClient {
    async fn upload(&self, bytes: &[u8], path: &str, content_type: &str) -> Result<String, StorageError> {
        let path = path.trim_start_matches('/');
        self.bucket
            .put_object_with_content_type(path, bytes, content_type)
            .await
            .map_err(StorageError::S3)?;
        Ok(format!("gs://{}/{}", self.bucket.name(), path))
    }

    async fn sign_url(&self, uri: &str, ttl: Duration) -> Result<String, StorageError> {
        let (bucket, path) = parse_storage_uri(uri)?;
        self.bucket_for(bucket)?
            .presign_get(path, clamp_expiry(ttl), None)
            .await
            .map_err(StorageError::S3)
    }
}

/// In-process object store.
pub struct MemoryObjectStore {
    bucket: String,
    objects: Mutex<HashMap<String, (Vec<u8>, String)>>,
}

impl MemoryObjectStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            objects: Mutex::new(HashMap::new()),
        }
    }

    /// Bytes and content type stored under a `gs://` URI.
    pub fn object(&self, uri: &str) -> Option<(Vec<u8>, String)> {
        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(uri)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn upload(&self, bytes: &[u8], path: &str, content_type: &str) -> Result<String, StorageError> {
        let uri = format!("gs://{}/{}", self.bucket, path.trim_start_matches('/'));
        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(uri.clone(), (bytes.to_vec(), content_type.to_string()));
        Ok(uri)
    }

    async fn sign_url(&self, uri: &str, ttl: Duration) -> Result<String, StorageError> {
        let (bucket, path) = parse_storage_uri(uri)?;
        Ok(format!(
            "https://signed.invalid/{}/{}?expires={}",
            bucket,
            path,
            clamp_expiry(ttl)
        ))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 operation failed: {0}")]
    S3(#[from] s3::error::S3Error),

    #[error("Storage configuration error: {0}")]
    Config(String),

    #[error("Not a gs:// storage URI: {0}")]
    InvalidUri(String),
}
