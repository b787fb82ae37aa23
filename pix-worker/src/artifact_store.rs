use std::sync::Mutex;

use async_trait::async_trait;
use aws_sdk_s3::{primitives::ByteStream, Client as S3Client};
use chrono::Utc;
use tracing::error;
use uuid::Uuid;

use crate::error::StoreError;
use crate::transform::THUMBNAIL_CONTENT_TYPE;

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Persist a JPEG thumbnail under a freshly generated name, returning its durable URL.
    /// The store is append-only from our side: nothing is ever overwritten or deleted.
    async fn store(&self, jpeg: Vec<u8>) -> Result<String, StoreError>;
}

/// Unique object key for a thumbnail. The millisecond prefix keeps keys roughly
/// time-ordered in listings, the v7 UUID guarantees two uploads in the same
/// millisecond never collide.
pub fn thumbnail_key() -> String {
    format!(
        "{}-{}-thumbnail.jpg",
        Utc::now().timestamp_millis(),
        Uuid::now_v7().simple()
    )
}

/// Stores thumbnails in an S3 compatible bucket.
pub struct S3ArtifactStore {
    client: S3Client,
    bucket: String,
    public_base_url: String,
}

impl S3ArtifactStore {
    /// `public_base_url` is joined with the object key to build the returned URL.
    pub fn new(client: S3Client, bucket: &str, public_base_url: &str) -> Self {
        Self {
            client,
            bucket: bucket.to_owned(),
            public_base_url: public_base_url.trim_end_matches('/').to_owned(),
        }
    }

    pub fn url_for(&self, key: &str) -> String {
        format!("{}/{}", self.public_base_url, key)
    }

    /// Assert the bucket is reachable, used at startup so misconfiguration fails fast.
    pub async fn ping_bucket(&self) -> Result<(), StoreError> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map(|_| ())
            .map_err(|e| StoreError::UploadFailed(aws_sdk_s3::Error::from(e).to_string()))
    }
}

#[async_trait]
impl ArtifactStore for S3ArtifactStore {
    async fn store(&self, jpeg: Vec<u8>) -> Result<String, StoreError> {
        let key = thumbnail_key();

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .content_type(THUMBNAIL_CONTENT_TYPE)
            .body(ByteStream::from(jpeg))
            .send()
            .await
            .map_err(|e| {
                let e = aws_sdk_s3::Error::from(e);
                error!(bucket = %self.bucket, key = %key, "failed to upload thumbnail: {:?}", e);
                StoreError::UploadFailed(e.to_string())
            })?;

        Ok(self.url_for(&key))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    pub url: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

/// In-memory store, always available so tests and local runs don't need a bucket.
#[derive(Default)]
pub struct MemoryArtifactStore {
    artifacts: Mutex<Vec<StoredArtifact>>,
    fail_with: Mutex<Option<StoreError>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following `store` call fail with `error`.
    pub fn fail_with(self, error: StoreError) -> Self {
        *self.fail_with.lock().expect("poisoned lock") = Some(error);
        self
    }

    pub fn artifacts(&self) -> Vec<StoredArtifact> {
        self.artifacts.lock().expect("poisoned lock").clone()
    }

    pub fn get(&self, url: &str) -> Option<StoredArtifact> {
        self.artifacts
            .lock()
            .expect("poisoned lock")
            .iter()
            .find(|artifact| artifact.url == url)
            .cloned()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn store(&self, jpeg: Vec<u8>) -> Result<String, StoreError> {
        if let Some(error) = self.fail_with.lock().expect("poisoned lock").clone() {
            return Err(error);
        }

        let url = format!("memory://thumbnails/{}", thumbnail_key());
        self.artifacts
            .lock()
            .expect("poisoned lock")
            .push(StoredArtifact {
                url: url.clone(),
                content_type: THUMBNAIL_CONTENT_TYPE.to_owned(),
                data: jpeg,
            });
        Ok(url)
    }
}
