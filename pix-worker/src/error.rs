use std::time;

use http::StatusCode;
use rdkafka::error::KafkaError;
use thiserror::Error;

/// Errors raised while setting the worker up. These are the only errors allowed to
/// end the process; everything that happens to an item is reported as an outcome.
#[derive(Debug, Error)]
pub enum UnhandledError {
    #[error("Config error: {0}")]
    ConfigError(#[from] envconfig::Error),
    #[error("Kafka error: {0}")]
    KafkaError(#[from] KafkaError),
    #[error("Sqlx error: {0}")]
    SqlxError(#[from] sqlx::Error),
    #[error("Migration error: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),
    #[error("Reqwest error: {0}")]
    ReqwestError(#[from] reqwest::Error),
    #[error("Object storage error: {0}")]
    ObjectStorageError(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid image url {url}: {error}")]
    InvalidUrl { url: String, error: String },
    #[error("request for source image failed: {0}")]
    Request(#[source] reqwest::Error),
    #[error("source image responded with status {0}")]
    Status(StatusCode),
    #[error("source image is larger than {limit} bytes")]
    TooLarge { limit: usize },
    #[error("timed out after {0:?} fetching source image")]
    Timeout(time::Duration),
}

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("failed to decode source image: {0}")]
    Decode(#[source] image::ImageError),
    #[error("failed to encode thumbnail: {0}")]
    Encode(#[source] image::ImageError),
    #[error("thumbnail task did not complete: {0}")]
    Task(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("artifact upload failed: {0}")]
    UploadFailed(String),
    #[error("timed out after {0:?} uploading artifact")]
    Timeout(time::Duration),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("a catalog record for {partition_key}/{row_key} already exists")]
    Conflict {
        partition_key: String,
        row_key: String,
    },
    #[error("catalog write failed: {0}")]
    WriteFailed(String),
    #[error("timed out after {0:?} writing catalog record")]
    Timeout(time::Duration),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PublishError {
    #[error("failed to serialize completion event: {0}")]
    Serialization(String),
    #[error("failed to publish completion event: {0}")]
    Delivery(String),
    #[error("timed out after {0:?} publishing completion event")]
    Timeout(time::Duration),
}
