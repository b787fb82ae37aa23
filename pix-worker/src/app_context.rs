use std::sync::Arc;
use std::time::Duration;

use aws_config::{BehaviorVersion, Region};
use pix_common::health::{HealthHandle, HealthRegistry};
use pix_common::kafka_consumer::SingleTopicConsumer;
use pix_common::kafka_producer::create_kafka_producer;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use crate::artifact_store::S3ArtifactStore;
use crate::batch::BatchHandler;
use crate::catalog::PgCatalog;
use crate::config::Config;
use crate::error::UnhandledError;
use crate::fetch::{build_http_client, HttpFetcher};
use crate::processor::{ItemProcessor, StageTimeouts};
use crate::publisher::KafkaPublisher;
use crate::transform::{ThumbnailSpec, Thumbnailer};

/// Process-scoped handles, built once at startup and shared by every batch.
pub struct AppContext {
    pub health_registry: HealthRegistry,
    pub worker_liveness: HealthHandle,
    pub kafka_consumer: SingleTopicConsumer,
    pub batch_handler: BatchHandler,
    pub config: Config,
}

impl AppContext {
    pub async fn new(config: &Config) -> Result<Self, UnhandledError> {
        let health_registry = HealthRegistry::new("liveness");
        let worker_liveness = health_registry.register("worker", Duration::from_secs(60));
        let kafka_liveness = health_registry.register("rdkafka", Duration::from_secs(30));

        let kafka_consumer =
            SingleTopicConsumer::new(config.kafka.clone(), config.consumer.clone())?;
        let kafka_producer = create_kafka_producer(&config.kafka, kafka_liveness).await?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_pg_connections)
            .acquire_timeout(config.catalog_timeout.0)
            .connect(&config.database_url)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;

        let aws_credentials = aws_sdk_s3::config::Credentials::new(
            &config.object_storage_access_key_id,
            &config.object_storage_secret_access_key,
            None,
            None,
            "environment",
        );
        let aws_conf = aws_sdk_s3::config::Builder::new()
            .region(Region::new(config.object_storage_region.clone()))
            .endpoint_url(&config.object_storage_endpoint)
            .credentials_provider(aws_credentials)
            .force_path_style(true)
            .behavior_version(BehaviorVersion::latest())
            .build();
        let s3_client = aws_sdk_s3::Client::from_conf(aws_conf);

        let bucket = config.object_storage_bucket.as_str();
        let public_base_url = match &config.object_storage_public_url {
            Some(url) => url.as_str().to_owned(),
            None => format!(
                "{}/{}",
                config.object_storage_endpoint.trim_end_matches('/'),
                bucket
            ),
        };
        let artifacts = S3ArtifactStore::new(s3_client, bucket, &public_base_url);
        artifacts.ping_bucket().await?;

        let fetcher = HttpFetcher::new(
            build_http_client(config.fetch_timeout.0)?,
            config.max_image_bytes,
        );
        let thumbnailer = Thumbnailer::new(ThumbnailSpec {
            width: config.thumbnail_width,
            height: config.thumbnail_height,
            jpeg_quality: config.thumbnail_jpeg_quality,
        });
        let publisher = KafkaPublisher::new(
            kafka_producer,
            config.notification_topic.as_str(),
            config.publish_timeout.0,
        );

        let processor = ItemProcessor::new(
            Arc::new(fetcher),
            Arc::new(thumbnailer),
            Arc::new(artifacts),
            Arc::new(PgCatalog::new(pool)),
            Arc::new(publisher),
            StageTimeouts {
                fetch: config.fetch_timeout.0,
                store: config.store_timeout.0,
                catalog: config.catalog_timeout.0,
                publish: config.publish_timeout.0,
            },
        );
        let batch_handler = BatchHandler::new(Arc::new(processor), config.max_concurrent_items);

        info!(
            "AppContext initialized, subscribed to topic {}, thumbnails go to {}",
            kafka_consumer.topic(),
            public_base_url
        );

        Ok(Self {
            health_registry,
            worker_liveness,
            kafka_consumer,
            batch_handler,
            config: config.clone(),
        })
    }
}
