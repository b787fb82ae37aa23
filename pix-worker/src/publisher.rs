use std::sync::Mutex;
use std::time;

use async_trait::async_trait;
use pix_common::kafka_producer::KafkaContext;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;

use crate::error::PublishError;
use crate::types::CompletionEvent;

#[async_trait]
pub trait CompletionPublisher: Send + Sync {
    /// Publish a single completion event.
    async fn publish(&self, event: &CompletionEvent) -> Result<(), PublishError>;
}

/// Publishes completion events as JSON to a Kafka topic, keyed by subject so all
/// events for one product land on the same partition.
pub struct KafkaPublisher {
    producer: FutureProducer<KafkaContext>,
    topic: String,
    queue_timeout: time::Duration,
}

impl KafkaPublisher {
    pub fn new(
        producer: FutureProducer<KafkaContext>,
        topic: &str,
        queue_timeout: time::Duration,
    ) -> Self {
        Self {
            producer,
            topic: topic.to_owned(),
            queue_timeout,
        }
    }
}

#[async_trait]
impl CompletionPublisher for KafkaPublisher {
    async fn publish(&self, event: &CompletionEvent) -> Result<(), PublishError> {
        let payload = serde_json::to_string(event)
            .map_err(|e| PublishError::Serialization(e.to_string()))?;

        let record = FutureRecord::to(&self.topic)
            .key(&event.subject)
            .payload(&payload);

        match self
            .producer
            .send(record, Timeout::After(self.queue_timeout))
            .await
        {
            Ok(_) => Ok(()),
            Err((error, _)) => Err(PublishError::Delivery(error.to_string())),
        }
    }
}

/// In-memory publisher that records everything it is asked to publish.
#[derive(Default)]
pub struct MemoryPublisher {
    published: Mutex<Vec<CompletionEvent>>,
    fail_with: Mutex<Option<PublishError>>,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following `publish` call fail with `error`.
    pub fn fail_with(self, error: PublishError) -> Self {
        *self.fail_with.lock().expect("poisoned lock") = Some(error);
        self
    }

    pub fn published(&self) -> Vec<CompletionEvent> {
        self.published.lock().expect("poisoned lock").clone()
    }
}

#[async_trait]
impl CompletionPublisher for MemoryPublisher {
    async fn publish(&self, event: &CompletionEvent) -> Result<(), PublishError> {
        if let Some(error) = self.fail_with.lock().expect("poisoned lock").clone() {
            return Err(error);
        }

        self.published
            .lock()
            .expect("poisoned lock")
            .push(event.clone());
        Ok(())
    }
}
