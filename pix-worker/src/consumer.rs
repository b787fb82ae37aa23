use std::future::Future;
use std::sync::Arc;

use pix_common::kafka_consumer::{Offset, RecvErr};
use rdkafka::error::KafkaError;
use tracing::{error, info, warn};

use crate::app_context::AppContext;
use crate::batch::BatchHandler;
use crate::error::UnhandledError;
use crate::metric_consts::{BATCH_SIZE, EVENTS_RECEIVED, OFFSET_STORE_ERRORS, RECV_ERRORS};
use crate::types::{InboundEvent, ItemOutcome};

/// Consume batches until `shutdown` resolves or Kafka fails.
///
/// Shutdown is only observed while waiting for the next batch: a batch that has been
/// received is always handled and acknowledged before the loop exits.
pub async fn run<F>(context: Arc<AppContext>, shutdown: F) -> Result<(), UnhandledError>
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    let batch_size = context.config.max_events_per_batch;
    let batch_wait_time = context.config.max_event_batch_wait_ms.0;

    loop {
        context.worker_liveness.report_healthy();

        let received = tokio::select! {
            biased;
            _ = &mut shutdown => {
                info!("shutdown requested, stopping consumer loop");
                return Ok(());
            }
            received = context
                .kafka_consumer
                .json_recv_batch::<InboundEvent>(batch_size, batch_wait_time) => received,
        };

        handle_received(&context.batch_handler, received).await?;
    }
}

/// Hand the decoded events of one received batch to the `BatchHandler`, then store
/// the offset of every handled event.
///
/// Poison pills are logged and dropped, their offsets were stored on receipt. A Kafka
/// error is returned only after the events received before it have been handled.
pub async fn handle_received(
    handler: &BatchHandler,
    received: Vec<Result<(InboundEvent, Offset), RecvErr>>,
) -> Result<Vec<ItemOutcome>, KafkaError> {
    metrics::gauge!(BATCH_SIZE).set(received.len() as f64);

    let mut events = Vec::with_capacity(received.len());
    let mut offsets = Vec::with_capacity(received.len());
    let mut kafka_error = None;

    for message in received {
        match message {
            Ok((event, offset)) => {
                events.push(event);
                offsets.push(offset);
            }
            Err(RecvErr::Kafka(e)) => {
                metrics::counter!(RECV_ERRORS, "cause" => "kafka").increment(1);
                error!("kafka error while receiving batch: {}", e);
                kafka_error = Some(e);
            }
            Err(e) => {
                metrics::counter!(RECV_ERRORS, "cause" => "poison_pill").increment(1);
                warn!("dropping undecodable message: {}", e);
            }
        }
    }

    metrics::counter!(EVENTS_RECEIVED).increment(events.len() as u64);

    let outcomes = if events.is_empty() {
        Vec::new()
    } else {
        handler.handle_batch(events).await
    };

    // Failed items are acknowledged too, they are never retried here
    for offset in offsets {
        let (partition, position) = (offset.partition(), offset.offset());
        if let Err(e) = offset.store() {
            metrics::counter!(OFFSET_STORE_ERRORS).increment(1);
            error!(partition, offset = position, "failed to store offset: {}", e);
        }
    }

    match kafka_error {
        Some(e) => Err(e),
        None => Ok(outcomes),
    }
}
