use std::sync::Arc;

use futures::future::join_all;
use pix_common::metrics::timing_guard;
use tokio::sync::Semaphore;
use tracing::{error, info};

use crate::metric_consts::{BATCH_DURATION, ITEM_OUTCOMES, ITEM_SATURATION};
use crate::processor::ItemProcessor;
use crate::types::{FailureReason, InboundEvent, ItemOutcome};

/// Runs every event of a batch through the `ItemProcessor`, at most
/// `max_concurrent_items` at a time, and hands back one outcome per event in input order.
///
/// A batch never fails as a whole. If an item task dies (a panic anywhere in its
/// pipeline), that item alone is reported as `Failed(InternalError)`.
pub struct BatchHandler {
    processor: Arc<ItemProcessor>,
    semaphore: Arc<Semaphore>,
    max_concurrent_items: usize,
}

impl BatchHandler {
    pub fn new(processor: Arc<ItemProcessor>, max_concurrent_items: usize) -> Self {
        let max_concurrent_items = max_concurrent_items.max(1);
        Self {
            processor,
            semaphore: Arc::new(Semaphore::new(max_concurrent_items)),
            max_concurrent_items,
        }
    }

    pub async fn handle_batch(&self, events: Vec<InboundEvent>) -> Vec<ItemOutcome> {
        let batch_timer = timing_guard(BATCH_DURATION);
        let report_saturation = || {
            metrics::gauge!(ITEM_SATURATION).set(
                1f64 - self.semaphore.available_permits() as f64
                    / self.max_concurrent_items as f64,
            );
        };

        let mut identities = Vec::with_capacity(events.len());
        let mut handles = Vec::with_capacity(events.len());

        for event in events {
            // Wait for a free slot before spawning, so at most `max_concurrent_items`
            // items are in flight against the downstream stores.
            let permit = self
                .semaphore
                .clone()
                .acquire_owned()
                .await
                .expect("semaphore has been closed");
            report_saturation();

            identities.push((event.brand.clone(), event.name.clone()));
            let processor = self.processor.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                processor.process(&event).await
            }));
        }

        let outcomes: Vec<ItemOutcome> = join_all(handles)
            .await
            .into_iter()
            .zip(identities)
            .map(|(joined, (brand, name))| match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(brand = %brand, name = %name, "item task did not complete: {}", e);
                    let outcome = ItemOutcome::Failed(FailureReason::InternalError);
                    let (label, reason) = outcome.labels();
                    metrics::counter!(ITEM_OUTCOMES, "outcome" => label, "reason" => reason)
                        .increment(1);
                    outcome
                }
            })
            .collect();
        report_saturation();

        let summary = BatchSummary::from_outcomes(&outcomes);
        info!(
            total = outcomes.len(),
            completed = summary.completed,
            completed_with_warning = summary.completed_with_warning,
            skipped = summary.skipped,
            failed = summary.failed,
            "batch handled"
        );
        batch_timer.fin();

        outcomes
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
struct BatchSummary {
    completed: usize,
    completed_with_warning: usize,
    skipped: usize,
    failed: usize,
}

impl BatchSummary {
    fn from_outcomes(outcomes: &[ItemOutcome]) -> Self {
        let mut summary = Self::default();
        for outcome in outcomes {
            match outcome {
                ItemOutcome::Completed(None) => summary.completed += 1,
                ItemOutcome::Completed(Some(_)) => summary.completed_with_warning += 1,
                ItemOutcome::Skipped(_) => summary.skipped += 1,
                ItemOutcome::Failed(_) => summary.failed += 1,
            }
        }
        summary
    }
}
