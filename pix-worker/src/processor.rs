use std::future::Future;
use std::sync::Arc;
use std::time;

use pix_common::metrics::timing_guard;
use tracing::{error, info, info_span, warn, Instrument};

use crate::artifact_store::ArtifactStore;
use crate::catalog::Catalog;
use crate::error::{CatalogError, FetchError, PublishError, StoreError};
use crate::fetch::ImageFetcher;
use crate::metric_consts::{ITEM_OUTCOMES, STAGE_DURATION};
use crate::publisher::CompletionPublisher;
use crate::transform::{detect_format, Thumbnailer};
use crate::types::{
    CatalogRecord, CompletionEvent, CompletionWarning, FailureReason, InboundEvent, ItemOutcome,
    SkipReason,
};

/// Upper bounds for each network-bound stage. A timeout counts as that stage's failure.
#[derive(Debug, Clone, Copy)]
pub struct StageTimeouts {
    pub fetch: time::Duration,
    pub store: time::Duration,
    pub catalog: time::Duration,
    pub publish: time::Duration,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            fetch: time::Duration::from_secs(10),
            store: time::Duration::from_secs(10),
            catalog: time::Duration::from_secs(5),
            publish: time::Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Fetching,
    Transforming,
    Storing,
    Cataloging,
    Notifying,
}

impl Stage {
    fn as_str(&self) -> &'static str {
        match self {
            Stage::Fetching => "fetching",
            Stage::Transforming => "transforming",
            Stage::Storing => "storing",
            Stage::Cataloging => "cataloging",
            Stage::Notifying => "notifying",
        }
    }
}

/// Drives one event through Fetch -> Transform -> Store -> Catalog -> Notify.
///
/// Stages run strictly in that order with no retries and no going back. Every way an
/// item can end, including every stage error, comes back as an `ItemOutcome`; nothing
/// here returns an error or is expected to panic. The catalog write only happens once
/// the thumbnail is durably stored, and the notification is best-effort.
///
/// All collaborators are shared, process-scoped handles; an `ItemProcessor` is built
/// once and used concurrently by every item of every batch.
pub struct ItemProcessor {
    fetcher: Arc<dyn ImageFetcher>,
    thumbnailer: Arc<Thumbnailer>,
    artifacts: Arc<dyn ArtifactStore>,
    catalog: Arc<dyn Catalog>,
    publisher: Arc<dyn CompletionPublisher>,
    timeouts: StageTimeouts,
}

impl ItemProcessor {
    pub fn new(
        fetcher: Arc<dyn ImageFetcher>,
        thumbnailer: Arc<Thumbnailer>,
        artifacts: Arc<dyn ArtifactStore>,
        catalog: Arc<dyn Catalog>,
        publisher: Arc<dyn CompletionPublisher>,
        timeouts: StageTimeouts,
    ) -> Self {
        Self {
            fetcher,
            thumbnailer,
            artifacts,
            catalog,
            publisher,
            timeouts,
        }
    }

    pub async fn process(&self, event: &InboundEvent) -> ItemOutcome {
        let span = info_span!("item", brand = %event.brand, name = %event.name);
        let outcome = self.run(event).instrument(span).await;

        let (label, reason) = outcome.labels();
        metrics::counter!(ITEM_OUTCOMES, "outcome" => label, "reason" => reason).increment(1);

        outcome
    }

    async fn run(&self, event: &InboundEvent) -> ItemOutcome {
        let Some(url) = event.source_url() else {
            info!(stage = "received", "no blob url provided, skipping");
            return ItemOutcome::Skipped(SkipReason::MissingUrl);
        };

        let source = match self
            .stage(
                Stage::Fetching,
                self.timeouts.fetch,
                self.fetcher.fetch(url),
                FetchError::Timeout,
            )
            .await
        {
            Ok(source) => source,
            Err(e) => {
                warn!(stage = "fetching", url, "failed to fetch source image: {}", e);
                return ItemOutcome::Failed(FailureReason::FetchError);
            }
        };

        let Some(format) = detect_format(&source) else {
            info!(
                stage = "detecting",
                url,
                bytes = source.len(),
                "unsupported image format, skipping"
            );
            return ItemOutcome::Skipped(SkipReason::UnsupportedFormat);
        };

        let transform_timer =
            timing_guard(STAGE_DURATION).label("stage", Stage::Transforming.as_str());
        let thumbnail = self.thumbnailer.clone().resize_blocking(source, format).await;
        transform_timer.fin();
        let thumbnail = match thumbnail {
            Ok(thumbnail) => thumbnail,
            Err(e) => {
                warn!(
                    stage = "transforming",
                    url,
                    ?format,
                    "failed to create thumbnail: {}",
                    e
                );
                return ItemOutcome::Failed(FailureReason::TransformError);
            }
        };

        let image_url = match self
            .stage(
                Stage::Storing,
                self.timeouts.store,
                self.artifacts.store(thumbnail),
                StoreError::Timeout,
            )
            .await
        {
            Ok(image_url) => image_url,
            Err(e) => {
                error!(stage = "storing", "failed to store thumbnail: {}", e);
                return ItemOutcome::Failed(FailureReason::StoreError);
            }
        };

        let record = CatalogRecord::new(event, image_url);
        match self
            .stage(
                Stage::Cataloging,
                self.timeouts.catalog,
                self.catalog.create(&record),
                CatalogError::Timeout,
            )
            .await
        {
            Ok(()) => {}
            Err(CatalogError::Conflict { .. }) => {
                // The stored thumbnail stays behind unreferenced, the store is append-only
                warn!(
                    stage = "cataloging",
                    orphaned_image_url = %record.image_url,
                    "product already catalogued, not overwriting"
                );
                return ItemOutcome::Failed(FailureReason::Conflict);
            }
            Err(e) => {
                error!(
                    stage = "cataloging",
                    orphaned_image_url = %record.image_url,
                    "failed to write catalog record: {}",
                    e
                );
                return ItemOutcome::Failed(FailureReason::CatalogError);
            }
        }

        let completion = CompletionEvent::from(record);
        match self
            .stage(
                Stage::Notifying,
                self.timeouts.publish,
                self.publisher.publish(&completion),
                PublishError::Timeout,
            )
            .await
        {
            Ok(()) => {
                info!(
                    image_url = %completion.data.image_url,
                    "thumbnail created and catalogued"
                );
                ItemOutcome::Completed(None)
            }
            Err(e) => {
                warn!(
                    stage = "notifying",
                    subject = %completion.subject,
                    "catalogued, but failed to publish completion event: {}",
                    e
                );
                ItemOutcome::Completed(Some(CompletionWarning::PublishError))
            }
        }
    }

    /// Run one network-bound stage under its timeout, recording how long it took.
    async fn stage<T, E>(
        &self,
        stage: Stage,
        limit: time::Duration,
        work: impl Future<Output = Result<T, E>>,
        on_timeout: impl FnOnce(time::Duration) -> E,
    ) -> Result<T, E> {
        let timer = timing_guard(STAGE_DURATION).label("stage", stage.as_str());

        let result = match tokio::time::timeout(limit, work).await {
            Ok(result) => result,
            Err(_) => Err(on_timeout(limit)),
        };

        timer
            .label("outcome", if result.is_ok() { "success" } else { "failure" })
            .fin();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact_store::MemoryArtifactStore;
    use crate::catalog::MemoryCatalog;
    use crate::publisher::MemoryPublisher;
    use crate::transform::ThumbnailSpec;
    use async_trait::async_trait;
    use bytes::Bytes;
    use image::{DynamicImage, ImageFormat, RgbImage};
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Serves fixed bytes for every URL and counts how often it was asked.
    struct StaticFetcher {
        body: Result<Bytes, http::StatusCode>,
        calls: AtomicUsize,
    }

    impl StaticFetcher {
        fn ok(body: Vec<u8>) -> Self {
            Self {
                body: Ok(Bytes::from(body)),
                calls: AtomicUsize::new(0),
            }
        }

        fn status(status: http::StatusCode) -> Self {
            Self {
                body: Err(status),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ImageFetcher for StaticFetcher {
        async fn fetch(&self, _url: &str) -> Result<Bytes, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.body.clone().map_err(FetchError::Status)
        }
    }

    /// Never answers, to exercise stage timeouts.
    struct HangingFetcher;

    #[async_trait]
    impl ImageFetcher for HangingFetcher {
        async fn fetch(&self, _url: &str) -> Result<Bytes, FetchError> {
            std::future::pending().await
        }
    }

    /// Never answers any store, catalog or publish call.
    struct Hanging;

    #[async_trait]
    impl ArtifactStore for Hanging {
        async fn store(&self, _jpeg: Vec<u8>) -> Result<String, StoreError> {
            std::future::pending().await
        }
    }

    #[async_trait]
    impl Catalog for Hanging {
        async fn create(&self, _record: &CatalogRecord) -> Result<(), CatalogError> {
            std::future::pending().await
        }
    }

    #[async_trait]
    impl CompletionPublisher for Hanging {
        async fn publish(&self, _event: &CompletionEvent) -> Result<(), PublishError> {
            std::future::pending().await
        }
    }

    fn short_timeouts() -> StageTimeouts {
        let limit = time::Duration::from_millis(20);
        StageTimeouts {
            fetch: time::Duration::from_secs(10),
            store: limit,
            catalog: limit,
            publish: limit,
        }
    }

    fn jpeg_source() -> Vec<u8> {
        let image = RgbImage::from_fn(300, 200, |x, y| image::Rgb([x as u8, y as u8, 64]));
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(image)
            .write_to(&mut out, ImageFormat::Jpeg)
            .unwrap();
        out.into_inner()
    }

    fn truffle_bar(blob_url: Option<&str>) -> InboundEvent {
        InboundEvent {
            name: "TruffleBar".to_owned(),
            brand: "Meltique".to_owned(),
            price: 4.5,
            quantity_available: 10,
            blob_url: blob_url.map(str::to_owned),
        }
    }

    struct Harness {
        fetcher: Arc<StaticFetcher>,
        artifacts: Arc<MemoryArtifactStore>,
        catalog: Arc<MemoryCatalog>,
        publisher: Arc<MemoryPublisher>,
    }

    impl Harness {
        fn new(fetcher: StaticFetcher) -> Self {
            Self {
                fetcher: Arc::new(fetcher),
                artifacts: Arc::new(MemoryArtifactStore::new()),
                catalog: Arc::new(MemoryCatalog::new()),
                publisher: Arc::new(MemoryPublisher::new()),
            }
        }

        fn processor(&self) -> ItemProcessor {
            ItemProcessor::new(
                self.fetcher.clone(),
                Arc::new(Thumbnailer::new(ThumbnailSpec::default())),
                self.artifacts.clone(),
                self.catalog.clone(),
                self.publisher.clone(),
                StageTimeouts::default(),
            )
        }

        fn assert_untouched_after_fetch(&self) {
            assert!(self.artifacts.artifacts().is_empty());
            assert!(self.catalog.is_empty());
            assert!(self.publisher.published().is_empty());
        }
    }

    #[tokio::test]
    async fn test_completed_item_writes_everything_in_order() {
        let harness = Harness::new(StaticFetcher::ok(jpeg_source()));

        let outcome = harness
            .processor()
            .process(&truffle_bar(Some("https://images/truffle.jpg")))
            .await;

        assert_eq!(outcome, ItemOutcome::Completed(None));

        let record = harness.catalog.get("Meltique", "TruffleBar").unwrap();
        assert_eq!(record.price, 4.5);
        assert_eq!(record.quantity_available, 10);
        let artifact = harness.artifacts.get(&record.image_url).unwrap();
        assert_eq!(artifact.content_type, "image/jpeg");

        let published = harness.publisher.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].subject, "Products/Meltique/TruffleBar");
        assert_eq!(published[0].data, record);
    }

    #[tokio::test]
    async fn test_missing_url_touches_nothing() {
        let harness = Harness::new(StaticFetcher::ok(jpeg_source()));

        for blob_url in [None, Some(""), Some("  ")] {
            let outcome = harness.processor().process(&truffle_bar(blob_url)).await;
            assert_eq!(outcome, ItemOutcome::Skipped(SkipReason::MissingUrl));
        }

        assert_eq!(harness.fetcher.calls.load(Ordering::SeqCst), 0);
        harness.assert_untouched_after_fetch();
    }

    #[tokio::test]
    async fn test_event_with_no_fields_is_skipped() {
        let harness = Harness::new(StaticFetcher::ok(jpeg_source()));
        let event: InboundEvent = serde_json::from_value(serde_json::json!({})).unwrap();

        let outcome = harness.processor().process(&event).await;

        assert_eq!(outcome, ItemOutcome::Skipped(SkipReason::MissingUrl));
        assert_eq!(harness.fetcher.calls.load(Ordering::SeqCst), 0);
        harness.assert_untouched_after_fetch();
    }

    #[tokio::test]
    async fn test_unrecognized_payload_is_skipped() {
        let harness = Harness::new(StaticFetcher::ok(
            b"<!DOCTYPE html><html><body>hello</body></html>".to_vec(),
        ));

        let outcome = harness
            .processor()
            .process(&truffle_bar(Some("https://shop/index.html")))
            .await;

        assert_eq!(outcome, ItemOutcome::Skipped(SkipReason::UnsupportedFormat));
        assert_eq!(harness.fetcher.calls.load(Ordering::SeqCst), 1);
        harness.assert_untouched_after_fetch();
    }

    #[tokio::test]
    async fn test_fetch_failure() {
        let harness = Harness::new(StaticFetcher::status(http::StatusCode::NOT_FOUND));

        let outcome = harness
            .processor()
            .process(&truffle_bar(Some("https://images/missing.jpg")))
            .await;

        assert_eq!(outcome, ItemOutcome::Failed(FailureReason::FetchError));
        harness.assert_untouched_after_fetch();
    }

    #[tokio::test]
    async fn test_corrupt_image_is_transform_error() {
        let mut corrupt = jpeg_source();
        corrupt.truncate(64);
        let harness = Harness::new(StaticFetcher::ok(corrupt));

        let outcome = harness
            .processor()
            .process(&truffle_bar(Some("https://images/corrupt.jpg")))
            .await;

        assert_eq!(outcome, ItemOutcome::Failed(FailureReason::TransformError));
        harness.assert_untouched_after_fetch();
    }

    #[tokio::test]
    async fn test_store_failure_skips_catalog() {
        let mut harness = Harness::new(StaticFetcher::ok(jpeg_source()));
        harness.artifacts = Arc::new(
            MemoryArtifactStore::new().fail_with(StoreError::UploadFailed("denied".to_owned())),
        );

        let outcome = harness
            .processor()
            .process(&truffle_bar(Some("https://images/truffle.jpg")))
            .await;

        assert_eq!(outcome, ItemOutcome::Failed(FailureReason::StoreError));
        assert!(harness.catalog.is_empty());
        assert!(harness.publisher.published().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_identity_conflicts() {
        let harness = Harness::new(StaticFetcher::ok(jpeg_source()));
        let processor = harness.processor();
        let event = truffle_bar(Some("https://images/truffle.jpg"));

        let first = processor.process(&event).await;
        let second = processor.process(&event).await;

        assert_eq!(first, ItemOutcome::Completed(None));
        assert_eq!(second, ItemOutcome::Failed(FailureReason::Conflict));
        assert_eq!(harness.catalog.len(), 1);
        // The second thumbnail was stored before the conflict and is left orphaned
        assert_eq!(harness.artifacts.artifacts().len(), 2);
        assert_eq!(harness.publisher.published().len(), 1);
    }

    #[tokio::test]
    async fn test_catalog_failure_is_not_conflict() {
        let mut harness = Harness::new(StaticFetcher::ok(jpeg_source()));
        harness.catalog = Arc::new(
            MemoryCatalog::new()
                .fail_with(CatalogError::WriteFailed("connection reset".to_owned())),
        );

        let outcome = harness
            .processor()
            .process(&truffle_bar(Some("https://images/truffle.jpg")))
            .await;

        assert_eq!(outcome, ItemOutcome::Failed(FailureReason::CatalogError));
        assert!(harness.publisher.published().is_empty());
    }

    #[tokio::test]
    async fn test_publish_failure_still_completes() {
        let mut harness = Harness::new(StaticFetcher::ok(jpeg_source()));
        harness.publisher = Arc::new(
            MemoryPublisher::new().fail_with(PublishError::Delivery("broker down".to_owned())),
        );

        let outcome = harness
            .processor()
            .process(&truffle_bar(Some("https://images/truffle.jpg")))
            .await;

        assert_eq!(
            outcome,
            ItemOutcome::Completed(Some(CompletionWarning::PublishError))
        );
        assert!(harness.catalog.get("Meltique", "TruffleBar").is_some());
    }

    #[tokio::test]
    async fn test_fetch_timeout_is_fetch_error() {
        let harness = Harness::new(StaticFetcher::ok(vec![]));
        let processor = ItemProcessor::new(
            Arc::new(HangingFetcher),
            Arc::new(Thumbnailer::new(ThumbnailSpec::default())),
            harness.artifacts.clone(),
            harness.catalog.clone(),
            harness.publisher.clone(),
            StageTimeouts {
                fetch: time::Duration::from_millis(20),
                ..StageTimeouts::default()
            },
        );

        let outcome = processor
            .process(&truffle_bar(Some("https://images/slow.jpg")))
            .await;

        assert_eq!(outcome, ItemOutcome::Failed(FailureReason::FetchError));
        harness.assert_untouched_after_fetch();
    }

    #[tokio::test]
    async fn test_store_timeout_is_store_error() {
        let harness = Harness::new(StaticFetcher::ok(jpeg_source()));
        let processor = ItemProcessor::new(
            harness.fetcher.clone(),
            Arc::new(Thumbnailer::new(ThumbnailSpec::default())),
            Arc::new(Hanging),
            harness.catalog.clone(),
            harness.publisher.clone(),
            short_timeouts(),
        );

        let outcome = processor
            .process(&truffle_bar(Some("https://images/truffle.jpg")))
            .await;

        assert_eq!(outcome, ItemOutcome::Failed(FailureReason::StoreError));
        assert!(harness.catalog.is_empty());
        assert!(harness.publisher.published().is_empty());
    }

    #[tokio::test]
    async fn test_catalog_timeout_is_catalog_error() {
        let harness = Harness::new(StaticFetcher::ok(jpeg_source()));
        let processor = ItemProcessor::new(
            harness.fetcher.clone(),
            Arc::new(Thumbnailer::new(ThumbnailSpec::default())),
            harness.artifacts.clone(),
            Arc::new(Hanging),
            harness.publisher.clone(),
            short_timeouts(),
        );

        let outcome = processor
            .process(&truffle_bar(Some("https://images/truffle.jpg")))
            .await;

        assert_eq!(outcome, ItemOutcome::Failed(FailureReason::CatalogError));
        assert_eq!(harness.artifacts.artifacts().len(), 1);
        assert!(harness.publisher.published().is_empty());
    }

    #[tokio::test]
    async fn test_publish_timeout_keeps_catalog_record() {
        let harness = Harness::new(StaticFetcher::ok(jpeg_source()));
        let processor = ItemProcessor::new(
            harness.fetcher.clone(),
            Arc::new(Thumbnailer::new(ThumbnailSpec::default())),
            harness.artifacts.clone(),
            harness.catalog.clone(),
            Arc::new(Hanging),
            short_timeouts(),
        );

        let outcome = processor
            .process(&truffle_bar(Some("https://images/truffle.jpg")))
            .await;

        assert_eq!(
            outcome,
            ItemOutcome::Completed(Some(CompletionWarning::PublishError))
        );
        let record = harness.catalog.get("Meltique", "TruffleBar").unwrap();
        assert!(harness.artifacts.get(&record.image_url).is_some());
    }
}
