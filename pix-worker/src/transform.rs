use std::io::Cursor;
use std::sync::Arc;

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use tracing::debug;

use crate::error::TransformError;

pub const THUMBNAIL_CONTENT_TYPE: &str = "image/jpeg";

#[derive(Debug, Clone, Copy)]
pub struct ThumbnailSpec {
    pub width: u32,
    pub height: u32,
    pub jpeg_quality: u8,
}

impl Default for ThumbnailSpec {
    fn default() -> Self {
        Self {
            width: 150,
            height: 150,
            jpeg_quality: 80,
        }
    }
}

/// Sniff the image format from the payload's magic bytes. `None` means the payload is
/// not an image we can decode, which callers treat as a skip rather than a fault.
pub fn detect_format(data: &[u8]) -> Option<ImageFormat> {
    image::guess_format(data)
        .ok()
        .filter(|format| format.reading_enabled())
}

/// Turns source images into fixed-box JPEG thumbnails.
///
/// The source is scaled to cover the box and center-cropped, so the output is always
/// exactly `width`x`height`. Filter, crop and encoder settings are fixed, so identical
/// input always yields identical bytes.
#[derive(Debug, Clone)]
pub struct Thumbnailer {
    spec: ThumbnailSpec,
}

impl Thumbnailer {
    pub fn new(spec: ThumbnailSpec) -> Self {
        Self { spec }
    }

    /// CPU bound, don't call this from async code directly, see `resize_blocking`.
    pub fn resize(&self, data: &[u8], format: ImageFormat) -> Result<Vec<u8>, TransformError> {
        let source =
            image::load_from_memory_with_format(data, format).map_err(TransformError::Decode)?;

        let thumbnail =
            source.resize_to_fill(self.spec.width, self.spec.height, FilterType::Triangle);
        // JPEG has no alpha channel, flatten before encoding
        let thumbnail = DynamicImage::ImageRgb8(thumbnail.to_rgb8());

        let mut encoded = Cursor::new(Vec::new());
        let encoder = JpegEncoder::new_with_quality(&mut encoded, self.spec.jpeg_quality);
        thumbnail
            .write_with_encoder(encoder)
            .map_err(TransformError::Encode)?;

        debug!(
            source_width = source.width(),
            source_height = source.height(),
            bytes = encoded.get_ref().len(),
            "thumbnail generated"
        );

        Ok(encoded.into_inner())
    }

    /// Run `resize` on the blocking thread pool.
    pub async fn resize_blocking(
        self: Arc<Self>,
        data: Bytes,
        format: ImageFormat,
    ) -> Result<Vec<u8>, TransformError> {
        tokio::task::spawn_blocking(move || self.resize(&data, format))
            .await
            .map_err(|e| TransformError::Task(e.to_string()))?
    }
}
