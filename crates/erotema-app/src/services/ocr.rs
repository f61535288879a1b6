//! Batch OCR over uploaded images.
//!
//! Images are processed strictly sequentially because the concatenated text
//! must preserve input order and retries use blocking delays. Per image the
//! state machine is Pending -> Extracting -> (transient failure -> Pending,
//! bounded) -> Success | Fatal; any Fatal aborts the whole batch with the
//! 1-based image index, never a partial result.

use std::{sync::Arc, time::Duration};

use bon::Builder;
use thiserror::Error;
use tracing::{debug, warn};

use crate::pipeline::image::{self, ImageError, PreparedImage};
use crate::pipeline::quiz::ImageUpload;
use crate::services::model::{ModelError, VisionModel};

/// Fixed instruction sent with every OCR call.
pub const OCR_INSTRUCTION: &str =
    "Extract all text from this image, including mixed-script content.";

/// Retry parameters for the vision capability.
#[derive(Debug, Clone, Builder)]
pub struct OcrConfig {
    /// Total attempts per image, including the first.
    #[builder(default = 3)]
    pub max_attempts: u32,
    /// Fixed delay between attempts.
    #[builder(default = Duration::from_secs(2))]
    pub retry_delay: Duration,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("failed to prepare image {index}: {source}")]
    Prepare {
        index: usize,
        #[source]
        source: ImageError,
    },
    #[error("error extracting text from image {index} after {attempts} attempts: {source}")]
    Extraction {
        index: usize,
        attempts: u32,
        #[source]
        source: ModelError,
    },
    #[error("OCR task join failed: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

impl OcrError {
    /// 1-based index of the image the batch failed on, when applicable.
    pub fn image_index(&self) -> Option<usize> {
        match self {
            Self::Prepare { index, .. } | Self::Extraction { index, .. } => Some(*index),
            Self::TaskJoin(_) => None,
        }
    }
}

/// Concatenated OCR output with per-image provenance markers.
#[derive(Debug, Clone)]
pub struct BatchExtraction {
    /// Marker-delimited sections, one per image, in input order.
    pub text: String,
    /// True when at least one image yielded non-whitespace text.
    pub has_content: bool,
}

/// Sequential batch extractor over an injected vision capability.
pub struct OcrExtractor {
    vision: Arc<dyn VisionModel>,
    config: OcrConfig,
}

impl OcrExtractor {
    pub fn new(vision: Arc<dyn VisionModel>, config: OcrConfig) -> Self {
        debug_assert!(config.max_attempts >= 1);
        Self { vision, config }
    }

    /// Extract text from every image in input order and concatenate the
    /// results with `--- Image N ---` provenance markers, one blank line
    /// between images. A whitespace-only extraction is a valid return;
    /// `has_content` tells the caller whether any image produced real text,
    /// since the markers themselves make the concatenation non-empty.
    pub async fn extract_batch(&self, images: &[ImageUpload]) -> Result<BatchExtraction, OcrError> {
        let mut sections = Vec::with_capacity(images.len());
        let mut has_content = false;

        for (position, upload) in images.iter().enumerate() {
            let index = position + 1;
            let prepared = self.prepare_image(index, upload).await?;
            let text = self.extract_with_retry(index, &prepared).await?;
            has_content |= !text.trim().is_empty();
            sections.push(format!("--- Image {index} ---\n{text}\n"));
        }

        Ok(BatchExtraction {
            text: sections.join("\n"),
            has_content,
        })
    }

    async fn prepare_image(
        &self,
        index: usize,
        upload: &ImageUpload,
    ) -> Result<PreparedImage, OcrError> {
        let bytes = upload.bytes.clone();
        // Decode and resample are CPU-bound; keep them off the async workers.
        let prepared = tokio::task::spawn_blocking(move || image::prepare(&bytes))
            .await?
            .map_err(|source| OcrError::Prepare { index, source })?;

        debug!(
            image = index,
            width = prepared.width,
            height = prepared.height,
            "prepared image for OCR"
        );
        Ok(prepared)
    }

    async fn extract_with_retry(
        &self,
        index: usize,
        prepared: &PreparedImage,
    ) -> Result<String, OcrError> {
        let max_attempts = self.config.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            // The prepared buffer is re-read on every attempt, so there is
            // no stateful cursor left to reset between retries.
            match self.vision.extract_text(prepared, OCR_INSTRUCTION).await {
                Ok(text) => {
                    debug!(image = index, attempt, "OCR attempt succeeded");
                    return Ok(text);
                }
                Err(source) if source.is_transient() && attempt < max_attempts => {
                    warn!(
                        image = index,
                        attempt,
                        delay_ms = self.config.retry_delay.as_millis() as u64,
                        %source,
                        "transient OCR failure, retrying"
                    );
                    tokio::time::sleep(self.config.retry_delay).await;
                }
                Err(source) => {
                    return Err(OcrError::Extraction {
                        index,
                        attempts: attempt,
                        source,
                    });
                }
            }
        }

        unreachable!("retry loop always returns within max_attempts")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    // `super::*` pulls in the parent's `image` module import, so the extern
    // crate needs the leading `::` here.
    use ::image::{DynamicImage, ImageBuffer, Rgb};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn tiny_png() -> ImageUpload {
        let buffer = ImageBuffer::from_pixel(4, 4, Rgb::<u8>([255, 255, 255]));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(buffer)
            .write_to(
                &mut std::io::Cursor::new(&mut bytes),
                ::image::ImageFormat::Png,
            )
            .expect("encode test png");
        ImageUpload {
            bytes: Bytes::from(bytes),
            mime_type: "image/png".to_string(),
        }
    }

    /// Vision fake that pops one scripted outcome per call.
    struct ScriptedVision {
        script: Mutex<Vec<Result<String, ModelError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedVision {
        fn new(script: Vec<Result<String, ModelError>>) -> Self {
            Self {
                script: Mutex::new(script),
                calls: AtomicUsize::new(0),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl VisionModel for ScriptedVision {
        async fn extract_text(
            &self,
            _image: &PreparedImage,
            instruction: &str,
        ) -> Result<String, ModelError> {
            assert_eq!(instruction, OCR_INSTRUCTION);
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .expect("script lock poisoned")
                .remove(0)
        }
    }

    fn fast_config() -> OcrConfig {
        OcrConfig::builder()
            .retry_delay(Duration::from_millis(1))
            .build()
    }

    fn timeout_error() -> ModelError {
        ModelError::Timeout
    }

    #[tokio::test]
    async fn batch_output_carries_ordered_markers() {
        let vision = Arc::new(ScriptedVision::new(vec![
            Ok("first page".to_string()),
            Ok("second page".to_string()),
            Ok("third page".to_string()),
        ]));
        let extractor = OcrExtractor::new(vision.clone(), fast_config());

        let batch = extractor
            .extract_batch(&[tiny_png(), tiny_png(), tiny_png()])
            .await
            .expect("batch succeeds");

        let marker_positions: Vec<usize> = (1..=3)
            .map(|n| {
                batch
                    .text
                    .find(&format!("--- Image {n} ---"))
                    .unwrap_or_else(|| panic!("marker {n} present"))
            })
            .collect();
        assert!(marker_positions.windows(2).all(|pair| pair[0] < pair[1]));
        assert_eq!(batch.text.matches("--- Image").count(), 3);
        assert!(batch.text.contains("second page"));
        assert!(batch.has_content);
        assert_eq!(vision.call_count(), 3);
    }

    #[tokio::test]
    async fn transient_failure_then_success_is_transparent() {
        let flaky = Arc::new(ScriptedVision::new(vec![
            Err(timeout_error()),
            Ok("recovered text".to_string()),
        ]));
        let extractor = OcrExtractor::new(flaky.clone(), fast_config());
        let with_retry = extractor
            .extract_batch(&[tiny_png()])
            .await
            .expect("retry recovers");

        let steady = Arc::new(ScriptedVision::new(vec![Ok("recovered text".to_string())]));
        let without_retry = OcrExtractor::new(steady, fast_config())
            .extract_batch(&[tiny_png()])
            .await
            .expect("immediate success");

        assert_eq!(with_retry.text, without_retry.text);
        assert_eq!(flaky.call_count(), 2);
    }

    #[tokio::test]
    async fn exhausted_retries_abort_with_the_failing_index() {
        let vision = Arc::new(ScriptedVision::new(vec![
            Ok("fine".to_string()),
            Err(timeout_error()),
            Err(timeout_error()),
            Err(timeout_error()),
        ]));
        let extractor = OcrExtractor::new(vision.clone(), fast_config());

        let error = extractor
            .extract_batch(&[tiny_png(), tiny_png()])
            .await
            .expect_err("second image must fail the batch");

        match error {
            OcrError::Extraction {
                index, attempts, ..
            } => {
                assert_eq!(index, 2);
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(vision.call_count(), 4);
    }

    #[tokio::test]
    async fn fatal_failure_does_not_retry() {
        let vision = Arc::new(ScriptedVision::new(vec![Err(ModelError::Status {
            status: 400,
            body: "bad image".to_string(),
        })]));
        let extractor = OcrExtractor::new(vision.clone(), fast_config());

        let error = extractor
            .extract_batch(&[tiny_png()])
            .await
            .expect_err("fatal error aborts");

        match error {
            OcrError::Extraction {
                index, attempts, ..
            } => {
                assert_eq!(index, 1);
                assert_eq!(attempts, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(vision.call_count(), 1);
    }

    #[tokio::test]
    async fn undecodable_image_fails_with_prepare_error() {
        let vision = Arc::new(ScriptedVision::new(vec![]));
        let extractor = OcrExtractor::new(vision.clone(), fast_config());
        let upload = ImageUpload {
            bytes: Bytes::from_static(b"not an image"),
            mime_type: "image/png".to_string(),
        };

        let error = extractor
            .extract_batch(&[upload])
            .await
            .expect_err("decode must fail");
        assert_eq!(error.image_index(), Some(1));
        assert_eq!(vision.call_count(), 0);
    }

    #[tokio::test]
    async fn whitespace_only_text_is_a_valid_result_without_content() {
        let vision = Arc::new(ScriptedVision::new(vec![Ok("   ".to_string())]));
        let extractor = OcrExtractor::new(vision, fast_config());

        let batch = extractor
            .extract_batch(&[tiny_png()])
            .await
            .expect("whitespace output is not an OCR error");
        // The marker text alone never counts as extracted content.
        assert!(batch.text.contains("--- Image 1 ---"));
        assert!(!batch.has_content);
    }

    #[tokio::test]
    async fn one_real_extraction_among_blanks_counts_as_content() {
        let vision = Arc::new(ScriptedVision::new(vec![
            Ok("\n".to_string()),
            Ok("actual text".to_string()),
        ]));
        let extractor = OcrExtractor::new(vision, fast_config());

        let batch = extractor
            .extract_batch(&[tiny_png(), tiny_png()])
            .await
            .expect("batch succeeds");
        assert!(batch.has_content);
    }
}
