//! End-to-end pipeline: validation, OCR, prompt, generation, assembly.
//!
//! Validation runs before any image decoding or network call so invalid
//! requests never spend model budget. The pipeline accepts one or more
//! images; stricter minimums (the HTTP route demands two) belong to the
//! caller.

use std::{sync::Arc, time::Instant};

use thiserror::Error;
use tracing::info;

use crate::pipeline::prompt::build_question_prompt;
use crate::pipeline::quiz::{
    ImageUpload, PREVIEW_CHAR_BUDGET, QuizResponse, QuizSpec, QuizValidationError, text_preview,
};
use crate::services::events::{EventSink, StageEvent, StageOutcome, TracingEventSink};
use crate::services::generate::{GenerateError, QuestionGenerator};
use crate::services::ocr::{OcrError, OcrExtractor};

#[derive(Debug, Error)]
pub enum QuizError {
    #[error(transparent)]
    Validation(#[from] QuizValidationError),
    #[error("no text could be extracted from the images")]
    NoContent,
    #[error(transparent)]
    Ocr(#[from] OcrError),
    #[error(transparent)]
    Generate(#[from] GenerateError),
}

pub struct QuizPipeline {
    ocr: OcrExtractor,
    generator: QuestionGenerator,
    events: Arc<dyn EventSink>,
}

impl QuizPipeline {
    pub fn new(ocr: OcrExtractor, generator: QuestionGenerator) -> Self {
        Self::with_events(ocr, generator, Arc::new(TracingEventSink))
    }

    pub fn with_events(
        ocr: OcrExtractor,
        generator: QuestionGenerator,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            ocr,
            generator,
            events,
        }
    }

    /// Run the full batch pipeline for one request.
    pub async fn run(
        &self,
        images: &[ImageUpload],
        spec: &QuizSpec,
    ) -> Result<QuizResponse, QuizError> {
        validate_request(images, spec)?;

        let extracted = self.timed("ocr_extract", self.ocr.extract_batch(images)).await?;
        // Provenance markers always make the text non-empty; the batch's own
        // content flag is what distinguishes blank extractions.
        if !extracted.has_content {
            return Err(QuizError::NoContent);
        }

        let prompt = build_question_prompt(&extracted.text, spec);
        let questions = self.timed("generate", self.generator.generate(&prompt)).await?;

        info!(
            subject = %spec.subject,
            images = images.len(),
            questions = questions.len(),
            "quiz generation complete"
        );

        Ok(QuizResponse {
            success: true,
            subject: spec.subject.clone(),
            total_questions: questions.len(),
            questions,
            extracted_text_preview: text_preview(&extracted.text, PREVIEW_CHAR_BUDGET),
        })
    }

    async fn timed<T, E>(
        &self,
        stage: &'static str,
        future: impl Future<Output = Result<T, E>>,
    ) -> Result<T, E> {
        let started = Instant::now();
        let result = future.await;
        self.events.stage_completed(StageEvent {
            stage,
            duration: started.elapsed(),
            outcome: if result.is_ok() {
                StageOutcome::Succeeded
            } else {
                StageOutcome::Failed
            },
        });
        result
    }
}

/// Cheap input checks before any decode or model call.
fn validate_request(images: &[ImageUpload], spec: &QuizSpec) -> Result<(), QuizValidationError> {
    let mut issues = Vec::new();

    if images.is_empty() {
        issues.push("at least one image is required".to_string());
    }

    for (position, image) in images.iter().enumerate() {
        if !image.has_valid_mime_type() {
            issues.push(format!(
                "invalid file type for image {}: {}. Allowed types: jpeg, jpg, png, webp",
                position + 1,
                image.mime_type
            ));
        }
    }

    if let Err(error) = spec.validate() {
        issues.extend(error.issues);
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(QuizValidationError { issues })
    }
}
