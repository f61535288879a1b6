//! Question generation over the text model capability.
//!
//! The model call is governed by a configurable retry policy whose default
//! is a single attempt; only transient transport failures consume retries.
//! Output parsing is strict and all-or-nothing: the JSON array is located
//! between the first `[` and the last `]`, parsed as a whole, and a single
//! malformed element fails the entire call.

use std::{sync::Arc, time::Duration};

use bon::Builder;
use thiserror::Error;
use tracing::{debug, warn};

use crate::pipeline::prompt::QuestionPrompt;
use crate::pipeline::quiz::{Question, find_json_array};
use crate::services::model::{ModelError, TextModel};

const MALFORMED_PREVIEW_CHARS: usize = 200;
const PARSE_PREVIEW_CHARS: usize = 300;

/// Attempt budget for the generation call.
#[derive(Debug, Clone, Builder)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Defaults to a single shot.
    #[builder(default = 1)]
    pub max_attempts: u32,
    #[builder(default = Duration::from_secs(2))]
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("model returned an empty response")]
    EmptyResponse,
    #[error("could not find JSON array in model output; preview: {preview}")]
    MalformedOutput { preview: String },
    #[error("failed to parse generated questions: {source}; output preview: {preview}")]
    JsonParse {
        preview: String,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Generator over an injected text capability.
pub struct QuestionGenerator {
    model: Arc<dyn TextModel>,
    policy: RetryPolicy,
}

impl QuestionGenerator {
    pub fn new(model: Arc<dyn TextModel>, policy: RetryPolicy) -> Self {
        debug_assert!(policy.max_attempts >= 1);
        Self { model, policy }
    }

    /// Invoke the model and coerce its output into typed questions.
    pub async fn generate(&self, prompt: &QuestionPrompt) -> Result<Vec<Question>, GenerateError> {
        let raw = self.invoke_with_policy(prompt).await?;
        parse_questions(&raw)
    }

    async fn invoke_with_policy(&self, prompt: &QuestionPrompt) -> Result<String, GenerateError> {
        let max_attempts = self.policy.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            match self.model.generate(prompt).await {
                Ok(raw) => {
                    debug!(attempt, raw_chars = raw.chars().count(), "generation succeeded");
                    return Ok(raw);
                }
                Err(source) if source.is_transient() && attempt < max_attempts => {
                    warn!(attempt, %source, "transient generation failure, retrying");
                    tokio::time::sleep(self.policy.retry_delay).await;
                }
                Err(source) => return Err(GenerateError::Model(source)),
            }
        }

        unreachable!("retry loop always returns within max_attempts")
    }
}

/// Strict extraction and coercion of the model's raw output.
pub fn parse_questions(raw: &str) -> Result<Vec<Question>, GenerateError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(GenerateError::EmptyResponse);
    }

    let array = find_json_array(trimmed).ok_or_else(|| GenerateError::MalformedOutput {
        preview: char_preview(trimmed, MALFORMED_PREVIEW_CHARS),
    })?;

    serde_json::from_str(array).map_err(|source| GenerateError::JsonParse {
        preview: char_preview(trimmed, PARSE_PREVIEW_CHARS),
        source,
    })
}

fn char_preview(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
