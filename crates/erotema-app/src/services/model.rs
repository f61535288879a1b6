//! Capability seams for the hosted vision and text models.
//!
//! The pipeline never talks to a vendor SDK directly; it is handed trait
//! objects so tests can script failures and production wires in the Gemini
//! client. Errors are typed with a transient classification so retry policy
//! lives with the caller, not the transport.

use async_trait::async_trait;
use thiserror::Error;

use crate::pipeline::image::PreparedImage;
use crate::pipeline::prompt::QuestionPrompt;

const TRANSIENT_STATUS_CODES: [u16; 2] = [503, 504];

/// Failures surfaced by a model capability.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("missing GOOGLE_AI_API_KEY or GEMINI_API_KEY environment variable")]
    MissingApiKey,
    #[error("model request timed out")]
    Timeout,
    #[error("model request failed: {source}")]
    Transport {
        #[source]
        source: reqwest::Error,
    },
    #[error("model returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("model response carried no text candidates")]
    EmptyCandidates,
    #[error("model failure: {message}")]
    Other { message: String },
}

impl ModelError {
    /// Whether a retry may plausibly succeed.
    ///
    /// Timeouts and gateway-timeout-class statuses are transient. For
    /// unclassified failures a substring heuristic on the message survives
    /// as a boundary fallback only.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout => true,
            Self::Status { status, .. } => TRANSIENT_STATUS_CODES.contains(status),
            Self::Transport { source } => source.is_timeout(),
            Self::Other { message } => {
                let lower = message.to_lowercase();
                lower.contains("timeout") || lower.contains("504")
            }
            Self::MissingApiKey | Self::EmptyCandidates => false,
        }
    }
}

/// Extract text from a prepared image using a fixed instruction.
#[async_trait]
pub trait VisionModel: Send + Sync {
    async fn extract_text(
        &self,
        image: &PreparedImage,
        instruction: &str,
    ) -> Result<String, ModelError>;
}

/// Generate free-form text from a prompt in a single round-trip.
#[async_trait]
pub trait TextModel: Send + Sync {
    async fn generate(&self, prompt: &QuestionPrompt) -> Result<String, ModelError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_and_gateway_statuses_are_transient() {
        assert!(ModelError::Timeout.is_transient());
        assert!(
            ModelError::Status {
                status: 504,
                body: String::new()
            }
            .is_transient()
        );
        assert!(
            ModelError::Status {
                status: 503,
                body: String::new()
            }
            .is_transient()
        );
    }

    #[test]
    fn client_errors_are_fatal() {
        assert!(
            !ModelError::Status {
                status: 400,
                body: "bad request".to_string()
            }
            .is_transient()
        );
        assert!(!ModelError::MissingApiKey.is_transient());
        assert!(!ModelError::EmptyCandidates.is_transient());
    }

    #[test]
    fn unclassified_errors_fall_back_to_message_heuristic() {
        let timeout = ModelError::Other {
            message: "Deadline Timeout exceeded".to_string(),
        };
        assert!(timeout.is_transient());

        let gateway = ModelError::Other {
            message: "upstream replied 504".to_string(),
        };
        assert!(gateway.is_transient());

        let fatal = ModelError::Other {
            message: "invalid argument".to_string(),
        };
        assert!(!fatal.is_transient());
    }
}
