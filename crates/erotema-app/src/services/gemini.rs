//! Gemini REST client implementing both model capabilities.
//!
//! One `generateContent` round-trip per call: images travel as base64
//! `inline_data` parts, the instruction as a text part, and the generation
//! stage additionally carries a `system_instruction`. OCR runs at
//! temperature 0.0, question generation at 0.7.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::pipeline::image::PreparedImage;
use crate::pipeline::prompt::QuestionPrompt;
use crate::services::model::{ModelError, TextModel, VisionModel};

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const OCR_TEMPERATURE: f32 = 0.0;
const GENERATION_TEMPERATURE: f32 = 0.7;
const STATUS_BODY_PREVIEW_CHARS: usize = 300;

/// Default model identifier when configuration does not override it.
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-lite";

#[derive(Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl GeminiClient {
    /// Build a client from the environment key fallback chain.
    pub fn from_env(model: impl Into<String>) -> Result<Self, ModelError> {
        let api_key = std::env::var("GOOGLE_AI_API_KEY")
            .or_else(|_| std::env::var("GEMINI_API_KEY"))
            .map_err(|_| ModelError::MissingApiKey)?;
        Self::new(api_key, model)
    }

    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self, ModelError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|source| ModelError::Transport { source })?;
        Ok(Self {
            http,
            api_key: api_key.into(),
            model: model.into(),
        })
    }

    async fn generate_content(
        &self,
        request: &GenerateContentRequest,
    ) -> Result<String, ModelError> {
        let url = format!("{GEMINI_API_BASE}/{}:generateContent", self.model);
        let response = self
            .http
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(request)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let preview: String = body.chars().take(STATUS_BODY_PREVIEW_CHARS).collect();
            return Err(ModelError::Status {
                status: status.as_u16(),
                body: preview,
            });
        }

        let payload: GenerateContentResponse =
            response.json().await.map_err(classify_transport)?;

        if let Some(usage) = payload.usage_metadata.as_ref() {
            debug!(
                model = %self.model,
                prompt_tokens = usage.prompt_token_count,
                candidate_tokens = usage.candidates_token_count,
                total_tokens = usage.total_token_count,
                "gemini invocation usage"
            );
        }

        payload.text().ok_or(ModelError::EmptyCandidates)
    }
}

#[async_trait]
impl VisionModel for GeminiClient {
    async fn extract_text(
        &self,
        image: &PreparedImage,
        instruction: &str,
    ) -> Result<String, ModelError> {
        let request = GenerateContentRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![
                    Part::InlineData {
                        inline_data: InlineData {
                            mime_type: image.mime_type.to_string(),
                            data: BASE64_STANDARD.encode(&image.data),
                        },
                    },
                    Part::Text {
                        text: instruction.to_string(),
                    },
                ],
            }],
            system_instruction: None,
            generation_config: GenerationConfig {
                temperature: OCR_TEMPERATURE,
            },
        };

        self.generate_content(&request).await
    }
}

#[async_trait]
impl TextModel for GeminiClient {
    async fn generate(&self, prompt: &QuestionPrompt) -> Result<String, ModelError> {
        let request = GenerateContentRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![Part::Text {
                    text: prompt.user_message.clone(),
                }],
            }],
            system_instruction: Some(SystemInstruction {
                parts: vec![Part::Text {
                    text: prompt.system_message.clone(),
                }],
            }),
            generation_config: GenerationConfig {
                temperature: GENERATION_TEMPERATURE,
            },
        };

        self.generate_content(&request).await
    }
}

fn classify_transport(source: reqwest::Error) -> ModelError {
    if source.is_timeout() {
        ModelError::Timeout
    } else {
        ModelError::Transport { source }
    }
}

#[derive(Debug, Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<SystemInstruction>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    role: &'static str,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part {
    Text { text: String },
    InlineData { inline_data: InlineData },
}

#[derive(Debug, Serialize)]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default, rename = "usageMetadata")]
    usage_metadata: Option<UsageMetadata>,
}

impl GenerateContentResponse {
    fn text(&self) -> Option<String> {
        let parts = &self.candidates.first()?.content.as_ref()?.parts;
        let mut buffer = String::new();
        for part in parts {
            if let Some(text) = part.text.as_deref() {
                buffer.push_str(text);
            }
        }
        if buffer.is_empty() { None } else { Some(buffer) }
    }
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsageMetadata {
    #[serde(default, rename = "promptTokenCount")]
    prompt_token_count: u32,
    #[serde(default, rename = "candidatesTokenCount")]
    candidates_token_count: u32,
    #[serde(default, rename = "totalTokenCount")]
    total_token_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_construction_keeps_the_request_timeout() {
        let client = GeminiClient::new("key", DEFAULT_MODEL).expect("client builds");
        assert_eq!(client.model, DEFAULT_MODEL);
    }

    #[test]
    fn response_text_concatenates_candidate_parts() {
        let payload: GenerateContentResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"text":"Hello "},{"text":"world"}]}}]}"#,
        )
        .expect("response parses");
        assert_eq!(payload.text().as_deref(), Some("Hello world"));
    }

    #[test]
    fn response_without_candidates_yields_none() {
        let payload: GenerateContentResponse =
            serde_json::from_str(r#"{"candidates":[]}"#).expect("response parses");
        assert!(payload.text().is_none());
    }

    #[test]
    fn inline_data_serializes_with_wire_field_names() {
        let part = Part::InlineData {
            inline_data: InlineData {
                mime_type: "image/jpeg".to_string(),
                data: "QUJD".to_string(),
            },
        };
        let json = serde_json::to_value(&part).expect("part serializes");
        assert_eq!(json["inline_data"]["mime_type"], "image/jpeg");
        assert_eq!(json["inline_data"]["data"], "QUJD");
    }
}
