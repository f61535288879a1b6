//! Data model for the image-to-quiz pipeline.
//!
//! These types stay pure: request validation, the question wire format, and
//! the small text helpers (JSON array location, previews) used when turning
//! free-form model output into structured records.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumIter, EnumString};
use thiserror::Error;

/// Declared MIME types accepted for uploaded images.
pub const VALID_IMAGE_MIME_TYPES: [&str; 4] =
    ["image/jpeg", "image/jpg", "image/png", "image/webp"];

/// Maximum characters of extracted text echoed back in the response preview.
pub const PREVIEW_CHAR_BUDGET: usize = 500;

const SUBJECT_MAX_CHARS: usize = 200;
const MAX_QUESTIONS: u32 = 50;

/// One uploaded image: raw bytes plus the MIME type the client declared.
/// Request-scoped; dropped once text extraction finished.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub bytes: Bytes,
    pub mime_type: String,
}

impl ImageUpload {
    pub fn has_valid_mime_type(&self) -> bool {
        VALID_IMAGE_MIME_TYPES.contains(&self.mime_type.as_str())
    }
}

/// Map a file extension to a declared MIME type, for CLI inputs.
pub fn mime_from_extension(ext: &str) -> Option<&'static str> {
    match ext {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

/// Requested difficulty level.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    EnumIter,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

/// Kinds of questions the generator may produce.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum QuestionType {
    MultipleChoice,
    ShortAnswer,
    TrueFalse,
}

impl QuestionType {
    pub fn all() -> Vec<QuestionType> {
        vec![
            QuestionType::MultipleChoice,
            QuestionType::ShortAnswer,
            QuestionType::TrueFalse,
        ]
    }
}

/// Parameters for one generation request, validated before any model call.
#[derive(Debug, Clone)]
pub struct QuizSpec {
    pub subject: String,
    pub num_questions: u32,
    pub difficulty: Difficulty,
    pub question_types: Vec<QuestionType>,
}

impl Default for QuizSpec {
    fn default() -> Self {
        Self {
            subject: String::new(),
            num_questions: 10,
            difficulty: Difficulty::default(),
            question_types: QuestionType::all(),
        }
    }
}

impl QuizSpec {
    /// Check semantic constraints, aggregating every violation found.
    pub fn validate(&self) -> Result<(), QuizValidationError> {
        let mut issues = Vec::new();

        let subject_chars = self.subject.chars().count();
        if subject_chars == 0 {
            issues.push("subject must not be empty".to_string());
        }
        if subject_chars > SUBJECT_MAX_CHARS {
            issues.push(format!(
                "subject must be at most {SUBJECT_MAX_CHARS} characters, got {subject_chars}"
            ));
        }

        if self.num_questions == 0 || self.num_questions > MAX_QUESTIONS {
            issues.push(format!(
                "num_questions must be between 1 and {MAX_QUESTIONS}, got {}",
                self.num_questions
            ));
        }

        if self.question_types.is_empty() {
            issues.push("at least one question type is required".to_string());
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(QuizValidationError { issues })
        }
    }
}

/// Validation failures aggregated into a single error.
#[derive(Debug, Error)]
#[error("quiz request validation failed: {issues:?}")]
pub struct QuizValidationError {
    pub issues: Vec<String>,
}

impl QuizValidationError {
    pub fn with_issue(issue: impl Into<String>) -> Self {
        Self {
            issues: vec![issue.into()],
        }
    }
}

/// One generated question in the wire format the model is asked to emit.
///
/// `options` is only present for multiple-choice questions; the original
/// schema marks both `options` and `correct_answer` optional, so parsing
/// tolerates their absence but rejects any missing required field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub question: String,
    pub question_type: QuestionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct_answer: Option<String>,
    pub difficulty: String,
    pub subject: String,
}

/// Final payload assembled after a successful pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizResponse {
    pub success: bool,
    pub subject: String,
    pub total_questions: usize,
    pub questions: Vec<Question>,
    pub extracted_text_preview: String,
}

/// Locate the JSON array embedded in free-form model output.
///
/// Returns the inclusive slice between the first `[` and the last `]`, or
/// `None` when either bracket is missing (including reversed bracket order).
pub fn find_json_array(raw: &str) -> Option<&str> {
    let start = raw.find('[')?;
    let end = raw.rfind(']')?;
    if end < start {
        return None;
    }
    Some(&raw[start..=end])
}

/// First `max_chars` characters of `text`, with `...` appended when truncated.
pub fn text_preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => format!("{}...", &text[..byte_index]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn difficulty_parses_snake_case() {
        assert_eq!(Difficulty::from_str("easy").unwrap(), Difficulty::Easy);
        assert_eq!(Difficulty::from_str("medium").unwrap(), Difficulty::Medium);
        assert!(Difficulty::from_str("impossible").is_err());
    }

    #[test]
    fn question_type_round_trips_labels() {
        assert_eq!(
            QuestionType::from_str("multiple_choice").unwrap(),
            QuestionType::MultipleChoice
        );
        assert_eq!(QuestionType::TrueFalse.as_ref(), "true_false");
        assert!(QuestionType::from_str("essay").is_err());
    }

    #[test]
    fn spec_validation_aggregates_all_issues() {
        let spec = QuizSpec {
            subject: String::new(),
            num_questions: 0,
            difficulty: Difficulty::Medium,
            question_types: Vec::new(),
        };
        let error = spec.validate().expect_err("validation must fail");
        assert_eq!(error.issues.len(), 3);
    }

    #[test]
    fn spec_validation_accepts_defaults_with_subject() {
        let spec = QuizSpec {
            subject: "Physics".to_string(),
            ..QuizSpec::default()
        };
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn spec_validation_rejects_oversized_subject() {
        let spec = QuizSpec {
            subject: "x".repeat(201),
            ..QuizSpec::default()
        };
        let error = spec.validate().expect_err("validation must fail");
        assert!(error.issues[0].contains("200"));
    }

    #[test]
    fn find_json_array_skips_surrounding_noise() {
        assert_eq!(find_json_array("noise[1, 2]trailing"), Some("[1, 2]"));
        assert_eq!(find_json_array("[]"), Some("[]"));
    }

    #[test]
    fn find_json_array_rejects_missing_or_reversed_brackets() {
        assert_eq!(find_json_array("no brackets here"), None);
        assert_eq!(find_json_array("only ["), None);
        assert_eq!(find_json_array("] reversed ["), None);
    }

    #[test]
    fn preview_truncates_past_the_budget() {
        let text = "a".repeat(600);
        let preview = text_preview(&text, PREVIEW_CHAR_BUDGET);
        assert_eq!(preview.len(), PREVIEW_CHAR_BUDGET + 3);
        assert!(preview.ends_with("..."));
        assert_eq!(&preview[..PREVIEW_CHAR_BUDGET], &text[..PREVIEW_CHAR_BUDGET]);
    }

    #[test]
    fn preview_keeps_short_text_unchanged() {
        let text = "a".repeat(500);
        assert_eq!(text_preview(&text, PREVIEW_CHAR_BUDGET), text);
        assert_eq!(text_preview("short", PREVIEW_CHAR_BUDGET), "short");
    }

    #[test]
    fn preview_counts_characters_not_bytes() {
        let text = "ą".repeat(501);
        let preview = text_preview(&text, PREVIEW_CHAR_BUDGET);
        assert_eq!(preview.chars().count(), PREVIEW_CHAR_BUDGET + 3);
    }

    #[test]
    fn question_deserializes_without_optional_fields() {
        let question: Question = serde_json::from_str(
            r#"{"question":"Q","question_type":"short_answer","correct_answer":"A","difficulty":"easy","subject":"Math"}"#,
        )
        .expect("question parses");
        assert_eq!(question.question, "Q");
        assert!(question.options.is_none());
    }

    #[test]
    fn question_requires_question_type() {
        let result: Result<Question, _> =
            serde_json::from_str(r#"{"question":"Q","difficulty":"easy","subject":"Math"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn mime_from_extension_covers_supported_formats() {
        assert_eq!(mime_from_extension("jpg"), Some("image/jpeg"));
        assert_eq!(mime_from_extension("webp"), Some("image/webp"));
        assert_eq!(mime_from_extension("gif"), None);
    }
}
