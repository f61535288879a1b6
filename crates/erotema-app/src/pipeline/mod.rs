//! Pure transforms for the quiz generation pipeline.
//!
//! Everything here is deterministic and free of IO: image normalization,
//! prompt assembly, and the wire data model. Anything that talks to a model
//! endpoint or a user store belongs in `crate::services`.

pub mod image;
pub mod prompt;
pub mod quiz;

pub use image::{ImageError, PreparedImage, prepare};
pub use prompt::{CONTENT_CHAR_BUDGET, QuestionPrompt, build_question_prompt};
pub use quiz::{
    Difficulty, ImageUpload, PREVIEW_CHAR_BUDGET, Question, QuestionType, QuizResponse, QuizSpec,
    QuizValidationError, VALID_IMAGE_MIME_TYPES, find_json_array, mime_from_extension,
    text_preview,
};
