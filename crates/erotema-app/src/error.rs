//! Application-level error type shared across binaries and services.

use std::path::PathBuf;

use thiserror::Error;

use crate::config;
use crate::pipeline::image::ImageError;
use crate::server;
use crate::services::auth::AuthError;
use crate::services::generate::GenerateError;
use crate::services::model::ModelError;
use crate::services::ocr::OcrError;
use crate::services::quiz::QuizError;
use crate::services::users::StoreError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    ConfigLoad(#[from] config::AppConfigError),
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Server(#[from] server::ServerError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Image(#[from] ImageError),
    #[error(transparent)]
    Ocr(#[from] OcrError),
    #[error(transparent)]
    Generate(#[from] GenerateError),
    #[error(transparent)]
    Quiz(#[from] QuizError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("failed to read input file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unsupported image extension for {path} (expected jpg, jpeg, png, or webp)")]
    UnsupportedExtension { path: PathBuf },
    #[error("invalid difficulty `{value}` (expected easy, medium, or hard)")]
    InvalidDifficulty { value: String },
    #[error(
        "invalid question type `{value}` (expected multiple_choice, short_answer, or true_false)"
    )]
    InvalidQuestionType { value: String },
}
