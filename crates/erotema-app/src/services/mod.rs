//! Orchestration layer for IO-bound services.
//!
//! Modules here coordinate external systems (vision/text models, the user
//! store) and must avoid embedding pure transforms. Keep stateless helpers
//! in `crate::pipeline` so retry policy and resource accounting stay
//! localized.

pub mod auth;
pub mod events;
pub mod gemini;
pub mod generate;
pub mod model;
pub mod ocr;
pub mod quiz;
pub mod rest_store;
pub mod users;

pub use auth::{
    AuthError, Claims, decode_access_token, generate_reset_token, hash_password,
    mint_access_token, verify_password,
};
pub use events::{EventSink, StageEvent, StageOutcome, TracingEventSink};
pub use gemini::{DEFAULT_MODEL, GeminiClient};
pub use generate::{GenerateError, QuestionGenerator, RetryPolicy, parse_questions};
pub use model::{ModelError, TextModel, VisionModel};
pub use ocr::{BatchExtraction, OCR_INSTRUCTION, OcrConfig, OcrError, OcrExtractor};
pub use quiz::{QuizError, QuizPipeline};
pub use rest_store::RestUserStore;
pub use users::{
    LoginEvent, MemoryUserStore, NewUser, ResetToken, StoreError, UserRecord, UserRole, UserStore,
};
