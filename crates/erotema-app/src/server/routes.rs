//! HTTP handlers: quiz generation, auth, and user listings.

use std::str::FromStr;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use bytes::Bytes;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::warn;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::pipeline::quiz::{Difficulty, ImageUpload, QuestionType, QuizResponse, QuizSpec};
use crate::services::auth::{
    AuthError, decode_access_token, generate_reset_token, hash_password, mint_access_token,
    verify_password,
};
use crate::services::ocr::OcrError;
use crate::services::quiz::QuizError;
use crate::services::users::{LoginEvent, NewUser, ResetToken, StoreError, UserRecord, UserRole};

use super::AppState;

const SERVICE_NAME: &str = "Question Generator API";
/// Uploads are images; 20 MiB covers the largest reasonable photo batch.
const MAX_BODY_BYTES: usize = 20 * 1024 * 1024;
/// The route demands at least two images even though the pipeline accepts one.
const MIN_ROUTE_IMAGES: usize = 2;
const RESET_RESPONSE: &str = "If the email exists, a password reset link has been sent";

pub(super) fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/api/v1/generate-questions", post(generate_questions))
        .route("/api/v1/auth/register", post(register))
        .route("/api/v1/auth/login", post(login))
        .route("/api/v1/auth/forgot-password", post(forgot_password))
        .route("/api/v1/auth/logout", post(logout))
        .route("/api/v1/users/teachers", get(list_teachers))
        .route(
            "/api/v1/users/teachers/{teacher_id}/students",
            get(list_students),
        )
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Uniform error body: `{"error": "<message>"}` with a matching status.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<QuizError> for ApiError {
    fn from(error: QuizError) -> Self {
        match error {
            QuizError::Validation(inner) => Self::bad_request(inner.issues.join("; ")),
            QuizError::NoContent => Self::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                "No text could be extracted from the provided images",
            ),
            QuizError::Ocr(inner) => match &inner {
                OcrError::Prepare { .. } => Self::bad_request(inner.to_string()),
                OcrError::Extraction { .. } => {
                    Self::new(StatusCode::BAD_GATEWAY, inner.to_string())
                }
                OcrError::TaskJoin(_) => Self::internal(inner.to_string()),
            },
            QuizError::Generate(inner) => Self::new(StatusCode::BAD_GATEWAY, inner.to_string()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::DuplicateEmail => Self::bad_request(error.to_string()),
            other => {
                warn!(error = %other, "user store failure");
                Self::internal("Internal server error")
            }
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(error: AuthError) -> Self {
        match error {
            AuthError::InvalidToken => Self::unauthorized("Invalid or expired token"),
            other => {
                warn!(error = %other, "auth failure");
                Self::internal("Internal server error")
            }
        }
    }
}

async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "message": format!("Welcome to {SERVICE_NAME}"),
        "version": env!("CARGO_PKG_VERSION"),
        "docs": "/docs",
    }))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "service": SERVICE_NAME,
    }))
}

/// Accumulated multipart fields for the generation route.
#[derive(Default)]
struct GenerateForm {
    images: Vec<ImageUpload>,
    subject: Option<String>,
    num_questions: Option<String>,
    difficulty: Option<String>,
    question_types: Option<String>,
}

async fn read_generate_form(mut multipart: Multipart) -> Result<GenerateForm, ApiError> {
    let mut form = GenerateForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|error| ApiError::bad_request(format!("invalid multipart body: {error}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "images" => {
                let declared_type = field
                    .content_type()
                    .map(str::to_string)
                    .or_else(|| {
                        field
                            .file_name()
                            .and_then(|name| name.rsplit_once('.'))
                            .and_then(|(_, ext)| {
                                crate::pipeline::quiz::mime_from_extension(
                                    &ext.to_ascii_lowercase(),
                                )
                            })
                            .map(str::to_string)
                    })
                    .unwrap_or_default();
                let bytes: Bytes = field.bytes().await.map_err(|error| {
                    ApiError::bad_request(format!("failed to read image upload: {error}"))
                })?;
                form.images.push(ImageUpload {
                    bytes,
                    mime_type: declared_type,
                });
            }
            "subject" => form.subject = Some(read_text_field(field).await?),
            "num_questions" => form.num_questions = Some(read_text_field(field).await?),
            "difficulty" => form.difficulty = Some(read_text_field(field).await?),
            "question_types" => form.question_types = Some(read_text_field(field).await?),
            _ => {
                // Unknown fields are ignored rather than rejected.
            }
        }
    }

    Ok(form)
}

async fn read_text_field(field: axum::extract::multipart::Field<'_>) -> Result<String, ApiError> {
    field
        .text()
        .await
        .map_err(|error| ApiError::bad_request(format!("failed to read form field: {error}")))
}

fn parse_difficulty(raw: &str) -> Result<Difficulty, ApiError> {
    Difficulty::from_str(raw.trim()).map_err(|_| {
        ApiError::bad_request(format!(
            "Invalid difficulty: {raw}. Valid values: easy, medium, hard"
        ))
    })
}

fn parse_question_types(raw: &str) -> Result<Vec<QuestionType>, ApiError> {
    let mut types = Vec::new();
    for label in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let parsed = QuestionType::from_str(label).map_err(|_| {
            ApiError::bad_request(format!(
                "Invalid question type: {label}. Valid types: multiple_choice, short_answer, true_false"
            ))
        })?;
        if !types.contains(&parsed) {
            types.push(parsed);
        }
    }
    Ok(types)
}

async fn generate_questions(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<QuizResponse>, ApiError> {
    let form = read_generate_form(multipart).await?;

    if form.images.len() < MIN_ROUTE_IMAGES {
        return Err(ApiError::bad_request(format!(
            "At least 2 images are required. You provided {} image(s).",
            form.images.len()
        )));
    }

    let subject = form
        .subject
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::bad_request("subject is required"))?
        .to_string();

    let mut spec = QuizSpec {
        subject,
        ..QuizSpec::default()
    };

    if let Some(raw) = form.num_questions.as_deref() {
        spec.num_questions = raw.trim().parse().map_err(|_| {
            ApiError::bad_request(format!(
                "Invalid num_questions: {raw}. Expected an integer between 1 and 50"
            ))
        })?;
    }
    if let Some(raw) = form.difficulty.as_deref() {
        spec.difficulty = parse_difficulty(raw)?;
    }
    if let Some(raw) = form.question_types.as_deref() {
        let parsed = parse_question_types(raw)?;
        if !parsed.is_empty() {
            spec.question_types = parsed;
        }
    }

    let response = state.pipeline.run(&form.images, &spec).await?;
    Ok(Json(response))
}

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(email(message = "email must be a valid address"))]
    pub email: String,
    #[validate(length(min = 1, max = 100, message = "first_name must be 1-100 characters"))]
    pub first_name: String,
    #[validate(length(min = 1, max = 100, message = "last_name must be 1-100 characters"))]
    pub last_name: String,
    #[validate(
        length(min = 8, max = 72, message = "password must be 8-72 characters"),
        custom(function = password_strength)
    )]
    pub password: String,
    pub role: UserRole,
    pub teacher_id: Option<Uuid>,
    #[validate(range(min = 0, max = 150, message = "age must be between 0 and 150"))]
    pub age: Option<u8>,
    #[validate(length(max = 20, message = "gender must be at most 20 characters"))]
    pub gender: Option<String>,
    #[validate(length(max = 255, message = "organization must be at most 255 characters"))]
    pub organization: Option<String>,
    pub profile_image: Option<String>,
}

fn password_strength(password: &str) -> Result<(), ValidationError> {
    if !password.chars().any(|c| c.is_ascii_digit()) {
        let mut error = ValidationError::new("password_digit");
        error.message = Some("password must contain at least one digit".into());
        return Err(error);
    }
    if !password.chars().any(|c| c.is_ascii_uppercase()) {
        let mut error = ValidationError::new("password_uppercase");
        error.message = Some("password must contain at least one uppercase letter".into());
        return Err(error);
    }
    Ok(())
}

/// Public view of a user: everything except the password hash.
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: UserRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub teacher_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_image: Option<String>,
    pub is_active: bool,
    pub is_verified: bool,
}

impl From<UserRecord> for UserResponse {
    fn from(record: UserRecord) -> Self {
        Self {
            id: record.id,
            email: record.email,
            first_name: record.first_name,
            last_name: record.last_name,
            role: record.role,
            teacher_id: record.teacher_id,
            age: record.age,
            gender: record.gender,
            organization: record.organization,
            profile_image: record.profile_image,
            is_active: record.is_active,
            is_verified: record.is_verified,
        }
    }
}

async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<UserResponse>), ApiError> {
    payload
        .validate()
        .map_err(|errors| ApiError::bad_request(validation_message(&errors)))?;

    match payload.role {
        UserRole::Student => {
            let teacher_id = payload.teacher_id.ok_or_else(|| {
                ApiError::bad_request("Students must be associated with a teacher")
            })?;
            let teacher = state
                .store
                .find_by_id(teacher_id)
                .await?
                .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "Teacher not found"))?;
            if teacher.role != UserRole::Teacher {
                return Err(ApiError::bad_request("The provided user is not a teacher"));
            }
        }
        UserRole::Teacher => {
            if payload.teacher_id.is_some() {
                return Err(ApiError::bad_request(
                    "Teachers cannot be associated with another teacher",
                ));
            }
        }
    }

    if state.store.find_by_email(&payload.email).await?.is_some() {
        return Err(ApiError::bad_request("Email already registered"));
    }

    let password_hash = hash_password(&payload.password)?;
    let record = state
        .store
        .insert(NewUser {
            email: payload.email,
            first_name: payload.first_name,
            last_name: payload.last_name,
            password_hash,
            role: payload.role,
            teacher_id: payload.teacher_id,
            age: payload.age,
            gender: payload.gender,
            organization: payload.organization,
            profile_image: payload.profile_image,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(UserResponse::from(record))))
}

fn validation_message(errors: &validator::ValidationErrors) -> String {
    let mut issues: Vec<String> = Vec::new();
    for (field, field_errors) in errors.field_errors() {
        for error in field_errors {
            match &error.message {
                Some(message) => issues.push(message.to_string()),
                None => issues.push(format!("invalid value for {field}")),
            }
        }
    }
    issues.sort();
    issues.join("; ")
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: String,
    pub user: UserResponse,
}

async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let user = state
        .store
        .find_by_email(&payload.email)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Invalid email or password"))?;

    if !verify_password(&payload.password, &user.password_hash)? {
        return Err(ApiError::unauthorized("Invalid email or password"));
    }

    if !user.is_active {
        return Err(ApiError::new(
            StatusCode::FORBIDDEN,
            "Account is deactivated",
        ));
    }

    let access_token = mint_access_token(
        user.id,
        &user.email,
        &state.auth.jwt_secret,
        state.auth.token_ttl_minutes,
    )?;

    // History is best-effort; a storage hiccup must not fail the login.
    let store = state.store.clone();
    let user_id = user.id;
    tokio::spawn(async move {
        if let Err(error) = store.record_login(LoginEvent::success_now(user_id)).await {
            warn!(%user_id, %error, "failed to record login event");
        }
    });

    Ok(Json(LoginResponse {
        access_token,
        token_type: "bearer".to_string(),
        user: UserResponse::from(user),
    }))
}

#[derive(Debug, Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
    pub success: bool,
}

async fn forgot_password(
    State(state): State<AppState>,
    Json(payload): Json<ForgotPasswordRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    // The response never reveals whether the account exists.
    if let Some(user) = state.store.find_by_email(&payload.email).await? {
        let token = ResetToken {
            user_id: user.id,
            token: generate_reset_token(),
            expires_at: Utc::now() + Duration::hours(state.auth.reset_token_ttl_hours),
        };
        if let Err(error) = state.store.insert_reset_token(token).await {
            warn!(user_id = %user.id, %error, "failed to store password reset token");
        }
    }

    Ok(Json(MessageResponse {
        message: RESET_RESPONSE.to_string(),
        success: true,
    }))
}

async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<MessageResponse>, ApiError> {
    let token = bearer_token(&headers)?;
    let claims = decode_access_token(token, &state.auth.jwt_secret)?;

    let store = state.store.clone();
    let user_id = claims.sub;
    tokio::spawn(async move {
        let event = LoginEvent {
            user_id,
            success: true,
            recorded_at: Utc::now(),
        };
        if let Err(error) = store.record_login(event).await {
            warn!(%user_id, %error, "failed to record logout event");
        }
    });

    Ok(Json(MessageResponse {
        message: "Successfully logged out".to_string(),
        success: true,
    }))
}

fn bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .filter(|token| !token.is_empty())
        .ok_or_else(|| ApiError::unauthorized("Missing or invalid authorization header"))
}

#[derive(Debug, Serialize)]
pub struct TeacherListResponse {
    pub teachers: Vec<UserResponse>,
    pub total: usize,
}

async fn list_teachers(
    State(state): State<AppState>,
) -> Result<Json<TeacherListResponse>, ApiError> {
    let teachers: Vec<UserResponse> = state
        .store
        .users_by_role(UserRole::Teacher)
        .await?
        .into_iter()
        .map(UserResponse::from)
        .collect();
    let total = teachers.len();
    Ok(Json(TeacherListResponse { teachers, total }))
}

#[derive(Debug, Serialize)]
pub struct StudentListResponse {
    pub teacher_id: Uuid,
    pub students: Vec<UserResponse>,
    pub total: usize,
}

async fn list_students(
    State(state): State<AppState>,
    Path(teacher_id): Path<Uuid>,
) -> Result<Json<StudentListResponse>, ApiError> {
    let teacher = state
        .store
        .find_by_id(teacher_id)
        .await?
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "Teacher not found"))?;
    if teacher.role != UserRole::Teacher {
        return Err(ApiError::bad_request("The provided user is not a teacher"));
    }

    let students: Vec<UserResponse> = state
        .store
        .students_of(teacher_id)
        .await?
        .into_iter()
        .map(UserResponse::from)
        .collect();
    let total = students.len();
    Ok(Json(StudentListResponse {
        teacher_id,
        students,
        total,
    }))
}
