//! Configuration loading: defaults, optional settings file, environment.
//!
//! Model API keys are deliberately absent here; they stay environment-only
//! (`GOOGLE_AI_API_KEY` / `GEMINI_API_KEY`) and are read where the client
//! is constructed.

use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;

use crate::services::gemini::DEFAULT_MODEL;

const CONFIG_FILE: &str = "config/settings";
const ENV_PREFIX: &str = "EROTEMA";

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error(transparent)]
    Build(#[from] config::ConfigError),
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub generation: GenerationConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub listen_addr: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub token_ttl_minutes: i64,
    pub reset_token_ttl_hours: i64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    pub model: String,
    pub ocr_max_attempts: u32,
    pub ocr_retry_delay_ms: u64,
    pub generate_max_attempts: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub backend: String,
    #[serde(default)]
    pub rest_url: Option<String>,
    #[serde(default)]
    pub rest_service_key: Option<String>,
}

pub fn load() -> Result<AppConfig, AppConfigError> {
    let builder = Config::builder()
        .set_default("server.listen_addr", "127.0.0.1:8080")?
        .set_default("auth.jwt_secret", "insecure-dev-secret")?
        .set_default("auth.token_ttl_minutes", 30)?
        .set_default("auth.reset_token_ttl_hours", 24)?
        .set_default("generation.model", DEFAULT_MODEL)?
        .set_default("generation.ocr_max_attempts", 3)?
        .set_default("generation.ocr_retry_delay_ms", 2000)?
        .set_default("generation.generate_max_attempts", 1)?
        .set_default("storage.backend", "memory")?
        .add_source(File::with_name(CONFIG_FILE).required(false))
        .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let cfg = builder.build()?.try_deserialize()?;
    Ok(cfg)
}
