//! Web server entrypoints and application wiring.

mod routes;

pub use routes::{
    ForgotPasswordRequest, LoginRequest, LoginResponse, MessageResponse, RegisterRequest,
    StudentListResponse, TeacherListResponse, UserResponse,
};

use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};

use axum::Router;
use thiserror::Error;
use tokio::{net::TcpListener, sync::watch};

use crate::config::{AppConfig, AuthConfig, GenerationConfig, StorageConfig};
use crate::services::gemini::GeminiClient;
use crate::services::generate::{QuestionGenerator, RetryPolicy};
use crate::services::model::ModelError;
use crate::services::ocr::{OcrConfig, OcrExtractor};
use crate::services::quiz::QuizPipeline;
use crate::services::rest_store::RestUserStore;
use crate::services::users::{MemoryUserStore, UserStore};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum ShutdownEvent {
    Pending,
    CtrlC,
    SigTerm,
    ListenerFailed,
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("listen address may not be empty")]
    EmptyListenAddr,
    #[error("invalid listen address `{address}`: {source}")]
    InvalidListenAddr {
        address: String,
        #[source]
        source: std::net::AddrParseError,
    },
    #[error("failed to bind to {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to determine local address: {source}")]
    LocalAddr {
        #[source]
        source: std::io::Error,
    },
    #[error("axum server error: {source}")]
    Serve {
        #[source]
        source: std::io::Error,
    },
    #[error("failed to initialize model client: {source}")]
    ModelInit {
        #[source]
        source: ModelError,
    },
    #[error("storage configuration error: {0}")]
    Storage(String),
}

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<QuizPipeline>,
    pub store: Arc<dyn UserStore>,
    pub auth: AuthSettings,
}

/// Token parameters resolved from configuration.
#[derive(Clone)]
pub struct AuthSettings {
    pub jwt_secret: String,
    pub token_ttl_minutes: i64,
    pub reset_token_ttl_hours: i64,
}

impl From<&AuthConfig> for AuthSettings {
    fn from(config: &AuthConfig) -> Self {
        Self {
            jwt_secret: config.jwt_secret.clone(),
            token_ttl_minutes: config.token_ttl_minutes,
            reset_token_ttl_hours: config.reset_token_ttl_hours,
        }
    }
}

/// Assemble the full application router for the given state.
pub fn build_router(state: AppState) -> Router {
    routes::build_router(state)
}

/// Wire the OCR and generation services over the Gemini client.
pub fn build_pipeline(generation: &GenerationConfig) -> Result<QuizPipeline, ModelError> {
    let gemini = Arc::new(GeminiClient::from_env(generation.model.clone())?);
    let ocr = OcrExtractor::new(
        gemini.clone(),
        OcrConfig::builder()
            .max_attempts(generation.ocr_max_attempts)
            .retry_delay(Duration::from_millis(generation.ocr_retry_delay_ms))
            .build(),
    );
    let generator = QuestionGenerator::new(
        gemini,
        RetryPolicy::builder()
            .max_attempts(generation.generate_max_attempts)
            .build(),
    );
    Ok(QuizPipeline::new(ocr, generator))
}

fn build_store(storage: &StorageConfig) -> Result<Arc<dyn UserStore>, ServerError> {
    match storage.backend.as_str() {
        "memory" => Ok(Arc::new(MemoryUserStore::new())),
        "rest" => {
            let base_url = storage.rest_url.as_deref().ok_or_else(|| {
                ServerError::Storage("rest backend selected but storage.rest_url missing".into())
            })?;
            let service_key = storage.rest_service_key.as_deref().ok_or_else(|| {
                ServerError::Storage(
                    "rest backend selected but storage.rest_service_key missing".into(),
                )
            })?;
            Ok(Arc::new(RestUserStore::new(base_url, service_key)))
        }
        other => Err(ServerError::Storage(format!(
            "unknown storage backend `{other}` (expected memory or rest)"
        ))),
    }
}

fn build_state(config: &AppConfig) -> Result<AppState, ServerError> {
    let pipeline = build_pipeline(&config.generation)
        .map_err(|source| ServerError::ModelInit { source })?;
    let store = build_store(&config.storage)?;
    Ok(AppState {
        pipeline: Arc::new(pipeline),
        store,
        auth: AuthSettings::from(&config.auth),
    })
}

pub async fn serve(config: AppConfig) -> Result<(), ServerError> {
    debug_assert!(!config.server.listen_addr.contains('\n'));

    let listen_addr = parse_listen_addr(&config.server.listen_addr)?;
    let listener = bind_listener(listen_addr).await?;

    let local_addr = listener
        .local_addr()
        .map_err(|source| ServerError::LocalAddr { source })?;
    tracing::info!(%local_addr, "erotema server listening");

    let state = build_state(&config)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(ShutdownEvent::Pending);
    let shutdown_future = broadcast_shutdown(shutdown_tx);

    let app = build_router(state);

    let mut server_future = Box::pin(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_future)
            .await
    });

    let drain_rx = shutdown_rx.clone();
    let mut drain_timeout = Box::pin(drain_timeout_future(drain_rx));

    tokio::select! {
        result = server_future.as_mut() => {
            if let Err(source) = result {
                return Err(ServerError::Serve { source });
            }
        }
        _ = drain_timeout.as_mut() => {
            // Timeout elapsed; dropping the server future forces termination.
        }
    }

    let final_event = *shutdown_rx.borrow();
    if final_event == ShutdownEvent::Pending {
        tracing::info!("server stopped without external shutdown signal");
    } else {
        tracing::info!(?final_event, "server shutdown complete");
    }

    Ok(())
}

async fn wait_for_shutdown() -> ShutdownEvent {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => ShutdownEvent::CtrlC,
            Err(error) => {
                tracing::warn!(%error, "failed to capture Ctrl+C signal");
                ShutdownEvent::ListenerFailed
            }
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => match term.recv().await {
                Some(_) => ShutdownEvent::SigTerm,
                None => ShutdownEvent::ListenerFailed,
            },
            Err(error) => {
                tracing::warn!(%error, "failed to capture SIGTERM");
                ShutdownEvent::ListenerFailed
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending();

    tokio::select! {
        event = ctrl_c => event,
        event = sigterm => event,
    }
}

fn parse_listen_addr(addr: &str) -> Result<SocketAddr, ServerError> {
    let trimmed = addr.trim();
    if trimmed.is_empty() {
        return Err(ServerError::EmptyListenAddr);
    }

    trimmed
        .parse()
        .map_err(|source| ServerError::InvalidListenAddr {
            address: trimmed.to_string(),
            source,
        })
}

async fn bind_listener(addr: SocketAddr) -> Result<TcpListener, ServerError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind {
            address: addr.to_string(),
            source,
        })
}

fn broadcast_shutdown(
    sender: watch::Sender<ShutdownEvent>,
) -> impl Future<Output = ()> + Send + 'static {
    async move {
        let event = wait_for_shutdown().await;
        debug_assert!(event != ShutdownEvent::Pending);
        if let Err(error) = sender.send(event) {
            tracing::warn!(?event, %error, "failed to broadcast shutdown event");
        }
    }
}

fn drain_timeout_future(
    mut receiver: watch::Receiver<ShutdownEvent>,
) -> impl Future<Output = ()> + Send + 'static {
    async move {
        if receiver.changed().await.is_ok() {
            let event = *receiver.borrow_and_update();
            tracing::info!(?event, "shutdown signal received; draining connections");
            tokio::time::sleep(DRAIN_TIMEOUT).await;
            tracing::warn!(
                ?event,
                seconds = DRAIN_TIMEOUT.as_secs(),
                "graceful shutdown timed out; continuing shutdown"
            );
        }
    }
}
