//! HTTP API for the lark backend

pub mod assist;
pub mod auth;
pub mod devices;
pub mod oauth;
pub mod version;

use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::assistant::VoiceAssistant;
use crate::auth::middleware as authn;
use crate::auth::{DeviceCertAuth, JwtAuth};
use crate::config::OAuthConfig;
use crate::db::UserRepo;
use crate::devices::DeviceService;
use crate::{Error, Result};

/// Upper bound for uploaded utterance bodies. An 8 second mono 16-bit
/// recording at 48 kHz is under 1 MiB; anything past this is abuse.
const MAX_AUDIO_BYTES: usize = 4 * 1024 * 1024;

/// How long graceful shutdown may drain before connections are aborted
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(10);

/// Shared state for API handlers
pub struct ApiState {
    pub user_repo: UserRepo,
    pub devices: DeviceService,
    pub assistant: Arc<VoiceAssistant>,
    pub jwt: JwtAuth,
    pub cert_auth: DeviceCertAuth,
    pub oauth: Option<OAuthConfig>,
    pub http: reqwest::Client,
}

/// Build the router with all routes and middleware
pub fn router(state: Arc<ApiState>) -> Router {
    let user_routes = Router::new()
        .route("/users/{userId}/devices", post(devices::register))
        .route_layer(axum::middleware::from_fn_with_state(
            state.jwt.clone(),
            authn::require_user,
        ));

    let device_routes = Router::new()
        .route("/voice-assistance", post(assist::assist))
        .route("/voice-assistance/sse", post(assist::assist_sse))
        .route_layer(axum::middleware::from_fn_with_state(
            state.cert_auth.clone(),
            authn::require_device,
        ))
        .layer(DefaultBodyLimit::max(MAX_AUDIO_BYTES));

    Router::new()
        .route("/auth/signup", post(auth::signup))
        .route("/auth/login", post(auth::login))
        .route("/auth/oauth2/{provider}/login", get(oauth::login))
        .route("/auth/oauth2/{provider}/callback", get(oauth::callback))
        .route(
            "/users/{userId}/devices/{deviceId}/enroll",
            post(devices::enroll),
        )
        .route("/version", get(version::version))
        .route("/health", get(version::health))
        .merge(user_routes)
        .merge(device_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Build a CORS layer from configured origins. `*` allows any origin.
#[must_use]
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| o.parse::<HeaderValue>().ok())
        .collect();
    layer.allow_origin(AllowOrigin::list(parsed))
}

/// Run the API server with graceful shutdown on SIGINT/SIGTERM. In-flight
/// connections get [`SHUTDOWN_DEADLINE`] to drain, then are aborted.
///
/// # Errors
///
/// Returns error if the server fails to bind or run
pub async fn serve(addr: &str, app: Router) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Config(format!("failed to bind {addr}: {e}")))?;

    tracing::info!(addr, "API server listening");

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("shutdown requested");
        let _ = shutdown_tx.send(true);
    });

    let mut graceful_rx = shutdown_rx.clone();
    let mut deadline_rx = shutdown_rx;

    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = graceful_rx.wait_for(|fired| *fired).await;
        })
        .into_future();

    let deadline = async move {
        let _ = deadline_rx.wait_for(|fired| *fired).await;
        tokio::time::sleep(SHUTDOWN_DEADLINE).await;
    };

    tokio::select! {
        result = server => {
            result.map_err(|e| Error::Config(format!("server error: {e}")))?;
            tracing::info!("server drained cleanly");
        }
        () = deadline => {
            tracing::warn!("shutdown deadline reached, closing remaining connections");
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => tracing::error!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

/// Error wrapper translating domain errors to HTTP statuses
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        Self(Error::Http(e))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        #[derive(serde::Serialize)]
        struct ErrorResponse {
            error: ErrorBody,
        }

        #[derive(serde::Serialize)]
        struct ErrorBody {
            code: &'static str,
            message: String,
        }

        let (status, code, message) = match &self.0 {
            Error::Validation(m) => (StatusCode::BAD_REQUEST, "invalid_request", m.clone()),
            Error::Auth(_) => (
                StatusCode::FORBIDDEN,
                "forbidden",
                "forbidden".to_string(),
            ),
            Error::UserNotFound | Error::DeviceNotFound => {
                (StatusCode::NOT_FOUND, "not_found", "not found".to_string())
            }
            Error::UserAlreadyExists => (
                StatusCode::BAD_REQUEST,
                "already_exists",
                "user already exists".to_string(),
            ),
            Error::EnrollmentFailed => (
                StatusCode::BAD_REQUEST,
                "enrollment_failed",
                "enrollment failed".to_string(),
            ),
            Error::CaSign { .. }
            | Error::Backend(_)
            | Error::Stt(_)
            | Error::Tts(_)
            | Error::Completion(_)
            | Error::Http(_) => {
                tracing::error!(error = %self.0, "upstream failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "upstream_error",
                    "upstream failure".to_string(),
                )
            }
            _ => {
                tracing::error!(error = %self.0, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal",
                    "internal error".to_string(),
                )
            }
        };

        (
            status,
            Json(ErrorResponse {
                error: ErrorBody { code, message },
            }),
        )
            .into_response()
    }
}
