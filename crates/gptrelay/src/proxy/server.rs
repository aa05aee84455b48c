//! HTTP server for the relay
//!
//! Serves the conversation endpoint, the operator routes under `/sys` and
//! the chatgpt-web compatible routes under `/chatgpt-web`.

use axum::{
    Json, Router,
    body::Body,
    http::{StatusCode, header},
    response::Response,
    routing::get,
};
use futures::StreamExt;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use super::framing::{FrameEncoder, Framing};
use super::{handlers, web};
use crate::admin;
use crate::config::{Config, read_env_secret};
use crate::dispatch::{RelayContext, relay_turn};
use crate::error::{RelayError, Result};
use crate::turn::ConversationTurn;

/// Frames buffered between the relay and a slow caller
const FRAME_BUFFER: usize = 32;

/// Shared application state for all handlers
#[derive(Clone)]
pub struct AppState {
    /// Dispatch core shared by every turn
    pub relay: Arc<RelayContext>,
    /// Key required by the `/sys` routes; unset leaves them open
    pub admin_key: Option<String>,
    /// Secret checked by `/chatgpt-web/verify`
    pub web_secret: Option<String>,
}

impl AppState {
    pub fn new(relay: Arc<RelayContext>) -> Self {
        Self {
            relay,
            admin_key: None,
            web_secret: None,
        }
    }

    pub fn with_admin_key(mut self, key: impl Into<String>) -> Self {
        self.admin_key = Some(key.into());
        self
    }

    pub fn with_web_secret(mut self, secret: impl Into<String>) -> Self {
        self.web_secret = Some(secret.into());
        self
    }
}

/// The relay server
pub struct ProxyServer {
    config: Config,
}

impl ProxyServer {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Build the backends and serve until a shutdown signal arrives
    pub async fn serve(&self) -> Result<()> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.config.server.timeout_secs))
            .build()
            .map_err(|e| RelayError::Proxy(format!("Failed to create HTTP client: {e}")))?;

        let relay = Arc::new(RelayContext::from_config(&self.config, client)?);
        let state = Arc::new(AppState {
            relay,
            admin_key: read_env_secret(&self.config.auth.admin_key_env),
            web_secret: read_env_secret(&self.config.auth.web_secret_env),
        });

        if state.admin_key.is_none() {
            tracing::warn!(
                "{} is not set; /sys routes are unauthenticated",
                self.config.auth.admin_key_env
            );
        }
        if self.config.log.enabled {
            tracing::info!("Audit log: {}", self.config.log.path.display());
        } else {
            tracing::info!("Audit log: disabled");
        }

        let app = create_router(state);

        let addr: SocketAddr = self
            .config
            .server
            .listen_addr
            .parse()
            .map_err(|e| RelayError::Config(format!("Invalid listen address: {e}")))?;

        tracing::info!("Starting relay server on {addr}");

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| RelayError::Proxy(format!("Failed to bind to {addr}: {e}")))?;

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| RelayError::Proxy(format!("Server error: {e}")))?;

        tracing::info!("Relay server shut down gracefully");
        Ok(())
    }
}

/// Create the router with all routes configured
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route(
            "/api/conversation",
            get(handlers::conversation_handler).post(handlers::conversation_handler),
        )
        .route("/sys/model", get(admin::handlers::toggle_mode_handler))
        .route("/sys/logs", get(admin::handlers::logs_handler))
        .nest("/chatgpt-web", web::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint - returns JSON status
async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

/// Run `turn` on its own task and stream its frames as the response body.
///
/// Dropping the body (caller disconnect) closes the frame channel, which the
/// relay treats as cancellation.
pub(crate) fn stream_turn(
    state: &AppState,
    turn: ConversationTurn,
    framing: Framing,
) -> Response<Body> {
    let (tx, rx) = mpsc::channel(FRAME_BUFFER);
    tokio::spawn(relay_turn(
        Arc::clone(&state.relay),
        turn,
        tx,
        CancellationToken::new(),
    ));

    let mut encoder = FrameEncoder::new(framing);
    let body = ReceiverStream::new(rx)
        .filter_map(move |frame| futures::future::ready(encoder.encode(&frame)))
        .map(Ok::<_, Infallible>);

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, framing.content_type())
        .header(header::CACHE_CONTROL, "no-cache");
    if framing == Framing::Ndjson {
        builder = builder
            .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")
            .header(header::ACCESS_CONTROL_ALLOW_METHODS, "*")
            .header(header::ACCESS_CONTROL_ALLOW_HEADERS, "authorization, Content-Type");
    }

    builder
        .body(Body::from_stream(body))
        .unwrap_or_else(|e| {
            create_error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                &format!("Failed to build response: {e}"),
            )
        })
}

/// Create a JSON error response
pub(crate) fn create_error_response(
    status: StatusCode,
    error_type: &str,
    message: &str,
) -> Response<Body> {
    let body = serde_json::json!({
        "error": {
            "type": error_type,
            "message": message,
        }
    });

    let mut response = Response::new(Body::from(body.to_string()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("application/json"),
    );
    response
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        },
    }
}
