//! HTTP gateway for gemline.
//!
//! Exposes the LINE webhook endpoint plus a banner and a health check.
//! Webhook deliveries are verified and decoded inline, queued on the
//! [`Dispatcher`] before the response is sent, and acknowledged right away.
//!
//! Built on Axum.

use axum::body::Bytes;
use axum::extract::DefaultBodyLimit;
use axum::{
    Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use gemline_channels::{LineChannel, LineChannelConfig, SIGNATURE_HEADER, parse_webhook, verify_signature};
use gemline_config::AppConfig;
use gemline_engine::{ConversationEngine, Dispatcher, EngineSettings};
use gemline_providers::GeminiProvider;

/// Plain-text banner served at `/`.
pub const BANNER: &str = "gemline LINE × Gemini bot is running";

/// Shared application state for the gateway.
pub struct GatewayState {
    /// Secret used to verify webhook signatures.
    pub channel_secret: String,
    pub dispatcher: Arc<Dispatcher>,
    pub body_limit: usize,
    pub started_at: DateTime<Utc>,
}

impl GatewayState {
    pub fn new(channel_secret: impl Into<String>, dispatcher: Arc<Dispatcher>, body_limit: usize) -> Self {
        Self {
            channel_secret: channel_secret.into(),
            dispatcher,
            body_limit,
            started_at: Utc::now(),
        }
    }
}

pub type SharedState = Arc<GatewayState>;

/// Build the Axum router with all gateway routes.
pub fn build_router(state: SharedState) -> Router {
    let body_limit = state.body_limit;
    Router::new()
        .route("/", get(banner_handler))
        .route("/health", get(health_handler))
        .route("/webhook", post(webhook_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Wire the provider, channel and engine from `config`.
pub fn build_state(config: &AppConfig) -> Result<SharedState, Box<dyn std::error::Error>> {
    config.require_secrets()?;

    let provider = Arc::new(GeminiProvider::from_config(&config.gemini)?);
    let line_config = LineChannelConfig::from_app_config(&config.line)?;
    let channel_secret = line_config.channel_secret.clone();
    let channel = Arc::new(LineChannel::new(line_config)?);

    let engine = Arc::new(ConversationEngine::new(
        provider,
        EngineSettings::from_config(config),
    ));
    let dispatcher = Arc::new(Dispatcher::new(engine, channel));

    Ok(Arc::new(GatewayState::new(
        channel_secret,
        dispatcher,
        config.gateway.body_limit_bytes,
    )))
}

/// Start the gateway HTTP server and serve until Ctrl-C.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let state = build_state(&config)?;
    let app = build_router(state);

    info!(
        addr = %addr,
        model = %config.gemini.model,
        budget = config.conversation.history_token_budget,
        "Gateway starting"
    );
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Could not listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

// --- Handlers ---

async fn banner_handler() -> &'static str {
    BANNER
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    uptime_secs: i64,
}

async fn health_handler(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
    })
}

async fn webhook_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<&'static str, StatusCode> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    let Some(signature) = signature else {
        warn!("Webhook rejected: missing signature");
        return Err(StatusCode::BAD_REQUEST);
    };
    if !verify_signature(&state.channel_secret, &body, signature) {
        warn!("Webhook rejected: invalid signature");
        return Err(StatusCode::BAD_REQUEST);
    }

    let events = parse_webhook(&body).map_err(|e| {
        warn!(error = %e, "Webhook rejected: undecodable body");
        StatusCode::BAD_REQUEST
    })?;

    debug!(events = events.len(), "Webhook accepted");
    state.dispatcher.submit(events);

    Ok("OK")
}
