//! Duplex voice server library logic.
//!
//! One WebSocket per conversation. The server streams caller audio into a
//! live transcriber, runs a reply turn through a token-streaming model and a
//! streaming synthesizer, and returns text and ordered audio chunks while the
//! caller keeps talking.

pub mod api_ws;
pub mod config;
pub mod profile;
pub mod registry;
pub mod session;
pub mod turn;

use axum::{routing::get, Extension, Json, Router};
use duplex_voice::{LlmProvider, SttProvider, TextNormalizer, TtsProvider};
use profile::ProfileSource;
use registry::SessionRegistry;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Per-session conversation settings.
    pub session: config::SessionConfig,
    /// Live sessions.
    pub registry: SessionRegistry,
    /// Speech-to-text adapter.
    pub stt: Arc<dyn SttProvider>,
    /// Token-streaming model adapter.
    pub llm: Arc<dyn LlmProvider>,
    /// Speech synthesis adapter.
    pub tts: Arc<dyn TtsProvider>,
    /// Text pass applied to each sentence before synthesis.
    pub normalizer: Arc<dyn TextNormalizer>,
    /// Persona lookup, done once per session.
    pub profiles: Arc<dyn ProfileSource>,
}

/// Health check handler.
async fn health(Extension(state): Extension<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": state.registry.count().await,
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(api_ws::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(Extension(Arc::new(state)))
}
