//! Duplex server binary.
//!
//! Starts an axum HTTP server with structured logging, wires the configured
//! speech providers, and shuts down gracefully on SIGTERM/SIGINT, closing
//! every live session first.

use duplex_server::config::{self, Config};
use duplex_server::profile::StaticProfile;
use duplex_server::registry::SessionRegistry;
use duplex_server::{app, AppState};
use duplex_voice::{ChatCompletionsLlm, DeepgramStt, ElevenLabsTts};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("DUPLEX_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

fn build_state(config: &Config, registry: SessionRegistry) -> AppState {
    for (provider, key) in [
        ("stt", &config.stt.api_key),
        ("llm", &config.llm.api_key),
        ("tts", &config.tts.api_key),
    ] {
        if key.is_empty() {
            tracing::warn!(provider, "no API key configured; requests will be rejected upstream");
        }
    }

    AppState {
        session: config.session.clone(),
        registry,
        stt: Arc::new(DeepgramStt::new(config.stt.clone())),
        llm: Arc::new(ChatCompletionsLlm::new(config.llm.clone())),
        tts: Arc::new(ElevenLabsTts::new(config.tts.clone())),
        normalizer: config.session.normalizer.build(),
        profiles: Arc::new(StaticProfile::new(config.agent.clone())),
    }
}

#[tokio::main]
async fn main() {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    // Load configuration
    let config = config::load_config(selected_config_path)
        .expect("failed to load configuration: the server cannot start without valid config");

    // Initialize tracing
    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    let registry = SessionRegistry::new();
    let app = app(build_state(&config, registry.clone()));
    let addr = SocketAddr::new(config.server.host, config.server.port);

    tracing::info!(%addr, "starting duplex server");

    let listener = TcpListener::bind(addr)
        .await
        .expect("failed to bind to address: is another process using this port?");

    // Serve with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(registry))
        .await
        .expect("server error");

    tracing::info!("duplex server shut down");
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal, then asks every live
/// session to close so upgraded connections do not hold the server open.
async fn shutdown_signal(registry: SessionRegistry) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }

    let closed = registry.close_all().await;
    tracing::info!(sessions = closed, "closing live sessions");
}
