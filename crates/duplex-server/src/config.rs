//! Server configuration loading from file and environment variables.

use duplex_types::AgentProfile;
use duplex_voice::{LlmConfig, PassThrough, SpokenForm, SttConfig, TextNormalizer, TtsConfig};
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Per-session conversation settings.
    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub stt: SttConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub tts: TtsConfig,

    /// Persona served to every session.
    #[serde(default)]
    pub agent: AgentProfile,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "duplex_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

/// Which text pass runs before synthesis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizerKind {
    PassThrough,
    #[default]
    SpokenForm,
}

impl NormalizerKind {
    pub fn build(self) -> Arc<dyn TextNormalizer> {
        match self {
            Self::PassThrough => Arc::new(PassThrough),
            Self::SpokenForm => Arc::new(SpokenForm),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// A session with no inbound frame for this long is closed.
    #[serde(default = "default_inactivity_timeout_secs")]
    pub inactivity_timeout_secs: u64,

    /// Number of trailing history messages sent with each request.
    #[serde(default = "default_history_window")]
    pub history_window: usize,

    #[serde(default)]
    pub normalizer: NormalizerKind,
}

impl SessionConfig {
    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_secs(self.inactivity_timeout_secs)
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_inactivity_timeout_secs() -> u64 {
    300
}

fn default_history_window() -> usize {
    8
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout_secs: default_inactivity_timeout_secs(),
            history_window: default_history_window(),
            normalizer: NormalizerKind::default(),
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `DUPLEX_HOST` overrides `server.host`
/// - `DUPLEX_PORT` overrides `server.port`
/// - `DUPLEX_LOG_LEVEL` overrides `logging.level`
/// - `DUPLEX_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `DUPLEX_INACTIVITY_TIMEOUT_SECS` overrides `session.inactivity_timeout_secs`
/// - `DEEPGRAM_API_KEY`, `GROQ_API_KEY` and `ELEVENLABS_API_KEY` supply the
///   provider keys, which are never read from the file's serialized form
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(host) = var("DUPLEX_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Some(port) = var("DUPLEX_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Some(level) = var("DUPLEX_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = var("DUPLEX_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Some(secs) = var("DUPLEX_INACTIVITY_TIMEOUT_SECS") {
        match secs.parse() {
            Ok(parsed) => config.session.inactivity_timeout_secs = parsed,
            Err(_) => tracing::warn!(value = %secs, "ignoring invalid DUPLEX_INACTIVITY_TIMEOUT_SECS"),
        }
    }
    if let Some(key) = var("DEEPGRAM_API_KEY") {
        config.stt.api_key = key;
    }
    if let Some(key) = var("GROQ_API_KEY") {
        config.llm.api_key = key;
    }
    if let Some(key) = var("ELEVENLABS_API_KEY") {
        config.tts.api_key = key;
    }
}
