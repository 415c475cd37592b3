use thiserror::Error;

/// Failure reported by a provider adapter.
///
/// Adapters surface every failure as exactly one terminal error event, so the
/// variants carry rendered messages rather than source errors and stay
/// cheaply cloneable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VoiceError {
    #[error("provider connection failed: {0}")]
    Connect(String),

    #[error("provider timed out: {0}")]
    Timeout(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("STT error: {0}")]
    Stt(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("TTS error: {0}")]
    Tts(String),
}
