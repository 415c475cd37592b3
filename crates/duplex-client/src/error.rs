use thiserror::Error;

/// Failure reported by the audio capture source.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    /// The user or the OS refused microphone access.
    #[error("microphone permission denied")]
    PermissionDenied,
    #[error("capture device unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("capture stream failed: {0}")]
    Stream(String),
}

/// Failure reported by a [`crate::Player`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlaybackError {
    #[error("undecodable audio: {0}")]
    Decode(String),
    #[error("output device error: {0}")]
    Device(String),
}

/// Errors from the session transport client.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Audio was sent after [`crate::VoiceClient::finish_audio`].
    #[error("audio uplink already closed")]
    UplinkClosed,
    #[error("invalid audio payload: {0}")]
    InvalidAudio(String),
    #[error("session closed")]
    Closed,
}
