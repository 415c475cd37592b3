//! Transport message schema.
//!
//! Every WebSocket frame carries exactly one JSON object discriminated by its
//! `type` field. Field names follow the wire format the browser widget speaks,
//! which mixes `camelCase` (`isFinal`, `sessionId`) and `snake_case`
//! (`chunk_index`, `total_chunks`).

use crate::AudioFormat;
use serde::{Deserialize, Serialize};

/// Client → server messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// One base64-encoded PCM frame.
    #[serde(rename = "audio.chunk")]
    AudioChunk { audio: String },
    /// Barge-in: abandon the reply currently being produced.
    #[serde(rename = "interrupt")]
    Interrupt,
    /// Close the session and release every provider stream.
    #[serde(rename = "session.end")]
    SessionEnd,
}

/// Server → client messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "connection.established")]
    ConnectionEstablished {
        #[serde(rename = "sessionId")]
        session_id: String,
        message: String,
    },
    #[serde(rename = "transcript.update")]
    TranscriptUpdate {
        text: String,
        #[serde(rename = "isFinal")]
        is_final: bool,
    },
    /// Incremental reply text for live display.
    #[serde(rename = "text.chunk")]
    TextChunk { text: String },
    #[serde(rename = "audio.chunk")]
    AudioChunk {
        audio: String,
        chunk_index: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        format: Option<AudioFormat>,
    },
    #[serde(rename = "text.complete")]
    TextComplete { text: String },
    #[serde(rename = "audio.complete")]
    AudioComplete { total_chunks: u32 },
    #[serde(rename = "interrupt.acknowledged")]
    InterruptAcknowledged,
    #[serde(rename = "error")]
    Error { message: String },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Returns the wire `type` tag of this message.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConnectionEstablished { .. } => "connection.established",
            Self::TranscriptUpdate { .. } => "transcript.update",
            Self::TextChunk { .. } => "text.chunk",
            Self::AudioChunk { .. } => "audio.chunk",
            Self::TextComplete { .. } => "text.complete",
            Self::AudioComplete { .. } => "audio.complete",
            Self::InterruptAcknowledged => "interrupt.acknowledged",
            Self::Error { .. } => "error",
        }
    }
}
