//! Shared types and constants for the duplex voice pipeline.
//!
//! This crate holds everything both ends of the transport agree on: the JSON
//! message schema exchanged over the session WebSocket, the immutable
//! [`AudioChunk`] unit, conversation roles, and the PCM frame format.
//!
//! No crate in the workspace depends on anything *except* `duplex-types` for
//! cross-cutting type definitions, so the client and the server can evolve
//! independently without a circular dependency.

use base64::Engine;
use serde::{Deserialize, Serialize};

pub mod message;
pub mod voice;

pub use message::{ClientMessage, ServerMessage};
pub use voice::AgentProfile;

/// Sample rate of the uplink PCM stream, in Hz.
pub const DEFAULT_SAMPLE_RATE: u32 = 24_000;

/// Number of samples in one encoded uplink frame.
pub const DEFAULT_FRAME_SAMPLES: usize = 4096;

/// Text sent as the assistant reply when the model produced nothing.
pub const EMPTY_REPLY_FALLBACK: &str = "I didn't catch that.";

/// Speaker role of a conversation message.
///
/// Serialized in the lowercase form chat-completion APIs expect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The fixed instruction that frames every request.
    System,
    /// The person speaking into the microphone.
    User,
    /// The voice agent.
    Assistant,
}

impl Role {
    /// Returns the string label for this role.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One entry of a session's conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }
}

/// A timestamped transcript line, kept alongside the history for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub role: Role,
    pub content: String,
    /// RFC 3339 timestamp of when the line was recorded.
    pub timestamp: String,
}

impl TranscriptEntry {
    pub fn now(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Encoding of a synthesized audio payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioFormat {
    /// MPEG layer III, the default streaming output of hosted TTS providers.
    #[default]
    Mp3,
    /// Raw 16-bit signed little-endian PCM.
    PcmS16le,
    /// RIFF/WAVE container.
    Wav,
}

impl AudioFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::PcmS16le => "pcm_s16le",
            Self::Wav => "wav",
        }
    }
}

/// An immutable unit of synthesized audio.
///
/// Indices are dense and 0-based within a turn, assigned in the order the
/// synthesis stream produced audio for the turn's text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    pub index: u32,
    pub payload: Vec<u8>,
    pub format: AudioFormat,
}

impl AudioChunk {
    pub fn new(index: u32, payload: Vec<u8>, format: AudioFormat) -> Self {
        Self {
            index,
            payload,
            format,
        }
    }

    /// Builds the `audio.chunk` wire message for this chunk.
    pub fn to_message(&self) -> ServerMessage {
        ServerMessage::AudioChunk {
            audio: base64::engine::general_purpose::STANDARD.encode(&self.payload),
            chunk_index: self.index,
            format: Some(self.format),
        }
    }
}
