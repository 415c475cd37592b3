//! Provider adapters and text plumbing for the duplex voice pipeline.
//!
//! Each external streaming protocol (live speech-to-text, token-streamed chat
//! completion, streamed speech synthesis) is normalized behind a small,
//! object-safe trait that returns an owned stream of typed events. Failures
//! never escape as panics or silent drops: every adapter ends its stream with
//! exactly one terminal error event.
//!
//! The crate also holds the pure text stages that sit between the model and
//! the synthesizer: the incremental [`SentenceSegmenter`] and the pluggable
//! [`TextNormalizer`] pass.

pub mod config;
pub mod error;
pub mod llm;
pub mod normalize;
pub mod segment;
pub mod stt;
pub mod tts;

use futures_util::stream::BoxStream;

pub use config::{LlmConfig, SttConfig, TtsConfig};
pub use error::VoiceError;
pub use llm::{ChatCompletionsLlm, LlmEvent, LlmProvider, LlmRequest};
pub use normalize::{PassThrough, SpokenForm, TextNormalizer};
pub use segment::SentenceSegmenter;
pub use stt::{DeepgramStt, SttEvent, SttProvider, SttStream};
pub use tts::{ElevenLabsTts, TtsEvent, TtsProvider, TtsRequest, VoiceParams};

/// Owned, sendable stream of adapter events.
pub type EventStream<T> = BoxStream<'static, T>;
