//! Client side of a duplex voice session.
//!
//! - [`pcm`]: microphone sample encoding and silence detection
//! - [`playback`]: ordered, gapless playback of indexed reply audio
//! - [`transport`]: the session WebSocket client
//!
//! Capture and output devices stay outside this crate. Capture feeds
//! [`pcm::encode_stream`] a stream of sample blocks; output implements
//! [`Player`].

pub mod conversation;
pub mod error;
pub mod pcm;
pub mod playback;
pub mod transport;

pub use error::{CaptureError, ClientError, PlaybackError};
pub use pcm::{encode_stream, EncodedFrame, PcmEncoder, SilenceDetector};
pub use playback::{
    PlaybackEvent, PlaybackQueue, PlaybackScheduler, PlaybackStatus, Player,
};
pub use transport::{VoiceClient, VoiceReceiver, VoiceSender};
