use crate::error::ClientError;
use crate::playback::PlaybackQueue;
use crate::transport::VoiceSender;
use base64::Engine;
use duplex_types::{AudioChunk, ServerMessage};

/// Applies one server message to local playback.
///
/// Audio chunks are decoded and queued by index, `audio.complete` finalizes
/// the turn, and `interrupt.acknowledged` clears whatever is still queued.
/// Text messages are left to the caller.
pub async fn apply(message: &ServerMessage, playback: &PlaybackQueue) -> Result<(), ClientError> {
    match message {
        ServerMessage::AudioChunk {
            audio,
            chunk_index,
            format,
        } => {
            let payload = base64::engine::general_purpose::STANDARD
                .decode(audio)
                .map_err(|e| ClientError::InvalidAudio(e.to_string()))?;
            playback
                .add_chunk(AudioChunk::new(
                    *chunk_index,
                    payload,
                    format.unwrap_or_default(),
                ))
                .await;
        }
        ServerMessage::AudioComplete { total_chunks } => playback.finalize(*total_chunks).await,
        ServerMessage::InterruptAcknowledged => playback.stop().await,
        _ => {}
    }
    Ok(())
}

/// Barge-in: silence local playback first, then tell the server.
pub async fn barge_in(sender: &mut VoiceSender, playback: &PlaybackQueue) -> Result<(), ClientError> {
    playback.stop().await;
    sender.interrupt().await
}
