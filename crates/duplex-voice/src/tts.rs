use crate::config::TtsConfig;
use crate::error::VoiceError;
use crate::EventStream;
use duplex_types::{AgentProfile, AudioFormat};
use futures_util::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Maximum text input size for one synthesis request (64 KiB).
const MAX_TTS_INPUT_BYTES: usize = 64 * 1024;

const TTS_EVENT_CAPACITY: usize = 64;

const MAX_ERROR_BODY_CHARS: usize = 512;

/// Voice parameters for a synthesis request.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceParams {
    pub voice_id: String,
    pub stability: f32,
    pub similarity_boost: f32,
}

impl From<&AgentProfile> for VoiceParams {
    fn from(profile: &AgentProfile) -> Self {
        Self {
            voice_id: profile.voice_id.clone(),
            stability: profile.stability,
            similarity_boost: profile.similarity_boost,
        }
    }
}

/// One text segment to synthesize.
#[derive(Debug, Clone, PartialEq)]
pub struct TtsRequest {
    pub text: String,
    /// Marker shared by every segment of one turn.
    pub context_id: String,
    /// Whether this segment continues an utterance already begun in this
    /// context, so the provider keeps prosody continuous.
    pub continuation: bool,
    /// Text synthesized earlier in the same context, when continuing.
    pub previous_text: Option<String>,
    pub voice: VoiceParams,
}

/// Event produced by a synthesis stream.
#[derive(Debug, Clone, PartialEq)]
pub enum TtsEvent {
    Audio { context_id: String, bytes: Vec<u8> },
    /// All audio for the segment has been produced.
    Done { context_id: String },
    /// Terminal failure; no further events follow.
    Error(VoiceError),
}

/// Normalizes a streaming text-to-speech provider.
pub trait TtsProvider: Send + Sync {
    fn synthesize(&self, request: TtsRequest) -> EventStream<TtsEvent>;

    /// Encoding of the audio bytes this provider produces.
    fn format(&self) -> AudioFormat {
        AudioFormat::Mp3
    }
}

/// ElevenLabs-style HTTP streaming synthesis.
#[derive(Debug, Clone)]
pub struct ElevenLabsTts {
    client: reqwest::Client,
    config: TtsConfig,
}

impl ElevenLabsTts {
    pub fn new(config: TtsConfig) -> Self {
        Self::with_client(reqwest::Client::new(), config)
    }

    pub fn with_client(client: reqwest::Client, config: TtsConfig) -> Self {
        Self { client, config }
    }

    /// Returns the streaming endpoint for `voice_id`.
    pub fn stream_url(&self, voice_id: &str) -> String {
        let mut url = format!(
            "{}/v1/text-to-speech/{}/stream?output_format={}",
            self.config.base_url.trim_end_matches('/'),
            voice_id,
            self.config.output_format
        );
        if let Some(level) = self.config.optimize_streaming_latency {
            url.push_str(&format!("&optimize_streaming_latency={}", level));
        }
        url
    }
}

#[derive(Serialize)]
struct SynthesisBody<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: VoiceSettings,
    #[serde(skip_serializing_if = "Option::is_none")]
    previous_text: Option<&'a str>,
}

#[derive(Serialize)]
struct VoiceSettings {
    stability: f32,
    similarity_boost: f32,
}

impl TtsProvider for ElevenLabsTts {
    fn synthesize(&self, request: TtsRequest) -> EventStream<TtsEvent> {
        let (tx, rx) = mpsc::channel(TTS_EVENT_CAPACITY);
        let client = self.client.clone();
        let url = self.stream_url(&request.voice.voice_id);
        let config = self.config.clone();

        tokio::spawn(async move {
            let context_id = request.context_id.clone();
            match run_synthesis(client, url, config, request, &tx).await {
                Ok(()) => {
                    let _ = tx.send(TtsEvent::Done { context_id }).await;
                }
                Err(e) => {
                    tracing::warn!(context_id = %context_id, "synthesis stream failed: {}", e);
                    let _ = tx.send(TtsEvent::Error(e)).await;
                }
            }
        });

        ReceiverStream::new(rx).boxed()
    }

    fn format(&self) -> AudioFormat {
        if self.config.output_format.starts_with("pcm") {
            AudioFormat::PcmS16le
        } else {
            AudioFormat::Mp3
        }
    }
}

async fn run_synthesis(
    client: reqwest::Client,
    url: String,
    config: TtsConfig,
    request: TtsRequest,
    tx: &mpsc::Sender<TtsEvent>,
) -> Result<(), VoiceError> {
    if request.text.len() > MAX_TTS_INPUT_BYTES {
        return Err(VoiceError::Tts(format!(
            "text exceeds maximum size: {} bytes (limit: {} bytes)",
            request.text.len(),
            MAX_TTS_INPUT_BYTES
        )));
    }

    let body = SynthesisBody {
        text: &request.text,
        model_id: &config.model_id,
        voice_settings: VoiceSettings {
            stability: request.voice.stability,
            similarity_boost: request.voice.similarity_boost,
        },
        previous_text: if request.continuation {
            request.previous_text.as_deref()
        } else {
            None
        },
    };

    let response = tokio::select! {
        _ = tx.closed() => return Ok(()),
        response = client
            .post(&url)
            .header("xi-api-key", &config.api_key)
            .json(&body)
            .send() => response.map_err(|e| VoiceError::Connect(e.to_string()))?,
    };

    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        let snippet: String = text.chars().take(MAX_ERROR_BODY_CHARS).collect();
        return Err(VoiceError::Tts(format!("status {}: {}", status, snippet)));
    }

    let mut audio = response.bytes_stream();
    loop {
        let chunk = tokio::select! {
            _ = tx.closed() => return Ok(()),
            chunk = audio.next() => chunk,
        };
        match chunk {
            Some(Ok(bytes)) if bytes.is_empty() => {}
            Some(Ok(bytes)) => {
                let event = TtsEvent::Audio {
                    context_id: request.context_id.clone(),
                    bytes: bytes.to_vec(),
                };
                if tx.send(event).await.is_err() {
                    return Ok(());
                }
            }
            Some(Err(e)) => {
                return Err(VoiceError::Tts(format!("stream interrupted: {}", e)));
            }
            None => return Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_url_includes_voice_and_format() {
        let tts = ElevenLabsTts::new(TtsConfig {
            base_url: "http://127.0.0.1:9000/".to_string(),
            optimize_streaming_latency: Some(3),
            ..Default::default()
        });
        assert_eq!(
            tts.stream_url("voice-1"),
            "http://127.0.0.1:9000/v1/text-to-speech/voice-1/stream?output_format=mp3_44100_128&optimize_streaming_latency=3"
        );
        assert_eq!(tts.format(), AudioFormat::Mp3);
    }

    #[test]
    fn pcm_output_reports_pcm_format() {
        let tts = ElevenLabsTts::new(TtsConfig {
            output_format: "pcm_24000".to_string(),
            ..Default::default()
        });
        assert_eq!(tts.format(), AudioFormat::PcmS16le);
    }

    #[test]
    fn voice_params_follow_profile() {
        let profile = AgentProfile {
            voice_id: "abc".to_string(),
            stability: 0.3,
            ..Default::default()
        };
        let params = VoiceParams::from(&profile);
        assert_eq!(params.voice_id, "abc");
        assert_eq!(params.stability, 0.3);
        assert_eq!(params.similarity_boost, 0.75);
    }
}
