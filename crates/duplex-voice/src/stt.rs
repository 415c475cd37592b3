use crate::config::SttConfig;
use crate::error::VoiceError;
use crate::EventStream;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::Message;

/// Time allowed for the provider WebSocket handshake.
const STT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Frames buffered between the session and the provider socket.
const STT_UPLINK_CAPACITY: usize = 64;

const STT_EVENT_CAPACITY: usize = 64;

/// Event produced by a live transcription stream.
#[derive(Debug, Clone, PartialEq)]
pub enum SttEvent {
    /// A partial (provisional) or final (authoritative) transcript.
    Transcript {
        text: String,
        is_final: bool,
        confidence: f32,
    },
    /// Terminal failure; no further events follow.
    Error(VoiceError),
}

/// Handle to one open transcription stream.
///
/// Dropping `audio` half-closes the uplink: the provider flushes pending
/// results and the event stream ends. Dropping `events` tears the stream down.
pub struct SttStream {
    pub audio: mpsc::Sender<Vec<u8>>,
    pub events: EventStream<SttEvent>,
}

/// Normalizes a streaming speech-to-text provider.
pub trait SttProvider: Send + Sync {
    /// Opens a transcription stream for raw PCM bytes.
    ///
    /// Connection happens in the background; a failed connection shows up as
    /// a single [`SttEvent::Error`].
    fn open(&self) -> SttStream;
}

/// Deepgram-style live transcription over a WebSocket.
#[derive(Debug, Clone)]
pub struct DeepgramStt {
    config: SttConfig,
}

impl DeepgramStt {
    pub fn new(config: SttConfig) -> Self {
        Self { config }
    }

    /// Builds the listen URL with the linear16 stream parameters.
    pub fn listen_url(&self) -> String {
        let config = &self.config;
        let mut url = format!(
            "{}?encoding=linear16&sample_rate={}&channels=1&interim_results={}&punctuate={}&endpointing={}",
            config.url,
            config.sample_rate,
            config.interim_results,
            config.punctuate,
            config.endpointing_ms
        );
        if let Some(model) = &config.model {
            url.push_str("&model=");
            url.push_str(model);
        }
        url
    }
}

impl SttProvider for DeepgramStt {
    fn open(&self) -> SttStream {
        let (audio_tx, audio_rx) = mpsc::channel(STT_UPLINK_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(STT_EVENT_CAPACITY);
        let url = self.listen_url();
        let api_key = self.config.api_key.clone();
        let threshold = self.config.confidence_threshold;

        tokio::spawn(async move {
            if let Err(e) = run_listen(url, api_key, threshold, audio_rx, &event_tx).await {
                tracing::warn!("transcription stream failed: {}", e);
                let _ = event_tx.send(SttEvent::Error(e)).await;
            }
        });

        SttStream {
            audio: audio_tx,
            events: ReceiverStream::new(event_rx).boxed(),
        }
    }
}

async fn run_listen(
    url: String,
    api_key: String,
    threshold: f32,
    mut audio_rx: mpsc::Receiver<Vec<u8>>,
    events: &mpsc::Sender<SttEvent>,
) -> Result<(), VoiceError> {
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| VoiceError::Config(format!("invalid STT url: {}", e)))?;
    if !api_key.is_empty() {
        let value = HeaderValue::from_str(&format!("Token {}", api_key))
            .map_err(|e| VoiceError::Config(format!("invalid STT api key: {}", e)))?;
        request.headers_mut().insert(AUTHORIZATION, value);
    }

    let (socket, _) = tokio::time::timeout(
        STT_CONNECT_TIMEOUT,
        tokio_tungstenite::connect_async(request),
    )
    .await
    .map_err(|_| {
        VoiceError::Timeout(format!(
            "STT handshake exceeded {} seconds",
            STT_CONNECT_TIMEOUT.as_secs()
        ))
    })?
    .map_err(|e| VoiceError::Connect(e.to_string()))?;

    tracing::debug!("transcription stream connected");
    let (mut sink, mut stream) = socket.split();
    let mut uplink_open = true;

    loop {
        tokio::select! {
            _ = events.closed() => {
                let _ = sink.send(Message::Text(CLOSE_STREAM.into())).await;
                let _ = sink.close().await;
                return Ok(());
            }
            frame = audio_rx.recv(), if uplink_open => match frame {
                Some(pcm) => {
                    sink.send(Message::Binary(pcm.into()))
                        .await
                        .map_err(|e| VoiceError::Stt(format!("failed to send audio: {}", e)))?;
                }
                None => {
                    uplink_open = false;
                    sink.send(Message::Text(CLOSE_STREAM.into()))
                        .await
                        .map_err(|e| VoiceError::Stt(format!("failed to close stream: {}", e)))?;
                }
            },
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if let Some(event) = parse_transcript(&text, threshold) {
                        if events.send(event).await.is_err() {
                            return Ok(());
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    return if uplink_open {
                        Err(VoiceError::Stt("connection closed by provider".to_string()))
                    } else {
                        Ok(())
                    };
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(VoiceError::Stt(e.to_string())),
            },
        }
    }
}

const CLOSE_STREAM: &str = r#"{"type":"CloseStream"}"#;

#[derive(Debug, Deserialize)]
struct ListenMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    is_final: bool,
    channel: Option<ListenChannel>,
}

#[derive(Debug, Deserialize)]
struct ListenChannel {
    #[serde(default)]
    alternatives: Vec<ListenAlternative>,
}

#[derive(Debug, Deserialize)]
struct ListenAlternative {
    #[serde(default)]
    transcript: String,
    #[serde(default)]
    confidence: f32,
}

/// Extracts a transcript event from one provider frame.
///
/// Metadata frames, empty transcripts, and transcripts below `threshold`
/// produce `None`.
pub fn parse_transcript(frame: &str, threshold: f32) -> Option<SttEvent> {
    let message: ListenMessage = match serde_json::from_str(frame) {
        Ok(m) => m,
        Err(e) => {
            tracing::debug!("ignoring unparseable transcription frame: {}", e);
            return None;
        }
    };
    if message.kind != "Results" {
        return None;
    }
    let alternative = message.channel?.alternatives.into_iter().next()?;
    let text = alternative.transcript.trim();
    if text.is_empty() {
        return None;
    }
    if alternative.confidence < threshold {
        tracing::debug!(
            confidence = alternative.confidence,
            threshold,
            "dropping low-confidence transcript"
        );
        return None;
    }
    Some(SttEvent::Transcript {
        text: text.to_string(),
        is_final: message.is_final,
        confidence: alternative.confidence,
    })
}
