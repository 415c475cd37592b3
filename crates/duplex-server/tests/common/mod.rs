#![allow(dead_code)]

use duplex_client::VoiceClient;
use duplex_server::config::SessionConfig;
use duplex_server::profile::{ProfileError, ProfileSource, StaticProfile};
use duplex_server::registry::SessionRegistry;
use duplex_server::{app, AppState};
use duplex_types::{AgentProfile, ServerMessage};
use duplex_voice::{
    EventStream, LlmEvent, LlmProvider, LlmRequest, PassThrough, SttEvent, SttProvider,
    SttStream, TtsEvent, TtsProvider, TtsRequest, VoiceError,
};
use futures_util::future::BoxFuture;
use futures_util::{stream, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Base64 of three zero bytes.
pub const SILENT_FRAME: &str = "AAAA";

/// Transcriber that hears one utterance every `frames_per_utterance` frames.
#[derive(Debug, Clone)]
pub struct ScriptedStt {
    frames_per_utterance: usize,
    utterances: Vec<String>,
    repeat_final: bool,
    fail_after: Option<usize>,
}

impl ScriptedStt {
    pub fn new(frames_per_utterance: usize, utterances: &[&str]) -> Self {
        Self {
            frames_per_utterance,
            utterances: utterances.iter().map(|u| u.to_string()).collect(),
            repeat_final: false,
            fail_after: None,
        }
    }

    /// Emits every final transcript twice.
    pub fn repeat_final(mut self) -> Self {
        self.repeat_final = true;
        self
    }

    /// Fails the stream once this many frames have arrived.
    pub fn fail_after(mut self, frames: usize) -> Self {
        self.fail_after = Some(frames);
        self
    }
}

fn transcript(text: &str, is_final: bool) -> SttEvent {
    SttEvent::Transcript {
        text: text.to_string(),
        is_final,
        confidence: 0.98,
    }
}

impl SttProvider for ScriptedStt {
    fn open(&self) -> SttStream {
        let (audio_tx, mut audio_rx) = mpsc::channel::<Vec<u8>>(64);
        let (event_tx, event_rx) = mpsc::channel(64);
        let script = self.clone();

        tokio::spawn(async move {
            let mut frames = 0;
            let mut heard = 0;
            while audio_rx.recv().await.is_some() {
                frames += 1;
                if script.fail_after == Some(frames) {
                    let error = VoiceError::Stt("socket reset by peer".to_string());
                    let _ = event_tx.send(SttEvent::Error(error)).await;
                    return;
                }
                if frames % script.frames_per_utterance != 0 {
                    continue;
                }

                let text = &script.utterances[heard % script.utterances.len()];
                heard += 1;
                let partial: String = text.chars().take(3).collect();
                let mut events = vec![transcript(&partial, false), transcript(text, true)];
                if script.repeat_final {
                    events.push(transcript(text, true));
                }
                for event in events {
                    if event_tx.send(event).await.is_err() {
                        return;
                    }
                }
            }
        });

        SttStream {
            audio: audio_tx,
            events: ReceiverStream::new(event_rx).boxed(),
        }
    }
}

/// Model that replies with fixed deltas and records every request.
#[derive(Debug, Default)]
pub struct ScriptedLlm {
    deltas: Vec<String>,
    delay: Duration,
    failures: AtomicUsize,
    requests: Mutex<Vec<LlmRequest>>,
}

impl ScriptedLlm {
    pub fn new(deltas: &[&str]) -> Self {
        Self {
            deltas: deltas.iter().map(|d| d.to_string()).collect(),
            ..Self::default()
        }
    }

    /// Sleeps before every event.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// The first `count` calls fail after their first delta.
    pub fn failing(self, count: usize) -> Self {
        self.failures.store(count, Ordering::SeqCst);
        self
    }

    pub fn requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl LlmProvider for ScriptedLlm {
    fn stream(&self, request: LlmRequest) -> EventStream<LlmEvent> {
        self.requests.lock().unwrap().push(request);
        let fail = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();

        let mut events: Vec<LlmEvent> = self.deltas.iter().cloned().map(LlmEvent::Delta).collect();
        if fail {
            events.truncate(1);
            events.push(LlmEvent::Error(VoiceError::Llm(
                "HTTP 500: upstream unavailable".to_string(),
            )));
        } else {
            events.push(LlmEvent::Done);
        }

        let delay = self.delay;
        stream::iter(events)
            .then(move |event| async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                event
            })
            .boxed()
    }
}

/// Synthesizer whose audio is the UTF-8 text it was asked to speak.
#[derive(Debug, Default)]
pub struct EchoTts {
    fail: bool,
    requests: Mutex<Vec<TtsRequest>>,
}

impl EchoTts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn requests(&self) -> Vec<TtsRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl TtsProvider for EchoTts {
    fn synthesize(&self, request: TtsRequest) -> EventStream<TtsEvent> {
        self.requests.lock().unwrap().push(request.clone());
        let events = if self.fail {
            vec![TtsEvent::Error(VoiceError::Tts(
                "HTTP 401: invalid api key".to_string(),
            ))]
        } else {
            vec![
                TtsEvent::Audio {
                    context_id: request.context_id.clone(),
                    bytes: request.text.into_bytes(),
                },
                TtsEvent::Done {
                    context_id: request.context_id,
                },
            ]
        };
        stream::iter(events).boxed()
    }
}

/// Profile store that is always down.
pub struct BrokenProfiles;

impl ProfileSource for BrokenProfiles {
    fn load(&self) -> BoxFuture<'_, Result<AgentProfile, ProfileError>> {
        Box::pin(async { Err(ProfileError::Unavailable("connection refused".to_string())) })
    }
}

pub fn test_state(
    stt: Arc<dyn SttProvider>,
    llm: Arc<dyn LlmProvider>,
    tts: Arc<dyn TtsProvider>,
) -> AppState {
    AppState {
        session: SessionConfig::default(),
        registry: SessionRegistry::new(),
        stt,
        llm,
        tts,
        normalizer: Arc::new(PassThrough),
        profiles: Arc::new(StaticProfile::new(AgentProfile::default())),
    }
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub registry: SessionRegistry,
}

impl TestServer {
    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// Connects and consumes `connection.established`.
    pub async fn connect(&self) -> VoiceClient {
        let mut client = VoiceClient::connect(&self.ws_url()).await.unwrap();
        match next(&mut client).await {
            ServerMessage::ConnectionEstablished { .. } => {}
            other => panic!("expected connection.established, got {:?}", other),
        }
        assert!(client.session_id().is_some());
        client
    }

    /// Waits until the registry holds exactly `expected` sessions.
    pub async fn wait_for_sessions(&self, expected: usize) {
        tokio::time::timeout(EVENT_TIMEOUT, async {
            while self.registry.count().await != expected {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("registry never reached {} sessions", expected));
    }
}

pub async fn spawn_app(state: AppState) -> TestServer {
    let registry = state.registry.clone();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app(state)).await.unwrap();
    });
    TestServer { addr, registry }
}

pub async fn next(client: &mut VoiceClient) -> ServerMessage {
    tokio::time::timeout(EVENT_TIMEOUT, client.next_event())
        .await
        .expect("timed out waiting for server message")
        .unwrap()
        .expect("server closed the session")
}

/// Reads until `done` matches, returning everything read including the match.
pub async fn collect_until(
    client: &mut VoiceClient,
    done: impl Fn(&ServerMessage) -> bool,
) -> Vec<ServerMessage> {
    let mut seen = Vec::new();
    loop {
        let message = next(client).await;
        let stop = done(&message);
        seen.push(message);
        if stop {
            return seen;
        }
    }
}

/// Asserts the server closes the session within the timeout.
pub async fn expect_closed(client: &mut VoiceClient) -> Vec<ServerMessage> {
    let mut seen = Vec::new();
    loop {
        let event = tokio::time::timeout(EVENT_TIMEOUT, client.next_event())
            .await
            .expect("session was not closed");
        match event {
            Ok(Some(message)) => seen.push(message),
            Ok(None) | Err(_) => return seen,
        }
    }
}

pub async fn send_frames(client: &mut VoiceClient, count: usize) {
    for _ in 0..count {
        client.send_audio(SILENT_FRAME).await.unwrap();
    }
}

pub fn text_chunks(messages: &[ServerMessage]) -> Vec<String> {
    messages
        .iter()
        .filter_map(|m| match m {
            ServerMessage::TextChunk { text } => Some(text.clone()),
            _ => None,
        })
        .collect()
}

pub fn audio_indices(messages: &[ServerMessage]) -> Vec<u32> {
    messages
        .iter()
        .filter_map(|m| match m {
            ServerMessage::AudioChunk { chunk_index, .. } => Some(*chunk_index),
            _ => None,
        })
        .collect()
}

pub fn is_audio_complete(message: &ServerMessage) -> bool {
    matches!(message, ServerMessage::AudioComplete { .. })
}
