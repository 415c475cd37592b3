//! WebSocket API handler and the per-session event loop.
//!
//! Each connection gets one task that owns its [`Session`]. The task selects
//! over inbound frames, transcription events, progress from the running turn,
//! registry control messages, and the inactivity deadline. Outbound frames go
//! through a bounded channel drained by a dedicated writer task.

use crate::registry::SessionControl;
use crate::session::{Outbound, Session, TurnState};
use crate::turn::{spawn_turn, TurnContext, TurnError, TurnOutcome, TurnSignal};
use crate::AppState;
use axum::{
    extract::{
        ws::{Message as AxumMessage, WebSocket},
        Extension, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use base64::Engine;
use duplex_types::{ClientMessage, Role, ServerMessage};
use duplex_voice::{SttEvent, SttStream, VoiceParams};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Outbound frames buffered per session before senders wait.
pub const OUTBOUND_CAPACITY: usize = 256;

/// Time the writer gets to flush final frames after the session ends.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

const TURN_SIGNAL_CAPACITY: usize = 32;

/// Stand-in deadline for inactivity timeouts too large to represent.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

const PROCESSING_FAILED: &str = "Failed to process";
const RECOGNITION_FAILED: &str = "Voice recognition failed";
const INVALID_MESSAGE: &str = "Invalid message";

/// WebSocket handler: `GET /ws`.
pub async fn ws_handler(
    Extension(state): Extension<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Why a session loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    ClientClosed,
    SessionEnd,
    SttFailed,
    Inactive,
    Shutdown,
}

impl CloseReason {
    fn as_str(self) -> &'static str {
        match self {
            Self::ClientClosed => "client_closed",
            Self::SessionEnd => "session_end",
            Self::SttFailed => "stt_failed",
            Self::Inactive => "inactive",
            Self::Shutdown => "shutdown",
        }
    }
}

struct ActiveTurn {
    turn_no: u64,
    handle: JoinHandle<()>,
}

/// State of one connection's loop. Only this task touches it.
struct SessionTask {
    state: Arc<AppState>,
    session: Session,
    outbound: Outbound,
    stt: SttStream,
    signals: mpsc::Sender<TurnSignal>,
    turn: Option<ActiveTurn>,
}

/// Handles the WebSocket connection.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    let (tx, mut rx) = mpsc::channel::<String>(OUTBOUND_CAPACITY);
    let outbound = Outbound::new(tx);

    // Spawn a task to forward messages from rx to the websocket sender
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(AxumMessage::Text(msg.into())).await.is_err() {
                return;
            }
        }
        let _ = sender.send(AxumMessage::Close(None)).await;
    });

    let (control_tx, mut control_rx) = mpsc::channel::<SessionControl>(4);
    let session_id = state.registry.register(control_tx).await;
    tracing::info!(session_id = %session_id, "session connected");

    let profile = match state.profiles.load().await {
        Ok(profile) => profile,
        Err(e) => {
            tracing::warn!(session_id = %session_id, "profile lookup failed, using defaults: {}", e);
            Default::default()
        }
    };

    let (signal_tx, mut signal_rx) = mpsc::channel::<TurnSignal>(TURN_SIGNAL_CAPACITY);
    let mut task = SessionTask {
        stt: state.stt.open(),
        session: Session::new(session_id, profile),
        outbound,
        signals: signal_tx,
        turn: None,
        state: state.clone(),
    };

    let established = ServerMessage::ConnectionEstablished {
        session_id: session_id.to_string(),
        message: "Connected to voice agent".to_string(),
    };
    let reason = if task.outbound.send(&established).await.is_err() {
        CloseReason::ClientClosed
    } else {
        let idle_timeout = state.session.inactivity_timeout();
        let deadline = tokio::time::sleep_until(idle_deadline(idle_timeout));
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                frame = receiver.next() => {
                    deadline.as_mut().reset(idle_deadline(idle_timeout));
                    match frame {
                        Some(Ok(AxumMessage::Text(text))) => {
                            if let Some(reason) = task.on_client_text(text.as_str()).await {
                                break reason;
                            }
                        }
                        Some(Ok(AxumMessage::Close(_))) | None => break CloseReason::ClientClosed,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::debug!(session_id = %session_id, "websocket receive error: {}", e);
                            break CloseReason::ClientClosed;
                        }
                    }
                }
                event = task.stt.events.next() => {
                    if let Some(reason) = task.on_stt_event(event).await {
                        break reason;
                    }
                }
                Some(signal) = signal_rx.recv() => task.on_turn_signal(signal).await,
                Some(control) = control_rx.recv() => match control {
                    SessionControl::Close => break CloseReason::Shutdown,
                },
                () = &mut deadline => {
                    tracing::info!(
                        session_id = %session_id,
                        timeout_secs = idle_timeout.as_secs(),
                        "closing inactive session"
                    );
                    break CloseReason::Inactive;
                }
            }
        }
    };

    // Cleanup: abort the turn (dropping its provider streams), close STT,
    // deregister, then let the writer flush what is queued.
    let SessionTask {
        session, turn, stt, outbound, ..
    } = task;
    if let Some(turn) = turn {
        turn.handle.abort();
        let _ = turn.handle.await;
    }
    drop(stt);
    drop(outbound);
    let connected_secs = state
        .registry
        .remove(session_id)
        .await
        .map(|handle| handle.connected_for().num_seconds());

    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, send_task).await.is_err() {
        tracing::debug!(session_id = %session_id, "writer did not drain in time");
    }

    tracing::info!(
        session_id = %session_id,
        reason = reason.as_str(),
        connected_secs,
        turns = session.history.iter().filter(|m| m.role == Role::User).count(),
        "session closed"
    );
}

impl SessionTask {
    fn id(&self) -> Uuid {
        self.session.id
    }

    async fn on_client_text(&mut self, text: &str) -> Option<CloseReason> {
        let message = match serde_json::from_str::<ClientMessage>(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(session_id = %self.id(), "failed to parse incoming WebSocket message: {}", e);
                return self.reply_error(INVALID_MESSAGE).await;
            }
        };

        match message {
            ClientMessage::AudioChunk { audio } => {
                let pcm = match base64::engine::general_purpose::STANDARD.decode(audio.as_bytes()) {
                    Ok(pcm) => pcm,
                    Err(e) => {
                        tracing::warn!(session_id = %self.id(), "undecodable audio frame: {}", e);
                        return self.reply_error(INVALID_MESSAGE).await;
                    }
                };
                self.session.on_audio();
                match self.stt.audio.try_send(pcm) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::warn!(session_id = %self.id(), "STT uplink full, dropping audio frame");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        tracing::debug!(session_id = %self.id(), "STT uplink closed, dropping audio frame");
                    }
                }
                None
            }
            ClientMessage::Interrupt => {
                self.interrupt().await;
                None
            }
            ClientMessage::SessionEnd => Some(CloseReason::SessionEnd),
        }
    }

    async fn reply_error(&mut self, message: &str) -> Option<CloseReason> {
        self.outbound
            .send_error(message)
            .await
            .err()
            .map(|_| CloseReason::ClientClosed)
    }

    async fn on_stt_event(&mut self, event: Option<SttEvent>) -> Option<CloseReason> {
        match event {
            Some(SttEvent::Transcript { text, is_final, .. }) => {
                let update = ServerMessage::TranscriptUpdate {
                    text: text.clone(),
                    is_final,
                };
                if self.outbound.send(&update).await.is_err() {
                    return Some(CloseReason::ClientClosed);
                }
                if is_final {
                    self.start_turn(&text);
                }
                None
            }
            Some(SttEvent::Error(e)) => {
                tracing::error!(session_id = %self.id(), "speech recognition failed: {}", e);
                let _ = self.outbound.send_error(RECOGNITION_FAILED).await;
                Some(CloseReason::SttFailed)
            }
            None => {
                tracing::error!(session_id = %self.id(), "speech recognition stream ended");
                let _ = self.outbound.send_error(RECOGNITION_FAILED).await;
                Some(CloseReason::SttFailed)
            }
        }
    }

    fn start_turn(&mut self, text: &str) {
        let window = self.state.session.history_window;
        let Some(start) = self.session.begin_turn(text, window) else {
            return;
        };
        tracing::info!(
            session_id = %self.id(),
            turn = start.turn_no,
            context_id = %start.context_id,
            "starting turn"
        );

        let ctx = TurnContext {
            turn_no: start.turn_no,
            context_id: start.context_id,
            request: start.request,
            voice: VoiceParams::from(&self.session.profile),
            llm: self.state.llm.clone(),
            tts: self.state.tts.clone(),
            normalizer: self.state.normalizer.clone(),
            outbound: self.outbound.clone(),
            signals: self.signals.clone(),
        };
        self.turn = Some(ActiveTurn {
            turn_no: start.turn_no,
            handle: spawn_turn(ctx),
        });
    }

    async fn on_turn_signal(&mut self, signal: TurnSignal) {
        match signal {
            TurnSignal::Phase { turn_no, state } => self.session.on_phase(turn_no, state),
            TurnSignal::Finished { turn_no, outcome } => {
                if self.turn.as_ref().map(|t| t.turn_no) == Some(turn_no) {
                    self.turn = None;
                }
                match outcome {
                    TurnOutcome::Completed {
                        reply,
                        total_chunks,
                    } => {
                        if self.session.complete_turn(turn_no, &reply) {
                            tracing::debug!(session_id = %self.id(), turn = turn_no, total_chunks, "reply delivered");
                        }
                    }
                    TurnOutcome::Failed(TurnError::Disconnected(_)) => {
                        self.session.abandon_turn(turn_no);
                    }
                    TurnOutcome::Failed(TurnError::Provider(e)) => {
                        if self.session.abandon_turn(turn_no) {
                            tracing::warn!(session_id = %self.id(), turn = turn_no, "turn failed: {}", e);
                            let _ = self.outbound.send_error(PROCESSING_FAILED).await;
                        }
                    }
                }
            }
        }
    }

    async fn interrupt(&mut self) {
        if let Some(turn) = self.turn.take() {
            // Nothing the turn queues may follow the acknowledgement.
            turn.handle.abort();
            let _ = turn.handle.await;
        }
        match self.session.interrupt() {
            Some(turn_no) => {
                tracing::info!(session_id = %self.id(), turn = turn_no, "turn interrupted");
            }
            None => {
                tracing::debug!(session_id = %self.id(), "interrupt with no turn in flight");
            }
        }
        debug_assert_eq!(self.session.state(), TurnState::Idle);
        let _ = self.outbound.send(&ServerMessage::InterruptAcknowledged).await;
    }
}

/// Deadline `timeout` from now, saturating for timeouts past the clock's range.
fn idle_deadline(timeout: Duration) -> tokio::time::Instant {
    let now = tokio::time::Instant::now();
    now.checked_add(timeout).unwrap_or(now + FAR_FUTURE)
}
