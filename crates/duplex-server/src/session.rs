//! Per-session conversation state.
//!
//! A [`Session`] is owned by exactly one task. It is a plain state machine:
//! the socket loop feeds it events and acts on what it returns.

use duplex_types::{AgentProfile, ChatMessage, Role, ServerMessage, TranscriptEntry};
use duplex_voice::LlmRequest;
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Phase of the current turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    Listening,
    Transcribing,
    Generating,
    Synthesizing,
    Interrupted,
}

impl TurnState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::Transcribing => "transcribing",
            Self::Generating => "generating",
            Self::Synthesizing => "synthesizing",
            Self::Interrupted => "interrupted",
        }
    }
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A turn accepted from a final transcript.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnStart {
    pub turn_no: u64,
    /// Marker shared by every synthesis request of the turn.
    pub context_id: String,
    pub request: LlmRequest,
}

#[derive(Debug)]
pub struct Session {
    pub id: Uuid,
    pub profile: AgentProfile,
    pub history: Vec<ChatMessage>,
    pub transcript: Vec<TranscriptEntry>,
    state: TurnState,
    is_processing: bool,
    turns_started: u64,
    active_turn: Option<u64>,
}

impl Session {
    pub fn new(id: Uuid, profile: AgentProfile) -> Self {
        Self {
            id,
            profile,
            history: Vec::new(),
            transcript: Vec::new(),
            state: TurnState::Idle,
            is_processing: false,
            turns_started: 0,
            active_turn: None,
        }
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn is_processing(&self) -> bool {
        self.is_processing
    }

    pub fn active_turn(&self) -> Option<u64> {
        self.active_turn
    }

    fn transition(&mut self, next: TurnState) {
        if self.state != next {
            tracing::debug!(session_id = %self.id, from = %self.state, to = %next, "turn state");
            self.state = next;
        }
    }

    /// Inbound audio moves an idle session to listening.
    pub fn on_audio(&mut self) {
        if self.state == TurnState::Idle {
            self.transition(TurnState::Listening);
        }
    }

    /// Accepts a final transcript as the start of a turn.
    ///
    /// Returns `None` for empty text or while a turn is already in flight;
    /// at most one turn runs per session.
    pub fn begin_turn(&mut self, text: &str, history_window: usize) -> Option<TurnStart> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        if self.is_processing {
            tracing::debug!(session_id = %self.id, "final transcript ignored while processing");
            return None;
        }

        self.is_processing = true;
        self.turns_started += 1;
        let turn_no = self.turns_started;
        self.active_turn = Some(turn_no);
        self.transition(TurnState::Transcribing);

        let request = LlmRequest::build(
            &self.profile.system_prompt,
            &self.history,
            history_window,
            text,
        );
        self.history.push(ChatMessage::user(text));
        self.transcript.push(TranscriptEntry::now(Role::User, text));

        Some(TurnStart {
            turn_no,
            context_id: format!("{}-{}", self.id, turn_no),
            request,
        })
    }

    /// Applies a phase reported by the turn task. Stale turns are ignored.
    pub fn on_phase(&mut self, turn_no: u64, state: TurnState) {
        if self.active_turn == Some(turn_no) {
            self.transition(state);
        }
    }

    /// Records the finished reply. Returns `false` for a stale turn.
    pub fn complete_turn(&mut self, turn_no: u64, reply: &str) -> bool {
        if self.active_turn != Some(turn_no) {
            return false;
        }
        self.history.push(ChatMessage::assistant(reply));
        self.transcript
            .push(TranscriptEntry::now(Role::Assistant, reply));
        self.finish();
        true
    }

    /// Drops a failed turn. Returns `false` for a stale turn.
    pub fn abandon_turn(&mut self, turn_no: u64) -> bool {
        if self.active_turn != Some(turn_no) {
            return false;
        }
        self.finish();
        true
    }

    /// Barge-in. Returns the turn that was cut off, if any.
    pub fn interrupt(&mut self) -> Option<u64> {
        let interrupted = self.active_turn;
        if interrupted.is_some() {
            self.transition(TurnState::Interrupted);
        }
        self.finish();
        interrupted
    }

    fn finish(&mut self) {
        self.active_turn = None;
        self.is_processing = false;
        self.transition(TurnState::Idle);
    }
}

/// The client connection went away.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("client connection closed")]
pub struct Disconnected;

/// Bounded queue of serialized frames drained by the socket writer.
///
/// Senders await capacity, so a slow client slows the pipeline down instead
/// of losing audio.
#[derive(Debug, Clone)]
pub struct Outbound {
    tx: mpsc::Sender<String>,
}

impl Outbound {
    pub fn new(tx: mpsc::Sender<String>) -> Self {
        Self { tx }
    }

    pub async fn send(&self, message: &ServerMessage) -> Result<(), Disconnected> {
        let json = match serde_json::to_string(message) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(kind = message.kind(), "failed to serialize server message: {}", e);
                return Ok(());
            }
        };
        self.tx.send(json).await.map_err(|_| Disconnected)
    }

    /// Sends the client-safe error summary.
    pub async fn send_error(&self, message: &str) -> Result<(), Disconnected> {
        self.send(&ServerMessage::error(message)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new(Uuid::new_v4(), AgentProfile::default())
    }

    #[test]
    fn second_final_during_turn_is_ignored() {
        let mut s = session();
        s.on_audio();
        assert_eq!(s.state(), TurnState::Listening);

        let first = s.begin_turn("hello", 8).unwrap();
        assert_eq!(first.turn_no, 1);
        assert!(s.is_processing());
        assert!(s.begin_turn("hello again", 8).is_none());
        assert_eq!(s.history.len(), 1);

        assert!(s.complete_turn(1, "Hi!"));
        assert!(!s.is_processing());
        assert_eq!(s.state(), TurnState::Idle);

        let second = s.begin_turn("next", 8).unwrap();
        assert_eq!(second.turn_no, 2);
        assert_eq!(second.context_id, format!("{}-2", s.id));
    }

    #[test]
    fn empty_final_starts_nothing() {
        let mut s = session();
        assert!(s.begin_turn("   ", 8).is_none());
        assert!(!s.is_processing());
    }

    #[test]
    fn request_excludes_the_new_text_from_history() {
        let mut s = session();
        s.begin_turn("first", 8).unwrap();
        s.complete_turn(1, "reply one");

        let start = s.begin_turn("second", 8).unwrap();
        let roles: Vec<Role> = start.request.messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::User, Role::Assistant, Role::User]
        );
        assert_eq!(start.request.messages[3].content, "second");
        assert_eq!(s.transcript.len(), 3);
    }

    #[test]
    fn interrupt_is_idempotent_and_stale_results_are_dropped() {
        let mut s = session();
        s.begin_turn("hello", 8).unwrap();
        s.on_phase(1, TurnState::Generating);
        assert_eq!(s.state(), TurnState::Generating);

        assert_eq!(s.interrupt(), Some(1));
        assert_eq!(s.interrupt(), None);
        assert_eq!(s.state(), TurnState::Idle);
        assert!(!s.is_processing());

        // The aborted turn may still report; it must not touch the session.
        s.on_phase(1, TurnState::Synthesizing);
        assert!(!s.complete_turn(1, "late reply"));
        assert_eq!(s.state(), TurnState::Idle);
        assert_eq!(s.history.len(), 1);
    }

    #[test]
    fn failed_turn_clears_processing() {
        let mut s = session();
        s.begin_turn("hello", 8).unwrap();
        assert!(s.abandon_turn(1));
        assert!(!s.is_processing());
        assert!(s.begin_turn("retry", 8).is_some());
    }

    #[tokio::test]
    async fn outbound_reports_disconnect() {
        let (tx, rx) = mpsc::channel(1);
        let outbound = Outbound::new(tx);
        outbound.send(&ServerMessage::InterruptAcknowledged).await.unwrap();
        drop(rx);
        assert_eq!(outbound.send_error("x").await, Err(Disconnected));
    }
}
