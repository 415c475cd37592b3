//! Turn controller: one reply from transcript to the last audio chunk.
//!
//! A turn runs as its own task so the session loop stays responsive to
//! interrupts. It streams the model reply, forwards every delta as
//! `text.chunk`, cuts the reply into sentences, and synthesizes each sentence
//! as soon as it is complete. Sentences synthesize concurrently; a sequencer
//! emits their audio strictly in sentence order and numbers the chunks
//! densely from 0.
//!
//! Provider reads end on arbitrary network boundaries, so a sentence's audio
//! is collected in full and sent as a single chunk the client can decode on
//! its own.
//!
//! Aborting the task drops the model stream and every synthesis worker, which
//! cancels the provider requests behind them.

use crate::session::{Disconnected, Outbound, TurnState};
use duplex_types::{AudioChunk, AudioFormat, ServerMessage, EMPTY_REPLY_FALLBACK};
use duplex_voice::{
    EventStream, LlmEvent, LlmProvider, LlmRequest, SentenceSegmenter, TextNormalizer, TtsEvent,
    TtsProvider, TtsRequest, VoiceError, VoiceParams,
};
use futures_util::StreamExt;
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};

/// Synthesis events buffered per sentence ahead of the sequencer.
const SEGMENT_BUFFER: usize = 256;

#[derive(Debug, Error)]
pub enum TurnError {
    #[error(transparent)]
    Provider(#[from] VoiceError),
    #[error(transparent)]
    Disconnected(#[from] Disconnected),
}

#[derive(Debug)]
pub enum TurnOutcome {
    Completed { reply: String, total_chunks: u32 },
    Failed(TurnError),
}

/// Progress reported from a turn task to its session.
#[derive(Debug)]
pub enum TurnSignal {
    Phase { turn_no: u64, state: TurnState },
    Finished { turn_no: u64, outcome: TurnOutcome },
}

/// Everything a turn task needs. Nothing in here is shared mutable state.
pub struct TurnContext {
    pub turn_no: u64,
    pub context_id: String,
    pub request: LlmRequest,
    pub voice: VoiceParams,
    pub llm: Arc<dyn LlmProvider>,
    pub tts: Arc<dyn TtsProvider>,
    pub normalizer: Arc<dyn TextNormalizer>,
    pub outbound: Outbound,
    pub signals: mpsc::Sender<TurnSignal>,
}

pub fn spawn_turn(ctx: TurnContext) -> JoinHandle<()> {
    tokio::spawn(run_turn(ctx))
}

async fn run_turn(ctx: TurnContext) {
    let turn_no = ctx.turn_no;
    let signals = ctx.signals.clone();
    let outcome = match produce_reply(&ctx).await {
        Ok((reply, total_chunks)) => TurnOutcome::Completed {
            reply,
            total_chunks,
        },
        Err(e) => TurnOutcome::Failed(e),
    };
    let _ = signals.send(TurnSignal::Finished { turn_no, outcome }).await;
}

async fn produce_reply(ctx: &TurnContext) -> Result<(String, u32), TurnError> {
    announce(ctx, TurnState::Generating).await;

    let mut tokens = ctx.llm.stream(ctx.request.clone());
    let mut segmenter = SentenceSegmenter::new();
    let mut synth = Synthesizer::new(ctx);
    let mut reply = String::new();
    let mut generating = true;

    loop {
        tokio::select! {
            event = tokens.next(), if generating => match event {
                Some(LlmEvent::Delta(text)) => {
                    reply.push_str(&text);
                    ctx.outbound
                        .send(&ServerMessage::TextChunk { text: text.clone() })
                        .await?;
                    if let Some(sentence) = segmenter.push(&text) {
                        speak(ctx, &mut synth, &sentence).await;
                    }
                }
                Some(LlmEvent::Done) | None => {
                    generating = false;
                    if let Some(rest) = segmenter.finish() {
                        speak(ctx, &mut synth, &rest).await;
                    }
                    if reply.trim().is_empty() {
                        speak(ctx, &mut synth, EMPTY_REPLY_FALLBACK).await;
                    }
                }
                Some(LlmEvent::Error(e)) => return Err(e.into()),
            },
            event = synth.next_event(), if !synth.is_idle() => match event {
                Some(TtsEvent::Audio { context_id, bytes }) => {
                    if context_id != ctx.context_id {
                        tracing::debug!(context_id = %context_id, "dropping audio from another context");
                        continue;
                    }
                    synth.collect(&bytes);
                }
                Some(TtsEvent::Done { .. }) | None => {
                    if let Some(chunk) = synth.finish_segment() {
                        ctx.outbound.send(&chunk.to_message()).await?;
                    }
                }
                Some(TtsEvent::Error(e)) => return Err(e.into()),
            },
            else => break,
        }
    }

    let text = match reply.trim() {
        "" => EMPTY_REPLY_FALLBACK.to_string(),
        trimmed => trimmed.to_string(),
    };
    let total_chunks = synth.chunks_emitted();
    ctx.outbound
        .send(&ServerMessage::TextComplete { text: text.clone() })
        .await?;
    ctx.outbound
        .send(&ServerMessage::AudioComplete { total_chunks })
        .await?;

    tracing::info!(
        context_id = %ctx.context_id,
        sentences = synth.segments_started(),
        total_chunks,
        "turn complete"
    );
    Ok((text, total_chunks))
}

async fn announce(ctx: &TurnContext, state: TurnState) {
    let _ = ctx
        .signals
        .send(TurnSignal::Phase {
            turn_no: ctx.turn_no,
            state,
        })
        .await;
}

async fn speak(ctx: &TurnContext, synth: &mut Synthesizer, sentence: &str) {
    if synth.segments_started() == 0 {
        announce(ctx, TurnState::Synthesizing).await;
    }
    synth.start(sentence);
}

/// Runs sentence synthesis concurrently and replays it in order.
struct Synthesizer {
    tts: Arc<dyn TtsProvider>,
    normalizer: Arc<dyn TextNormalizer>,
    voice: VoiceParams,
    context_id: String,
    format: AudioFormat,
    workers: JoinSet<()>,
    pending: VecDeque<mpsc::Receiver<TtsEvent>>,
    /// Audio of the oldest unfinished sentence.
    segment_audio: Vec<u8>,
    spoken: String,
    segments: usize,
    next_index: u32,
}

impl Synthesizer {
    fn new(ctx: &TurnContext) -> Self {
        Self {
            tts: ctx.tts.clone(),
            normalizer: ctx.normalizer.clone(),
            voice: ctx.voice.clone(),
            context_id: ctx.context_id.clone(),
            format: ctx.tts.format(),
            workers: JoinSet::new(),
            pending: VecDeque::new(),
            segment_audio: Vec::new(),
            spoken: String::new(),
            segments: 0,
            next_index: 0,
        }
    }

    fn start(&mut self, sentence: &str) {
        let text = self.normalizer.normalize(sentence);
        if text.trim().is_empty() {
            return;
        }
        let continuation = self.segments > 0;
        let request = TtsRequest {
            text: text.clone(),
            context_id: self.context_id.clone(),
            continuation,
            previous_text: continuation.then(|| self.spoken.clone()),
            voice: self.voice.clone(),
        };
        tracing::debug!(
            context_id = %self.context_id,
            segment = self.segments,
            continuation,
            "synthesizing sentence"
        );

        let events = self.tts.synthesize(request);
        let (tx, rx) = mpsc::channel(SEGMENT_BUFFER);
        self.workers.spawn(pump(events, tx));
        self.pending.push_back(rx);

        if !self.spoken.is_empty() {
            self.spoken.push(' ');
        }
        self.spoken.push_str(&text);
        self.segments += 1;
    }

    fn is_idle(&self) -> bool {
        self.pending.is_empty()
    }

    /// Next event of the oldest unfinished sentence.
    async fn next_event(&mut self) -> Option<TtsEvent> {
        match self.pending.front_mut() {
            Some(rx) => rx.recv().await,
            None => std::future::pending().await,
        }
    }

    fn collect(&mut self, bytes: &[u8]) {
        self.segment_audio.extend_from_slice(bytes);
    }

    /// Closes the oldest sentence, returning its audio as the next chunk.
    fn finish_segment(&mut self) -> Option<AudioChunk> {
        self.pending.pop_front();
        while self.workers.try_join_next().is_some() {}

        if self.segment_audio.is_empty() {
            tracing::debug!(context_id = %self.context_id, "sentence produced no audio");
            return None;
        }
        let bytes = std::mem::take(&mut self.segment_audio);
        let chunk = AudioChunk::new(self.next_index, bytes, self.format);
        self.next_index += 1;
        Some(chunk)
    }

    fn chunks_emitted(&self) -> u32 {
        self.next_index
    }

    fn segments_started(&self) -> usize {
        self.segments
    }
}

/// Drains one synthesis stream into its sentence buffer.
async fn pump(mut events: EventStream<TtsEvent>, tx: mpsc::Sender<TtsEvent>) {
    while let Some(event) = events.next().await {
        let terminal = !matches!(event, TtsEvent::Audio { .. });
        if tx.send(event).await.is_err() || terminal {
            break;
        }
    }
}
