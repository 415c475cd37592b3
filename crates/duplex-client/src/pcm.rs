//! Microphone uplink encoding.
//!
//! Captured `f32` sample blocks arrive in whatever size the device delivers.
//! [`PcmEncoder`] re-frames them into fixed-size frames of 16-bit signed
//! little-endian PCM, each base64-encoded for the `audio.chunk` message.
//! At most one partial frame is ever held back.

use crate::error::CaptureError;
use base64::Engine;
use duplex_types::{ClientMessage, DEFAULT_FRAME_SAMPLES, DEFAULT_SAMPLE_RATE};
use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use std::collections::VecDeque;
use std::time::Duration;

/// One encoded uplink frame.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedFrame {
    /// Base64 (standard alphabet) of the s16le bytes.
    pub audio: String,
    /// Root-mean-square energy of the clamped samples.
    pub rms: f32,
    pub samples: usize,
}

impl EncodedFrame {
    pub fn to_message(&self) -> ClientMessage {
        ClientMessage::AudioChunk {
            audio: self.audio.clone(),
        }
    }

    /// Playing time of this frame at `sample_rate`.
    pub fn duration(&self, sample_rate: u32) -> Duration {
        Duration::from_secs_f64(self.samples as f64 / sample_rate.max(1) as f64)
    }
}

/// Converts one sample to 16-bit PCM.
///
/// Negative values scale by 32768 and positive values by 32767 so that both
/// ends of [-1, 1] map onto the full i16 range.
pub fn sample_to_i16(sample: f32) -> i16 {
    let s = if sample.is_nan() {
        0.0
    } else {
        sample.clamp(-1.0, 1.0)
    };
    if s < 0.0 {
        (s * 32768.0) as i16
    } else {
        (s * 32767.0) as i16
    }
}

/// Encodes samples as 16-bit signed little-endian bytes.
pub fn encode_s16le(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        bytes.extend_from_slice(&sample_to_i16(*sample).to_le_bytes());
    }
    bytes
}

pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples
        .iter()
        .map(|s| {
            let c = s.clamp(-1.0, 1.0);
            c * c
        })
        .sum();
    (sum / samples.len() as f32).sqrt()
}

/// Re-frames captured blocks into fixed-size encoded frames.
#[derive(Debug, Clone)]
pub struct PcmEncoder {
    frame_samples: usize,
    pending: Vec<f32>,
}

impl Default for PcmEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_FRAME_SAMPLES)
    }
}

impl PcmEncoder {
    pub fn new(frame_samples: usize) -> Self {
        let frame_samples = frame_samples.max(1);
        Self {
            frame_samples,
            pending: Vec::with_capacity(frame_samples),
        }
    }

    pub fn frame_samples(&self) -> usize {
        self.frame_samples
    }

    /// Adds a captured block and returns every frame it completed.
    pub fn push(&mut self, block: &[f32]) -> Vec<EncodedFrame> {
        let mut frames = Vec::new();
        let mut rest = block;
        while !rest.is_empty() {
            let room = self.frame_samples - self.pending.len();
            let take = room.min(rest.len());
            self.pending.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
            if self.pending.len() == self.frame_samples {
                frames.push(encode_frame(&self.pending));
                self.pending.clear();
            }
        }
        frames
    }

    /// Encodes the trailing partial frame, if any.
    pub fn flush(&mut self) -> Option<EncodedFrame> {
        if self.pending.is_empty() {
            return None;
        }
        let frame = encode_frame(&self.pending);
        self.pending.clear();
        Some(frame)
    }
}

fn encode_frame(samples: &[f32]) -> EncodedFrame {
    EncodedFrame {
        audio: base64::engine::general_purpose::STANDARD.encode(encode_s16le(samples)),
        rms: rms(samples),
        samples: samples.len(),
    }
}

struct FrameState {
    capture: BoxStream<'static, Result<Vec<f32>, CaptureError>>,
    encoder: PcmEncoder,
    ready: VecDeque<EncodedFrame>,
    done: bool,
}

/// Lazily encodes a capture stream into uplink frames.
///
/// A capture error is yielded once and ends the stream; the held-back partial
/// frame is discarded so no audio follows a failure. When capture ends
/// normally the partial frame is flushed as a short final frame.
pub fn encode_stream<S>(
    capture: S,
    frame_samples: usize,
) -> BoxStream<'static, Result<EncodedFrame, CaptureError>>
where
    S: Stream<Item = Result<Vec<f32>, CaptureError>> + Send + 'static,
{
    let state = FrameState {
        capture: capture.boxed(),
        encoder: PcmEncoder::new(frame_samples),
        ready: VecDeque::new(),
        done: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(frame) = state.ready.pop_front() {
                return Some((Ok(frame), state));
            }
            if state.done {
                return None;
            }
            match state.capture.next().await {
                Some(Ok(block)) => state.ready.extend(state.encoder.push(&block)),
                Some(Err(e)) => {
                    tracing::warn!("audio capture failed: {}", e);
                    state.done = true;
                    return Some((Err(e), state));
                }
                None => {
                    state.done = true;
                    state.ready.extend(state.encoder.flush());
                }
            }
        }
    })
    .boxed()
}

/// Fires once per span of sustained low-energy input.
///
/// Silent time accumulates from frame durations; any frame at or above the
/// threshold resets the span and re-arms the detector.
#[derive(Debug, Clone)]
pub struct SilenceDetector {
    threshold: f32,
    silence: Duration,
    sample_rate: u32,
    silent_for: Duration,
    fired: bool,
}

impl Default for SilenceDetector {
    fn default() -> Self {
        Self::new(0.01, Duration::from_millis(300), DEFAULT_SAMPLE_RATE)
    }
}

impl SilenceDetector {
    pub fn new(threshold: f32, silence: Duration, sample_rate: u32) -> Self {
        Self {
            threshold,
            silence,
            sample_rate,
            silent_for: Duration::ZERO,
            fired: false,
        }
    }

    /// Feeds one frame; returns `true` the moment the silence span is reached.
    pub fn observe(&mut self, frame: &EncodedFrame) -> bool {
        if frame.rms >= self.threshold {
            self.reset();
            return false;
        }
        self.silent_for += frame.duration(self.sample_rate);
        if !self.fired && self.silent_for >= self.silence {
            self.fired = true;
            return true;
        }
        false
    }

    pub fn reset(&mut self) {
        self.silent_for = Duration::ZERO;
        self.fired = false;
    }
}
