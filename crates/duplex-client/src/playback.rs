//! Ordered, gapless playback of indexed audio chunks.
//!
//! Chunks can arrive out of order. [`PlaybackScheduler`] is the pure state
//! machine: a sparse buffer keyed by index plus the `next_to_play` cursor.
//! [`PlaybackQueue`] drives it from a single task that owns a [`Player`], so
//! at most one chunk is ever being decoded or played.

use crate::error::PlaybackError;
use duplex_types::AudioChunk;
use futures_util::future::{BoxFuture, OptionFuture};
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Outcome of [`PlaybackScheduler::finalize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackStatus {
    /// Every chunk below the total has been played.
    Complete { total: u32 },
    /// Chunks are still buffered or playing; completion is reported later.
    Pending,
    /// Some indices below the total never arrived.
    Incomplete { expected: u32, missing: Vec<u32> },
}

/// Result of admitting a chunk.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Admission {
    /// A new turn began: whatever is playing must be halted.
    pub restarted: bool,
    /// Chunk to hand to the player now.
    pub play: Option<AudioChunk>,
}

/// A turn whose chunks arrived while an earlier turn was still draining.
#[derive(Debug, Default)]
struct UpcomingTurn {
    chunks: BTreeMap<u32, AudioChunk>,
    total: Option<u32>,
}

#[derive(Debug, Default)]
pub struct PlaybackScheduler {
    buffer: BTreeMap<u32, AudioChunk>,
    next_to_play: u32,
    is_playing: bool,
    /// Set by `finalize`; the turn closes once its playable audio drains.
    expected_total: Option<u32>,
    upcoming: VecDeque<UpcomingTurn>,
    reports: VecDeque<PlaybackStatus>,
}

impl PlaybackScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_to_play(&self) -> u32 {
        self.next_to_play
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing
    }

    /// Chunks waiting to play, including those of later turns.
    pub fn buffered(&self) -> usize {
        self.buffer.len() + self.upcoming.iter().map(|t| t.chunks.len()).sum::<usize>()
    }

    /// Stores a chunk and starts it if the player is idle and it is next.
    ///
    /// Once the current turn is finalized, every later chunk belongs to a
    /// following turn and waits until the current one has drained. Without
    /// a finalize, index 0 arriving after playback has advanced marks a new
    /// turn: the buffer and cursor reset before the chunk is stored.
    pub fn add_chunk(&mut self, chunk: AudioChunk) -> Admission {
        if self.expected_total.is_some() {
            self.open_upcoming().chunks.insert(chunk.index, chunk);
            return Admission::default();
        }

        let mut restarted = false;
        if chunk.index == 0 && self.next_to_play > 0 {
            tracing::debug!("chunk 0 after index {}, starting new turn", self.next_to_play);
            self.reset();
            restarted = true;
        }
        if chunk.index < self.next_to_play {
            tracing::debug!(index = chunk.index, "dropping already-played chunk");
            return Admission {
                restarted,
                play: None,
            };
        }
        self.buffer.insert(chunk.index, chunk);

        let play = if self.is_playing {
            None
        } else {
            self.play_next()
        };
        Admission { restarted, play }
    }

    /// Takes the chunk at the cursor, or goes idle to wait for it.
    ///
    /// A finalized turn that cannot advance is closed here and the next
    /// turn takes over from a fresh cursor.
    pub fn play_next(&mut self) -> Option<AudioChunk> {
        if let Some(chunk) = self.buffer.remove(&self.next_to_play) {
            self.next_to_play += 1;
            self.is_playing = true;
            return Some(chunk);
        }
        self.is_playing = false;
        if self.expected_total.is_some() {
            self.close_turn();
            return self.play_next();
        }
        None
    }

    /// The in-flight chunk ended or failed; returns the next one to play.
    pub fn on_ended(&mut self) -> Option<AudioChunk> {
        self.is_playing = false;
        self.play_next()
    }

    /// Halts playback and forgets all buffered audio. Idempotent.
    pub fn stop(&mut self) {
        self.reset();
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.next_to_play = 0;
        self.is_playing = false;
        self.expected_total = None;
        self.upcoming.clear();
        self.reports.clear();
    }

    /// Records the total chunk count announced for the turn.
    ///
    /// Indices that are absent now never arrive: chunks behind the first gap
    /// are discarded and the turn closes when playback reaches it. A total
    /// announced while an earlier turn is still draining applies to the
    /// turn queued behind it and is reported once that turn takes over.
    pub fn finalize(&mut self, total: u32) -> PlaybackStatus {
        if self.expected_total.is_some() {
            self.open_upcoming().total = Some(total);
            return PlaybackStatus::Pending;
        }

        let incomplete = self.seal(total);
        if !self.is_playing {
            self.close_turn();
        }
        match incomplete {
            Some(status) => status,
            None => self.take_report().unwrap_or(PlaybackStatus::Pending),
        }
    }

    /// Next turn outcome settled since the last call, oldest first.
    pub fn take_report(&mut self) -> Option<PlaybackStatus> {
        self.reports.pop_front()
    }

    /// The latest turn still accepting chunks, opened if every queued turn
    /// has already been finalized.
    fn open_upcoming(&mut self) -> &mut UpcomingTurn {
        match self.upcoming.back() {
            Some(turn) if turn.total.is_none() => {}
            _ => self.upcoming.push_back(UpcomingTurn::default()),
        }
        let last = self.upcoming.len() - 1;
        &mut self.upcoming[last]
    }

    fn seal(&mut self, total: u32) -> Option<PlaybackStatus> {
        let missing: Vec<u32> = (self.next_to_play..total)
            .filter(|i| !self.buffer.contains_key(i))
            .collect();
        self.expected_total = Some(total);

        let gap = *missing.first()?;
        tracing::warn!(expected = total, ?missing, "turn audio incomplete");
        self.buffer.retain(|&index, _| index < gap);
        Some(PlaybackStatus::Incomplete {
            expected: total,
            missing,
        })
    }

    fn close_turn(&mut self) {
        if let Some(total) = self.expected_total.take() {
            if self.next_to_play >= total {
                self.reports.push_back(PlaybackStatus::Complete { total });
            }
        }
        self.next_to_play = 0;
        let next = self.upcoming.pop_front().unwrap_or_default();
        self.buffer = next.chunks;
        if let Some(total) = next.total {
            if let Some(status) = self.seal(total) {
                self.reports.push_back(status);
            }
        }
    }
}

/// Renders one chunk on an output device.
///
/// The returned future resolves when the chunk has finished playing. Dropping
/// it must stop the audio.
pub trait Player: Send + 'static {
    fn play(&mut self, chunk: AudioChunk) -> BoxFuture<'static, Result<(), PlaybackError>>;
}

#[derive(Debug)]
pub enum PlaybackCommand {
    Chunk(AudioChunk),
    Stop,
    Finalize(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    Started(u32),
    Finished(u32),
    Failed { index: u32, error: PlaybackError },
    Stopped,
    Complete { total: u32 },
    Incomplete { expected: u32, missing: Vec<u32> },
}

/// Handle to a running playback driver.
pub struct PlaybackQueue {
    commands: mpsc::Sender<PlaybackCommand>,
    events: mpsc::UnboundedReceiver<PlaybackEvent>,
    task: JoinHandle<()>,
}

const COMMAND_CAPACITY: usize = 256;

impl PlaybackQueue {
    /// Spawns the driver task. `settle` is an optional pause between chunks.
    pub fn spawn<P: Player>(player: P, settle: Duration) -> Self {
        let (commands, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (event_tx, events) = mpsc::unbounded_channel();
        let task = tokio::spawn(drive(player, settle, command_rx, event_tx));
        Self {
            commands,
            events,
            task,
        }
    }

    pub async fn add_chunk(&self, chunk: AudioChunk) {
        let _ = self.commands.send(PlaybackCommand::Chunk(chunk)).await;
    }

    pub async fn stop(&self) {
        let _ = self.commands.send(PlaybackCommand::Stop).await;
    }

    pub async fn finalize(&self, total: u32) {
        let _ = self.commands.send(PlaybackCommand::Finalize(total)).await;
    }

    pub async fn next_event(&mut self) -> Option<PlaybackEvent> {
        self.events.recv().await
    }

    /// Closes the command channel and waits for the driver to exit.
    pub async fn shutdown(self) {
        drop(self.commands);
        let _ = self.task.await;
    }
}

type InFlight = BoxFuture<'static, Result<(), PlaybackError>>;

struct Driver<P> {
    player: P,
    settle: Duration,
    scheduler: PlaybackScheduler,
    current: Option<(u32, InFlight)>,
    events: mpsc::UnboundedSender<PlaybackEvent>,
}

impl<P: Player> Driver<P> {
    fn start(&mut self, chunk: AudioChunk, after_previous: bool) {
        let index = chunk.index;
        let playing = self.player.play(chunk);
        let settle = self.settle;
        let fut: InFlight = if after_previous && !settle.is_zero() {
            Box::pin(async move {
                tokio::time::sleep(settle).await;
                playing.await
            })
        } else {
            playing
        };
        self.current = Some((index, fut));
        let _ = self.events.send(PlaybackEvent::Started(index));
    }

    fn halt(&mut self) {
        if self.current.take().is_some() {
            let _ = self.events.send(PlaybackEvent::Stopped);
        }
    }

    fn report_outcomes(&mut self) {
        while let Some(status) = self.scheduler.take_report() {
            self.report(status);
        }
    }

    fn report(&mut self, status: PlaybackStatus) {
        let event = match status {
            PlaybackStatus::Complete { total } => PlaybackEvent::Complete { total },
            PlaybackStatus::Incomplete { expected, missing } => {
                PlaybackEvent::Incomplete { expected, missing }
            }
            PlaybackStatus::Pending => return,
        };
        let _ = self.events.send(event);
    }

    fn handle(&mut self, command: PlaybackCommand) {
        match command {
            PlaybackCommand::Chunk(chunk) => {
                let admission = self.scheduler.add_chunk(chunk);
                if admission.restarted {
                    self.halt();
                }
                if let Some(chunk) = admission.play {
                    self.start(chunk, false);
                }
            }
            PlaybackCommand::Stop => {
                self.scheduler.stop();
                self.halt();
            }
            PlaybackCommand::Finalize(total) => {
                let status = self.scheduler.finalize(total);
                self.report(status);
            }
        }
    }

    fn ended(&mut self, index: u32, result: Result<(), PlaybackError>) {
        self.current = None;
        let event = match result {
            Ok(()) => PlaybackEvent::Finished(index),
            Err(error) => {
                tracing::warn!(index, "chunk playback failed: {}", error);
                PlaybackEvent::Failed { index, error }
            }
        };
        let _ = self.events.send(event);
        let next = self.scheduler.on_ended();
        self.report_outcomes();
        if let Some(next) = next {
            self.start(next, true);
        }
    }
}

async fn drive<P: Player>(
    player: P,
    settle: Duration,
    mut commands: mpsc::Receiver<PlaybackCommand>,
    events: mpsc::UnboundedSender<PlaybackEvent>,
) {
    let mut driver = Driver {
        player,
        settle,
        scheduler: PlaybackScheduler::new(),
        current: None,
        events,
    };

    loop {
        let playing = driver.current.is_some();
        tokio::select! {
            Some((index, result)) = OptionFuture::from(
                driver.current.as_mut().map(|(index, fut)| async move { (*index, fut.await) })
            ), if playing => {
                driver.ended(index, result);
            }
            command = commands.recv() => match command {
                Some(command) => driver.handle(command),
                None => break,
            },
        }
    }
    driver.halt();
}

#[cfg(test)]
mod tests {
    use super::*;
    use duplex_types::AudioFormat;
    use std::sync::{Arc, Mutex};

    fn chunk(index: u32) -> AudioChunk {
        AudioChunk::new(index, vec![index as u8], AudioFormat::Mp3)
    }

    fn drain(scheduler: &mut PlaybackScheduler, first: Option<AudioChunk>) -> Vec<u32> {
        let mut played = Vec::new();
        let mut next = first;
        while let Some(c) = next {
            played.push(c.index);
            next = scheduler.on_ended();
        }
        played
    }

    #[test]
    fn plays_out_of_order_arrivals_in_order() {
        let mut scheduler = PlaybackScheduler::new();
        assert_eq!(scheduler.add_chunk(chunk(2)).play, None);
        assert!(!scheduler.is_playing());

        let first = scheduler.add_chunk(chunk(0)).play;
        assert_eq!(first.as_ref().map(|c| c.index), Some(0));
        // Chunk 1 arrives while 0 is playing and waits its turn.
        assert_eq!(scheduler.add_chunk(chunk(1)).play, None);

        assert_eq!(drain(&mut scheduler, first), vec![0, 1, 2]);
        assert_eq!(scheduler.next_to_play(), 3);
        assert!(!scheduler.is_playing());
    }

    #[test]
    fn stop_is_idempotent() {
        let mut scheduler = PlaybackScheduler::new();
        scheduler.add_chunk(chunk(0));
        scheduler.add_chunk(chunk(1));
        scheduler.add_chunk(chunk(3));

        scheduler.stop();
        let once = (scheduler.next_to_play(), scheduler.is_playing(), scheduler.buffered());
        scheduler.stop();
        let twice = (scheduler.next_to_play(), scheduler.is_playing(), scheduler.buffered());
        assert_eq!(once, (0, false, 0));
        assert_eq!(once, twice);
    }

    #[test]
    fn index_zero_starts_a_new_turn() {
        let mut scheduler = PlaybackScheduler::new();
        let first = scheduler.add_chunk(chunk(0)).play;
        scheduler.add_chunk(chunk(1));
        scheduler.add_chunk(chunk(5));
        assert_eq!(drain(&mut scheduler, first), vec![0, 1]);

        let admission = scheduler.add_chunk(chunk(0));
        assert!(admission.restarted);
        assert_eq!(admission.play.map(|c| c.index), Some(0));
        assert_eq!(scheduler.buffered(), 0, "stale chunk 5 must be discarded");
    }

    #[test]
    fn finalize_reports_missing_indices() {
        let mut scheduler = PlaybackScheduler::new();
        let first = scheduler.add_chunk(chunk(0)).play;
        scheduler.add_chunk(chunk(1));
        assert_eq!(
            scheduler.finalize(3),
            PlaybackStatus::Incomplete {
                expected: 3,
                missing: vec![2]
            }
        );
        assert_eq!(drain(&mut scheduler, first), vec![0, 1]);
    }

    #[test]
    fn finalize_completes_after_last_chunk_ends() {
        let mut scheduler = PlaybackScheduler::new();
        let first = scheduler.add_chunk(chunk(0)).play;
        scheduler.add_chunk(chunk(1));
        assert_eq!(scheduler.finalize(2), PlaybackStatus::Pending);

        assert_eq!(drain(&mut scheduler, first), vec![0, 1]);
        assert_eq!(scheduler.take_report(), Some(PlaybackStatus::Complete { total: 2 }));
        assert_eq!(scheduler.take_report(), None);
        assert_eq!(scheduler.next_to_play(), 0);
    }

    #[test]
    fn finalize_after_playback_drained_is_complete() {
        let mut scheduler = PlaybackScheduler::new();
        let first = scheduler.add_chunk(chunk(0)).play;
        assert_eq!(drain(&mut scheduler, first), vec![0]);
        assert_eq!(scheduler.finalize(1), PlaybackStatus::Complete { total: 1 });
        assert_eq!(scheduler.next_to_play(), 0);
    }

    fn turn_chunk(index: u32, turn: u8) -> AudioChunk {
        AudioChunk::new(index, vec![turn, index as u8], AudioFormat::Mp3)
    }

    fn drain_tagged(scheduler: &mut PlaybackScheduler, first: Option<AudioChunk>) -> Vec<(u32, u8)> {
        let mut played = Vec::new();
        let mut next = first;
        while let Some(c) = next {
            played.push((c.index, c.payload[0]));
            next = scheduler.on_ended();
        }
        played
    }

    #[test]
    fn every_turn_reorders_from_a_fresh_cursor() {
        let mut scheduler = PlaybackScheduler::new();
        for turn in 1..=2u8 {
            assert_eq!(scheduler.add_chunk(turn_chunk(2, turn)).play, None);
            let first = scheduler.add_chunk(turn_chunk(0, turn)).play;
            assert_eq!(scheduler.add_chunk(turn_chunk(1, turn)).play, None);
            assert_eq!(scheduler.finalize(3), PlaybackStatus::Pending);
            assert_eq!(
                drain_tagged(&mut scheduler, first),
                vec![(0, turn), (1, turn), (2, turn)]
            );
            assert_eq!(scheduler.take_report(), Some(PlaybackStatus::Complete { total: 3 }));
        }
    }

    #[test]
    fn next_turn_waits_while_previous_turn_drains() {
        let mut scheduler = PlaybackScheduler::new();
        let first = scheduler.add_chunk(turn_chunk(0, 1)).play;
        scheduler.add_chunk(turn_chunk(1, 1));
        assert_eq!(scheduler.finalize(2), PlaybackStatus::Pending);

        // The next turn arrives out of order while turn 1 is still playing.
        assert_eq!(scheduler.add_chunk(turn_chunk(1, 2)).play, None);
        assert_eq!(scheduler.add_chunk(turn_chunk(0, 2)).play, None);

        assert_eq!(
            drain_tagged(&mut scheduler, first),
            vec![(0, 1), (1, 1), (0, 2), (1, 2)]
        );
        assert_eq!(scheduler.take_report(), Some(PlaybackStatus::Complete { total: 2 }));
    }

    #[test]
    fn queued_turn_keeps_its_own_total() {
        let mut scheduler = PlaybackScheduler::new();
        let first = scheduler.add_chunk(turn_chunk(0, 1)).play;
        assert_eq!(scheduler.finalize(1), PlaybackStatus::Pending);

        // Turn 2 lost chunk 1; turn 3 is whole. Both land before turn 1 ends.
        scheduler.add_chunk(turn_chunk(0, 2));
        scheduler.add_chunk(turn_chunk(2, 2));
        assert_eq!(scheduler.finalize(3), PlaybackStatus::Pending);
        scheduler.add_chunk(turn_chunk(0, 3));
        assert_eq!(scheduler.finalize(1), PlaybackStatus::Pending);

        assert_eq!(
            drain_tagged(&mut scheduler, first),
            vec![(0, 1), (0, 2), (0, 3)]
        );
        let reports: Vec<PlaybackStatus> = std::iter::from_fn(|| scheduler.take_report()).collect();
        assert_eq!(
            reports,
            vec![
                PlaybackStatus::Complete { total: 1 },
                PlaybackStatus::Incomplete {
                    expected: 3,
                    missing: vec![1]
                },
                PlaybackStatus::Complete { total: 1 },
            ]
        );
    }

    #[test]
    fn incomplete_turn_does_not_leak_into_the_next() {
        let mut scheduler = PlaybackScheduler::new();
        assert_eq!(scheduler.add_chunk(turn_chunk(1, 1)).play, None);
        assert_eq!(scheduler.add_chunk(turn_chunk(2, 1)).play, None);
        assert_eq!(
            scheduler.finalize(3),
            PlaybackStatus::Incomplete {
                expected: 3,
                missing: vec![0]
            }
        );
        assert_eq!(scheduler.buffered(), 0);
        assert_eq!(scheduler.take_report(), None);

        let first = scheduler.add_chunk(turn_chunk(0, 2)).play;
        assert_eq!(drain_tagged(&mut scheduler, first), vec![(0, 2)]);
    }

    #[test]
    fn chunks_behind_a_gap_are_discarded_at_finalize() {
        let mut scheduler = PlaybackScheduler::new();
        let first = scheduler.add_chunk(turn_chunk(0, 1)).play;
        scheduler.add_chunk(turn_chunk(2, 1));
        assert_eq!(
            scheduler.finalize(3),
            PlaybackStatus::Incomplete {
                expected: 3,
                missing: vec![1]
            }
        );
        assert_eq!(drain_tagged(&mut scheduler, first), vec![(0, 1)]);

        let first = scheduler.add_chunk(turn_chunk(0, 2)).play;
        scheduler.add_chunk(turn_chunk(1, 2));
        scheduler.add_chunk(turn_chunk(2, 2));
        assert_eq!(
            drain_tagged(&mut scheduler, first),
            vec![(0, 2), (1, 2), (2, 2)]
        );
    }

    /// Records what it was asked to play; each chunk "plays" for 20 ms.
    #[derive(Clone, Default)]
    struct RecordingPlayer {
        played: Arc<Mutex<Vec<u32>>>,
    }

    impl Player for RecordingPlayer {
        fn play(&mut self, chunk: AudioChunk) -> BoxFuture<'static, Result<(), PlaybackError>> {
            self.played.lock().unwrap().push(chunk.index);
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                if chunk.payload.is_empty() {
                    Err(PlaybackError::Decode("empty".to_string()))
                } else {
                    Ok(())
                }
            })
        }
    }

    async fn wait_for(queue: &mut PlaybackQueue, wanted: &PlaybackEvent) -> Vec<PlaybackEvent> {
        let mut seen = Vec::new();
        loop {
            let event = tokio::time::timeout(Duration::from_secs(2), queue.next_event())
                .await
                .expect("playback event")
                .expect("driver alive");
            let done = &event == wanted;
            seen.push(event);
            if done {
                return seen;
            }
        }
    }

    #[tokio::test]
    async fn driver_plays_in_order_and_reports_completion() {
        let player = RecordingPlayer::default();
        let played = player.played.clone();
        let mut queue = PlaybackQueue::spawn(player, Duration::ZERO);

        queue.add_chunk(chunk(2)).await;
        queue.add_chunk(chunk(0)).await;
        queue.add_chunk(chunk(1)).await;
        queue.finalize(3).await;

        wait_for(&mut queue, &PlaybackEvent::Complete { total: 3 }).await;
        assert_eq!(*played.lock().unwrap(), vec![0, 1, 2]);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn driver_continues_after_a_failed_chunk() {
        let player = RecordingPlayer::default();
        let played = player.played.clone();
        let mut queue = PlaybackQueue::spawn(player, Duration::from_millis(1));

        queue
            .add_chunk(AudioChunk::new(0, Vec::new(), AudioFormat::Mp3))
            .await;
        queue.add_chunk(chunk(1)).await;
        queue.finalize(2).await;

        let events = wait_for(&mut queue, &PlaybackEvent::Complete { total: 2 }).await;
        assert!(events.contains(&PlaybackEvent::Failed {
            index: 0,
            error: PlaybackError::Decode("empty".to_string())
        }));
        assert_eq!(*played.lock().unwrap(), vec![0, 1]);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn driver_orders_consecutive_turns() {
        let player = RecordingPlayer::default();
        let played = player.played.clone();
        let mut queue = PlaybackQueue::spawn(player, Duration::ZERO);

        for _ in 0..2 {
            queue.add_chunk(chunk(2)).await;
            queue.add_chunk(chunk(0)).await;
            queue.add_chunk(chunk(1)).await;
            queue.finalize(3).await;
        }

        wait_for(&mut queue, &PlaybackEvent::Complete { total: 3 }).await;
        wait_for(&mut queue, &PlaybackEvent::Complete { total: 3 }).await;
        assert_eq!(*played.lock().unwrap(), vec![0, 1, 2, 0, 1, 2]);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn driver_stop_halts_and_clears() {
        let player = RecordingPlayer::default();
        let played = player.played.clone();
        let mut queue = PlaybackQueue::spawn(player, Duration::ZERO);

        queue.add_chunk(chunk(0)).await;
        queue.add_chunk(chunk(1)).await;
        queue.stop().await;
        queue.stop().await;
        wait_for(&mut queue, &PlaybackEvent::Stopped).await;

        queue.add_chunk(chunk(0)).await;
        queue.finalize(1).await;
        wait_for(&mut queue, &PlaybackEvent::Complete { total: 1 }).await;
        assert_eq!(*played.lock().unwrap(), vec![0, 0]);
        queue.shutdown().await;
    }
}
