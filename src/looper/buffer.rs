//! Committed loop storage and the transport state machine
//!
//! `LoopBuffer` lives on the control thread. It decides every transport
//! transition, allocates takes for the render thread and commits the takes
//! that come back. It never touches the audio callbacks directly.

use super::take::{Take, TakeId, TakeKind};
use serde::Serialize;
use std::sync::Arc;

/// Looper transport state
///
/// Recording and overdubbing at the same time cannot be expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportState {
    #[default]
    Idle,
    Recording,
    Playing,
    /// Overdub pass on a session without an output stream
    Overdubbing,
    PlayingWhileOverdubbing,
}

impl TransportState {
    pub fn is_recording(self) -> bool {
        self == TransportState::Recording
    }

    pub fn is_playing(self) -> bool {
        matches!(
            self,
            TransportState::Playing | TransportState::PlayingWhileOverdubbing
        )
    }

    pub fn is_overdubbing(self) -> bool {
        matches!(
            self,
            TransportState::Overdubbing | TransportState::PlayingWhileOverdubbing
        )
    }
}

/// What happened to a take handed back by the render thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commit {
    /// A new loop of `frames` samples was committed
    Recorded { frames: usize },

    /// Overdub material was summed into the loop
    Overdubbed,

    /// Recording stopped before any audio arrived; no loop exists
    Empty,

    /// The take was superseded or cancelled and was dropped
    Discarded,
}

/// Committed loop plus transport bookkeeping
pub struct LoopBuffer {
    sample_rate: u32,
    max_loop_seconds: f64,
    fade_seconds: f64,

    /// Committed loop, unfaded so overdub sums stay sample-accurate
    samples: Vec<f32>,

    /// Faded copy handed to the output thread
    playable: Option<Arc<[f32]>>,

    state: TransportState,

    /// Take currently owned by the render thread
    active_take: Option<TakeId>,

    /// Take that was asked to finish and should be committed on return
    pending_commit: Option<TakeId>,

    next_take_id: TakeId,
}

impl LoopBuffer {
    pub fn new(sample_rate: u32, max_loop_seconds: f64, fade_seconds: f64) -> Self {
        Self {
            sample_rate,
            max_loop_seconds,
            fade_seconds,
            samples: Vec::new(),
            playable: None,
            state: TransportState::Idle,
            active_take: None,
            pending_commit: None,
            next_take_id: 1,
        }
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Committed loop length in samples
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn playable(&self) -> Option<Arc<[f32]>> {
        self.playable.clone()
    }

    /// A take was asked to finish and has not been committed yet
    pub fn is_committing(&self) -> bool {
        self.pending_commit.is_some()
    }

    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Recording scratch size at the current sample rate
    pub fn capacity(&self) -> usize {
        (self.sample_rate as f64 * self.max_loop_seconds) as usize
    }

    /// Adopt the sample rate of a new capture session
    ///
    /// A loop recorded at a different rate would play back at the wrong
    /// pitch, so it is dropped.
    pub fn rebind(&mut self, sample_rate: u32) {
        if sample_rate == self.sample_rate {
            return;
        }
        if !self.samples.is_empty() {
            log::warn!(
                "Discarding {:.2}s loop recorded at {} Hz; new session runs at {} Hz",
                self.duration_seconds(),
                self.sample_rate,
                sample_rate
            );
        }
        self.clear();
        self.sample_rate = sample_rate;
    }

    /// Start a fresh recording, discarding the committed loop
    ///
    /// Returns `None` when already recording. The caller stops playback
    /// first.
    pub fn begin_recording(&mut self) -> Option<Take> {
        if self.state.is_recording() {
            return None;
        }
        self.discard_loop();
        self.pending_commit = None;

        let take = Take::recording(self.allocate_id(), self.capacity());
        self.active_take = Some(take.id());
        self.state = TransportState::Recording;
        Some(take)
    }

    /// Stop recording; returns the take the render thread must finish
    pub fn finish_recording(&mut self) -> Option<TakeId> {
        if !self.state.is_recording() {
            return None;
        }
        self.state = TransportState::Idle;
        let id = self.active_take.take()?;
        self.pending_commit = Some(id);
        Some(id)
    }

    /// Mark the committed loop as playing from its first frame
    ///
    /// Returns the buffer to schedule, or `None` when there is nothing to
    /// play or a recording is in progress.
    pub fn play(&mut self) -> Option<Arc<[f32]>> {
        if self.state.is_recording() {
            return None;
        }
        let playable = self.playable.clone()?;
        self.state = match self.state {
            TransportState::Overdubbing | TransportState::PlayingWhileOverdubbing => {
                TransportState::PlayingWhileOverdubbing
            }
            _ => TransportState::Playing,
        };
        Some(playable)
    }

    /// Stop playback and leave overdub without touching any samples
    ///
    /// Returns the overdub take the render thread must abort.
    pub fn stop_playback(&mut self) -> Option<TakeId> {
        match self.state {
            TransportState::Playing => {
                self.state = TransportState::Idle;
                None
            }
            TransportState::Overdubbing | TransportState::PlayingWhileOverdubbing => {
                self.state = TransportState::Idle;
                self.active_take.take()
            }
            TransportState::Idle | TransportState::Recording => None,
        }
    }

    /// Start an overdub pass over the committed loop
    ///
    /// `with_playback` says whether the session can play the loop while the
    /// pass runs. Returns the zeroed overdub take and, with playback, the
    /// buffer to restart from its first frame.
    pub fn begin_overdub(&mut self, with_playback: bool) -> Option<(Take, Option<Arc<[f32]>>)> {
        if self.samples.is_empty() || self.state.is_recording() || self.state.is_overdubbing() {
            return None;
        }

        let take = Take::overdub(self.allocate_id(), self.samples.len());
        self.active_take = Some(take.id());

        let playable = if with_playback { self.playable.clone() } else { None };
        self.state = if playable.is_some() {
            TransportState::PlayingWhileOverdubbing
        } else {
            TransportState::Overdubbing
        };
        Some((take, playable))
    }

    /// Stop the overdub pass; returns the take the render thread must finish
    pub fn finish_overdub(&mut self) -> Option<TakeId> {
        self.state = match self.state {
            TransportState::PlayingWhileOverdubbing => TransportState::Playing,
            TransportState::Overdubbing => TransportState::Idle,
            _ => return None,
        };
        let id = self.active_take.take()?;
        self.pending_commit = Some(id);
        Some(id)
    }

    /// Drop the loop and every take; returns the take to abort, if any
    pub fn clear(&mut self) -> Option<TakeId> {
        self.discard_loop();
        self.pending_commit = None;
        self.state = TransportState::Idle;
        self.active_take.take()
    }

    /// The capture session went away together with any take it held
    pub fn interrupt(&mut self) {
        self.active_take = None;
        self.pending_commit = None;
        self.state = TransportState::Idle;
    }

    /// Commit a take handed back by the render thread
    ///
    /// Only the take being waited for, or the active recording after it hit
    /// capacity, is committed. Anything else is stale and discarded.
    pub fn accept(&mut self, take: Take) -> Commit {
        let id = take.id();
        let awaited = self.pending_commit == Some(id);
        let auto_stopped = self.active_take == Some(id) && take.kind() == TakeKind::Recording;

        if !awaited && !auto_stopped {
            return Commit::Discarded;
        }
        if awaited {
            self.pending_commit = None;
        }
        if auto_stopped {
            self.active_take = None;
            self.state = TransportState::Idle;
        }

        match take.kind() {
            TakeKind::Recording => self.commit_recording(take),
            TakeKind::Overdub => self.commit_overdub(take),
        }
    }

    fn commit_recording(&mut self, take: Take) -> Commit {
        let frames = take.cursor();
        if frames == 0 {
            self.discard_loop();
            return Commit::Empty;
        }

        let mut samples = take.into_samples();
        samples.truncate(frames);
        samples.shrink_to_fit();
        self.samples = samples;
        self.rebuild_playable();
        Commit::Recorded { frames }
    }

    fn commit_overdub(&mut self, take: Take) -> Commit {
        if take.capacity() != self.samples.len() {
            return Commit::Discarded;
        }
        for (sample, added) in self.samples.iter_mut().zip(take.samples()) {
            *sample += *added;
        }
        self.rebuild_playable();
        Commit::Overdubbed
    }

    fn rebuild_playable(&mut self) {
        self.playable = Some(make_playable(
            &self.samples,
            self.sample_rate,
            self.fade_seconds,
        ));
    }

    fn discard_loop(&mut self) {
        self.samples = Vec::new();
        self.playable = None;
    }

    fn allocate_id(&mut self) -> TakeId {
        let id = self.next_take_id;
        self.next_take_id += 1;
        id
    }
}

/// Build the playable copy of a loop with linear edge fades
///
/// The fade is `fade_seconds` long but never more than half the loop, which
/// removes the click at the loop seam.
pub fn make_playable(samples: &[f32], sample_rate: u32, fade_seconds: f64) -> Arc<[f32]> {
    let total = samples.len();
    let fade = ((sample_rate as f64 * fade_seconds) as usize).min((total / 2).max(1));

    samples
        .iter()
        .enumerate()
        .map(|(i, &sample)| {
            if i < fade {
                sample * i as f32 / fade as f32
            } else if i >= total - fade {
                sample * (total - i) as f32 / fade as f32
            } else {
                sample
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::looper::take::WriteOutcome;

    const RATE: u32 = 100;

    fn assert_approx(actual: f32, expected: f32, tolerance: f32) {
        assert!(
            (actual - expected).abs() <= tolerance,
            "expected {expected} +/- {tolerance}, got {actual}"
        );
    }

    fn buffer() -> LoopBuffer {
        LoopBuffer::new(RATE, 1.0, 0.0)
    }

    fn record(buffer: &mut LoopBuffer, input: &[f32]) {
        let mut take = buffer.begin_recording().unwrap();
        take.write(input);
        let id = buffer.finish_recording().unwrap();
        assert_eq!(id, take.id());
        assert_eq!(buffer.accept(take), Commit::Recorded { frames: input.len() });
    }

    fn overdub(buffer: &mut LoopBuffer, input: &[f32]) {
        let (mut take, _) = buffer.begin_overdub(true).unwrap();
        take.write(input);
        buffer.finish_overdub().unwrap();
        assert_eq!(buffer.accept(take), Commit::Overdubbed);
    }

    #[test]
    fn stop_recording_commits_recorded_prefix() {
        let mut buffer = buffer();
        let input: Vec<f32> = (0..30).map(|i| i as f32 / 30.0).collect();

        record(&mut buffer, &input);

        assert_eq!(buffer.samples(), input.as_slice());
        assert_eq!(buffer.state(), TransportState::Idle);
        assert_approx(buffer.duration_seconds() as f32, 0.3, 1e-6);
        assert!(buffer.playable().is_some());
    }

    #[test]
    fn finished_take_is_committing_until_accepted() {
        let mut buffer = buffer();
        let mut take = buffer.begin_recording().unwrap();
        assert!(!buffer.is_committing());

        take.write(&[0.5; 5]);
        buffer.finish_recording();
        assert!(buffer.is_committing());

        buffer.accept(take);
        assert!(!buffer.is_committing());
    }

    #[test]
    fn stop_recording_without_audio_leaves_no_loop() {
        let mut buffer = buffer();
        let take = buffer.begin_recording().unwrap();
        buffer.finish_recording();

        assert_eq!(buffer.accept(take), Commit::Empty);
        assert!(buffer.is_empty());
        assert!(buffer.play().is_none());
    }

    #[test]
    fn stop_recording_is_a_no_op_when_not_recording() {
        let mut buffer = buffer();
        assert!(buffer.finish_recording().is_none());
        assert_eq!(buffer.state(), TransportState::Idle);
    }

    #[test]
    fn capacity_auto_stop_commits_full_recording() {
        let mut buffer = buffer();
        let mut take = buffer.begin_recording().unwrap();
        assert_eq!(take.capacity(), 100);

        assert_eq!(take.write(&[0.5; 60]), WriteOutcome::Continue);
        assert_eq!(take.write(&[0.5; 60]), WriteOutcome::CapacityReached);

        assert_eq!(buffer.accept(take), Commit::Recorded { frames: 100 });
        assert_eq!(buffer.state(), TransportState::Idle);
        assert_approx(buffer.duration_seconds() as f32, 1.0, 1e-6);
    }

    #[test]
    fn new_recording_discards_previous_loop() {
        let mut buffer = buffer();
        record(&mut buffer, &[0.25; 10]);

        let _take = buffer.begin_recording().unwrap();

        assert!(buffer.is_empty());
        assert_eq!(buffer.duration_seconds(), 0.0);
        assert!(buffer.begin_recording().is_none());
    }

    #[test]
    fn overdub_of_silence_leaves_loop_unchanged() {
        let mut buffer = buffer();
        let input: Vec<f32> = (0..20).map(|i| (i as f32 * 0.3).sin()).collect();
        record(&mut buffer, &input);

        overdub(&mut buffer, &[0.0; 20]);
        assert_eq!(buffer.samples(), input.as_slice());

        overdub(&mut buffer, &[0.0; 20]);
        assert_eq!(buffer.samples(), input.as_slice());
    }

    #[test]
    fn overdub_sums_into_loop_at_same_positions() {
        let mut buffer = buffer();
        record(&mut buffer, &[0.1, 0.2, 0.3, 0.4]);

        overdub(&mut buffer, &[1.0, 1.0, 1.0, 1.0, 1.0, 1.0]);

        let expected = [2.1, 2.2, 1.3, 1.4];
        for (actual, expected) in buffer.samples().iter().zip(expected) {
            assert_approx(*actual, expected, 1e-6);
        }
    }

    #[test]
    fn overdub_keeps_playing_after_stop() {
        let mut buffer = buffer();
        record(&mut buffer, &[0.1; 10]);

        let (take, playable) = buffer.begin_overdub(true).unwrap();
        assert!(playable.is_some());
        assert_eq!(buffer.state(), TransportState::PlayingWhileOverdubbing);

        buffer.finish_overdub().unwrap();
        assert_eq!(buffer.state(), TransportState::Playing);
        assert_eq!(buffer.accept(take), Commit::Overdubbed);
    }

    #[test]
    fn overdub_without_output_is_not_playing() {
        let mut buffer = buffer();
        record(&mut buffer, &[0.1; 10]);

        let (_take, playable) = buffer.begin_overdub(false).unwrap();

        assert!(playable.is_none());
        assert_eq!(buffer.state(), TransportState::Overdubbing);
        assert!(!buffer.state().is_playing());
    }

    #[test]
    fn overdub_requires_a_loop() {
        let mut buffer = buffer();
        assert!(buffer.begin_overdub(true).is_none());
    }

    #[test]
    fn stop_playback_aborts_overdub_without_mutation() {
        let mut buffer = buffer();
        record(&mut buffer, &[0.1; 10]);
        let (mut take, _) = buffer.begin_overdub(true).unwrap();
        take.write(&[1.0; 10]);

        assert_eq!(buffer.stop_playback(), Some(take.id()));
        assert_eq!(buffer.state(), TransportState::Idle);
        assert_eq!(buffer.accept(take), Commit::Discarded);
        assert_eq!(buffer.samples(), &[0.1; 10]);
    }

    #[test]
    fn clear_then_play_does_nothing() {
        let mut buffer = buffer();
        record(&mut buffer, &[0.1; 10]);
        assert!(buffer.play().is_some());

        buffer.clear();

        assert!(buffer.play().is_none());
        assert!(!buffer.state().is_playing());
        assert_eq!(buffer.duration_seconds(), 0.0);
    }

    #[test]
    fn clear_cancels_recording_in_progress() {
        let mut buffer = buffer();
        let mut take = buffer.begin_recording().unwrap();
        take.write(&[0.5; 10]);

        assert_eq!(buffer.clear(), Some(take.id()));
        assert_eq!(buffer.accept(take), Commit::Discarded);
        assert!(buffer.is_empty());
    }

    #[test]
    fn late_take_from_superseded_recording_is_discarded() {
        let mut buffer = buffer();
        let mut first = buffer.begin_recording().unwrap();
        first.write(&[0.5; 10]);
        buffer.finish_recording();

        let second = buffer.begin_recording().unwrap();

        assert_eq!(buffer.accept(first), Commit::Discarded);
        assert!(buffer.is_empty());
        assert_eq!(buffer.state(), TransportState::Recording);
        drop(second);
    }

    #[test]
    fn rebind_to_new_rate_drops_loop() {
        let mut buffer = buffer();
        record(&mut buffer, &[0.1; 10]);

        buffer.rebind(RATE);
        assert_eq!(buffer.len(), 10);

        buffer.rebind(48_000);
        assert!(buffer.is_empty());
        assert_eq!(buffer.capacity(), 48_000);
    }

    #[test]
    fn playable_fades_both_edges() {
        let playable = make_playable(&[1.0; 100], 1000, 0.005);

        assert_eq!(playable[0], 0.0);
        assert_approx(playable[1], 0.2, 1e-6);
        assert_eq!(playable[5], 1.0);
        assert_eq!(playable[50], 1.0);
        assert_approx(playable[99], 0.2, 1e-6);
        assert_approx(playable[95], 1.0, 1e-6);
    }

    #[test]
    fn playable_fade_is_capped_at_half_the_loop() {
        let playable = make_playable(&[1.0; 4], 48_000, 0.005);

        assert_eq!(playable.len(), 4);
        assert_eq!(playable[0], 0.0);
        assert_approx(playable[1], 0.5, 1e-6);
        assert_approx(playable[2], 1.0, 1e-6);
        assert_approx(playable[3], 0.5, 1e-6);
    }
}
