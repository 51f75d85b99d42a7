//! Render-side buffer processing
//!
//! `Processor` runs inside the input callback. It applies control commands
//! at the buffer boundary, feeds the active take, meters the level and
//! hands the frame to the analysis worker. Nothing here locks or allocates.

use crate::looper::{Take, TakeId, WriteOutcome};
use rtrb::{Consumer, Producer, PushError, RingBuffer};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Commands from the control thread to the render thread
#[derive(Debug)]
pub enum CaptureCommand {
    /// Start writing into this take, replacing any current one
    Begin(Take),

    /// Stop writing and hand the take back for commit
    Finish(TakeId),

    /// Stop writing and hand the take back to be dropped
    Abort(TakeId),
}

/// Events from the render thread to the control thread
#[derive(Debug)]
pub enum CaptureEvent {
    /// The take ended, either on request or because it filled up
    Finished(Take),

    /// The take was cancelled or superseded
    Aborted(Take),
}

/// Latest signal level, coalesced through an atomic
#[derive(Debug, Clone, Default)]
pub struct LevelMeter(Arc<AtomicU32>);

impl LevelMeter {
    pub fn store(&self, level: f32) {
        self.0.store(level.to_bits(), Ordering::Relaxed);
    }

    pub fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }
}

/// RMS level scaled by `gain` and clamped to 0-1
pub fn rms_level(frame: &[f32], gain: f32) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }
    let sum: f32 = frame.iter().map(|s| s * s).sum();
    let level = (sum / frame.len() as f32).sqrt() * gain;
    if level.is_nan() {
        return 0.0;
    }
    level.clamp(0.0, 1.0)
}

/// Per-buffer render routine
pub struct Processor {
    commands: Consumer<CaptureCommand>,
    events: Producer<CaptureEvent>,
    analysis: Producer<f32>,
    level: LevelMeter,
    gain: f32,
    take: Option<Take>,

    /// Event that did not fit in the queue, retried on the next buffer
    backlog: Option<CaptureEvent>,
}

impl Processor {
    /// Process one mono buffer from the capture callback
    pub fn process_buffer(&mut self, frame: &[f32]) {
        self.flush_backlog();
        self.apply_commands();

        let full = self
            .take
            .as_mut()
            .is_some_and(|take| take.write(frame) == WriteOutcome::CapacityReached);
        if full {
            if let Some(take) = self.take.take() {
                self.emit(CaptureEvent::Finished(take));
            }
        }

        if frame.is_empty() {
            return;
        }

        self.level.store(rms_level(frame, self.gain));

        // A full ring drops the whole frame
        if self.analysis.slots() >= frame.len() {
            for &sample in frame {
                let _ = self.analysis.push(sample);
            }
        }
    }

    /// Apply commands still queued after the streams stopped
    ///
    /// Takes asked to finish or abort are handed back as events; a take
    /// still being written stays here and is dropped with the processor.
    pub fn apply_pending_commands(&mut self) {
        self.flush_backlog();
        self.apply_commands();
    }

    fn apply_commands(&mut self) {
        while let Ok(command) = self.commands.pop() {
            match command {
                CaptureCommand::Begin(take) => {
                    if let Some(previous) = self.take.replace(take) {
                        self.emit(CaptureEvent::Aborted(previous));
                    }
                }
                CaptureCommand::Finish(id) => {
                    if let Some(take) = self.take_matching(id) {
                        self.emit(CaptureEvent::Finished(take));
                    }
                }
                CaptureCommand::Abort(id) => {
                    if let Some(take) = self.take_matching(id) {
                        self.emit(CaptureEvent::Aborted(take));
                    }
                }
            }
        }
    }

    fn take_matching(&mut self, id: TakeId) -> Option<Take> {
        if self.take.as_ref().map(Take::id) == Some(id) {
            self.take.take()
        } else {
            None
        }
    }

    fn flush_backlog(&mut self) {
        if let Some(event) = self.backlog.take() {
            self.emit(event);
        }
    }

    fn emit(&mut self, event: CaptureEvent) {
        if self.backlog.is_some() {
            self.flush_backlog();
        }
        let rejected = match self.events.push(event) {
            Ok(()) => return,
            Err(PushError::Full(event)) => event,
        };
        // Keep the take rather than freeing it on the render thread. A
        // second overflow needs more events than capture_pair makes room for.
        if self.backlog.is_none() {
            self.backlog = Some(rejected);
        }
    }
}

/// Control-side end of the render queues
pub struct CaptureLink {
    commands: Producer<CaptureCommand>,
    events: Consumer<CaptureEvent>,
    level: LevelMeter,
}

impl CaptureLink {
    /// Queue a command; hands it back when the queue is full
    pub fn send(&mut self, command: CaptureCommand) -> Result<(), CaptureCommand> {
        self.commands.push(command).map_err(|err| match err {
            PushError::Full(command) => command,
        })
    }

    pub fn next_event(&mut self) -> Option<CaptureEvent> {
        self.events.pop().ok()
    }

    pub fn level(&self) -> f32 {
        self.level.load()
    }

    pub fn reset_level(&self) {
        self.level.store(0.0);
    }
}

/// Create a connected processor and control link
///
/// `analysis` is the producer half of the ring read by the analysis worker.
pub fn capture_pair(
    capacity: usize,
    gain: f32,
    analysis: Producer<f32>,
) -> (CaptureLink, Processor) {
    let capacity = capacity.max(1);
    let (command_tx, command_rx) = RingBuffer::new(capacity);
    // One event per applied command, plus a capacity auto-stop and the
    // command sent after the last drain
    let (event_tx, event_rx) = RingBuffer::new(capacity + 2);
    let level = LevelMeter::default();

    let link = CaptureLink {
        commands: command_tx,
        events: event_rx,
        level: level.clone(),
    };
    let processor = Processor {
        commands: command_rx,
        events: event_tx,
        analysis,
        level,
        gain,
        take: None,
        backlog: None,
    };
    (link, processor)
}
