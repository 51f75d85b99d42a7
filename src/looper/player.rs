//! Loop playback on the output thread
//!
//! The player receives whole loop buffers through a lock-free queue and
//! hands replaced buffers back the same way, so the output callback never
//! frees memory.

use rtrb::{Consumer, Producer, PushError, RingBuffer};
use std::sync::Arc;

/// Commands for the output thread
#[derive(Debug)]
pub enum PlayerCommand {
    /// Play this buffer from its first frame, looping
    Play(Arc<[f32]>),

    /// Silence output
    Stop,
}

/// Output-side loop player
pub struct LoopPlayer {
    commands: Consumer<PlayerCommand>,
    retired: Producer<Arc<[f32]>>,
    current: Option<Arc<[f32]>>,
    position: usize,
}

impl LoopPlayer {
    /// Apply pending commands; call once per output buffer
    pub fn apply_commands(&mut self) {
        while let Ok(command) = self.commands.pop() {
            let next = match command {
                PlayerCommand::Play(buffer) => Some(buffer),
                PlayerCommand::Stop => None,
            };
            self.position = 0;
            if let Some(old) = std::mem::replace(&mut self.current, next) {
                self.retire(old);
            }
        }
    }

    /// Next mono sample, or silence when nothing is playing
    pub fn next_sample(&mut self) -> f32 {
        let Some(buffer) = self.current.as_ref() else {
            return 0.0;
        };
        if buffer.is_empty() {
            return 0.0;
        }
        if self.position >= buffer.len() {
            self.position = 0;
        }
        let sample = buffer[self.position];
        self.position += 1;
        sample
    }

    pub fn is_playing(&self) -> bool {
        self.current.is_some()
    }

    fn retire(&mut self, buffer: Arc<[f32]>) {
        // A full queue means the control thread stopped draining; dropping
        // here only decrements the count while the control thread still
        // holds its own reference to the loop.
        if let Err(PushError::Full(buffer)) = self.retired.push(buffer) {
            drop(buffer);
        }
    }
}

/// Control-side end of the player queues
pub struct PlayerHandle {
    commands: Producer<PlayerCommand>,
    retired: Consumer<Arc<[f32]>>,
}

impl PlayerHandle {
    /// Queue a command; returns false when the queue is full
    pub fn send(&mut self, command: PlayerCommand) -> bool {
        self.commands.push(command).is_ok()
    }

    /// Free buffers the output thread has let go of
    pub fn drain_retired(&mut self) -> usize {
        let mut count = 0;
        while self.retired.pop().is_ok() {
            count += 1;
        }
        count
    }
}

/// Create a connected player and its control handle
pub fn player_pair(capacity: usize) -> (PlayerHandle, LoopPlayer) {
    let (command_tx, command_rx) = RingBuffer::new(capacity.max(1));
    let (retired_tx, retired_rx) = RingBuffer::new(capacity.max(1));

    let handle = PlayerHandle {
        commands: command_tx,
        retired: retired_rx,
    };
    let player = LoopPlayer {
        commands: command_rx,
        retired: retired_tx,
        current: None,
        position: 0,
    };
    (handle, player)
}
