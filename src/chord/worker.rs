//! Analysis worker thread
//!
//! One worker runs per monitoring session. It owns the detection engine and
//! the smoother, reads whole frames from the analysis ring in FIFO order and
//! sends chord updates to the control thread tagged with the session
//! generation.

use super::engine::ChordDetectionEngine;
use super::smoothing::{ChordSmoother, ChordUpdate};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use rtrb::Consumer;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// How long the worker waits for more samples between passes
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Chord update tagged with the session that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct ChordUpdateMessage {
    pub generation: u64,
    pub update: ChordUpdate,
}

/// Handle to a running analysis worker
pub struct AnalysisWorker {
    stop_tx: Sender<()>,
    thread_handle: Option<JoinHandle<()>>,
}

impl AnalysisWorker {
    pub fn spawn(
        generation: u64,
        engine: ChordDetectionEngine,
        smoother: ChordSmoother,
        samples: Consumer<f32>,
        updates: Sender<ChordUpdateMessage>,
    ) -> std::io::Result<Self> {
        let (stop_tx, stop_rx) = bounded(1);

        let thread_handle = thread::Builder::new()
            .name("chord-analysis".to_string())
            .spawn(move || {
                run_analysis(generation, engine, smoother, samples, updates, stop_rx);
            })?;

        Ok(Self {
            stop_tx,
            thread_handle: Some(thread_handle),
        })
    }

    /// Stop the worker and wait for it to exit
    pub fn stop(&mut self) {
        let _ = self.stop_tx.try_send(());
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                log::error!("Chord analysis thread panicked");
            }
        }
    }
}

impl Drop for AnalysisWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_analysis(
    generation: u64,
    mut engine: ChordDetectionEngine,
    mut smoother: ChordSmoother,
    mut samples: Consumer<f32>,
    updates: Sender<ChordUpdateMessage>,
    stop_rx: Receiver<()>,
) {
    let frame_size = engine.required_frame_size().max(1);
    let mut frame = vec![0.0f32; frame_size];

    log::debug!("Chord analysis started (generation {})", generation);

    loop {
        while let Ok(chunk) = samples.read_chunk(frame_size) {
            let (head, tail) = chunk.as_slices();
            frame[..head.len()].copy_from_slice(head);
            frame[head.len()..].copy_from_slice(tail);
            chunk.commit_all();

            let detection = engine.analyze(&frame);
            if let Some(update) = smoother.observe(detection.as_ref()) {
                if updates.send(ChordUpdateMessage { generation, update }).is_err() {
                    log::debug!("Chord update receiver gone, stopping analysis");
                    return;
                }
            }
        }

        match stop_rx.recv_timeout(POLL_INTERVAL) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    log::debug!("Chord analysis stopped (generation {})", generation);
}
