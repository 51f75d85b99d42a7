//! Engine controller
//!
//! `AudioMonitor` owns the device and session lifecycle and the committed
//! loop. Every method runs on the control thread; the render thread, the
//! output thread and the analysis worker are reached only through queues.
//! `pump` drains what they send back and publishes the resulting snapshot.

mod processor;

pub use processor::{
    capture_pair, rms_level, CaptureCommand, CaptureEvent, CaptureLink, LevelMeter, Processor,
};

use crate::audio::{
    sort_devices, AudioHost, CaptureError, CpalDeviceManager, CpalHost, DeviceId, DeviceManager,
    MonitorConfig, Session,
};
use crate::chord::{
    default_factory, AnalysisWorker, ChordDetectionEngine, ChordSmoother, ChordUpdate,
    ChordUpdateMessage, ClassifierFactory, SmoothingConfig, NO_CHORD,
};
use crate::looper::{
    player_pair, Commit, LoopBuffer, PlayerCommand, PlayerHandle, Take, TransportState,
};
use crate::permission::{
    Authorization, PermissionProvider, SystemPermission, ACCESS_DENIED_MESSAGE,
};
use crate::state::MonitorState;
use crossbeam_channel::{unbounded, Receiver, Sender};
use rtrb::RingBuffer;
use tokio::sync::watch;

/// Resources of one running capture session
///
/// Field order is drop order: the streams stop before the worker is joined.
struct ActiveSession {
    session: Box<dyn Session>,
    _worker: AnalysisWorker,
    capture: CaptureLink,
    player: PlayerHandle,
}

impl ActiveSession {
    fn has_playback(&self) -> bool {
        self.session.has_playback()
    }
}

/// Transport request waiting for a finished take to be committed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Deferred {
    Play,
    Overdub,
}

/// Live monitor, chord display and looper controller
pub struct AudioMonitor {
    config: MonitorConfig,
    host: Box<dyn AudioHost>,
    devices: Box<dyn DeviceManager>,
    permission: Box<dyn PermissionProvider>,
    classifier_factory: ClassifierFactory,

    /// Working copy of the published snapshot
    snapshot: MonitorState,
    state_tx: watch::Sender<MonitorState>,

    loop_buffer: LoopBuffer,
    active: Option<ActiveSession>,
    deferred: Option<Deferred>,

    /// Incremented for every session; chord updates carry it
    generation: u64,
    chord_tx: Sender<ChordUpdateMessage>,
    chord_rx: Receiver<ChordUpdateMessage>,

    permission_tx: Sender<bool>,
    permission_rx: Receiver<bool>,
}

impl AudioMonitor {
    pub fn new(
        config: MonitorConfig,
        host: Box<dyn AudioHost>,
        devices: Box<dyn DeviceManager>,
        permission: Box<dyn PermissionProvider>,
        classifier_factory: ClassifierFactory,
    ) -> Self {
        let (state_tx, _) = watch::channel(MonitorState::default());
        let (chord_tx, chord_rx) = unbounded();
        let (permission_tx, permission_rx) = unbounded();
        let loop_buffer = LoopBuffer::new(0, config.max_loop_seconds, config.fade_seconds);

        Self {
            config,
            host,
            devices,
            permission,
            classifier_factory,
            snapshot: MonitorState::default(),
            state_tx,
            loop_buffer,
            active: None,
            deferred: None,
            generation: 0,
            chord_tx,
            chord_rx,
            permission_tx,
            permission_rx,
        }
    }

    /// Monitor on the default cpal host with the built-in classifier
    pub fn with_cpal(config: MonitorConfig) -> Self {
        Self::new(
            config,
            Box::new(CpalHost),
            Box::new(CpalDeviceManager::new()),
            Box::new(SystemPermission),
            default_factory(),
        )
    }

    /// Receiver for published snapshots
    pub fn subscribe(&self) -> watch::Receiver<MonitorState> {
        self.state_tx.subscribe()
    }

    /// Latest published snapshot
    pub fn state(&self) -> MonitorState {
        self.state_tx.borrow().clone()
    }

    pub fn transport(&self) -> TransportState {
        self.loop_buffer.state()
    }

    pub fn loop_buffer(&self) -> &LoopBuffer {
        &self.loop_buffer
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }

    /// Re-enumerate input devices and pick a selection
    pub fn refresh_devices(&mut self) {
        let mut devices = self.devices.list_input_devices();
        sort_devices(&mut devices);

        let default = self
            .devices
            .default_input_device()
            .filter(|id| devices.iter().any(|device| &device.id == id));
        self.snapshot.selected_device_id = default.or_else(|| devices.first().map(|d| d.id.clone()));
        self.snapshot.devices = devices;

        log::debug!(
            "Found {} input device(s), selected {:?}",
            self.snapshot.devices.len(),
            self.snapshot.selected_device_id
        );
        self.publish();
    }

    /// Select an input device, restarting the session if one is running
    pub fn select_device(&mut self, id: &DeviceId) {
        if id.is_empty() || !self.snapshot.devices.iter().any(|device| &device.id == id) {
            log::debug!("Ignoring selection of unknown device {:?}", id.as_str());
            return;
        }

        self.snapshot.selected_device_id = Some(id.clone());
        if !self.devices.set_default_input_device(id) {
            log::warn!("Could not make {} the default input device", id);
        }

        if self.active.is_some() {
            log::info!("Input device changed, restarting session");
            self.stop_monitoring();
            self.start_monitoring();
        }
        self.publish();
    }

    /// Check microphone access and start monitoring once it is granted
    pub fn request_access_and_start(&mut self) {
        self.snapshot.last_error = None;
        let status = self.permission.check();
        self.snapshot.permission_status = Some(status);

        match status {
            Authorization::Granted => self.start_monitoring(),
            Authorization::Denied | Authorization::Restricted => {
                log::warn!("Microphone access {}", status.label());
                self.snapshot.last_error = Some(ACCESS_DENIED_MESSAGE.to_string());
            }
            Authorization::Undetermined => {
                let answer = self.permission_tx.clone();
                self.permission.request(Box::new(move |granted| {
                    let _ = answer.send(granted);
                }));
            }
        }
        self.publish();
    }

    /// Open a capture session on the selected device
    pub fn start_monitoring(&mut self) {
        if self.active.is_some() {
            return;
        }

        match self.open_session() {
            Ok(active) => {
                self.active = Some(active);
                self.snapshot.is_running = true;
                self.snapshot.last_error = None;
            }
            Err(e) => {
                log::error!("Failed to start audio engine: {}", e);
                self.snapshot.is_running = false;
                self.snapshot.last_error = Some(format!("Failed to start audio engine: {}", e));
            }
        }
        self.publish();
    }

    fn open_session(&mut self) -> Result<ActiveSession, CaptureError> {
        let device = self.snapshot.selected_device_id.clone();
        let format = self.host.input_format(device.as_ref())?;
        self.loop_buffer.rebind(format.sample_rate);

        self.generation += 1;
        let frame_size = self.config.analysis_frame_size.max(1);
        let classifier = (self.classifier_factory)(frame_size, format.sample_rate);
        let engine = ChordDetectionEngine::new(classifier, frame_size);
        let smoother = ChordSmoother::new(SmoothingConfig {
            min_confidence: self.config.min_confidence,
            hold_count: self.config.hold_count,
            silence_count: self.config.silence_count,
        });

        let (analysis_tx, analysis_rx) = RingBuffer::new(self.config.analysis_ring_capacity());
        let worker = AnalysisWorker::spawn(
            self.generation,
            engine,
            smoother,
            analysis_rx,
            self.chord_tx.clone(),
        )
        .map_err(|e| CaptureError::ThreadError(e.to_string()))?;

        let queue = self.config.command_queue_capacity;
        let (capture, processor) = capture_pair(queue, self.config.level_gain, analysis_tx);
        let (player, loop_player) = player_pair(queue);

        // The worker is joined by its Drop if the session fails to open
        let session = self
            .host
            .open_session(device.as_ref(), format, processor, loop_player)?;

        log::info!(
            "Monitoring started on {} ({} Hz)",
            device.as_ref().map_or("default input", DeviceId::as_str),
            format.sample_rate
        );

        Ok(ActiveSession {
            session,
            _worker: worker,
            capture,
            player,
        })
    }

    /// Tear down the session
    ///
    /// Takes already asked to finish are committed first; only a take
    /// still being written is dropped.
    pub fn stop_monitoring(&mut self) {
        if let Some(active) = self.active.take() {
            self.close_session(active);
            log::info!("Monitoring stopped");
        }
        self.deferred = None;
        self.loop_buffer.interrupt();
        self.snapshot.is_running = false;
        self.snapshot.level = 0.0;
        self.publish();
    }

    /// Start a new recording, replacing the committed loop
    pub fn start_recording(&mut self) {
        if self.active.is_none() || self.loop_buffer.state().is_recording() {
            return;
        }
        self.stop_playback();
        self.deferred = None;

        if let Some(take) = self.loop_buffer.begin_recording() {
            log::debug!("Recording take {}", take.id());
            self.send_capture(CaptureCommand::Begin(take));
        }
        self.publish();
    }

    /// Stop recording; the loop is committed when the take comes back
    pub fn stop_recording(&mut self) {
        if let Some(id) = self.loop_buffer.finish_recording() {
            self.send_capture(CaptureCommand::Finish(id));
            self.drain_capture_events();
        }
        self.publish();
    }

    /// Play the committed loop from its first frame
    ///
    /// While a finished take is on its way back, play waits for its commit.
    pub fn play_loop(&mut self) {
        if self.defer_until_committed(Deferred::Play) {
            return;
        }
        let Some(active) = self.active.as_mut() else {
            return;
        };
        if !active.has_playback() {
            log::debug!("No output stream, ignoring play");
            return;
        }
        if let Some(buffer) = self.loop_buffer.play() {
            send_player(&mut active.player, PlayerCommand::Play(buffer));
        }
        self.publish();
    }

    /// Stop playback, abandoning any overdub pass
    pub fn stop_playback(&mut self) {
        self.deferred = None;
        let aborted = self.loop_buffer.stop_playback();
        if let Some(active) = self.active.as_mut() {
            send_player(&mut active.player, PlayerCommand::Stop);
        }
        if let Some(id) = aborted {
            self.send_capture(CaptureCommand::Abort(id));
        }
        self.publish();
    }

    /// Start an overdub pass over the committed loop
    pub fn start_overdub(&mut self) {
        if self.defer_until_committed(Deferred::Overdub) {
            return;
        }
        let Some(active) = self.active.as_mut() else {
            return;
        };
        let Some((take, playable)) = self.loop_buffer.begin_overdub(active.has_playback()) else {
            return;
        };

        log::debug!("Overdub take {}", take.id());
        if let Some(buffer) = playable {
            send_player(&mut active.player, PlayerCommand::Play(buffer));
        }
        self.send_capture(CaptureCommand::Begin(take));
        self.publish();
    }

    /// Stop the overdub pass; it is summed into the loop when it comes back
    pub fn stop_overdub(&mut self) {
        if let Some(id) = self.loop_buffer.finish_overdub() {
            self.send_capture(CaptureCommand::Finish(id));
            self.drain_capture_events();
        }
        self.publish();
    }

    /// Stop playback and discard the loop and any take in progress
    pub fn clear_loop(&mut self) {
        self.deferred = None;
        if let Some(active) = self.active.as_mut() {
            send_player(&mut active.player, PlayerCommand::Stop);
        }
        if let Some(id) = self.loop_buffer.clear() {
            self.send_capture(CaptureCommand::Abort(id));
        }
        log::debug!("Loop cleared");
        self.publish();
    }

    /// Drain everything the audio threads and the worker sent back, then
    /// publish the snapshot if it changed
    pub fn pump(&mut self) {
        while let Ok(granted) = self.permission_rx.try_recv() {
            self.on_permission_answer(granted);
        }

        self.drain_capture_events();
        self.resume_deferred();
        if let Some(active) = self.active.as_mut() {
            active.player.drain_retired();
            self.snapshot.level = active.capture.level();
        }

        while let Ok(message) = self.chord_rx.try_recv() {
            if self.active.is_none() || message.generation != self.generation {
                continue;
            }
            match message.update {
                ChordUpdate::Accepted { name, confidence } => {
                    self.snapshot.chord_name = name;
                    self.snapshot.chord_confidence = confidence;
                }
                ChordUpdate::Cleared => {
                    self.snapshot.chord_name = NO_CHORD.to_string();
                    self.snapshot.chord_confidence = 0.0;
                }
            }
        }

        self.publish();
    }

    /// Commit every take the render thread has handed back
    fn drain_capture_events(&mut self) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        while let Some(event) = active.capture.next_event() {
            handle_capture_event(&mut self.loop_buffer, &mut active.player, event);
        }
    }

    /// Remember `request` if a finished take has not come back yet
    fn defer_until_committed(&mut self, request: Deferred) -> bool {
        self.drain_capture_events();
        if self.active.is_none() || !self.loop_buffer.is_committing() {
            return false;
        }
        log::debug!("{:?} waits for the take being committed", request);
        self.deferred = Some(request);
        true
    }

    fn resume_deferred(&mut self) {
        if self.loop_buffer.is_committing() {
            return;
        }
        match self.deferred.take() {
            Some(Deferred::Play) => self.play_loop(),
            Some(Deferred::Overdub) => self.start_overdub(),
            None => {}
        }
    }

    /// Stop the streams, then commit takes that were asked to finish
    fn close_session(&mut self, active: ActiveSession) {
        let ActiveSession {
            session,
            _worker: worker,
            mut capture,
            mut player,
        } = active;

        if let Some(mut processor) = session.close() {
            processor.apply_pending_commands();
        }
        while let Some(event) = capture.next_event() {
            handle_capture_event(&mut self.loop_buffer, &mut player, event);
        }
        drop(worker);
    }

    fn on_permission_answer(&mut self, granted: bool) {
        if granted {
            self.snapshot.permission_status = Some(Authorization::Granted);
            self.start_monitoring();
        } else {
            log::warn!("Microphone access was refused");
            self.snapshot.permission_status = Some(Authorization::Denied);
            self.snapshot.last_error = Some(ACCESS_DENIED_MESSAGE.to_string());
        }
    }

    fn send_capture(&mut self, command: CaptureCommand) {
        // Keeps the event queue within the room capture_pair gives it
        self.drain_capture_events();
        let Some(active) = self.active.as_mut() else {
            return;
        };
        if active.capture.send(command).is_err() {
            log::warn!("Capture command queue full, abandoning current take");
            self.loop_buffer.interrupt();
        }
    }

    /// The only place the published snapshot is written
    fn publish(&mut self) {
        let transport = self.loop_buffer.state();
        self.snapshot.is_recording = transport.is_recording();
        self.snapshot.is_playing = transport.is_playing();
        self.snapshot.is_overdubbing = transport.is_overdubbing();
        self.snapshot.loop_duration_seconds = self.loop_buffer.duration_seconds();

        let next = self.snapshot.clone();
        self.state_tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

impl Drop for AudioMonitor {
    fn drop(&mut self) {
        self.stop_monitoring();
    }
}

fn handle_capture_event(
    loop_buffer: &mut LoopBuffer,
    player: &mut PlayerHandle,
    event: CaptureEvent,
) {
    match event {
        CaptureEvent::Finished(take) => commit_take(loop_buffer, player, take),
        CaptureEvent::Aborted(take) => log::debug!("Take {} discarded", take.id()),
    }
}

fn commit_take(loop_buffer: &mut LoopBuffer, player: &mut PlayerHandle, take: Take) {
    match loop_buffer.accept(take) {
        Commit::Recorded { frames } => {
            log::info!(
                "Loop recorded: {} samples ({:.2}s)",
                frames,
                loop_buffer.duration_seconds()
            );
        }
        Commit::Overdubbed => {
            log::debug!("Overdub committed");
            // Restart so the new material is heard from the loop start
            if loop_buffer.state().is_playing() {
                if let Some(buffer) = loop_buffer.playable() {
                    send_player(player, PlayerCommand::Play(buffer));
                }
            }
        }
        Commit::Empty => log::debug!("Recording stopped before any audio arrived"),
        Commit::Discarded => log::debug!("Stale take discarded"),
    }
}

fn send_player(player: &mut PlayerHandle, command: PlayerCommand) {
    if !player.send(command) {
        log::warn!("Player command queue full");
    }
}
