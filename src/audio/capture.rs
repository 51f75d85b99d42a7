//! Capture sessions using a dedicated thread that owns the cpal streams

use super::devices::{device_name, DeviceId};
use crate::looper::LoopPlayer;
use crate::monitor::Processor;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, Device, SampleFormat, SampleRate, StreamConfig};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;

/// Largest mono block handed to the processor in one call
const MAX_BLOCK_FRAMES: usize = 4096;

/// How long `close` waits for the input callback to be released
const PROCESSOR_RETURN_TIMEOUT: Duration = Duration::from_millis(500);

/// Audio capture errors
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("No input device found")]
    NoInputDevice,

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to get device config: {0}")]
    ConfigError(String),

    #[error("Unsupported sample format: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to build audio stream: {0}")]
    StreamError(String),

    #[error("Failed to start stream: {0}")]
    PlayError(String),

    #[error("Thread error: {0}")]
    ThreadError(String),
}

/// Native input format of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Running capture session; dropping it stops the streams
pub trait Session: Send {
    /// Whether the session has an output stream for loop playback
    fn has_playback(&self) -> bool;

    /// Stop the streams and hand back the processor, with whatever commands
    /// it has not applied yet
    fn close(self: Box<Self>) -> Option<Processor>;
}

/// Host audio seam
pub trait AudioHost: Send {
    /// Native format of `device`, or of the default input when `None`
    fn input_format(&self, device: Option<&DeviceId>) -> Result<StreamFormat, CaptureError>;

    /// Start capturing from `device` into `processor`, playing `player`
    fn open_session(
        &self,
        device: Option<&DeviceId>,
        format: StreamFormat,
        processor: Processor,
        player: LoopPlayer,
    ) -> Result<Box<dyn Session>, CaptureError>;
}

/// cpal-backed host
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalHost;

impl AudioHost for CpalHost {
    fn input_format(&self, device: Option<&DeviceId>) -> Result<StreamFormat, CaptureError> {
        let device = find_input_device(&cpal::default_host(), device)?;
        let config = device
            .default_input_config()
            .map_err(|e| CaptureError::ConfigError(e.to_string()))?;

        Ok(StreamFormat {
            sample_rate: config.sample_rate().0,
            channels: config.channels(),
        })
    }

    fn open_session(
        &self,
        device: Option<&DeviceId>,
        format: StreamFormat,
        processor: Processor,
        player: LoopPlayer,
    ) -> Result<Box<dyn Session>, CaptureError> {
        CpalSession::start(device.cloned(), format, processor, player)
            .map(|session| Box::new(session) as Box<dyn Session>)
    }
}

/// Commands sent to the session thread
enum SessionCommand {
    Stop,
}

/// Session handle (Send)
///
/// cpal streams are not `Send`, so they live on a dedicated thread that
/// blocks until the handle tells it to stop.
pub struct CpalSession {
    command_tx: Sender<SessionCommand>,
    thread_handle: Option<JoinHandle<()>>,
    processor_rx: Receiver<Processor>,
    has_playback: bool,
}

impl CpalSession {
    fn start(
        device: Option<DeviceId>,
        format: StreamFormat,
        processor: Processor,
        player: LoopPlayer,
    ) -> Result<Self, CaptureError> {
        let (command_tx, command_rx) = bounded(1);
        let (ready_tx, ready_rx) = bounded(1);
        let (processor_tx, processor_rx) = bounded(1);
        let processor = ReturnOnDrop {
            processor: Some(processor),
            return_tx: processor_tx,
        };

        let thread_handle = thread::Builder::new()
            .name("audio-session".to_string())
            .spawn(move || {
                run_session(device, format, processor, player, ready_tx, command_rx);
            })
            .map_err(|e| CaptureError::ThreadError(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(has_playback)) => Ok(Self {
                command_tx,
                thread_handle: Some(thread_handle),
                processor_rx,
                has_playback,
            }),
            Ok(Err(e)) => {
                let _ = thread_handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread_handle.join();
                Err(CaptureError::ThreadError(
                    "audio thread exited before the session started".to_string(),
                ))
            }
        }
    }

    /// Stop the streams and join the session thread
    pub fn stop(&mut self) {
        let _ = self.command_tx.try_send(SessionCommand::Stop);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Session for CpalSession {
    fn has_playback(&self) -> bool {
        self.has_playback
    }

    fn close(mut self: Box<Self>) -> Option<Processor> {
        self.stop();
        match self.processor_rx.recv_timeout(PROCESSOR_RETURN_TIMEOUT) {
            Ok(processor) => Some(processor),
            Err(_) => {
                log::warn!("Input callback was not released; queued takes are lost");
                None
            }
        }
    }
}

/// Input callback state that sends the processor back when the stream
/// releases the callback
struct ReturnOnDrop {
    processor: Option<Processor>,
    return_tx: Sender<Processor>,
}

impl Drop for ReturnOnDrop {
    fn drop(&mut self) {
        if let Some(processor) = self.processor.take() {
            let _ = self.return_tx.try_send(processor);
        }
    }
}

impl Drop for CpalSession {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Find the input device for an id, or the host default
fn find_input_device(host: &cpal::Host, id: Option<&DeviceId>) -> Result<Device, CaptureError> {
    match id {
        Some(id) if !id.is_empty() => {
            let name = device_name(id);
            host.input_devices()
                .map_err(|e| CaptureError::ConfigError(e.to_string()))?
                .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                .ok_or_else(|| CaptureError::DeviceNotFound(name.to_string()))
        }
        _ => host.default_input_device().ok_or(CaptureError::NoInputDevice),
    }
}

/// Run the session in a dedicated thread
fn run_session(
    device_id: Option<DeviceId>,
    format: StreamFormat,
    processor: ReturnOnDrop,
    player: LoopPlayer,
    ready_tx: Sender<Result<bool, CaptureError>>,
    command_rx: Receiver<SessionCommand>,
) {
    let host = cpal::default_host();

    let streams = open_streams(&host, device_id.as_ref(), format, processor, player);
    let (_input, output) = match streams {
        Ok(streams) => streams,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    let has_playback = output.is_some();
    log::info!(
        "Audio session started: {} Hz, {} channel(s), playback {}",
        format.sample_rate,
        format.channels,
        if has_playback { "on" } else { "off" }
    );
    let _ = ready_tx.send(Ok(has_playback));

    // Block until stopped; the streams drop with this frame
    match command_rx.recv() {
        Ok(SessionCommand::Stop) => log::info!("Audio session stopping"),
        Err(_) => log::info!("Audio session channel disconnected"),
    }
}

fn open_streams(
    host: &cpal::Host,
    device_id: Option<&DeviceId>,
    format: StreamFormat,
    processor: ReturnOnDrop,
    player: LoopPlayer,
) -> Result<(cpal::Stream, Option<cpal::Stream>), CaptureError> {
    let device = find_input_device(host, device_id)?;
    let supported = device
        .default_input_config()
        .map_err(|e| CaptureError::ConfigError(e.to_string()))?;

    let config = StreamConfig {
        channels: format.channels,
        sample_rate: SampleRate(format.sample_rate),
        buffer_size: BufferSize::Default,
    };
    let channels = format.channels.max(1) as usize;

    let input = match supported.sample_format() {
        SampleFormat::F32 => build_input_stream::<f32>(&device, &config, processor, channels),
        SampleFormat::I16 => build_input_stream::<i16>(&device, &config, processor, channels),
        SampleFormat::U16 => build_input_stream::<u16>(&device, &config, processor, channels),
        other => return Err(CaptureError::UnsupportedFormat(format!("{:?}", other))),
    }
    .map_err(|e| CaptureError::StreamError(e.to_string()))?;

    input
        .play()
        .map_err(|e| CaptureError::PlayError(e.to_string()))?;

    let output = match open_output(host, format.sample_rate, player) {
        Ok(stream) => Some(stream),
        Err(e) => {
            log::warn!("Loop playback unavailable, capturing only: {}", e);
            None
        }
    };

    Ok((input, output))
}

/// Open the default output at the capture sample rate
fn open_output(
    host: &cpal::Host,
    sample_rate: u32,
    player: LoopPlayer,
) -> Result<cpal::Stream, CaptureError> {
    let device = host
        .default_output_device()
        .ok_or_else(|| CaptureError::DeviceNotFound("default output".to_string()))?;
    let supported = device
        .default_output_config()
        .map_err(|e| CaptureError::ConfigError(e.to_string()))?;

    let config = StreamConfig {
        channels: supported.channels(),
        sample_rate: SampleRate(sample_rate),
        buffer_size: BufferSize::Default,
    };
    let channels = supported.channels().max(1) as usize;

    let stream = match supported.sample_format() {
        SampleFormat::F32 => build_output_stream::<f32>(&device, &config, player, channels),
        SampleFormat::I16 => build_output_stream::<i16>(&device, &config, player, channels),
        SampleFormat::U16 => build_output_stream::<u16>(&device, &config, player, channels),
        other => return Err(CaptureError::UnsupportedFormat(format!("{:?}", other))),
    }
    .map_err(|e| CaptureError::StreamError(e.to_string()))?;

    stream
        .play()
        .map_err(|e| CaptureError::PlayError(e.to_string()))?;
    Ok(stream)
}

/// Build input stream for given sample type
fn build_input_stream<T: cpal::Sample + cpal::SizedSample>(
    device: &Device,
    config: &StreamConfig,
    mut slot: ReturnOnDrop,
    channels: usize,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    f32: cpal::FromSample<T>,
{
    let mut mono = vec![0.0f32; MAX_BLOCK_FRAMES];

    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            let Some(processor) = slot.processor.as_mut() else {
                return;
            };
            // Downmix into the preallocated block, one processor call per block
            for block in data.chunks(channels * MAX_BLOCK_FRAMES) {
                let frames = block.len() / channels;
                for (slot, frame) in mono.iter_mut().zip(block.chunks_exact(channels)) {
                    let sum: f32 = frame
                        .iter()
                        .map(|s| -> f32 { cpal::Sample::from_sample(*s) })
                        .sum();
                    *slot = sum / channels as f32;
                }
                processor.process_buffer(&mono[..frames]);
            }
        },
        |err| {
            log::error!("Audio input stream error: {}", err);
        },
        None,
    )
}

/// Build output stream for given sample type
fn build_output_stream<T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>>(
    device: &Device,
    config: &StreamConfig,
    mut player: LoopPlayer,
    channels: usize,
) -> Result<cpal::Stream, cpal::BuildStreamError> {
    device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            player.apply_commands();
            for frame in data.chunks_mut(channels) {
                let value: T = cpal::Sample::from_sample(player.next_sample());
                frame.fill(value);
            }
        },
        |err| {
            log::error!("Audio output stream error: {}", err);
        },
        None,
    )
}
