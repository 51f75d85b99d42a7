//! Shred Library
//!
//! Live microphone monitor: input level meter, chord detection and a
//! single-track looper with record, play, overdub and clear.

pub mod audio;
pub mod chord;
pub mod control;
pub mod looper;
pub mod monitor;
pub mod permission;
pub mod state;

use audio::{ConfigError, MonitorConfig};
use control::{dispatch, format_devices, format_status, ControlCommand, ParseCommandError, HELP};
use monitor::AudioMonitor;

use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Top-level application errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to start runtime: {0}")]
    Runtime(String),

    #[error("Failed to read input: {0}")]
    Io(String),
}

/// Run the terminal control surface
///
/// The first argument, if given, is a JSON config file.
pub fn run() -> Result<(), AppError> {
    env_logger::init();

    let config = match std::env::args().nth(1) {
        Some(path) => MonitorConfig::load(Path::new(&path))?,
        None => MonitorConfig::default(),
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| AppError::Runtime(e.to_string()))?;

    runtime.block_on(control_loop(config))
}

async fn control_loop(config: MonitorConfig) -> Result<(), AppError> {
    let interval_ms = config.publish_interval_ms.max(1);
    let mut monitor = AudioMonitor::with_cpal(config);
    let mut state_rx = monitor.subscribe();

    monitor.refresh_devices();
    println!("{}", format_devices(&monitor.state()));
    println!("{}", HELP);

    let mut last_shown = monitor.state();
    let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = interval.tick() => monitor.pump(),

            line = lines.next_line() => {
                let Some(line) = line.map_err(|e| AppError::Io(e.to_string()))? else {
                    break;
                };
                match line.parse::<ControlCommand>() {
                    Ok(ControlCommand::Quit) => break,
                    Ok(command) => {
                        if let Some(output) = dispatch(&mut monitor, command) {
                            println!("{}", output);
                        }
                    }
                    Err(ParseCommandError::Empty) => {}
                    Err(e) => println!("{}", e),
                }
            }

            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = state_rx.borrow_and_update().clone();
                // The meter moves on every buffer; only print real changes
                if !state.same_apart_from_level(&last_shown) {
                    println!("{}", format_status(&state));
                }
                last_shown = state;
            }
        }
    }

    monitor.stop_monitoring();
    log::info!("Shred exiting");
    Ok(())
}
