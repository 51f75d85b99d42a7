//! Line-oriented control surface

use crate::audio::DeviceId;
use crate::monitor::AudioMonitor;
use crate::state::MonitorState;
use std::str::FromStr;
use thiserror::Error;

pub const HELP: &str = "\
commands:
  devices        list input devices
  select <n>     use input device n (from `devices`)
  start | stop   start or stop monitoring
  rec | stoprec  record a new loop
  play | stopplay
  dub | stopdub  overdub onto the loop
  clear          discard the loop
  status         show the current state
  help           show this text
  quit";

/// Command parse errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseCommandError {
    #[error("empty command")]
    Empty,

    #[error("unknown command: {0} (try `help`)")]
    Unknown(String),

    #[error("`{0}` needs an argument")]
    MissingArgument(String),

    #[error("not a device number: {0}")]
    InvalidIndex(String),
}

/// One control surface command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Devices,
    /// 1-based index into the device list
    Select(usize),
    Start,
    Stop,
    Record,
    StopRecord,
    Play,
    StopPlay,
    Overdub,
    StopOverdub,
    Clear,
    Status,
    Help,
    Quit,
}

impl FromStr for ControlCommand {
    type Err = ParseCommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let Some(word) = words.next() else {
            return Err(ParseCommandError::Empty);
        };

        let command = match word.to_lowercase().as_str() {
            "devices" | "ls" => ControlCommand::Devices,
            "select" | "use" => {
                let arg = words
                    .next()
                    .ok_or_else(|| ParseCommandError::MissingArgument(word.to_string()))?;
                match arg.parse::<usize>() {
                    Ok(index) if index > 0 => ControlCommand::Select(index),
                    _ => return Err(ParseCommandError::InvalidIndex(arg.to_string())),
                }
            }
            "start" => ControlCommand::Start,
            "stop" => ControlCommand::Stop,
            "rec" | "record" => ControlCommand::Record,
            "stoprec" => ControlCommand::StopRecord,
            "play" => ControlCommand::Play,
            "stopplay" => ControlCommand::StopPlay,
            "dub" | "overdub" => ControlCommand::Overdub,
            "stopdub" => ControlCommand::StopOverdub,
            "clear" => ControlCommand::Clear,
            "status" | "st" => ControlCommand::Status,
            "help" | "?" => ControlCommand::Help,
            "quit" | "exit" | "q" => ControlCommand::Quit,
            other => return Err(ParseCommandError::Unknown(other.to_string())),
        };
        Ok(command)
    }
}

/// Run a command against the monitor; returns text to show, if any
pub fn dispatch(monitor: &mut AudioMonitor, command: ControlCommand) -> Option<String> {
    match command {
        ControlCommand::Devices => {
            monitor.refresh_devices();
            Some(format_devices(&monitor.state()))
        }
        ControlCommand::Select(index) => {
            let state = monitor.state();
            match index.checked_sub(1).and_then(|i| state.devices.get(i)) {
                Some(device) => {
                    let id = device.id.clone();
                    monitor.select_device(&id);
                    None
                }
                None => Some(format!("no device {}", index)),
            }
        }
        ControlCommand::Start => {
            monitor.request_access_and_start();
            None
        }
        ControlCommand::Stop => {
            monitor.stop_monitoring();
            None
        }
        ControlCommand::Record => {
            monitor.start_recording();
            None
        }
        ControlCommand::StopRecord => {
            monitor.stop_recording();
            None
        }
        ControlCommand::Play => {
            monitor.play_loop();
            None
        }
        ControlCommand::StopPlay => {
            monitor.stop_playback();
            None
        }
        ControlCommand::Overdub => {
            monitor.start_overdub();
            None
        }
        ControlCommand::StopOverdub => {
            monitor.stop_overdub();
            None
        }
        ControlCommand::Clear => {
            monitor.clear_loop();
            None
        }
        ControlCommand::Status => Some(format_status(&monitor.state())),
        ControlCommand::Help => Some(HELP.to_string()),
        // Handled by the caller
        ControlCommand::Quit => None,
    }
}

/// Numbered device list with the selection marked
pub fn format_devices(state: &MonitorState) -> String {
    if state.devices.is_empty() {
        return "no input devices".to_string();
    }
    state
        .devices
        .iter()
        .enumerate()
        .map(|(i, device)| {
            let marker = if Some(&device.id) == state.selected_device_id.as_ref() {
                '*'
            } else {
                ' '
            };
            format!("{} {:>2}. {}", marker, i + 1, device.name)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// One-line summary of the monitor state
pub fn format_status(state: &MonitorState) -> String {
    let mut parts = vec![if state.is_running { "running" } else { "stopped" }.to_string()];

    if let Some(id) = &state.selected_device_id {
        parts.push(device_label(state, id));
    }
    if state.is_recording {
        parts.push("REC".to_string());
    }
    if state.is_playing {
        parts.push("PLAY".to_string());
    }
    if state.is_overdubbing {
        parts.push("DUB".to_string());
    }
    parts.push(format!("loop {:.2}s", state.loop_duration_seconds));
    parts.push(format!(
        "chord {} ({:.0}%)",
        state.chord_name,
        state.chord_confidence * 100.0
    ));
    parts.push(format!("level {}", level_bar(state.level, 10)));

    let mut line = parts.join(" | ");
    if let Some(error) = &state.last_error {
        line.push_str("\nerror: ");
        line.push_str(error);
    }
    line
}

fn device_label(state: &MonitorState, id: &DeviceId) -> String {
    state
        .devices
        .iter()
        .find(|device| &device.id == id)
        .map_or_else(|| id.to_string(), |device| device.name.clone())
}

/// Fixed-width meter, `width` cells
fn level_bar(level: f32, width: usize) -> String {
    let filled = ((level.clamp(0.0, 1.0) * width as f32).round() as usize).min(width);
    format!("[{}{}]", "#".repeat(filled), ".".repeat(width - filled))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::InputDevice;

    #[test]
    fn parses_transport_commands() {
        assert_eq!("rec".parse::<ControlCommand>(), Ok(ControlCommand::Record));
        assert_eq!("  stopdub ".parse::<ControlCommand>(), Ok(ControlCommand::StopOverdub));
        assert_eq!("PLAY".parse::<ControlCommand>(), Ok(ControlCommand::Play));
        assert_eq!("q".parse::<ControlCommand>(), Ok(ControlCommand::Quit));
    }

    #[test]
    fn parses_select_with_index() {
        assert_eq!("select 2".parse::<ControlCommand>(), Ok(ControlCommand::Select(2)));
        assert_eq!(
            "select".parse::<ControlCommand>(),
            Err(ParseCommandError::MissingArgument("select".to_string()))
        );
        assert_eq!(
            "select 0".parse::<ControlCommand>(),
            Err(ParseCommandError::InvalidIndex("0".to_string()))
        );
        assert_eq!(
            "select mic".parse::<ControlCommand>(),
            Err(ParseCommandError::InvalidIndex("mic".to_string()))
        );
    }

    #[test]
    fn rejects_empty_and_unknown_lines() {
        assert_eq!("   ".parse::<ControlCommand>(), Err(ParseCommandError::Empty));
        assert_eq!(
            "jump".parse::<ControlCommand>(),
            Err(ParseCommandError::Unknown("jump".to_string()))
        );
    }

    #[test]
    fn status_line_shows_transport_and_chord() {
        let state = MonitorState {
            is_running: true,
            is_playing: true,
            is_overdubbing: true,
            loop_duration_seconds: 3.2,
            chord_name: "Am".to_string(),
            chord_confidence: 0.54,
            level: 0.5,
            ..MonitorState::default()
        };

        assert_eq!(
            format_status(&state),
            "running | PLAY | DUB | loop 3.20s | chord Am (54%) | level [#####.....]"
        );
    }

    #[test]
    fn status_line_appends_error() {
        let state = MonitorState {
            last_error: Some("Failed to start audio engine".to_string()),
            ..MonitorState::default()
        };

        let status = format_status(&state);

        assert!(status.starts_with("stopped | loop 0.00s | chord -- (0%)"));
        assert!(status.ends_with("\nerror: Failed to start audio engine"));
    }

    #[test]
    fn device_list_marks_selection() {
        let mic = InputDevice {
            id: DeviceId::new("input:Mic"),
            name: "Mic".to_string(),
            uid: "Mic".to_string(),
        };
        let state = MonitorState {
            selected_device_id: Some(mic.id.clone()),
            devices: vec![mic],
            ..MonitorState::default()
        };

        assert_eq!(format_devices(&state), "*  1. Mic");
        assert_eq!(format_devices(&MonitorState::default()), "no input devices");
    }
}
