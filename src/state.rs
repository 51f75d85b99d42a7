//! Published monitor state

use crate::audio::{DeviceId, InputDevice};
use crate::chord::NO_CHORD;
use crate::permission::Authorization;
use serde::Serialize;

/// Snapshot of everything the control surface shows
///
/// Built and published on the control thread only; subscribers always get
/// a complete copy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorState {
    /// Input-capable devices, sorted by name
    pub devices: Vec<InputDevice>,

    pub selected_device_id: Option<DeviceId>,

    /// Input level (0-1)
    pub level: f32,

    /// Capture session running
    pub is_running: bool,

    pub is_recording: bool,
    pub is_playing: bool,
    pub is_overdubbing: bool,

    /// Committed loop length in seconds
    pub loop_duration_seconds: f64,

    /// Displayed chord, `--` when none
    pub chord_name: String,

    /// Smoothed chord confidence (0-1)
    pub chord_confidence: f32,

    /// Last known microphone authorization
    pub permission_status: Option<Authorization>,

    /// User-facing message for the last failure
    pub last_error: Option<String>,
}

impl Default for MonitorState {
    fn default() -> Self {
        Self {
            devices: Vec::new(),
            selected_device_id: None,
            level: 0.0,
            is_running: false,
            is_recording: false,
            is_playing: false,
            is_overdubbing: false,
            loop_duration_seconds: 0.0,
            chord_name: NO_CHORD.to_string(),
            chord_confidence: 0.0,
            permission_status: None,
            last_error: None,
        }
    }
}

impl MonitorState {
    /// Equal apart from the level meter
    pub fn same_apart_from_level(&self, other: &MonitorState) -> bool {
        MonitorState {
            level: other.level,
            ..self.clone()
        } == *other
    }
}
