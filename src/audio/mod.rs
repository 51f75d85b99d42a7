//! Audio host integration: input devices, capture sessions and tuning

mod capture;
mod devices;

pub use capture::{AudioHost, CaptureError, CpalHost, Session, StreamFormat};
pub use devices::{sort_devices, CpalDeviceManager, DeviceError, DeviceId, DeviceManager, InputDevice};

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),

    #[error("Failed to parse config file: {0}")]
    ParseError(String),
}

/// Monitor configuration
///
/// Every field has a default, so a config file only needs the values it
/// overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Samples handed to the chord classifier per analysis
    pub analysis_frame_size: usize,

    /// Recording capacity in seconds; recording stops by itself when full
    pub max_loop_seconds: f64,

    /// Gain applied to the RMS level before clamping to 0-1
    pub level_gain: f32,

    /// Detections below this confidence count as no detection
    pub min_confidence: f32,

    /// Consecutive matching detections required before a chord is shown
    pub hold_count: u32,

    /// Consecutive non-detections before the chord display is cleared
    pub silence_count: u32,

    /// Fade applied to both ends of a committed loop, in seconds
    pub fade_seconds: f64,

    /// Capacity of the control -> audio thread command queues
    pub command_queue_capacity: usize,

    /// Analysis frames that may wait for the worker before frames are dropped
    pub analysis_ring_frames: usize,

    /// Control surface refresh interval in milliseconds
    pub publish_interval_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            analysis_frame_size: 4096,
            max_loop_seconds: 120.0,
            level_gain: 12.0,
            min_confidence: 0.2,
            hold_count: 2,
            silence_count: 20,
            fade_seconds: 0.005,
            command_queue_capacity: 64,
            analysis_ring_frames: 8,
            publish_interval_ms: 16,
        }
    }
}

impl MonitorConfig {
    /// Load a JSON config file, falling back to defaults for missing fields
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&text)
    }

    /// Parse a JSON config document
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(text).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Samples the analysis ring can hold
    pub fn analysis_ring_capacity(&self) -> usize {
        self.analysis_frame_size.max(1) * self.analysis_ring_frames.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_documented_tuning() {
        let config = MonitorConfig::default();

        assert_eq!(config.analysis_frame_size, 4096);
        assert_eq!(config.max_loop_seconds, 120.0);
        assert_eq!(config.level_gain, 12.0);
        assert_eq!(config.min_confidence, 0.2);
        assert_eq!(config.hold_count, 2);
        assert_eq!(config.silence_count, 20);
        assert_eq!(config.analysis_ring_capacity(), 4096 * 8);
    }

    #[test]
    fn partial_json_keeps_defaults_for_missing_fields() {
        let config = MonitorConfig::from_json(r#"{ "level_gain": 6.0, "hold_count": 3 }"#).unwrap();

        assert_eq!(config.level_gain, 6.0);
        assert_eq!(config.hold_count, 3);
        assert_eq!(config.silence_count, 20);
        assert_eq!(config.analysis_frame_size, 4096);
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let err = MonitorConfig::from_json("{ level_gain: ").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = MonitorConfig::load(Path::new("/nonexistent/shred.json")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadError(_)));
    }
}
