//! Input device enumeration and default input selection

use cpal::traits::{DeviceTrait, HostTrait};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Prefix used for device ids built from cpal device names
const INPUT_ID_PREFIX: &str = "input:";

/// Stable identifier of an input device
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Empty ids never name a device
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Input-capable audio device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputDevice {
    /// Identifier used for selection
    pub id: DeviceId,

    /// Display name
    pub name: String,

    /// Host-level unique identifier
    pub uid: String,
}

/// Device enumeration errors
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Failed to enumerate devices: {0}")]
    EnumerationError(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),
}

/// Host device query/selection seam
pub trait DeviceManager: Send {
    /// Input-capable devices in ascending case-insensitive name order
    fn list_input_devices(&self) -> Vec<InputDevice>;

    /// The host's default input device, if it has one
    fn default_input_device(&self) -> Option<DeviceId>;

    /// Ask the host to make `id` the default input; returns whether it did
    fn set_default_input_device(&self, id: &DeviceId) -> bool;
}

/// Sort devices by name, ignoring case
pub fn sort_devices(devices: &mut [InputDevice]) {
    devices.sort_by_cached_key(|device| device.name.to_lowercase());
}

/// Build the device id for a cpal device name
pub(crate) fn input_id(name: &str) -> DeviceId {
    DeviceId(format!("{}{}", INPUT_ID_PREFIX, name))
}

/// Recover the cpal device name from a device id
pub(crate) fn device_name(id: &DeviceId) -> &str {
    id.as_str()
        .strip_prefix(INPUT_ID_PREFIX)
        .unwrap_or(id.as_str())
}

/// cpal-backed device manager
///
/// cpal cannot change the operating system's default input, so the
/// selection is kept as a process-wide preference that overrides the host
/// default for as long as the device stays present.
#[derive(Default)]
pub struct CpalDeviceManager {
    preferred: Mutex<Option<DeviceId>>,
}

impl CpalDeviceManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enumerate input devices, propagating host errors
    pub fn enumerate(&self) -> Result<Vec<InputDevice>, DeviceError> {
        let host = cpal::default_host();
        let devices = host
            .input_devices()
            .map_err(|e| DeviceError::EnumerationError(e.to_string()))?;

        let mut inputs: Vec<InputDevice> = devices
            .filter(|device| device.default_input_config().is_ok())
            .filter_map(|device| device.name().ok())
            .map(|name| InputDevice {
                id: input_id(&name),
                uid: name.clone(),
                name,
            })
            .collect();

        sort_devices(&mut inputs);
        Ok(inputs)
    }

    fn host_default(&self) -> Option<DeviceId> {
        cpal::default_host()
            .default_input_device()
            .and_then(|device| device.name().ok())
            .map(|name| input_id(&name))
    }
}

impl DeviceManager for CpalDeviceManager {
    fn list_input_devices(&self) -> Vec<InputDevice> {
        match self.enumerate() {
            Ok(devices) => devices,
            Err(e) => {
                log::warn!("{}", e);
                Vec::new()
            }
        }
    }

    fn default_input_device(&self) -> Option<DeviceId> {
        let preferred = self.preferred.lock().clone();
        if let Some(id) = preferred {
            if self.list_input_devices().iter().any(|device| device.id == id) {
                return Some(id);
            }
        }
        self.host_default()
    }

    fn set_default_input_device(&self, id: &DeviceId) -> bool {
        let present = self
            .list_input_devices()
            .iter()
            .any(|device| &device.id == id);
        if !present {
            log::warn!("{}", DeviceError::DeviceNotFound(id.to_string()));
            return false;
        }
        *self.preferred.lock() = Some(id.clone());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(name: &str) -> InputDevice {
        InputDevice {
            id: input_id(name),
            name: name.to_string(),
            uid: name.to_string(),
        }
    }

    #[test]
    fn sort_devices_ignores_case() {
        let mut devices = vec![device("zoom H4"), device("Built-in Mic"), device("audiobox")];

        sort_devices(&mut devices);

        let names: Vec<&str> = devices.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["audiobox", "Built-in Mic", "zoom H4"]);
    }

    #[test]
    fn device_id_round_trips_cpal_name() {
        let id = input_id("USB Audio: Line In");

        assert_eq!(id.as_str(), "input:USB Audio: Line In");
        assert_eq!(device_name(&id), "USB Audio: Line In");
    }

    #[test]
    fn empty_device_id_is_detected() {
        assert!(DeviceId::new("").is_empty());
        assert!(!DeviceId::new("input:Mic").is_empty());
    }
}
