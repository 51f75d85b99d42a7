//! Microphone authorization seam

use serde::{Deserialize, Serialize};

/// Message shown when the user has refused microphone access
pub const ACCESS_DENIED_MESSAGE: &str =
    "Microphone access is denied. Enable it in system settings and try again.";

/// Microphone authorization status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Authorization {
    Granted,
    Denied,
    Restricted,
    Undetermined,
}

impl Authorization {
    pub fn label(self) -> &'static str {
        match self {
            Authorization::Granted => "granted",
            Authorization::Denied => "denied",
            Authorization::Restricted => "restricted",
            Authorization::Undetermined => "not determined",
        }
    }
}

/// Called once with the user's answer, possibly from another thread
pub type PermissionCallback = Box<dyn FnOnce(bool) + Send>;

/// Host permission query/request seam
pub trait PermissionProvider: Send {
    fn check(&self) -> Authorization;

    /// Ask the user for access; `done` receives whether it was granted
    fn request(&self, done: PermissionCallback);
}

/// Desktop hosts without a microphone permission model
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPermission;

impl PermissionProvider for SystemPermission {
    fn check(&self) -> Authorization {
        Authorization::Granted
    }

    fn request(&self, done: PermissionCallback) {
        done(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn system_permission_is_always_granted() {
        let provider = SystemPermission;
        let answered = Arc::new(AtomicBool::new(false));
        let flag = answered.clone();

        assert_eq!(provider.check(), Authorization::Granted);
        provider.request(Box::new(move |granted| flag.store(granted, Ordering::SeqCst)));

        assert!(answered.load(Ordering::SeqCst));
    }

    #[test]
    fn authorization_serializes_as_snake_case() {
        let json = serde_json::to_string(&Authorization::Undetermined).unwrap();
        assert_eq!(json, "\"undetermined\"");
        assert_eq!(Authorization::Restricted.label(), "restricted");
    }
}
