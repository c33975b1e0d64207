use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{error, warn};

use crate::event::DaemonEvent;

/// Whether the daemon last commanded the radio on or off.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "lowercase")]
pub enum RadioState {
    Idle,
    Playing,
}

/// Runtime status written by the daemon to `<app dir>/status.toml` for
/// external tools to read.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RadioStatus {
    /// Daemon binary version (set from Cargo.toml at compile time).
    pub version: String,
    pub state: RadioState,
    /// Name of the alarm whose window is currently open, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_alarm: Option<String>,
    /// Most recent non-fatal error, cleared by the next successful transition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RadioStatus {
    /// Constructs the initial status on daemon startup.
    pub fn new(playing: bool) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            state: if playing {
                RadioState::Playing
            } else {
                RadioState::Idle
            },
            active_alarm: None,
            error: None,
        }
    }

    /// Folds one daemon event into the status.
    pub fn apply(&mut self, event: &DaemonEvent) {
        match event {
            DaemonEvent::AlarmStarted { alarm } => {
                self.state = RadioState::Playing;
                self.active_alarm = Some(alarm.clone());
                self.error = None;
            }
            DaemonEvent::AlarmEnded => {
                self.state = RadioState::Idle;
                self.active_alarm = None;
            }
            DaemonEvent::PlaybackRestarted => {
                self.state = RadioState::Playing;
                self.error = None;
            }
            DaemonEvent::PlaybackFailed(reason) => {
                self.error = Some(reason.clone());
            }
            DaemonEvent::PlaybackSwitched(on) => {
                self.state = if *on {
                    RadioState::Playing
                } else {
                    RadioState::Idle
                };
                self.error = None;
            }
            DaemonEvent::Shutdown => {
                self.state = RadioState::Idle;
                self.active_alarm = None;
                self.error = None;
            }
        }
    }
}

/// Serializes `status` to TOML and writes it to `path`.
/// Creates the parent directory if it does not exist.
/// Logs errors rather than panicking; a status write failure never stops the daemon.
pub fn write_status(path: &Path, status: &RadioStatus) {
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            warn!(dir = %parent.display(), error = %e, "Failed to create status directory");
            return;
        }
    }
    match toml::to_string_pretty(status) {
        Ok(content) => {
            if let Err(e) = std::fs::write(path, content) {
                warn!(path = %path.display(), error = %e, "Failed to write status file");
            }
        }
        Err(e) => error!(error = %e, "Failed to serialize status"),
    }
}
