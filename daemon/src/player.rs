//! Lifecycle of the external stream player process.
//!
//! At most one player process runs at a time. Liveness is always read from
//! the process handle itself, so a player that died on its own (stream ended,
//! network dropped) shows up as inactive on the very next check.

use std::process::{Child, Command, Stdio};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::settings::PlayerSettings;

/// Start/stop control over a single playback session.
///
/// Implementations serialize all calls internally so that checking for a live
/// session and acting on it happen atomically.
pub trait Playback: Send + Sync {
    /// Launches playback unless a session is already live.
    /// Returns `true` when a new session was started.
    fn start(&self) -> Result<bool>;

    /// Ends the live session, if any. Returns `true` when one was stopped.
    fn stop(&self) -> bool;

    fn is_active(&self) -> bool;

    /// Called once on daemon shutdown.
    fn teardown(&self) {
        self.stop();
    }
}

/// Plays the configured stream URL through an external media player
/// (`<program> <args...> <stream_url>`).
pub struct StreamPlayer {
    program: String,
    args: Vec<String>,
    stream_url: String,
    session: Mutex<Option<Child>>,
}

impl StreamPlayer {
    pub fn new(program: impl Into<String>, args: Vec<String>, stream_url: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args,
            stream_url: stream_url.into(),
            session: Mutex::new(None),
        }
    }

    pub fn from_settings(settings: &PlayerSettings) -> Self {
        Self::new(
            settings.program.clone(),
            settings.args.clone(),
            settings.stream_url.clone(),
        )
    }

    /// PID of the live player process, if any.
    pub fn pid(&self) -> Option<u32> {
        let mut session = self.lock();
        if reap(&mut session) {
            session.as_ref().map(Child::id)
        } else {
            None
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Child>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Playback for StreamPlayer {
    fn start(&self) -> Result<bool> {
        let mut session = self.lock();
        if reap(&mut session) {
            debug!("Stream player already running");
            return Ok(false);
        }

        let child = Command::new(&self.program)
            .args(&self.args)
            .arg(&self.stream_url)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| Error::PlayerSpawn {
                program: self.program.clone(),
                source,
            })?;

        info!(pid = child.id(), url = %self.stream_url, "Started stream player");
        *session = Some(child);
        Ok(true)
    }

    fn stop(&self) -> bool {
        let mut session = self.lock();
        if !reap(&mut session) {
            return false;
        }
        match session.take() {
            Some(mut child) => {
                terminate(&mut child);
                true
            }
            None => false,
        }
    }

    fn is_active(&self) -> bool {
        reap(&mut self.lock())
    }

    fn teardown(&self) {
        if self.stop() {
            info!("Stream player torn down");
        }
    }
}

impl Drop for StreamPlayer {
    fn drop(&mut self) {
        let session = self.session.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(mut child) = session.take() {
            warn!(pid = child.id(), "Stream player still running at drop, killing it");
            terminate(&mut child);
        }
    }
}

/// Polls the session's process. Clears the slot and returns `false` once the
/// process has exited.
fn reap(session: &mut Option<Child>) -> bool {
    let Some(child) = session.as_mut() else {
        return false;
    };
    let pid = child.id();
    match child.try_wait() {
        Ok(None) => true,
        Ok(Some(status)) => {
            info!(pid, %status, "Stream player exited");
            *session = None;
            false
        }
        Err(e) => {
            warn!(pid, error = %e, "Could not poll stream player, dropping session");
            *session = None;
            false
        }
    }
}

fn terminate(child: &mut Child) {
    let pid = child.id();
    if let Err(e) = child.kill() {
        warn!(pid, error = %e, "Failed to kill stream player");
    }
    match child.wait() {
        Ok(status) => info!(pid, %status, "Stopped stream player"),
        Err(e) => warn!(pid, error = %e, "Failed to reap stream player"),
    }
}
