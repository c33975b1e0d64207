#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonEvent {
    /// An enabled alarm's window opened and playback was started.
    AlarmStarted { alarm: String },
    /// No alarm window is open any more; playback was stopped.
    AlarmEnded,
    /// The player died inside an open alarm window and was relaunched.
    PlaybackRestarted,
    /// The player could not be launched for an alarm.
    PlaybackFailed(String),
    /// The radio was switched on or off through the HTTP API.
    PlaybackSwitched(bool),
    /// Ctrl+C received; the daemon should stop its tasks and exit.
    Shutdown,
}
