use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::alarm::DEFAULT_WINDOW_MINUTES;

pub const DEFAULT_HTTP_HOST: &str = "0.0.0.0";
pub const DEFAULT_HTTP_PORT: u16 = 8001;
pub const DEFAULT_PLAYER_PROGRAM: &str = "mplayer";
pub const DEFAULT_STREAM_URL: &str = "https://streamingp.shoutcast.com/hotmixradio-sunny-128.mp3";
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 1_000;
pub const MIN_TICK_INTERVAL_MS: u64 = 100;
pub const MAX_TICK_INTERVAL_MS: u64 = 60_000;
pub const MIN_WINDOW_MINUTES: u32 = 1;
pub const MAX_WINDOW_MINUTES: u32 = 120;

/// Daemon settings. Deserialized from `<app dir>/settings.toml`; every
/// section and field is optional.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub http: HttpSettings,
    #[serde(default)]
    pub player: PlayerSettings,
    #[serde(default)]
    pub scheduler: SchedulerSettings,
}

/// Where the HTTP API listens.
#[derive(Debug, Deserialize, Clone)]
pub struct HttpSettings {
    #[serde(default = "default_http_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub port: u16,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            host: DEFAULT_HTTP_HOST.to_string(),
            port: DEFAULT_HTTP_PORT,
        }
    }
}

impl HttpSettings {
    /// `host:port` string accepted by `TcpListener::bind`.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// External media player invocation: `<program> <args...> <stream_url>`.
#[derive(Debug, Deserialize, Clone)]
pub struct PlayerSettings {
    #[serde(default = "default_player_program")]
    pub program: String,
    #[serde(default = "default_player_args")]
    pub args: Vec<String>,
    #[serde(default = "default_stream_url")]
    pub stream_url: String,
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self {
            program: default_player_program(),
            args: default_player_args(),
            stream_url: default_stream_url(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerSettings {
    /// Time between two alarm evaluations. Clamped to [100 ms, 60 s].
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// How long an alarm keeps the radio on, in minutes. Clamped to [1, 120].
    #[serde(default = "default_window_minutes")]
    pub window_minutes: u32,
    /// Restart a player that died while an alarm window is still open.
    #[serde(default = "default_reassert_playback")]
    pub reassert_playback: bool,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            window_minutes: DEFAULT_WINDOW_MINUTES,
            reassert_playback: true,
        }
    }
}

impl SchedulerSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(
            self.tick_interval_ms
                .clamp(MIN_TICK_INTERVAL_MS, MAX_TICK_INTERVAL_MS),
        )
    }

    pub fn effective_window_minutes(&self) -> u32 {
        self.window_minutes
            .clamp(MIN_WINDOW_MINUTES, MAX_WINDOW_MINUTES)
    }
}

/// Loads the settings file at `path`, returning `Settings::default()` if the file does not exist.
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_or_default(path: &Path) -> Result<Settings> {
    if !path.exists() {
        return Ok(Settings::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings file: {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("Failed to parse settings file: {}", path.display()))
}

fn default_http_host() -> String {
    DEFAULT_HTTP_HOST.to_string()
}

fn default_http_port() -> u16 {
    DEFAULT_HTTP_PORT
}

fn default_player_program() -> String {
    DEFAULT_PLAYER_PROGRAM.to_string()
}

fn default_player_args() -> Vec<String> {
    vec!["-volume".to_string(), "150".to_string()]
}

fn default_stream_url() -> String {
    DEFAULT_STREAM_URL.to_string()
}

fn default_tick_interval_ms() -> u64 {
    DEFAULT_TICK_INTERVAL_MS
}

fn default_window_minutes() -> u32 {
    DEFAULT_WINDOW_MINUTES
}

fn default_reassert_playback() -> bool {
    true
}
