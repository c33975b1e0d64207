/// Canonical file paths for the daemon's data files.
///
/// All files live in one application directory:
///   - settings.toml      Daemon settings, edited by hand.
///   - radio-config.json  Alarm list and playback intent, owned by the daemon.
///   - status.toml        Written by the daemon for external tools.
///
/// The directory is `$RADIO_ALARM_HOME` when set, otherwise `$HOME/.radio-alarm`,
/// otherwise the current working directory.
use std::path::{Path, PathBuf};

pub const HOME_ENV_VAR: &str = "RADIO_ALARM_HOME";
const APP_DIR_NAME: &str = ".radio-alarm";
pub const SETTINGS_FILE_NAME: &str = "settings.toml";
pub const DOCUMENT_FILE_NAME: &str = "radio-config.json";
pub const STATUS_FILE_NAME: &str = "status.toml";

/// Returns the application data directory.
pub fn app_data_dir() -> PathBuf {
    resolve_app_dir(
        std::env::var_os(HOME_ENV_VAR).map(PathBuf::from),
        std::env::var_os("HOME").map(PathBuf::from),
    )
}

fn resolve_app_dir(override_dir: Option<PathBuf>, home: Option<PathBuf>) -> PathBuf {
    match (override_dir, home) {
        (Some(dir), _) => dir,
        (None, Some(home)) => home.join(APP_DIR_NAME),
        (None, None) => PathBuf::from("."),
    }
}

pub fn settings_file_path(app_dir: &Path) -> PathBuf {
    app_dir.join(SETTINGS_FILE_NAME)
}

pub fn document_file_path(app_dir: &Path) -> PathBuf {
    app_dir.join(DOCUMENT_FILE_NAME)
}

pub fn status_file_path(app_dir: &Path) -> PathBuf {
    app_dir.join(STATUS_FILE_NAME)
}
