use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures raised by the config store, the alarm model and the player.
#[derive(Debug, Error)]
pub enum Error {
    /// A document path segment is absent, out of range, or indexes a scalar.
    #[error("Path not found: {0}")]
    PathNotFound(String),

    /// An alarm is missing a required field or carries an out-of-range value.
    #[error("Invalid alarm: {0}")]
    Validation(String),

    /// The request body could not be decoded as the expected JSON shape.
    #[error("Malformed request body: {0}")]
    MalformedRequestBody(String),

    /// The document could not be committed to disk. The in-memory copy keeps
    /// the mutation so the next successful write includes it.
    #[error("Failed to persist {}: {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The external media player could not be launched.
    #[error("Failed to launch player `{program}`: {source}")]
    PlayerSpawn {
        program: String,
        #[source]
        source: io::Error,
    },
}

impl Error {
    pub fn path_not_found(path: impl Into<String>) -> Self {
        Self::PathNotFound(path.into())
    }
}
