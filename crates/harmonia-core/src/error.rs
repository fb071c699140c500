//! Error types for harmonia-core.

use thiserror::Error;

/// Error type for harmonia-core operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Audio sink is closed")]
    SinkClosed,

    #[error("Device fault: {0}")]
    Device(String),

    #[error("Already running")]
    AlreadyRunning,

    #[error("Previous run has not stopped yet")]
    StillStopping,

    #[error("Voice limit reached ({0} voices)")]
    VoiceLimit(usize),

    #[error("Failed to spawn thread '{name}': {source}")]
    ThreadSpawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
