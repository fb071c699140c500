//! Error types for harmonia-synth.

use thiserror::Error;

/// Result type alias for harmonia-synth operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] harmonia_core::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Synthesizer already started")]
    AlreadyRunning,

    #[error("Soundbank error: {0}")]
    Soundbank(String),
}
