//! Error types for harmonia-midi.

use thiserror::Error;

/// Result type alias for harmonia-midi operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid MIDI message: {0}")]
    InvalidMessage(String),

    #[error("Standard MIDI File: {0}")]
    Smf(#[from] midly::Error),

    #[error("Event source is closed")]
    SourceClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
