//! Error types for harmonia-export

use std::io;
use thiserror::Error;

/// Export error type
#[derive(Error, Debug)]
pub enum ExportError {
    /// I/O error during file operations
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Invalid sink options
    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    /// The file was already finalized
    #[error("Writer already finalized")]
    Finalized,
}

/// Result type for export operations
pub type Result<T> = std::result::Result<T, ExportError>;

#[cfg(feature = "wav")]
impl From<hound::Error> for ExportError {
    fn from(e: hound::Error) -> Self {
        match e {
            hound::Error::IoError(e) => ExportError::Io(e),
            other => ExportError::Io(io::Error::other(other)),
        }
    }
}
