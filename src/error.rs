//! Centralized error type for the harmonia umbrella crate.
//!
//! Wraps all subsystem errors so `?` propagates naturally across crate boundaries.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] harmonia_core::Error),

    #[error("MIDI: {0}")]
    Midi(#[from] harmonia_midi::Error),

    #[error("Synth: {0}")]
    Synth(#[from] harmonia_synth::Error),

    #[cfg(feature = "export")]
    #[error("Export: {0}")]
    Export(#[from] harmonia_export::ExportError),

    #[error("Engine configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
