//! Disk-writer sinks for harmonia.
//!
//! A [`WavSink`] is an [`AudioSink`](harmonia_core::AudioSink) whose device
//! clock is the number of frames written. Plugged into an
//! [`AudioPullThread`](harmonia_core::AudioPullThread) it renders as fast as
//! the mixer allows; attached as a slave sink it records a live session.
//!
//! ```ignore
//! use harmonia_export::{BitDepth, WavConfig, WavSink};
//!
//! let sink = WavSink::create("take.wav", WavConfig::stereo(48000, BitDepth::Int24), 480)?;
//! // ... render ...
//! sink.finalize()?;
//! ```

pub mod error;
pub use error::{ExportError, Result};

#[cfg(feature = "wav")]
pub mod wav;
#[cfg(feature = "wav")]
pub use wav::{BitDepth, WavConfig, WavSink};
