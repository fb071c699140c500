//! Synthesizer core: event dispatch, channel state, soundbanks and voices.
//!
//! - [`Synthesizer`]: receives [`TimedEvent`](harmonia_midi::TimedEvent)s,
//!   keeps per-channel state and allocates [`SynthVoice`]s in an
//!   [`AudioMixer`](harmonia_core::AudioMixer)
//! - [`Soundbank`]: resolves `(patch, note, velocity)` to [`VoiceParams`]
//! - [`OscillatorBank`]: built-in General MIDI oscillator bank with a drum kit
//!
//! # Example
//!
//! ```ignore
//! use harmonia_synth::*;
//!
//! let synth = Arc::new(Synthesizer::new(
//!     SynthConfig::default(),
//!     Arc::new(OscillatorBank::general_midi()),
//!     mixer,
//!     sink.clone(),
//!     factory,
//! )?);
//! pull.add_listener(synth.clone());
//! synth.start(sink.latency())?;
//! synth.on_event(TimedEvent::note_on(sink.now(), 0, 60, 100));
//! ```

pub mod error;
pub use error::{Error, Result};

pub mod config;
pub use config::{DispatchMode, SynthConfig};

pub mod instrument;
pub use instrument::{
    Envelope, InstrumentInfo, InstrumentSource, Patch, ResolvedVoices, SampleData, Soundbank,
    VoiceParams, Waveform, PERCUSSION_BANK, PERCUSSION_CHANNEL,
};

pub mod bank;
pub use bank::{Instrument, Layer, OscillatorBank, HI_HAT_GROUP};

pub mod channel;
pub use channel::{ChannelControls, SynthParams};

pub mod voice;
pub use voice::SynthVoice;

pub mod synthesizer;
pub use synthesizer::{SynthStats, Synthesizer, SynthesizerListener};
