//! # Harmonia - Real-time Slice-Pull Synthesizer
//!
//! Software synthesizer built from modular subsystems.
//!
//! ## Architecture
//!
//! Harmonia is an umbrella crate that coordinates:
//! - **harmonia-core** - Rendering kernel (time, clocks, mixer, render pool, pull thread, clock sync)
//! - **harmonia-midi** - Timestamped events, event sources, Standard MIDI File playback
//! - **harmonia-synth** - Dispatcher, channel state, soundbanks and voices
//! - **harmonia-export** - WAV disk-writer sink
//!
//! Audio is pulled, not pushed: the pull thread asks the mixer for one
//! slice at a time and writes it to the sink, whose clock is the master
//! timeline. Events carry a time on that timeline and start their voices at
//! the exact sample they name.
//!
//! ## Quick Start
//!
//! ```ignore
//! use harmonia::prelude::*;
//!
//! let sink = Arc::new(MemorySink::new(AudioFormat::stereo(48000.0), 480).paced());
//! let engine = SynthEngine::builder().sink(sink).build()?;
//! engine.start()?;
//!
//! let now = engine.now();
//! engine.send(TimedEvent::note_on(now, 0, 60, 100));
//! engine.send(TimedEvent::note_off(now + AudioTime::from_millis(500), 0, 60, 0));
//! ```
//!
//! ## Feature Flags
//!
//! - `default` - Everything below
//! - `export` - WAV disk-writer sink

/// Re-export of harmonia-core for direct access
pub use harmonia_core as core;

pub use harmonia_core::{
    AdjustableClock, AudioBuffer, AudioClock, AudioFormat, AudioMixer, AudioPullThread,
    AudioSink, AudioTime, MaintenanceThread, ManualClock, MemorySink, MonotonicClock, Priority,
    Renderable, ThreadFactory, WriteStatus,
};

pub use harmonia_midi as midi;
pub use harmonia_midi::{EventListener, EventSource, SmfPusher, SourceId, TimedEvent, VirtualSource};

pub use harmonia_synth as synth;
pub use harmonia_synth::{
    DispatchMode, OscillatorBank, Patch, Soundbank, SynthConfig, Synthesizer, SynthesizerListener,
    VoiceParams,
};

#[cfg(feature = "export")]
pub use harmonia_export as export;

#[cfg(feature = "export")]
pub use harmonia_export::{BitDepth, WavConfig, WavSink};

mod builder;
mod engine;
mod error;

pub use builder::{EngineBuilder, EngineConfig};
pub use engine::SynthEngine;
pub use error::{Error, Result};

/// Convenience prelude for common imports
pub mod prelude {
    pub use std::sync::Arc;

    // Main engine
    pub use crate::{EngineBuilder, EngineConfig, SynthEngine};

    // Time and sinks
    pub use crate::core::{AudioClock, AudioFormat, AudioSink, AudioTime, MemorySink};

    // Events
    pub use crate::midi::{EventSource, SmfPusher, TimedEvent, VirtualSource};

    // Synth
    pub use crate::synth::{DispatchMode, OscillatorBank, Soundbank, SynthesizerListener};

    // Export
    #[cfg(feature = "export")]
    pub use crate::export::{BitDepth, WavConfig, WavSink};
}
