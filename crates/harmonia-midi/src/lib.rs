//! Timestamped events and the sources that produce them.
//!
//! - [`TimedEvent`]: a channel voice, system exclusive or real-time message
//!   with an [`AudioTime`](harmonia_core::AudioTime) stamp
//! - [`EventSource`] / [`EventListener`]: producers with their own adjustable
//!   clock, and the consumers they deliver to
//! - [`VirtualSource`]: in-process source fed from any thread
//! - [`SmfPusher`]: Standard MIDI File player that pushes all events at once
//!
//! # Example
//!
//! ```ignore
//! use harmonia_midi::{SmfPusher, VirtualSource, EventSource};
//!
//! let keyboard = VirtualSource::new("keyboard");
//! keyboard.add_listener(synth.clone());
//! keyboard.send(&[0x90, 60, 100])?;
//!
//! let song = SmfPusher::open("song.mid")?;
//! song.push_to(synth.as_ref(), clock.now() + AudioTime::from_millis(100));
//! ```

pub mod error;
pub use error::{Error, Result};

pub mod event;
pub use event::{EventPayload, TimedEvent, GM_RESET, SYSTEM_RESET};

pub mod source;
pub use source::{EventListener, EventSource, SourceId, VirtualSource};

pub mod smf;
pub use smf::{SmfPusher, DEFAULT_TEMPO};

pub use midi_msg::{ChannelVoiceMsg, ControlChange};
