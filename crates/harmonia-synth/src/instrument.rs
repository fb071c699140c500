//! Instrument descriptions and the soundbank interface.
//!
//! A [`Soundbank`] turns `(patch, note, velocity)` into zero or more
//! [`VoiceParams`], one per sounding layer. The dispatcher builds a voice
//! from each.

use std::ops::Range;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Bank number the General MIDI percussion channel selects.
pub const PERCUSSION_BANK: u16 = 128;

/// Zero-based General MIDI percussion channel.
pub const PERCUSSION_CHANNEL: u8 = 9;

/// Bank and program selected on a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Patch {
    /// 14-bit bank number from controllers 0 and 32, or [`PERCUSSION_BANK`].
    pub bank: u16,
    pub program: u8,
}

impl Patch {
    pub fn new(bank: u16, program: u8) -> Self {
        Self { bank, program }
    }

    pub fn percussion(program: u8) -> Self {
        Self::new(PERCUSSION_BANK, program)
    }

    pub fn is_percussion(&self) -> bool {
        self.bank == PERCUSSION_BANK
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Waveform {
    Sine,
    Square,
    Saw,
    Triangle,
    Noise,
}

/// Mono sample data for sample playback.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleData {
    pub data: Vec<f32>,
    pub sample_rate: f64,
    /// Note at which the sample plays at its recorded pitch.
    pub root_key: u8,
    /// Sustain loop, in frames. Without one the voice ends with the data.
    pub loop_range: Option<Range<usize>>,
}

impl SampleData {
    pub fn new(data: Vec<f32>, sample_rate: f64, root_key: u8) -> Self {
        Self {
            data,
            sample_rate,
            root_key,
            loop_range: None,
        }
    }

    /// Loop `range`; empty or out-of-bounds ranges are ignored.
    pub fn with_loop(mut self, range: Range<usize>) -> Self {
        if !range.is_empty() && range.end <= self.data.len() {
            self.loop_range = Some(range);
        }
        self
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InstrumentSource {
    Oscillator { waveform: Waveform },
    Sample(Arc<SampleData>),
}

/// Linear attack-hold-decay-sustain-release envelope. Times in seconds,
/// `sustain` is a level in `0.0..=1.0`. A zero sustain ends the voice after
/// the decay.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub attack: f32,
    pub hold: f32,
    pub decay: f32,
    pub sustain: f32,
    pub release: f32,
}

impl Envelope {
    pub const fn new(attack: f32, hold: f32, decay: f32, sustain: f32, release: f32) -> Self {
        Self {
            attack,
            hold,
            decay,
            sustain,
            release,
        }
    }

    /// Instant on, full sustain, instant off.
    pub const fn gate() -> Self {
        Self::new(0.0, 0.0, 0.0, 1.0, 0.0)
    }

    /// No sustain: the sound dies out after `decay` whether released or not.
    pub const fn percussive(attack: f32, decay: f32) -> Self {
        Self::new(attack, 0.0, decay, 0.0, decay)
    }
}

impl Default for Envelope {
    fn default() -> Self {
        Self::new(0.005, 0.0, 0.1, 0.8, 0.2)
    }
}

/// Everything a voice needs to sound one layer of one note. Immutable once
/// resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceParams {
    pub source: InstrumentSource,
    pub note: u8,
    pub velocity: u8,
    /// Linear gain of this layer.
    pub gain: f32,
    /// `-1.0` left to `1.0` right.
    pub pan: f32,
    /// Fine tuning in cents, added to the note.
    pub tuning: f32,
    pub envelope: Envelope,
    /// Voices on one channel sharing a group cut each other off.
    pub exclusive_group: Option<u32>,
    /// A new note-on releases the same note already sounding on the channel.
    pub self_exclusive: bool,
}

impl VoiceParams {
    pub fn oscillator(waveform: Waveform, note: u8, velocity: u8) -> Self {
        Self {
            source: InstrumentSource::Oscillator { waveform },
            note,
            velocity,
            gain: 1.0,
            pan: 0.0,
            tuning: 0.0,
            envelope: Envelope::default(),
            exclusive_group: None,
            self_exclusive: true,
        }
    }

    pub fn sample(sample: Arc<SampleData>, note: u8, velocity: u8) -> Self {
        Self {
            source: InstrumentSource::Sample(sample),
            ..Self::oscillator(Waveform::Sine, note, velocity)
        }
    }
}

/// One entry of [`Soundbank::instruments`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentInfo {
    pub patch: Patch,
    pub name: String,
}

/// Up to four layers resolve without allocating.
pub type ResolvedVoices = SmallVec<[VoiceParams; 4]>;

/// Source of instruments for the dispatcher.
pub trait Soundbank: Send + Sync {
    fn name(&self) -> &str;

    /// Layers to sound for `note` at `velocity` on `patch`. Empty when
    /// nothing is mapped there.
    fn resolve(&self, patch: &Patch, note: u8, velocity: u8) -> ResolvedVoices;

    fn instruments(&self) -> Vec<InstrumentInfo>;
}
