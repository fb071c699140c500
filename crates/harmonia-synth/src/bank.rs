//! Built-in oscillator soundbank.
//!
//! [`OscillatorBank::general_midi`] maps all 128 melodic programs to simple
//! oscillator patches by General MIDI family and adds a standard drum kit on
//! the percussion bank. Instruments can be added or replaced, including
//! sample-based ones.

use std::ops::RangeInclusive;

use crate::instrument::{
    Envelope, InstrumentInfo, InstrumentSource, Patch, ResolvedVoices, Soundbank, VoiceParams,
    Waveform,
};

/// Exclusive group shared by the closed, pedal and open hi-hat.
pub const HI_HAT_GROUP: u32 = 1;

/// A key/velocity zone of an instrument.
#[derive(Debug, Clone)]
pub struct Layer {
    pub keys: RangeInclusive<u8>,
    pub velocities: RangeInclusive<u8>,
    pub source: InstrumentSource,
    pub envelope: Envelope,
    pub gain: f32,
    pub pan: f32,
    pub tuning: f32,
    /// Sound at this key's pitch whatever note was played.
    pub fixed_key: Option<u8>,
    pub exclusive_group: Option<u32>,
    pub self_exclusive: bool,
}

impl Layer {
    pub fn new(source: InstrumentSource, envelope: Envelope) -> Self {
        Self {
            keys: 0..=127,
            velocities: 1..=127,
            source,
            envelope,
            gain: 0.5,
            pan: 0.0,
            tuning: 0.0,
            fixed_key: None,
            exclusive_group: None,
            self_exclusive: true,
        }
    }

    pub fn oscillator(waveform: Waveform, envelope: Envelope) -> Self {
        Self::new(InstrumentSource::Oscillator { waveform }, envelope)
    }

    pub fn keys(mut self, keys: RangeInclusive<u8>) -> Self {
        self.keys = keys;
        self
    }

    pub fn velocities(mut self, velocities: RangeInclusive<u8>) -> Self {
        self.velocities = velocities;
        self
    }

    pub fn gain(mut self, gain: f32) -> Self {
        self.gain = gain;
        self
    }

    pub fn pan(mut self, pan: f32) -> Self {
        self.pan = pan.clamp(-1.0, 1.0);
        self
    }

    pub fn fixed_key(mut self, key: u8) -> Self {
        self.fixed_key = Some(key);
        self
    }

    pub fn exclusive_group(mut self, group: u32) -> Self {
        self.exclusive_group = Some(group);
        self
    }

    fn matches(&self, note: u8, velocity: u8) -> bool {
        self.keys.contains(&note) && self.velocities.contains(&velocity)
    }

    fn voice_params(&self, note: u8, velocity: u8) -> VoiceParams {
        let fixed = self
            .fixed_key
            .map_or(0.0, |key| (f32::from(key) - f32::from(note)) * 100.0);
        VoiceParams {
            source: self.source.clone(),
            note,
            velocity,
            gain: self.gain,
            pan: self.pan,
            tuning: self.tuning + fixed,
            envelope: self.envelope,
            exclusive_group: self.exclusive_group,
            self_exclusive: self.self_exclusive,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Instrument {
    pub patch: Patch,
    pub name: String,
    pub layers: Vec<Layer>,
}

impl Instrument {
    pub fn new(patch: Patch, name: impl Into<String>) -> Self {
        Self {
            patch,
            name: name.into(),
            layers: Vec::new(),
        }
    }

    pub fn layer(mut self, layer: Layer) -> Self {
        self.layers.push(layer);
        self
    }
}

const FAMILIES: [(&str, Waveform, Envelope, f32); 16] = [
    ("Piano", Waveform::Triangle, Envelope::new(0.002, 0.0, 1.2, 0.2, 0.3), 0.6),
    ("Chromatic Percussion", Waveform::Sine, Envelope::percussive(0.001, 0.8), 0.6),
    ("Organ", Waveform::Square, Envelope::new(0.01, 0.0, 0.0, 1.0, 0.05), 0.3),
    ("Guitar", Waveform::Saw, Envelope::new(0.002, 0.0, 0.9, 0.1, 0.2), 0.4),
    ("Bass", Waveform::Saw, Envelope::new(0.005, 0.0, 0.3, 0.6, 0.1), 0.5),
    ("Strings", Waveform::Saw, Envelope::new(0.08, 0.0, 0.2, 0.9, 0.4), 0.35),
    ("Ensemble", Waveform::Saw, Envelope::new(0.1, 0.0, 0.3, 0.8, 0.5), 0.35),
    ("Brass", Waveform::Square, Envelope::new(0.03, 0.0, 0.1, 0.8, 0.15), 0.35),
    ("Reed", Waveform::Square, Envelope::new(0.02, 0.0, 0.1, 0.85, 0.1), 0.35),
    ("Pipe", Waveform::Sine, Envelope::new(0.04, 0.0, 0.1, 0.9, 0.1), 0.6),
    ("Synth Lead", Waveform::Saw, Envelope::new(0.005, 0.0, 0.05, 0.9, 0.1), 0.35),
    ("Synth Pad", Waveform::Triangle, Envelope::new(0.3, 0.0, 0.5, 0.8, 0.8), 0.5),
    ("Synth Effects", Waveform::Triangle, Envelope::new(0.2, 0.1, 1.0, 0.5, 1.0), 0.5),
    ("Ethnic", Waveform::Triangle, Envelope::new(0.005, 0.0, 0.6, 0.3, 0.2), 0.5),
    ("Percussive", Waveform::Sine, Envelope::percussive(0.001, 0.4), 0.6),
    ("Sound Effects", Waveform::Noise, Envelope::new(0.05, 0.0, 0.5, 0.5, 0.5), 0.3),
];

fn standard_kit() -> Instrument {
    Instrument::new(Patch::percussion(0), "Standard Kit")
        .layer(
            Layer::oscillator(Waveform::Sine, Envelope::percussive(0.001, 0.25))
                .keys(35..=36)
                .fixed_key(28)
                .gain(0.9),
        )
        .layer(
            Layer::oscillator(Waveform::Noise, Envelope::percussive(0.001, 0.18))
                .keys(37..=40)
                .gain(0.5),
        )
        .layer(
            Layer::oscillator(Waveform::Sine, Envelope::percussive(0.001, 0.4))
                .keys(41..=41)
                .gain(0.7),
        )
        .layer(
            Layer::oscillator(Waveform::Noise, Envelope::percussive(0.001, 0.05))
                .keys(42..=42)
                .exclusive_group(HI_HAT_GROUP)
                .pan(0.3)
                .gain(0.3),
        )
        .layer(
            Layer::oscillator(Waveform::Sine, Envelope::percussive(0.001, 0.4))
                .keys(43..=43)
                .gain(0.7),
        )
        .layer(
            Layer::oscillator(Waveform::Noise, Envelope::percussive(0.001, 0.08))
                .keys(44..=44)
                .exclusive_group(HI_HAT_GROUP)
                .pan(0.3)
                .gain(0.3),
        )
        .layer(
            Layer::oscillator(Waveform::Sine, Envelope::percussive(0.001, 0.4))
                .keys(45..=45)
                .gain(0.7),
        )
        .layer(
            Layer::oscillator(Waveform::Noise, Envelope::percussive(0.001, 0.5))
                .keys(46..=46)
                .exclusive_group(HI_HAT_GROUP)
                .pan(0.3)
                .gain(0.3),
        )
        .layer(
            Layer::oscillator(Waveform::Sine, Envelope::percussive(0.001, 0.4))
                .keys(47..=48)
                .gain(0.7),
        )
        .layer(
            Layer::oscillator(Waveform::Noise, Envelope::percussive(0.002, 1.2))
                .keys(49..=49)
                .pan(-0.3)
                .gain(0.25),
        )
        .layer(
            Layer::oscillator(Waveform::Sine, Envelope::percussive(0.001, 0.4))
                .keys(50..=50)
                .gain(0.7),
        )
        .layer(
            Layer::oscillator(Waveform::Noise, Envelope::percussive(0.002, 1.2))
                .keys(51..=59)
                .pan(-0.3)
                .gain(0.25),
        )
        .layer(
            Layer::oscillator(Waveform::Triangle, Envelope::percussive(0.001, 0.2))
                .keys(60..=81)
                .gain(0.4),
        )
}

/// In-memory soundbank of oscillator and sample instruments.
#[derive(Debug, Clone)]
pub struct OscillatorBank {
    name: String,
    instruments: Vec<Instrument>,
}

impl OscillatorBank {
    /// Empty bank.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instruments: Vec::new(),
        }
    }

    /// All melodic programs on bank 0 plus the standard drum kit.
    pub fn general_midi() -> Self {
        let mut bank = Self::new("General MIDI Oscillators");
        for program in 0..128u8 {
            let (family, waveform, envelope, gain) = FAMILIES[usize::from(program / 8)];
            bank.insert(
                Instrument::new(
                    Patch::new(0, program),
                    format!("{family} {}", program % 8 + 1),
                )
                .layer(Layer::oscillator(waveform, envelope).gain(gain)),
            );
        }
        bank.insert(standard_kit());
        bank
    }

    /// Add an instrument, replacing any with the same patch.
    pub fn insert(&mut self, instrument: Instrument) {
        match self
            .instruments
            .iter_mut()
            .find(|i| i.patch == instrument.patch)
        {
            Some(existing) => *existing = instrument,
            None => self.instruments.push(instrument),
        }
    }

    pub fn with_instrument(mut self, instrument: Instrument) -> Self {
        self.insert(instrument);
        self
    }

    pub fn instrument(&self, patch: &Patch) -> Option<&Instrument> {
        self.instruments.iter().find(|i| i.patch == *patch)
    }

    /// Exact patch, else the same program on bank 0 (or kit 0 for
    /// percussion).
    fn lookup(&self, patch: &Patch) -> Option<&Instrument> {
        self.instrument(patch).or_else(|| {
            let fallback = if patch.is_percussion() {
                Patch::percussion(0)
            } else {
                Patch::new(0, patch.program)
            };
            self.instrument(&fallback)
        })
    }
}

impl Default for OscillatorBank {
    fn default() -> Self {
        Self::general_midi()
    }
}

impl Soundbank for OscillatorBank {
    fn name(&self) -> &str {
        &self.name
    }

    fn resolve(&self, patch: &Patch, note: u8, velocity: u8) -> ResolvedVoices {
        let Some(instrument) = self.lookup(patch) else {
            return ResolvedVoices::new();
        };
        instrument
            .layers
            .iter()
            .filter(|layer| layer.matches(note, velocity))
            .map(|layer| layer.voice_params(note, velocity))
            .collect()
    }

    fn instruments(&self) -> Vec<InstrumentInfo> {
        self.instruments
            .iter()
            .map(|i| InstrumentInfo {
                patch: i.patch,
                name: i.name.clone(),
            })
            .collect()
    }
}
