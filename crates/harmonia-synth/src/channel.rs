//! Per-channel controller state.
//!
//! [`ChannelControls`] is shared between the dispatcher, which writes it, and
//! every voice on the channel, which reads it once per slice. Everything in
//! it is a single atomic word, so the render path never locks.

use std::sync::Arc;

use harmonia_core::AtomicFloat;

use crate::instrument::{Patch, PERCUSSION_BANK, PERCUSSION_CHANNEL};

const DEFAULT_VOLUME: u8 = 100;

fn unit(value: u8) -> f32 {
    f32::from(value.min(127)) / 127.0
}

/// Continuous controllers voices follow while sounding.
#[derive(Debug)]
pub struct ChannelControls {
    volume: AtomicFloat,
    expression: AtomicFloat,
    pan: AtomicFloat,
    bend: AtomicFloat,
}

impl ChannelControls {
    pub fn new() -> Self {
        Self {
            volume: AtomicFloat::new(unit(DEFAULT_VOLUME)),
            expression: AtomicFloat::new(1.0),
            pan: AtomicFloat::new(0.0),
            bend: AtomicFloat::new(0.0),
        }
    }

    /// Controller 7, stored as `0.0..=1.0`.
    pub fn set_volume(&self, value: u8) {
        self.volume.set(unit(value));
    }

    pub fn volume(&self) -> f32 {
        self.volume.get()
    }

    /// Controller 11.
    pub fn set_expression(&self, value: u8) {
        self.expression.set(unit(value));
    }

    pub fn expression(&self) -> f32 {
        self.expression.get()
    }

    /// Controller 10, 64 is centre.
    pub fn set_pan(&self, value: u8) {
        let pan = (f32::from(value.min(127)) - 64.0) / 63.0;
        self.pan.set(pan.clamp(-1.0, 1.0));
    }

    pub fn pan(&self) -> f32 {
        self.pan.get()
    }

    /// 14-bit bend value scaled to `range` semitones.
    pub fn set_pitch_bend(&self, bend: u16, range: f32) {
        let normalized = (f32::from(bend.min(16383)) - 8192.0) / 8192.0;
        self.bend.set(normalized * range);
    }

    /// Current bend in semitones.
    pub fn pitch_bend(&self) -> f32 {
        self.bend.get()
    }

    /// Controller 121: expression and bend back to neutral.
    pub fn reset_controllers(&self) {
        self.expression.set(1.0);
        self.bend.set(0.0);
    }

    pub fn reset(&self) {
        self.volume.set(unit(DEFAULT_VOLUME));
        self.pan.set(0.0);
        self.reset_controllers();
    }
}

impl Default for ChannelControls {
    fn default() -> Self {
        Self::new()
    }
}

/// Engine-wide parameters every voice reads.
#[derive(Debug)]
pub struct SynthParams {
    master_volume: AtomicFloat,
    master_tuning: AtomicFloat,
}

impl SynthParams {
    pub fn new() -> Self {
        Self {
            master_volume: AtomicFloat::new(1.0),
            master_tuning: AtomicFloat::new(0.0),
        }
    }

    /// Linear gain, clamped to `0.0..=4.0`.
    pub fn set_master_volume(&self, volume: f32) {
        self.master_volume.set(volume.clamp(0.0, 4.0));
    }

    pub fn master_volume(&self) -> f32 {
        self.master_volume.get()
    }

    /// Cents, clamped to two octaves either way.
    pub fn set_master_tuning(&self, cents: f32) {
        self.master_tuning.set(cents.clamp(-2400.0, 2400.0));
    }

    pub fn master_tuning(&self) -> f32 {
        self.master_tuning.get()
    }
}

impl Default for SynthParams {
    fn default() -> Self {
        Self::new()
    }
}

/// Dispatcher-side state of one channel.
#[derive(Debug)]
pub(crate) struct ChannelState {
    pub(crate) index: u8,
    pub(crate) bank_msb: u8,
    pub(crate) bank_lsb: u8,
    pub(crate) program: u8,
    pub(crate) sustain: bool,
    pub(crate) controls: Arc<ChannelControls>,
}

impl ChannelState {
    pub(crate) fn new(index: u8) -> Self {
        Self {
            index,
            bank_msb: 0,
            bank_lsb: 0,
            program: 0,
            sustain: false,
            controls: Arc::new(ChannelControls::new()),
        }
    }

    /// The percussion channel plays the percussion bank unless a bank was
    /// selected explicitly.
    pub(crate) fn patch(&self) -> Patch {
        let bank = u16::from(self.bank_msb) << 7 | u16::from(self.bank_lsb);
        if self.index == PERCUSSION_CHANNEL && bank == 0 {
            Patch::new(PERCUSSION_BANK, self.program)
        } else {
            Patch::new(bank, self.program)
        }
    }

    pub(crate) fn reset(&mut self) {
        self.bank_msb = 0;
        self.bank_lsb = 0;
        self.program = 0;
        self.sustain = false;
        self.controls.reset();
    }
}
