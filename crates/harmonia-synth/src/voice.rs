//! The synth voice: one layer of one note, rendered slice by slice.
//!
//! A voice starts at a fixed instant on the master timeline. The first slice
//! that reaches that instant places the attack at the right frame, so
//! playback is sample-accurate however late the note-on was dispatched. A
//! start that already lies before the first rendered slice is moved up to
//! the slice start instead of skipping into the attack. Releases are
//! time-stamped the same way.

use std::f64::consts::TAU;
use std::sync::Arc;

use harmonia_core::{AudioBuffer, AudioTime, RenderTracker, Renderable};

use crate::channel::{ChannelControls, SynthParams};
use crate::instrument::{Envelope, InstrumentSource, SampleData, VoiceParams, Waveform};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Attack,
    Hold,
    Decay,
    Sustain,
    Release,
    Done,
}

/// Linear envelope generator stepping one sample at a time.
#[derive(Debug, Clone)]
struct EnvelopeGen {
    env: Envelope,
    rate: f32,
    stage: Stage,
    level: f32,
    step: f32,
    remaining: u32,
}

impl EnvelopeGen {
    fn new(env: Envelope, rate: f32) -> Self {
        let mut gen = Self {
            env,
            rate,
            stage: Stage::Attack,
            level: 0.0,
            step: 0.0,
            remaining: 0,
        };
        gen.enter(Stage::Attack);
        gen
    }

    fn samples(&self, seconds: f32) -> u32 {
        (seconds.max(0.0) * self.rate).round() as u32
    }

    fn enter(&mut self, stage: Stage) {
        self.stage = stage;
        match stage {
            Stage::Attack => {
                let n = self.samples(self.env.attack);
                if n == 0 {
                    self.level = 1.0;
                    return self.enter(Stage::Hold);
                }
                self.remaining = n;
                self.step = (1.0 - self.level) / n as f32;
            }
            Stage::Hold => {
                self.level = 1.0;
                let n = self.samples(self.env.hold);
                if n == 0 {
                    return self.enter(Stage::Decay);
                }
                self.remaining = n;
                self.step = 0.0;
            }
            Stage::Decay => {
                let sustain = self.env.sustain.clamp(0.0, 1.0);
                let n = self.samples(self.env.decay);
                if n == 0 {
                    self.level = sustain;
                    return self.enter(Stage::Sustain);
                }
                self.remaining = n;
                self.step = (sustain - self.level) / n as f32;
            }
            Stage::Sustain => {
                self.level = self.env.sustain.clamp(0.0, 1.0);
                if self.level <= 0.0 {
                    self.enter(Stage::Done);
                }
            }
            Stage::Release => {
                let n = self.samples(self.env.release);
                if n == 0 || self.level <= 0.0 {
                    return self.enter(Stage::Done);
                }
                self.remaining = n;
                self.step = -self.level / n as f32;
            }
            Stage::Done => {
                self.level = 0.0;
                self.remaining = 0;
            }
        }
    }

    fn release(&mut self) {
        if !matches!(self.stage, Stage::Release | Stage::Done) {
            self.enter(Stage::Release);
        }
    }

    fn is_done(&self) -> bool {
        self.stage == Stage::Done
    }

    #[inline]
    fn next(&mut self) -> f32 {
        match self.stage {
            Stage::Done => 0.0,
            Stage::Sustain => self.level,
            stage => {
                self.level = (self.level + self.step).clamp(0.0, 1.0);
                self.remaining -= 1;
                let level = self.level;
                if self.remaining == 0 {
                    self.enter(match stage {
                        Stage::Attack => Stage::Hold,
                        Stage::Hold => Stage::Decay,
                        Stage::Decay => Stage::Sustain,
                        _ => Stage::Done,
                    });
                }
                level
            }
        }
    }
}

fn note_frequency(semitones_from_a4: f64) -> f64 {
    440.0 * (semitones_from_a4 / 12.0).exp2()
}

fn oscillator(waveform: Waveform, phase: f64, noise: &mut u32) -> f32 {
    match waveform {
        Waveform::Sine => (phase * TAU).sin() as f32,
        Waveform::Square => {
            if phase < 0.5 {
                1.0
            } else {
                -1.0
            }
        }
        Waveform::Saw => (2.0 * phase - 1.0) as f32,
        Waveform::Triangle => (4.0 * (phase - 0.5).abs() - 1.0) as f32,
        Waveform::Noise => {
            // xorshift32
            let mut x = *noise;
            x ^= x << 13;
            x ^= x >> 17;
            x ^= x << 5;
            *noise = x;
            (x as f32 / u32::MAX as f32) * 2.0 - 1.0
        }
    }
}

/// Linear interpolation at fractional `position`; `None` past the end.
fn sample_at(sample: &SampleData, position: f64) -> Option<f32> {
    let index = position.floor() as usize;
    let a = *sample.data.get(index)?;
    let next = match &sample.loop_range {
        Some(r) if index + 1 == r.end => r.start,
        _ => index + 1,
    };
    let b = sample.data.get(next).copied().unwrap_or(0.0);
    let frac = (position - index as f64) as f32;
    Some(a + (b - a) * frac)
}

/// [`Renderable`] voice playing an oscillator or sample through an envelope.
pub struct SynthVoice {
    params: VoiceParams,
    channel: u8,
    controls: Arc<ChannelControls>,
    synth: Arc<SynthParams>,
    start: AudioTime,
    release_at: Option<AudioTime>,
    tracker: RenderTracker,
    started: bool,
    envelope: Option<EnvelopeGen>,
    phase: f64,
    position: f64,
    noise: u32,
    mono: Vec<f32>,
    done: bool,
}

impl SynthVoice {
    pub fn new(
        params: VoiceParams,
        channel: u8,
        start: AudioTime,
        controls: Arc<ChannelControls>,
        synth: Arc<SynthParams>,
    ) -> Self {
        let noise = 0x9E37_79B9 ^ (u32::from(params.note) << 8 | u32::from(params.velocity));
        Self {
            params,
            channel,
            controls,
            synth,
            start,
            release_at: None,
            tracker: RenderTracker::new(),
            started: false,
            envelope: None,
            phase: 0.0,
            position: 0.0,
            noise: noise.max(1),
            mono: Vec::new(),
            done: false,
        }
    }

    pub fn params(&self) -> &VoiceParams {
        &self.params
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    /// Instant the attack begins. Moves to the first rendered slice if that
    /// slice started later.
    pub fn start_time(&self) -> AudioTime {
        self.start
    }

    pub fn release_time(&self) -> Option<AudioTime> {
        self.release_at
    }

    fn semitones(&self) -> f64 {
        f64::from(self.params.tuning + self.synth.master_tuning()) / 100.0
            + f64::from(self.controls.pitch_bend())
    }

    fn amplitude(&self) -> f32 {
        let velocity = f32::from(self.params.velocity.min(127)) / 127.0;
        let volume = self.controls.volume();
        self.params.gain
            * velocity
            * volume
            * volume
            * self.controls.expression()
            * self.synth.master_volume()
    }

    fn pan_gains(&self) -> (f32, f32) {
        let pan = (self.params.pan + self.controls.pan()).clamp(-1.0, 1.0);
        let angle = (pan + 1.0) * std::f32::consts::FRAC_PI_4;
        (angle.cos(), angle.sin())
    }

    /// Fill `self.mono[from..]` and return whether the voice finished.
    fn generate(&mut self, from: usize, release_frame: Option<usize>, rate: f64) -> bool {
        let Some(mut env) = self.envelope.take() else {
            return true;
        };
        let semitones = self.semitones();
        let mut finished = false;

        match &self.params.source {
            InstrumentSource::Oscillator { waveform } => {
                let freq = note_frequency(f64::from(self.params.note) - 69.0 + semitones);
                let increment = freq / rate;
                for i in from..self.mono.len() {
                    if release_frame == Some(i) {
                        env.release();
                    }
                    let level = env.next();
                    self.mono[i] = oscillator(*waveform, self.phase, &mut self.noise) * level;
                    self.phase = (self.phase + increment).fract();
                    if env.is_done() {
                        self.mono[i + 1..].fill(0.0);
                        finished = true;
                        break;
                    }
                }
            }
            InstrumentSource::Sample(sample) => {
                let sample = Arc::clone(sample);
                let ratio = ((f64::from(self.params.note) - f64::from(sample.root_key) + semitones)
                    / 12.0)
                    .exp2();
                let increment = ratio * sample.sample_rate / rate;
                for i in from..self.mono.len() {
                    if release_frame == Some(i) {
                        env.release();
                    }
                    let Some(value) = sample_at(&sample, self.position) else {
                        self.mono[i..].fill(0.0);
                        finished = true;
                        break;
                    };
                    self.mono[i] = value * env.next();
                    self.position += increment;
                    if let Some(r) = &sample.loop_range {
                        if env.stage != Stage::Release && self.position >= r.end as f64 {
                            self.position -= (r.end - r.start) as f64;
                        }
                    }
                    if env.is_done() {
                        self.mono[i + 1..].fill(0.0);
                        finished = true;
                        break;
                    }
                }
            }
        }

        self.envelope = Some(env);
        finished
    }
}

impl Renderable for SynthVoice {
    fn render(&mut self, time: AudioTime, out: &mut AudioBuffer) -> bool {
        if self.done || !self.tracker.begin(time) {
            return false;
        }
        let frames = out.frames();
        let rate = out.sample_rate();
        if self.envelope.is_none() {
            self.envelope = Some(EnvelopeGen::new(self.params.envelope, rate as f32));
        }
        if self.mono.len() != frames {
            self.mono.resize(frames, 0.0);
        }

        let mut from = 0;
        if !self.started {
            if self.start < time {
                self.start = time;
            }
            let lead = (self.start - time).samples(rate).max(0) as usize;
            if lead >= frames {
                out.make_silence();
                return true;
            }
            from = lead;
            self.started = true;
        }
        self.mono[..from].fill(0.0);

        let release_frame = self.release_at.map(|at| {
            if at <= time {
                from
            } else {
                ((at - time).samples(rate).max(0) as usize).max(from)
            }
        });

        if self.generate(from, release_frame, rate) {
            self.done = true;
        }

        let amplitude = self.amplitude();
        let (left, right) = if out.channels() >= 2 {
            self.pan_gains()
        } else {
            (1.0, 1.0)
        };
        for (index, channel) in out.channels_mut().enumerate() {
            let gain = match index {
                0 => left * amplitude,
                1 => right * amplitude,
                _ => 0.0,
            };
            for (dst, src) in channel.iter_mut().zip(&self.mono) {
                *dst = src * gain;
            }
        }
        true
    }

    fn already_rendered(&self, time: AudioTime) -> bool {
        self.tracker.already_rendered(time)
    }

    fn is_done(&self) -> bool {
        self.done
    }

    fn release(&mut self, time: AudioTime) {
        if self.release_at.is_none() {
            self.release_at = Some(time.max(self.start));
        }
    }
}

impl std::fmt::Debug for SynthVoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SynthVoice")
            .field("channel", &self.channel)
            .field("note", &self.params.note)
            .field("start", &self.start)
            .field("release_at", &self.release_at)
            .field("done", &self.done)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::Waveform;
    use approx::assert_relative_eq;

    const RATE: f64 = 48000.0;
    const FRAMES: usize = 48;

    fn slice(n: i64) -> AudioTime {
        AudioTime::from_millis(n)
    }

    fn voice(envelope: Envelope, start: AudioTime) -> SynthVoice {
        let mut params = VoiceParams::oscillator(Waveform::Square, 69, 127);
        params.envelope = envelope;
        SynthVoice::new(
            params,
            0,
            start,
            Arc::new(ChannelControls::new()),
            Arc::new(SynthParams::new()),
        )
    }

    fn first_sound(buf: &AudioBuffer) -> Option<usize> {
        buf.channel(0).iter().position(|s| *s != 0.0)
    }

    #[test]
    fn test_envelope_stages() {
        let mut env = EnvelopeGen::new(Envelope::new(0.001, 0.0, 0.001, 0.5, 0.001), 1000.0);
        assert_relative_eq!(env.next(), 1.0);
        assert_relative_eq!(env.next(), 0.5);
        assert_relative_eq!(env.next(), 0.5);
        env.release();
        assert_relative_eq!(env.next(), 0.0);
        assert!(env.is_done());
    }

    #[test]
    fn test_percussive_envelope_ends_without_release() {
        let mut env = EnvelopeGen::new(Envelope::percussive(0.0, 0.002), 1000.0);
        env.next();
        env.next();
        assert!(env.is_done());
    }

    #[test]
    fn test_start_aligned_inside_slice() {
        let mut v = voice(Envelope::gate(), slice(10) + AudioTime::from_micros(500));
        let mut out = AudioBuffer::new(2, FRAMES, RATE);
        assert!(v.render(slice(9), &mut out));
        assert!(out.is_silent());
        assert!(v.render(slice(10), &mut out));
        assert_eq!(first_sound(&out), Some(24));
        assert!(!v.render(slice(10), &mut out));
    }

    #[test]
    fn test_late_start_is_clamped_not_skipped() {
        let mut v = voice(Envelope::new(0.001, 0.0, 0.0, 1.0, 0.0), slice(5));
        let mut out = AudioBuffer::new(1, FRAMES, RATE);
        v.render(slice(8), &mut out);
        assert_eq!(v.start_time(), slice(8));
        // attack starts at frame 0 and ramps over the whole slice
        let ch = out.channel(0);
        assert!(ch[0].abs() < 0.05);
        let amplitude = (100.0f32 / 127.0).powi(2);
        assert_relative_eq!(ch[FRAMES - 1].abs(), amplitude, epsilon = 1e-3);
    }

    #[test]
    fn test_timestamped_release() {
        let mut v = voice(Envelope::gate(), slice(0));
        let mut out = AudioBuffer::new(1, FRAMES, RATE);
        v.release(slice(1) + AudioTime::from_micros(250));
        v.render(slice(0), &mut out);
        assert!(!out.is_silent());
        assert!(!v.is_done());
        v.render(slice(1), &mut out);
        let ch = out.channel(0);
        assert!(ch[11] != 0.0);
        assert!(ch[12..].iter().all(|s| *s == 0.0));
        assert!(v.is_done());
        assert!(!v.render(slice(2), &mut out));
    }

    #[test]
    fn test_pan_and_volume_follow_controls() {
        let controls = Arc::new(ChannelControls::new());
        let mut params = VoiceParams::oscillator(Waveform::Square, 60, 127);
        params.envelope = Envelope::gate();
        params.gain = 1.0;
        let mut v = SynthVoice::new(
            params,
            0,
            AudioTime::ZERO,
            controls.clone(),
            Arc::new(SynthParams::new()),
        );
        controls.set_pan(0);
        controls.set_volume(127);
        let mut out = AudioBuffer::new(2, FRAMES, RATE);
        v.render(AudioTime::ZERO, &mut out);
        assert_relative_eq!(out.channel(0)[0].abs(), 1.0, epsilon = 1e-5);
        assert!(out.channel(1)[0].abs() < 1e-5);
    }

    #[test]
    fn test_sample_playback_ends_with_data() {
        let sample = Arc::new(SampleData::new(vec![0.5; 30], RATE, 60));
        let mut params = VoiceParams::sample(sample, 60, 127);
        params.envelope = Envelope::gate();
        let mut v = SynthVoice::new(
            params,
            0,
            AudioTime::ZERO,
            Arc::new(ChannelControls::new()),
            Arc::new(SynthParams::new()),
        );
        let mut out = AudioBuffer::new(1, FRAMES, RATE);
        v.render(AudioTime::ZERO, &mut out);
        let ch = out.channel(0);
        assert!(ch[29] != 0.0);
        assert!(ch[30..].iter().all(|s| *s == 0.0));
        assert!(v.is_done());
    }

    #[test]
    fn test_looped_sample_keeps_playing() {
        let sample = Arc::new(SampleData::new(vec![0.5; 30], RATE, 60).with_loop(10..30));
        let mut params = VoiceParams::sample(sample, 60, 127);
        params.envelope = Envelope::gate();
        let mut v = SynthVoice::new(
            params,
            0,
            AudioTime::ZERO,
            Arc::new(ChannelControls::new()),
            Arc::new(SynthParams::new()),
        );
        let mut out = AudioBuffer::new(1, FRAMES, RATE);
        for n in 0..5 {
            v.render(slice(n), &mut out);
            assert!(out.channel(0).iter().all(|s| *s != 0.0));
        }
        assert!(!v.is_done());
    }
}
