//! Test helpers and fixtures for harmonia integration tests
//!
//! Engines here run against an unpaced [`MemorySink`], whose clock is the
//! number of frames written, so slices can be driven by hand and every
//! result is deterministic.
//!
//! ## Tolerance Levels
//!
//! Use the appropriate tolerance from [`tolerances`] module:
//! - `FLOAT_EPSILON` (1e-6): Exact operations (unity gain, single voice)
//! - `MIX_EPSILON` (1e-5): Summation order differences
//! - `DSP_EPSILON` (1e-4): Envelopes and oscillators
//! - `SILENCE_THRESHOLD` (0.0001): Silence detection (-80dB)

#![allow(dead_code)]

pub mod tolerances;

use harmonia::core::{AudioBuffer, RenderTracker, Renderable};
use harmonia::prelude::*;
use harmonia::ThreadFactory;

/// Default test sample rate (matches common hardware)
pub const TEST_SAMPLE_RATE: f64 = 48000.0;

/// Frames in one 1 ms slice at [`TEST_SAMPLE_RATE`].
pub const SLICE_FRAMES: usize = 48;

/// Route `tracing` output through the test harness. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Stereo, unpaced, capturing sink with a 10 ms buffer.
pub fn memory_sink() -> Arc<MemorySink> {
    Arc::new(MemorySink::new(AudioFormat::stereo(TEST_SAMPLE_RATE), 480))
}

/// Engine on `sink` with 1 ms slices, serial mixing and plain threads.
pub fn test_builder(sink: Arc<MemorySink>) -> EngineBuilder {
    SynthEngine::builder()
        .sink(sink)
        .slice_time(AudioTime::from_millis(1))
        .worker_threads(0)
        .thread_factory(ThreadFactory::standard())
}

pub fn test_engine(sink: Arc<MemorySink>) -> SynthEngine {
    test_builder(sink).build().expect("Failed to create test engine")
}

/// Millisecond offset from the start of the timeline.
pub fn ms(millis: i64) -> AudioTime {
    AudioTime::from_millis(millis)
}

/// Deterministic noise: the value depends only on the seed, channel and
/// absolute frame index, so any slice can be rendered in any order.
pub struct NoiseVoice {
    seed: u64,
    gain: f32,
    tracker: RenderTracker,
}

impl NoiseVoice {
    pub fn new(seed: u64, gain: f32) -> Self {
        Self {
            seed,
            gain,
            tracker: RenderTracker::new(),
        }
    }
}

fn splitmix(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}

pub fn noise_sample(seed: u64, channel: usize, frame: i64) -> f32 {
    let bits = splitmix(seed ^ splitmix(frame as u64 ^ ((channel as u64) << 56)));
    ((bits >> 40) as f32 / (1u64 << 24) as f32) * 2.0 - 1.0
}

impl Renderable for NoiseVoice {
    fn render(&mut self, time: AudioTime, out: &mut AudioBuffer) -> bool {
        if !self.tracker.begin(time) {
            return false;
        }
        let first = time.samples(out.sample_rate());
        for ch in 0..out.channels() {
            for (i, s) in out.channel_mut(ch).iter_mut().enumerate() {
                *s = self.gain * noise_sample(self.seed, ch, first + i as i64);
            }
        }
        true
    }

    fn already_rendered(&self, time: AudioTime) -> bool {
        self.tracker.already_rendered(time)
    }

    fn is_done(&self) -> bool {
        false
    }
}

/// Calculate RMS of a signal.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

/// Calculate peak amplitude of a signal.
pub fn peak(samples: &[f32]) -> f32 {
    samples
        .iter()
        .map(|s| s.abs())
        .fold(0.0_f32, |a, b| a.max(b))
}

/// Index of the first sample above `threshold`.
pub fn first_audible(samples: &[f32], threshold: f32) -> Option<usize> {
    samples.iter().position(|s| s.abs() > threshold)
}

/// Check if two signals are approximately equal within tolerance.
pub fn signals_approx_equal(a: &[f32], b: &[f32], tolerance: f32) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).all(|(x, y)| (x - y).abs() <= tolerance)
}

/// Assert that a signal is approximately silent (all values near zero).
pub fn assert_silence(samples: &[f32], tolerance: f32) {
    let max = peak(samples);
    assert!(
        max <= tolerance,
        "Expected silence, but peak amplitude was {}",
        max
    );
}

/// Assert that a signal has content (not silent).
pub fn assert_has_audio(samples: &[f32], min_rms: f32) {
    let r = rms(samples);
    assert!(
        r >= min_rms,
        "Expected audio content with RMS >= {}, but RMS was {}",
        min_rms,
        r
    );
}

/// Poll `f` for up to `max_wait_ms`.
pub fn wait_for(max_wait_ms: u64, mut f: impl FnMut() -> bool) -> bool {
    let start = std::time::Instant::now();
    let timeout = std::time::Duration::from_millis(max_wait_ms);

    while start.elapsed() < timeout {
        if f() {
            return true;
        }
        std::thread::sleep(std::time::Duration::from_millis(1));
    }
    f()
}
