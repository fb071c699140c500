//! Sample-accurate scheduling scenarios
//!
//! Slices are driven by hand: announce the slice to the synthesizer, render
//! it through the mixer, sweep. This is what the pull thread does, minus the
//! sink.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use harmonia::core::{
    AdjustableClock, AtomicTime, AudioBuffer, ManualClock, PullConfig, SliceListener, WriteStatus,
};
use harmonia::prelude::*;
use harmonia::synth::{Envelope, Instrument, Layer, Patch, Waveform, PERCUSSION_CHANNEL};
use harmonia::{EngineConfig, ThreadFactory, VirtualSource};
use parking_lot::Mutex;
use proptest::prelude::*;

use crate::helpers::*;

fn bank_with(layer: Layer) -> Arc<OscillatorBank> {
    Arc::new(
        OscillatorBank::general_midi()
            .with_instrument(Instrument::new(Patch::new(0, 0), "probe").layer(layer)),
    )
}

/// Announce and render one slice; returns the left channel.
fn step(engine: &SynthEngine, time: AudioTime, out: &mut AudioBuffer) -> Vec<f32> {
    engine.synthesizer().new_audio_slice(time, ms(1));
    engine.mixer().render_slice(time, out);
    engine.mixer().sweep();
    out.channel(0).to_vec()
}

#[test]
fn test_note_lifecycle_one_second_decay() {
    let layer = Layer::oscillator(Waveform::Sine, Envelope::percussive(0.0, 1.0)).gain(1.0);
    let engine = test_builder(memory_sink())
        .soundbank(bank_with(layer))
        .build()
        .unwrap();
    let mut out = AudioBuffer::new(2, SLICE_FRAMES, TEST_SAMPLE_RATE);

    engine.synthesizer().new_audio_slice(ms(0), ms(1));
    engine.send(TimedEvent::note_on(ms(0), 0, 69, 127));

    for slice in 0..1200 {
        if slice < 1000 {
            assert_eq!(engine.mixer().count(), 1, "voice missing in slice {slice}");
        }
        let left = step(&engine, ms(slice), &mut out);
        if (10..900).contains(&slice) {
            assert_has_audio(&left, 0.01);
        }
        if slice >= 1100 {
            assert_eq!(engine.mixer().count(), 0, "voice alive in slice {slice}");
            assert_silence(&left, 0.0);
        }
    }
}

#[test]
fn test_note_start_is_sample_accurate() {
    let layer = Layer::oscillator(Waveform::Square, Envelope::gate()).gain(1.0);
    let engine = test_builder(memory_sink())
        .soundbank(bank_with(layer))
        .build()
        .unwrap();
    let mut out = AudioBuffer::new(2, SLICE_FRAMES, TEST_SAMPLE_RATE);

    engine.synthesizer().new_audio_slice(ms(10), ms(1));
    engine.send(TimedEvent::note_on(
        ms(10) + AudioTime::from_micros(250),
        0,
        60,
        100,
    ));
    let left = step(&engine, ms(10), &mut out);
    assert_eq!(first_audible(&left, 0.0), Some(12));
    assert_eq!(engine.synthesizer().stats().late_events.get(), 0);
}

#[test]
fn test_late_event_clamped_to_slice_start() {
    let layer = Layer::oscillator(Waveform::Square, Envelope::gate()).gain(1.0);
    let engine = test_builder(memory_sink())
        .soundbank(bank_with(layer))
        .build()
        .unwrap();
    let mut out = AudioBuffer::new(2, SLICE_FRAMES, TEST_SAMPLE_RATE);

    engine.synthesizer().new_audio_slice(ms(10), ms(1));
    engine.send(TimedEvent::note_on(ms(4), 0, 60, 100));
    assert_eq!(engine.synthesizer().stats().late_events.get(), 1);
    assert_eq!(engine.mixer().count(), 1);

    let left = step(&engine, ms(10), &mut out);
    assert_eq!(first_audible(&left, 0.0), Some(0));
}

#[test]
fn test_exclusive_stealing_ten_ms_apart() {
    let engine = test_engine(memory_sink());
    let mut out = AudioBuffer::new(2, SLICE_FRAMES, TEST_SAMPLE_RATE);

    for slice in 0..30 {
        let time = ms(slice);
        engine.synthesizer().new_audio_slice(time, ms(1));
        match slice {
            0 => engine.send(TimedEvent::note_on(time, PERCUSSION_CHANNEL, 42, 100)),
            10 => engine.send(TimedEvent::note_on(time, PERCUSSION_CHANNEL, 46, 100)),
            _ => {}
        }
        engine.mixer().render_slice(time, &mut out);
        engine.mixer().sweep();
        if slice >= 10 {
            assert_eq!(engine.mixer().count(), 1, "slice {slice}");
        }
    }
    assert_eq!(engine.mixer().stats().stolen.get(), 1);
    let survivor = engine.mixer().voices()[0].tag();
    assert_eq!(survivor.note, 46);
}

#[test]
fn test_event_source_clock_converges() {
    let engine = test_engine(memory_sink());
    let source = Arc::new(VirtualSource::new("skewed"));
    source.set_offset(AudioTime::from_millis(750));
    assert!((source.now() - engine.now()).abs() > ms(700));

    engine.add_event_source(source.clone());
    let drift = (source.now() - engine.now()).abs();
    assert!(drift < ms(1), "drift after sync: {drift}");
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_manual_clock_converges(device_ms in -10_000i64..10_000, offset_ms in -10_000i64..10_000) {
        let engine = test_engine(memory_sink());
        let clock = Arc::new(ManualClock::new(ms(device_ms)));
        clock.set_offset(ms(offset_ms));

        engine.maintenance().add_adjustable_clock(clock.clone());
        engine.maintenance().synchronize_now();

        prop_assert!((clock.now() - engine.now()).abs() < AudioTime::from_micros(1));
        prop_assert_eq!(clock.device_time(), ms(device_ms));
    }
}

/// Sink whose clock jumps ahead once, as after a stalled write.
struct StallingSink {
    inner: MemorySink,
    writes: AtomicU64,
    stall_on: u64,
    stall: AudioTime,
    jump: AtomicTime,
}

impl AudioClock for StallingSink {
    fn now(&self) -> AudioTime {
        self.inner.now() + self.jump.get()
    }
}

impl AdjustableClock for StallingSink {
    fn device_time(&self) -> AudioTime {
        self.inner.device_time() + self.jump.get()
    }

    fn offset(&self) -> AudioTime {
        self.inner.offset()
    }

    fn set_offset(&self, offset: AudioTime) {
        self.inner.set_offset(offset)
    }
}

impl AudioSink for StallingSink {
    fn write(&self, buffer: &AudioBuffer) -> harmonia::core::Result<WriteStatus> {
        let n = self.writes.fetch_add(1, Ordering::SeqCst) + 1;
        if n == self.stall_on {
            std::thread::sleep(Duration::from_nanos(self.stall.nanos() as u64));
            self.jump.set(self.stall);
        }
        self.inner.write(buffer)
    }

    fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    fn close(&self) {
        self.inner.close()
    }

    fn channels(&self) -> usize {
        self.inner.channels()
    }

    fn buffer_size(&self) -> usize {
        self.inner.buffer_size()
    }

    fn sample_rate(&self) -> f64 {
        self.inner.sample_rate()
    }
}

#[derive(Default)]
struct SliceLog(Mutex<Vec<AudioTime>>);

impl SliceListener for SliceLog {
    fn new_audio_slice(&self, time: AudioTime, _duration: AudioTime) {
        self.0.lock().push(time);
    }
}

#[test]
fn test_underrun_recovery_single_resync() {
    init_tracing();
    let sink = Arc::new(StallingSink {
        inner: MemorySink::new(AudioFormat::stereo(TEST_SAMPLE_RATE), 480).discarding(),
        writes: AtomicU64::new(0),
        stall_on: 5,
        stall: ms(3),
        jump: AtomicTime::default(),
    });
    let config = EngineConfig {
        pull: PullConfig {
            slice_time: ms(1),
            drift_tolerance: ms(1),
            ..PullConfig::default()
        },
        ..EngineConfig::default()
    };
    let engine = SynthEngine::builder()
        .config(config)
        .sink(sink.clone())
        .worker_threads(0)
        .thread_factory(ThreadFactory::standard())
        .build()
        .unwrap();
    let log = Arc::new(SliceLog::default());
    engine.pull_thread().add_listener(log.clone());

    engine.send(TimedEvent::note_on(ms(0), 0, 60, 100));
    engine.start().unwrap();
    assert!(wait_for(2000, || engine.pull_thread().stats().slices.get() >= 20));
    engine.stop();

    assert_eq!(engine.pull_thread().resync_count(), 1);
    let log = log.0.lock();
    assert_eq!(log[4], ms(4));
    // the stall pushed the sink 3 ms ahead; later slices follow the sink
    assert_eq!(log[5], ms(8));
    assert_eq!(log[6], ms(9));
    assert_eq!(engine.synthesizer().slice_start().map(|t| t >= ms(19)), Some(true));
}
