//! Export integration tests (requires "export" feature)
//!
//! Offline rendering into WAV files and live recording through the slave
//! sink tap.
//!
//! Run with:
//! ```bash
//! cargo test -p harmonia --test export_integration --features "export"
//! ```

#![cfg(feature = "export")]

#[path = "helpers/mod.rs"]
mod helpers;

use helpers::tolerances::*;
use helpers::*;
use harmonia::prelude::*;
use harmonia::ThreadFactory;

/// Format 0, 480 ticks per quarter, default tempo: a C major triad for one
/// quarter note (500 ms) followed by a single E for another.
fn triad_smf() -> Vec<u8> {
    let track: &[u8] = &[
        0x00, 0xC0, 0x00, // program 0
        0x00, 0x90, 0x3C, 0x64, //
        0x00, 0x90, 0x40, 0x64, //
        0x00, 0x90, 0x43, 0x64, //
        0x83, 0x60, 0x80, 0x3C, 0x00, // tick 480
        0x00, 0x80, 0x40, 0x00, //
        0x00, 0x80, 0x43, 0x00, //
        0x00, 0x90, 0x4C, 0x50, //
        0x83, 0x60, 0x80, 0x4C, 0x00, // tick 960
        0x00, 0xFF, 0x2F, 0x00,
    ];
    let mut bytes = b"MThd".to_vec();
    bytes.extend_from_slice(&[0, 0, 0, 6, 0, 0, 0, 1, 0x01, 0xE0]);
    bytes.extend_from_slice(b"MTrk");
    bytes.extend_from_slice(&(track.len() as u32).to_be_bytes());
    bytes.extend_from_slice(track);
    bytes
}

fn wav_engine(sink: Arc<WavSink>) -> SynthEngine {
    SynthEngine::builder()
        .sink(sink)
        .slice_time(ms(1))
        .worker_threads(0)
        .thread_factory(ThreadFactory::standard())
        .build()
        .expect("Failed to create WAV engine")
}

fn read_wav_f32(path: &std::path::Path) -> (hound::WavSpec, Vec<f32>) {
    let mut reader = hound::WavReader::open(path).unwrap();
    let spec = reader.spec();
    let samples = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().map(|s| s.unwrap()).collect(),
        hound::SampleFormat::Int => reader
            .samples::<i32>()
            .map(|s| s.unwrap() as f32 / ((1i64 << (spec.bits_per_sample - 1)) - 1) as f32)
            .collect(),
    };
    (spec, samples)
}

fn left(interleaved: &[f32]) -> Vec<f32> {
    interleaved.iter().step_by(2).copied().collect()
}

#[test]
fn test_render_smf_to_float_wav() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("triad.wav");
    let smf = SmfPusher::parse(&triad_smf()).unwrap();
    assert_eq!(smf.duration(), ms(1000));

    let wav = Arc::new(
        WavSink::create(&path, WavConfig::stereo(48000, BitDepth::Float32), 480).unwrap(),
    );
    let engine = wav_engine(wav.clone());
    let frames = engine.render_smf(&smf, ms(500)).unwrap();
    assert_eq!(frames, 1500 * SLICE_FRAMES as u64);
    assert_eq!(wav.frames_written(), frames);
    assert_eq!(engine.synthesizer().stats().voices_started.get(), 4);
    wav.finalize().unwrap();

    let (spec, samples) = read_wav_f32(&path);
    assert_eq!(spec.channels, 2);
    assert_eq!(spec.sample_rate, 48000);
    assert_eq!(samples.len(), frames as usize * 2);

    let l = left(&samples);
    assert_has_audio(&l[..24000], 0.01);
    assert_has_audio(&l[24000..48000], 0.005);
    // every voice has released by the end of the tail
    assert_silence(&l[l.len() - 480..], SILENCE_THRESHOLD);
}

#[test]
fn test_wav_render_matches_memory_render() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("compare.wav");
    let smf = SmfPusher::parse(&triad_smf()).unwrap();

    let wav = Arc::new(
        WavSink::create(&path, WavConfig::stereo(48000, BitDepth::Float32), 480).unwrap(),
    );
    wav_engine(wav.clone()).render_smf(&smf, ms(100)).unwrap();
    wav.finalize().unwrap();

    let memory = memory_sink();
    test_engine(memory.clone()).render_smf(&smf, ms(100)).unwrap();

    let (_, samples) = read_wav_f32(&path);
    let expected = memory.captured();
    assert!(signals_approx_equal(
        &left(&samples),
        &expected[0],
        FLOAT_EPSILON
    ));
}

#[test]
fn test_int16_render_within_quantization() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("int16.wav");
    let smf = SmfPusher::parse(&triad_smf()).unwrap();

    let wav = Arc::new(
        WavSink::create(&path, WavConfig::stereo(48000, BitDepth::Int16), 480).unwrap(),
    );
    wav_engine(wav.clone()).render_smf(&smf, ms(0)).unwrap();
    wav.finalize().unwrap();

    let memory = memory_sink();
    test_engine(memory.clone()).render_smf(&smf, ms(0)).unwrap();

    let (spec, samples) = read_wav_f32(&path);
    assert_eq!(spec.bits_per_sample, 16);
    assert!(signals_approx_equal(
        &left(&samples),
        &memory.captured()[0],
        2.0 * INT16_EPSILON
    ));
}

#[test]
fn test_record_live_output_to_wav() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("take.wav");
    let sink = Arc::new(
        MemorySink::new(AudioFormat::stereo(TEST_SAMPLE_RATE), 480)
            .paced()
            .discarding(),
    );
    let engine = test_engine(sink);
    let recorder = engine
        .record_to_wav(&path, BitDepth::Int24)
        .unwrap();
    assert_eq!(recorder.config().sample_rate, 48000);
    assert_eq!(recorder.config().channels, 2);

    engine.start().unwrap();
    engine.send(TimedEvent::note_on(engine.now(), 0, 67, 110));
    assert!(wait_for(2000, || recorder.frames_written() >= 4800));
    engine.stop();
    engine.set_recording_sink(None).unwrap();
    let recorded = recorder.frames_written();
    recorder.finalize().unwrap();

    let (spec, samples) = read_wav_f32(&path);
    assert_eq!(spec.bits_per_sample, 24);
    assert_eq!(spec.sample_rate, 48000);
    assert_eq!(samples.len() as u64, recorded * 2);
    assert_has_audio(&left(&samples), 0.01);
}

#[test]
fn test_recorder_at_wrong_rate_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let sink = Arc::new(
        MemorySink::new(AudioFormat::stereo(TEST_SAMPLE_RATE), 480)
            .paced()
            .discarding(),
    );
    let engine = test_engine(sink);
    let recorder = Arc::new(
        WavSink::create(dir.path().join("slow.wav"), WavConfig::default(), 480).unwrap(),
    );
    engine.set_recording_sink(Some(recorder.clone())).unwrap();

    engine.start().unwrap();
    assert!(wait_for(2000, || engine.pull_thread().stats().slave_errors.get() > 0));
    engine.stop();
    engine.set_recording_sink(None).unwrap();

    assert_eq!(recorder.frames_written(), 0);
    assert_eq!(recorder.now(), AudioTime::ZERO);
}
