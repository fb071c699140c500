//! Engine lifecycle integration tests
//!
//! Tests engine start/stop, dispatch mode selection, event source
//! registration, live rendering into a paced sink and the recording tap.

use harmonia::prelude::*;
use harmonia::{Error, VirtualSource};

use crate::helpers::tolerances::*;
use crate::helpers::*;

fn paced_sink() -> Arc<MemorySink> {
    Arc::new(MemorySink::new(AudioFormat::stereo(TEST_SAMPLE_RATE), 480).paced())
}

#[test]
fn test_start_stop_is_idempotent_and_restartable() {
    init_tracing();
    let sink = Arc::new(MemorySink::new(AudioFormat::stereo(TEST_SAMPLE_RATE), 480).paced().discarding());
    let engine = test_engine(sink.clone());

    engine.start().unwrap();
    assert!(engine.is_running());
    assert!(matches!(
        engine.start(),
        Err(Error::Core(harmonia::core::Error::AlreadyRunning))
    ));
    assert!(wait_for(2000, || engine.pull_thread().stats().slices.get() >= 5));

    engine.stop();
    engine.stop();
    assert!(!engine.is_running());
    assert!(!engine.maintenance().is_running());

    engine.start().unwrap();
    assert!(engine.is_running());
    engine.stop();
}

#[test]
fn test_closed_sink_refuses_start() {
    let sink = paced_sink();
    let engine = test_engine(sink.clone());
    sink.close();
    assert!(matches!(
        engine.start(),
        Err(Error::Core(harmonia::core::Error::SinkClosed))
    ));
    assert!(!engine.is_running());
    assert!(!engine.maintenance().is_running());
    assert!(!engine.synthesizer().is_running());
}

#[test]
fn test_dispatch_mode_follows_latency() {
    let low = test_engine(paced_sink().clone());
    low.start().unwrap();
    assert_eq!(low.dispatch_mode(), DispatchMode::Sync);
    low.stop();

    let high = test_builder(paced_sink()).latency(ms(50)).build().unwrap();
    high.start().unwrap();
    assert_eq!(high.dispatch_mode(), DispatchMode::Async);
    high.stop();
}

#[test]
fn test_event_source_registration_aligns_clock() {
    let engine = test_engine(memory_sink());
    let source = Arc::new(VirtualSource::new("keys"));
    std::thread::sleep(std::time::Duration::from_millis(5));

    assert!(engine.add_event_source(source.clone()));
    assert!(!engine.add_event_source(source.clone()));
    assert_eq!(engine.event_source_count(), 1);
    assert_eq!(source.listener_count(), 1);

    let drift = (source.now() - engine.now()).abs();
    assert!(drift < ms(1), "source clock off by {drift}");

    assert!(engine.remove_event_source(source.id()));
    assert!(!engine.remove_event_source(source.id()));
    assert_eq!(source.listener_count(), 0);
}

#[test]
fn test_virtual_source_note_reaches_sink() {
    init_tracing();
    let sink = paced_sink();
    let engine = test_engine(sink.clone());
    let source = Arc::new(VirtualSource::new("keys"));
    engine.add_event_source(source.clone());
    engine.start().unwrap();

    source.send(&[0x90, 60, 100]).unwrap();
    assert!(wait_for(2000, || sink.frames_written() >= 9600));
    engine.stop();

    let left = sink.captured().remove(0);
    assert_has_audio(&left, 0.01);
    assert_eq!(engine.synthesizer().stats().voices_started.get(), 1);
}

#[test]
fn test_recording_sink_receives_copy() {
    let sink = Arc::new(MemorySink::new(AudioFormat::stereo(TEST_SAMPLE_RATE), 480).paced().discarding());
    let recorder = memory_sink();
    let engine = test_engine(sink);
    engine.set_recording_sink(Some(recorder.clone())).unwrap();
    engine.start().unwrap();

    engine.send(TimedEvent::note_on(engine.now(), 0, 64, 110));
    assert!(wait_for(2000, || recorder.frames_written() >= 4800));
    engine.stop();
    engine.set_recording_sink(None).unwrap();

    assert_has_audio(&recorder.captured()[0], 0.01);
    assert_eq!(engine.pull_thread().stats().slave_errors.get(), 0);
}

#[test]
fn test_reset_silences_everything() {
    let sink = memory_sink();
    let engine = test_engine(sink.clone());
    for note in [60, 64, 67] {
        engine.send(TimedEvent::note_on(ms(0), 0, note, 100));
    }
    assert_eq!(engine.mixer().count(), 3);

    engine.reset();
    engine.mixer().sweep();
    assert_eq!(engine.mixer().count(), 0);

    engine.render_offline(&[], ms(5)).unwrap();
    assert_silence(&sink.captured()[0], SILENCE_THRESHOLD);
}
