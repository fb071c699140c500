//! Mixer property tests
//!
//! Mixing is additive, the render pool produces the same output as the
//! serial path at every pool size, and rendering an instant twice is a no-op.

use std::time::Duration;

use harmonia::core::{
    AudioBuffer, AudioMixer, MixerConfig, RenderPool, RenderPoolConfig, Renderable, VoiceTag,
};
use harmonia::prelude::*;
use harmonia::ThreadFactory;
use proptest::prelude::*;

use crate::helpers::tolerances::*;
use crate::helpers::*;

fn serial_mixer() -> AudioMixer {
    AudioMixer::new(MixerConfig::default()).unwrap()
}

fn parallel_mixer(threads: usize) -> AudioMixer {
    let pool = RenderPool::new(
        RenderPoolConfig {
            threads: Some(threads),
            barrier_timeout: Duration::from_secs(5),
            ..RenderPoolConfig::default()
        },
        &ThreadFactory::standard(),
    )
    .unwrap();
    let config = MixerConfig {
        parallel_threshold: 1,
        ..MixerConfig::default()
    };
    AudioMixer::new(config).unwrap().with_pool(Arc::new(pool))
}

fn fill(mixer: &AudioMixer, voices: &[(u64, f32)]) {
    for (i, &(seed, gain)) in voices.iter().enumerate() {
        mixer
            .add(VoiceTag::new(0, i as u8), Box::new(NoiseVoice::new(seed, gain)))
            .unwrap();
    }
}

fn render(mixer: &AudioMixer, time: AudioTime) -> AudioBuffer {
    let mut out = AudioBuffer::new(2, SLICE_FRAMES, TEST_SAMPLE_RATE);
    mixer.render_slice(time, &mut out);
    out
}

fn voice_set() -> impl Strategy<Value = Vec<(u64, f32)>> {
    prop::collection::vec((any::<u64>(), 0.0f32..0.5), 1..12)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_mix_is_additive(a in voice_set(), b in voice_set(), slice in 0i64..1000) {
        let time = ms(slice);
        let both = serial_mixer();
        fill(&both, &a.iter().chain(&b).copied().collect::<Vec<_>>());
        let only_a = serial_mixer();
        fill(&only_a, &a);
        let only_b = serial_mixer();
        fill(&only_b, &b);

        let mixed = render(&both, time);
        let mut summed = render(&only_a, time);
        summed.mix_from(&render(&only_b, time));

        for ch in 0..2 {
            prop_assert!(signals_approx_equal(mixed.channel(ch), summed.channel(ch), MIX_EPSILON));
        }
    }

    #[test]
    fn prop_parallel_matches_serial(voices in voice_set(), threads in 1usize..=4) {
        let serial = serial_mixer();
        fill(&serial, &voices);
        let parallel = parallel_mixer(threads);
        fill(&parallel, &voices);

        for slice in 0..4 {
            let a = render(&serial, ms(slice));
            let b = render(&parallel, ms(slice));
            for ch in 0..2 {
                prop_assert!(signals_approx_equal(a.channel(ch), b.channel(ch), MIX_EPSILON));
            }
        }
    }

    #[test]
    fn prop_second_render_is_noop(seed in any::<u64>(), offset_us in 0i64..100) {
        let mut voice = NoiseVoice::new(seed, 0.5);
        let mut out = AudioBuffer::new(2, SLICE_FRAMES, TEST_SAMPLE_RATE);
        prop_assert!(voice.render(ms(3), &mut out));
        let first = out.channel(0).to_vec();

        out.channel_mut(0).fill(0.25);
        let again = ms(3) + AudioTime::from_micros(offset_us);
        prop_assert!(voice.already_rendered(again));
        prop_assert!(!voice.render(again, &mut out));
        prop_assert!(out.channel(0).iter().all(|&s| s == 0.25));
        prop_assert!(!first.iter().all(|&s| s == 0.0));
    }
}

#[test]
fn test_synth_voice_render_is_idempotent_through_mixer() {
    let sink = memory_sink();
    let engine = test_engine(sink);
    engine.send(TimedEvent::note_on(ms(0), 0, 69, 100));

    let mut first = AudioBuffer::new(2, SLICE_FRAMES, TEST_SAMPLE_RATE);
    engine.mixer().render_slice(ms(0), &mut first);
    assert_has_audio(first.channel(0), 0.001);

    // the same instant again renders nothing
    let mut second = AudioBuffer::new(2, SLICE_FRAMES, TEST_SAMPLE_RATE);
    engine.mixer().render_slice(ms(0), &mut second);
    assert_silence(second.channel(0), FLOAT_EPSILON);
}

#[test]
fn test_offline_render_parallel_matches_serial() {
    let chord: Vec<TimedEvent> = [48u8, 52, 55, 60, 64, 67, 72, 76, 79, 84]
        .iter()
        .enumerate()
        .flat_map(|(i, &note)| {
            let channel = (i % 4) as u8;
            [
                TimedEvent::program_change(ms(0), channel, (i * 8) as u8),
                TimedEvent::note_on(ms(i as i64 * 3), channel, note, 90),
                TimedEvent::note_off(ms(150 + i as i64), channel, note, 0),
            ]
        })
        .collect();

    let serial_sink = memory_sink();
    let serial = test_engine(serial_sink.clone());
    serial.render_offline(&chord, ms(200)).unwrap();

    for threads in 1..=4 {
        let sink = memory_sink();
        let parallel = test_builder(sink.clone())
            .worker_threads(threads)
            .parallel_threshold(1)
            .build()
            .unwrap();
        parallel.render_offline(&chord, ms(200)).unwrap();

        let expected = serial_sink.captured();
        let actual = sink.captured();
        for ch in 0..2 {
            assert!(
                signals_approx_equal(&expected[ch], &actual[ch], MIX_EPSILON),
                "pool of {threads} differs on channel {ch}"
            );
        }
    }
}
