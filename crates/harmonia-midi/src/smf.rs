//! Standard MIDI File playback by pushing every event up front.
//!
//! The file is parsed once, all tracks are merged by tick and converted to
//! absolute times through the tempo map. [`SmfPusher::push_to`] then hands
//! every event to a listener at once, offset by a start time; the
//! synthesizer's scheduler does the waiting.

use std::path::Path;

use harmonia_core::AudioTime;
use midi_msg::{ChannelVoiceMsg, ControlChange};
use midly::{MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};

use crate::event::TimedEvent;
use crate::source::EventListener;
use crate::Result;

/// Microseconds per quarter note until the first tempo event (120 BPM).
pub const DEFAULT_TEMPO: u32 = 500_000;

enum TickEvent {
    Tempo(u32),
    Voice { channel: u8, msg: ChannelVoiceMsg },
}

fn voice_msg(message: MidiMessage) -> ChannelVoiceMsg {
    match message {
        MidiMessage::NoteOff { key, vel } => ChannelVoiceMsg::NoteOff {
            note: key.as_int(),
            velocity: vel.as_int(),
        },
        MidiMessage::NoteOn { key, vel } => ChannelVoiceMsg::NoteOn {
            note: key.as_int(),
            velocity: vel.as_int(),
        },
        MidiMessage::Aftertouch { key, vel } => ChannelVoiceMsg::PolyPressure {
            note: key.as_int(),
            pressure: vel.as_int(),
        },
        MidiMessage::Controller { controller, value } => ChannelVoiceMsg::ControlChange {
            control: ControlChange::CC {
                control: controller.as_int(),
                value: value.as_int(),
            },
        },
        MidiMessage::ProgramChange { program } => ChannelVoiceMsg::ProgramChange {
            program: program.as_int(),
        },
        MidiMessage::ChannelAftertouch { vel } => ChannelVoiceMsg::ChannelPressure {
            pressure: vel.as_int(),
        },
        MidiMessage::PitchBend { bend } => ChannelVoiceMsg::PitchBend {
            bend: bend.0.as_int(),
        },
    }
}

/// A parsed, time-resolved MIDI file.
#[derive(Debug, Clone)]
pub struct SmfPusher {
    events: Vec<TimedEvent>,
    duration: AudioTime,
}

impl SmfPusher {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path.as_ref())?;
        Self::parse(&bytes)
    }

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let smf = Smf::parse(bytes)?;

        let mut merged: Vec<(u64, TickEvent)> = Vec::new();
        for track in &smf.tracks {
            let mut tick = 0u64;
            for event in track {
                tick += u64::from(event.delta.as_int());
                match event.kind {
                    TrackEventKind::Meta(MetaMessage::Tempo(tempo)) => {
                        merged.push((tick, TickEvent::Tempo(tempo.as_int())));
                    }
                    TrackEventKind::Midi { channel, message } => merged.push((
                        tick,
                        TickEvent::Voice {
                            channel: channel.as_int(),
                            msg: voice_msg(message),
                        },
                    )),
                    _ => {}
                }
            }
        }
        // stable: same-tick events keep track order
        merged.sort_by_key(|(tick, _)| *tick);

        let mut events = Vec::with_capacity(merged.len());
        let mut tempo = DEFAULT_TEMPO;
        let mut last_tick = 0u64;
        let mut nanos: u128 = 0;
        for (tick, event) in merged {
            nanos += ticks_to_nanos(smf.header.timing, tick - last_tick, tempo);
            last_tick = tick;
            match event {
                TickEvent::Tempo(t) => tempo = t,
                TickEvent::Voice { channel, msg } => {
                    let time = AudioTime::from_nanos(nanos.min(i64::MAX as u128) as i64);
                    events.push(TimedEvent::voice(time, channel, msg));
                }
            }
        }
        let duration = events.last().map(|e| e.time).unwrap_or(AudioTime::ZERO);
        tracing::debug!(
            tracks = smf.tracks.len(),
            events = events.len(),
            %duration,
            "parsed MIDI file"
        );
        Ok(Self { events, duration })
    }

    /// Time of the last event relative to the file start.
    pub fn duration(&self) -> AudioTime {
        self.duration
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn note_on_count(&self) -> usize {
        self.events.iter().filter(|e| e.is_note_on()).count()
    }

    /// Events relative to the file start, in playback order.
    pub fn events(&self) -> &[TimedEvent] {
        &self.events
    }

    /// Push every event to `listener`, shifted to begin at `start`.
    ///
    /// Returns the number of note-on events pushed.
    pub fn push_to(&self, listener: &dyn EventListener, start: AudioTime) -> usize {
        let mut notes = 0;
        for event in &self.events {
            if event.is_note_on() {
                notes += 1;
            }
            listener.event_received(event.clone().with_time(start + event.time));
        }
        tracing::debug!(events = self.events.len(), notes, %start, "pushed MIDI file");
        notes
    }
}

fn ticks_to_nanos(timing: Timing, ticks: u64, tempo: u32) -> u128 {
    match timing {
        Timing::Metrical(per_quarter) => {
            let per_quarter = u128::from(per_quarter.as_int().max(1));
            u128::from(ticks) * u128::from(tempo) * 1_000 / per_quarter
        }
        Timing::Timecode(fps, subframe) => {
            let per_second = f64::from(fps.as_f32()) * f64::from(subframe.max(1));
            (ticks as f64 * 1e9 / per_second) as u128
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn smf(track: &[u8]) -> Vec<u8> {
        let mut bytes = b"MThd".to_vec();
        bytes.extend_from_slice(&[0, 0, 0, 6, 0, 0, 0, 1, 0x01, 0xE0]); // format 0, 480 tpq
        bytes.extend_from_slice(b"MTrk");
        bytes.extend_from_slice(&(track.len() as u32).to_be_bytes());
        bytes.extend_from_slice(track);
        bytes
    }

    #[derive(Default)]
    struct Collect(Mutex<Vec<TimedEvent>>);

    impl EventListener for Collect {
        fn event_received(&self, event: TimedEvent) {
            self.0.lock().push(event);
        }
    }

    #[test]
    fn test_default_tempo_note() {
        let bytes = smf(&[
            0x00, 0x90, 0x3C, 0x64, // note on at tick 0
            0x83, 0x60, 0x80, 0x3C, 0x00, // note off at tick 480
            0x00, 0xFF, 0x2F, 0x00,
        ]);
        let pusher = SmfPusher::parse(&bytes).unwrap();
        assert_eq!(pusher.len(), 2);
        assert_eq!(pusher.note_on_count(), 1);
        assert_eq!(pusher.duration(), AudioTime::from_millis(500));
    }

    #[test]
    fn test_tempo_change_applies_from_its_tick() {
        let bytes = smf(&[
            0x00, 0xFF, 0x51, 0x03, 0x07, 0xA1, 0x20, // 500_000 us/qn
            0x00, 0x90, 0x3C, 0x64,
            0x83, 0x60, 0xFF, 0x51, 0x03, 0x0F, 0x42, 0x40, // tick 480: 1_000_000 us/qn
            0x00, 0x80, 0x3C, 0x00,
            0x83, 0x60, 0x90, 0x40, 0x64, // tick 960
            0x83, 0x60, 0x80, 0x40, 0x00, // tick 1440
            0x00, 0xFF, 0x2F, 0x00,
        ]);
        let pusher = SmfPusher::parse(&bytes).unwrap();
        let times: Vec<_> = pusher.events().iter().map(|e| e.time).collect();
        assert_eq!(
            times,
            vec![
                AudioTime::ZERO,
                AudioTime::from_millis(500),
                AudioTime::from_millis(1500),
                AudioTime::from_millis(2500),
            ]
        );
        assert_eq!(pusher.note_on_count(), 2);
    }

    #[test]
    fn test_push_offsets_by_start() {
        let bytes = smf(&[
            0x00, 0xB2, 0x07, 0x40,
            0x83, 0x60, 0x92, 0x3C, 0x64,
            0x00, 0xFF, 0x2F, 0x00,
        ]);
        let pusher = SmfPusher::parse(&bytes).unwrap();
        let collect = Collect::default();
        let start = AudioTime::from_secs_f64(10.0);
        assert_eq!(pusher.push_to(&collect, start), 1);

        let events = collect.0.lock();
        assert_eq!(events[0].control(), Some((7, 0x40)));
        assert_eq!(events[0].channel, 2);
        assert_eq!(events[0].time, start);
        assert_eq!(events[1].time, start + AudioTime::from_millis(500));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(SmfPusher::parse(b"not a midi file").is_err());
    }
}
