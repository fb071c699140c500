//! Timestamped events as delivered to the synthesizer.

use std::fmt;
use std::sync::Arc;

use harmonia_core::AudioTime;
use midi_msg::{Channel, ChannelVoiceMsg, ControlChange, MidiMsg};

use crate::source::SourceId;
use crate::{Error, Result};

/// General MIDI "GM System On" system exclusive message.
pub const GM_RESET: [u8; 6] = [0xF0, 0x7E, 0x7F, 0x09, 0x01, 0xF7];

/// System real-time reset status byte.
pub const SYSTEM_RESET: u8 = 0xFF;

/// What an event carries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventPayload {
    /// Channel voice message (note, controller, program, bend, pressure).
    Voice(ChannelVoiceMsg),
    /// Complete system exclusive message, `0xF0 .. 0xF7` included.
    SysEx(Arc<[u8]>),
    /// Single-byte system real-time message.
    Realtime(u8),
}

/// An event on the synthesizer's timeline.
///
/// `time` is in the clock domain of the source that produced it; sources
/// registered with the maintenance thread deliver times already aligned to
/// the master clock. Channels above 15 are allowed for non-MIDI producers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimedEvent {
    pub time: AudioTime,
    pub source: Option<SourceId>,
    pub channel: u8,
    pub payload: EventPayload,
}

impl TimedEvent {
    #[inline]
    pub fn new(time: AudioTime, channel: u8, payload: EventPayload) -> Self {
        Self {
            time,
            source: None,
            channel,
            payload,
        }
    }

    #[inline]
    pub fn voice(time: AudioTime, channel: u8, msg: ChannelVoiceMsg) -> Self {
        Self::new(time, channel, EventPayload::Voice(msg))
    }

    #[inline]
    pub fn note_on(time: AudioTime, channel: u8, note: u8, velocity: u8) -> Self {
        Self::voice(time, channel, ChannelVoiceMsg::NoteOn { note, velocity })
    }

    #[inline]
    pub fn note_off(time: AudioTime, channel: u8, note: u8, velocity: u8) -> Self {
        Self::voice(time, channel, ChannelVoiceMsg::NoteOff { note, velocity })
    }

    #[inline]
    pub fn control_change(time: AudioTime, channel: u8, control: u8, value: u8) -> Self {
        Self::voice(
            time,
            channel,
            ChannelVoiceMsg::ControlChange {
                control: ControlChange::CC { control, value },
            },
        )
    }

    #[inline]
    pub fn program_change(time: AudioTime, channel: u8, program: u8) -> Self {
        Self::voice(time, channel, ChannelVoiceMsg::ProgramChange { program })
    }

    /// `bend` is the 14-bit value, 8192 is centre.
    #[inline]
    pub fn pitch_bend(time: AudioTime, channel: u8, bend: u16) -> Self {
        Self::voice(time, channel, ChannelVoiceMsg::PitchBend { bend })
    }

    #[inline]
    pub fn sysex(time: AudioTime, data: &[u8]) -> Self {
        Self::new(time, 0, EventPayload::SysEx(Arc::from(data)))
    }

    #[inline]
    pub fn realtime(time: AudioTime, status: u8) -> Self {
        Self::new(time, 0, EventPayload::Realtime(status))
    }

    pub fn with_source(mut self, source: SourceId) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_time(mut self, time: AudioTime) -> Self {
        self.time = time;
        self
    }

    pub fn voice_msg(&self) -> Option<&ChannelVoiceMsg> {
        match &self.payload {
            EventPayload::Voice(msg) => Some(msg),
            _ => None,
        }
    }

    #[inline]
    pub fn is_note_on(&self) -> bool {
        matches!(self.voice_msg(), Some(ChannelVoiceMsg::NoteOn { velocity, .. }) if *velocity > 0)
    }

    /// Note off, or note on with velocity 0.
    #[inline]
    pub fn is_note_off(&self) -> bool {
        matches!(
            self.voice_msg(),
            Some(ChannelVoiceMsg::NoteOff { .. } | ChannelVoiceMsg::NoteOn { velocity: 0, .. })
        )
    }

    pub fn note(&self) -> Option<u8> {
        match self.voice_msg()? {
            ChannelVoiceMsg::NoteOn { note, .. }
            | ChannelVoiceMsg::NoteOff { note, .. }
            | ChannelVoiceMsg::HighResNoteOn { note, .. }
            | ChannelVoiceMsg::HighResNoteOff { note, .. }
            | ChannelVoiceMsg::PolyPressure { note, .. } => Some(*note),
            _ => None,
        }
    }

    pub fn velocity(&self) -> Option<u8> {
        match self.voice_msg()? {
            ChannelVoiceMsg::NoteOn { velocity, .. } | ChannelVoiceMsg::NoteOff { velocity, .. } => {
                Some(*velocity)
            }
            ChannelVoiceMsg::HighResNoteOn { velocity, .. }
            | ChannelVoiceMsg::HighResNoteOff { velocity, .. } => Some((*velocity >> 7) as u8),
            _ => None,
        }
    }

    /// Controller number and 7-bit value of a control change.
    ///
    /// Named controllers are read back from their wire form, so a bank
    /// select reports controller 0 with its coarse value.
    pub fn control(&self) -> Option<(u8, u8)> {
        match self.voice_msg()? {
            ChannelVoiceMsg::ControlChange {
                control: ControlChange::CC { control, value },
            } => Some((*control, *value)),
            ChannelVoiceMsg::ControlChange { .. } => {
                let bytes = self.to_bytes();
                (bytes.len() >= 3).then(|| (bytes[1], bytes[2]))
            }
            _ => None,
        }
    }

    /// Whether this event resets the receiving synthesizer.
    pub fn is_reset(&self) -> bool {
        match &self.payload {
            EventPayload::SysEx(data) => data.as_ref() == GM_RESET.as_slice(),
            EventPayload::Realtime(status) => *status == SYSTEM_RESET,
            EventPayload::Voice(_) => false,
        }
    }

    /// Wire bytes. Voice messages on channels above 15 are encoded modulo 16.
    pub fn to_bytes(&self) -> Vec<u8> {
        match &self.payload {
            EventPayload::Voice(msg) => MidiMsg::ChannelVoice {
                channel: Channel::from_u8(self.channel & 0x0F),
                msg: *msg,
            }
            .to_midi(),
            EventPayload::SysEx(data) => data.to_vec(),
            EventPayload::Realtime(status) => vec![*status],
        }
    }

    /// Parse one complete message.
    pub fn from_bytes(time: AudioTime, bytes: &[u8]) -> Result<Self> {
        let status = *bytes
            .first()
            .ok_or_else(|| Error::InvalidMessage("empty message".into()))?;
        match status {
            0xF0 => {
                if bytes.last() != Some(&0xF7) {
                    return Err(Error::InvalidMessage("unterminated system exclusive".into()));
                }
                Ok(Self::sysex(time, bytes))
            }
            0xF8..=0xFF => Ok(Self::realtime(time, status)),
            0x80..=0xEF => {
                let (msg, _len) = MidiMsg::from_midi(bytes)
                    .map_err(|e| Error::InvalidMessage(format!("{e:?}")))?;
                match msg {
                    MidiMsg::ChannelVoice { channel, msg } => {
                        Ok(Self::voice(time, channel as u8, msg))
                    }
                    other => Err(Error::InvalidMessage(format!(
                        "expected channel voice message, got {other:?}"
                    ))),
                }
            }
            _ => Err(Error::InvalidMessage(format!(
                "unsupported status byte 0x{status:02x}"
            ))),
        }
    }
}

impl fmt::Display for TimedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ch {}", self.time, self.channel)?;
        for byte in self.to_bytes() {
            write!(f, " {byte:02x}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_on() {
        let event = TimedEvent::note_on(AudioTime::from_millis(3), 2, 60, 100);
        assert!(event.is_note_on());
        assert!(!event.is_note_off());
        assert_eq!(event.note(), Some(60));
        assert_eq!(event.velocity(), Some(100));
        assert_eq!(event.channel, 2);
        assert_eq!(event.control(), None);
    }

    #[test]
    fn test_note_on_zero_velocity_is_note_off() {
        let event = TimedEvent::note_on(AudioTime::ZERO, 0, 60, 0);
        assert!(event.is_note_off());
        assert!(!event.is_note_on());
    }

    #[test]
    fn test_control_change() {
        let event = TimedEvent::control_change(AudioTime::ZERO, 5, 64, 127);
        assert_eq!(event.control(), Some((64, 127)));
        assert_eq!(event.note(), None);
    }

    #[test]
    fn test_parse_voice_message() {
        let event = TimedEvent::from_bytes(AudioTime::from_millis(1), &[0x93, 0x40, 0x50]).unwrap();
        assert_eq!(event.channel, 3);
        assert!(event.is_note_on());
        assert_eq!(event.note(), Some(0x40));
        assert_eq!(event.to_bytes(), vec![0x93, 0x40, 0x50]);
    }

    #[test]
    fn test_parse_controller() {
        let event = TimedEvent::from_bytes(AudioTime::ZERO, &[0xB1, 0x07, 0x64]).unwrap();
        assert_eq!(event.channel, 1);
        assert_eq!(event.control(), Some((7, 100)));
    }

    #[test]
    fn test_parse_sysex_and_realtime() {
        let reset = TimedEvent::from_bytes(AudioTime::ZERO, &GM_RESET).unwrap();
        assert!(reset.is_reset());
        assert!(TimedEvent::from_bytes(AudioTime::ZERO, &[0xFF]).unwrap().is_reset());
        assert!(!TimedEvent::from_bytes(AudioTime::ZERO, &[0xF8]).unwrap().is_reset());
        let other = TimedEvent::sysex(AudioTime::ZERO, &[0xF0, 0x43, 0x10, 0xF7]);
        assert!(!other.is_reset());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(TimedEvent::from_bytes(AudioTime::ZERO, &[]).is_err());
        assert!(TimedEvent::from_bytes(AudioTime::ZERO, &[0x40, 0x40]).is_err());
        assert!(TimedEvent::from_bytes(AudioTime::ZERO, &[0xF0, 0x7E]).is_err());
    }

    #[test]
    fn test_display() {
        let event = TimedEvent::note_on(AudioTime::from_micros(1500), 0, 60, 100);
        assert_eq!(event.to_string(), "1.500us ch 0 90 3c 64");
    }
}
