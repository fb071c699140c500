//! The voice abstraction rendered by the mixer.

use crate::buffer::AudioBuffer;
use crate::time::AudioTime;
use serde::{Deserialize, Serialize};

/// Two render requests closer than this are the same slice.
///
/// One sample period at 8 kHz, the lowest supported rate.
pub const RENDER_GRACE: AudioTime = AudioTime::from_micros(125);

/// A unit of sound production that renders one slice at a time.
///
/// Implementations are moved into the mixer and rendered from the pull
/// thread or a render pool worker, never from two threads at once.
pub trait Renderable: Send {
    /// Render the slice starting at `time` into `out`, overwriting it.
    ///
    /// Returns `false` without touching `out` when the slice was already
    /// rendered (within [`RENDER_GRACE`]) or the voice is done.
    fn render(&mut self, time: AudioTime, out: &mut AudioBuffer) -> bool;

    fn already_rendered(&self, time: AudioTime) -> bool;

    /// No more audio will be produced.
    fn is_done(&self) -> bool;

    /// Enter the release phase at `time`, which may lie in the future.
    fn release(&mut self, _time: AudioTime) {}
}

/// Grace-tolerant "rendered once per instant" bookkeeping.
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderTracker {
    last: Option<AudioTime>,
}

impl RenderTracker {
    pub fn new() -> Self {
        Self { last: None }
    }

    #[inline]
    pub fn already_rendered(&self, time: AudioTime) -> bool {
        matches!(self.last, Some(last) if (time - last).abs() < RENDER_GRACE)
    }

    /// Record a render at `time`. Returns `false` if it is a duplicate.
    #[inline]
    pub fn begin(&mut self, time: AudioTime) -> bool {
        if self.already_rendered(time) {
            return false;
        }
        self.last = Some(time);
        true
    }

    #[inline]
    pub fn last_rendered(&self) -> Option<AudioTime> {
        self.last
    }
}

/// Identity of an exclusive group: at most one voice per key sounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExclusiveKey {
    pub channel: u8,
    pub group: u32,
}

/// Routing metadata attached to a voice when it enters the mixer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceTag {
    pub channel: u8,
    pub note: u8,
    pub exclusive_group: Option<u32>,
}

impl VoiceTag {
    pub fn new(channel: u8, note: u8) -> Self {
        Self {
            channel,
            note,
            exclusive_group: None,
        }
    }

    pub fn with_exclusive_group(mut self, group: u32) -> Self {
        self.exclusive_group = Some(group);
        self
    }

    #[inline]
    pub fn exclusive_key(&self) -> Option<ExclusiveKey> {
        self.exclusive_group.map(|group| ExclusiveKey {
            channel: self.channel,
            group,
        })
    }
}
