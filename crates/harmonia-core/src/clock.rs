//! Clock abstractions.
//!
//! - [`AudioClock`]: read-only `now()`
//! - [`AdjustableClock`]: a device clock plus an offset that maps it onto a
//!   shared timeline, `now() = device_time() + offset()`
//!
//! Offsets are written only by the synchronization routine that owns them
//! (see [`MaintenanceThread`](crate::MaintenanceThread)); everyone else reads.

use crate::lockfree::AtomicTime;
use crate::time::AudioTime;
use std::time::Instant;

/// A source of "now".
pub trait AudioClock: Send + Sync {
    fn now(&self) -> AudioTime;
}

/// A clock whose reported time can be shifted onto another clock's timeline.
pub trait AdjustableClock: AudioClock {
    /// Raw device time, without offset.
    fn device_time(&self) -> AudioTime;

    fn offset(&self) -> AudioTime;

    fn set_offset(&self, offset: AudioTime);
}

/// Offset cell embedded by [`AdjustableClock`] implementors.
#[derive(Debug, Default)]
pub struct ClockOffset(AtomicTime);

impl ClockOffset {
    pub const fn new() -> Self {
        Self(AtomicTime::new(AudioTime::ZERO))
    }

    #[inline]
    pub fn get(&self) -> AudioTime {
        self.0.get()
    }

    #[inline]
    pub fn set(&self, offset: AudioTime) {
        self.0.set(offset)
    }

    /// `device_time + offset`.
    #[inline]
    pub fn apply(&self, device_time: AudioTime) -> AudioTime {
        device_time + self.0.get()
    }
}

/// Wall clock counting from its creation.
#[derive(Debug)]
pub struct MonotonicClock {
    origin: Instant,
    offset: ClockOffset,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: ClockOffset::new(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioClock for MonotonicClock {
    fn now(&self) -> AudioTime {
        self.offset.apply(self.device_time())
    }
}

impl AdjustableClock for MonotonicClock {
    fn device_time(&self) -> AudioTime {
        AudioTime::from(self.origin.elapsed())
    }

    fn offset(&self) -> AudioTime {
        self.offset.get()
    }

    fn set_offset(&self, offset: AudioTime) {
        self.offset.set(offset);
    }
}

/// Clock whose device time only moves when told to.
///
/// Used for offline rendering and deterministic tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    device: AtomicTime,
    offset: ClockOffset,
}

impl ManualClock {
    pub fn new(start: AudioTime) -> Self {
        Self {
            device: AtomicTime::new(start),
            offset: ClockOffset::new(),
        }
    }

    pub fn set_device_time(&self, time: AudioTime) {
        self.device.set(time);
    }

    pub fn advance(&self, by: AudioTime) {
        self.device.set(self.device.get() + by);
    }
}

impl AudioClock for ManualClock {
    fn now(&self) -> AudioTime {
        self.offset.apply(self.device.get())
    }
}

impl AdjustableClock for ManualClock {
    fn device_time(&self) -> AudioTime {
        self.device.get()
    }

    fn offset(&self) -> AudioTime {
        self.offset.get()
    }

    fn set_offset(&self, offset: AudioTime) {
        self.offset.set(offset);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_offset() {
        let clock = ManualClock::new(AudioTime::from_millis(100));
        assert_eq!(clock.now(), AudioTime::from_millis(100));
        clock.set_offset(AudioTime::from_millis(-30));
        assert_eq!(clock.now(), AudioTime::from_millis(70));
        assert_eq!(clock.device_time(), AudioTime::from_millis(100));
        clock.advance(AudioTime::from_millis(5));
        assert_eq!(clock.now(), AudioTime::from_millis(75));
    }

    #[test]
    fn test_monotonic_clock_moves_forward() {
        let clock = MonotonicClock::new();
        let a = clock.now();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = clock.now();
        assert!(b > a);
        clock.set_offset(AudioTime::from_millis(1000));
        assert!(clock.now() >= b + AudioTime::from_millis(1000));
    }
}
