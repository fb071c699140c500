//! Nanosecond-precision audio time.
//!
//! [`AudioTime`] is the single time currency of the engine: event timestamps,
//! slice boundaries, clock offsets and voice start instants are all expressed
//! with it. Conversions to and from sample counts round to the nearest value.

use core::fmt;
use core::ops::{Add, AddAssign, Neg, Sub, SubAssign};
use serde::{Deserialize, Serialize};

const NANOS_PER_SEC: f64 = 1_000_000_000.0;

/// Signed nanosecond instant (or duration) on an audio timeline.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AudioTime(i64);

impl AudioTime {
    pub const ZERO: AudioTime = AudioTime(0);
    pub const MAX: AudioTime = AudioTime(i64::MAX);
    pub const MIN: AudioTime = AudioTime(i64::MIN);

    #[inline]
    pub const fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    #[inline]
    pub const fn from_micros(micros: i64) -> Self {
        Self(micros * 1_000)
    }

    #[inline]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis * 1_000_000)
    }

    #[inline]
    pub fn from_secs_f64(secs: f64) -> Self {
        Self((secs * NANOS_PER_SEC).round() as i64)
    }

    /// Duration of `samples` frames at `sample_rate`.
    ///
    /// # Panics
    ///
    /// Panics if `sample_rate` is not strictly positive.
    #[inline]
    pub fn from_samples(samples: i64, sample_rate: f64) -> Self {
        Self(samples_to_nanos(samples, sample_rate))
    }

    #[inline]
    pub const fn nanos(self) -> i64 {
        self.0
    }

    #[inline]
    pub const fn micros(self) -> i64 {
        self.0 / 1_000
    }

    #[inline]
    pub const fn millis(self) -> i64 {
        self.0 / 1_000_000
    }

    #[inline]
    pub fn secs_f64(self) -> f64 {
        self.0 as f64 / NANOS_PER_SEC
    }

    /// Number of frames this time spans at `sample_rate`.
    ///
    /// # Panics
    ///
    /// Panics if `sample_rate` is not strictly positive.
    #[inline]
    pub fn samples(self, sample_rate: f64) -> i64 {
        nanos_to_samples(self.0, sample_rate)
    }

    #[inline]
    pub const fn abs(self) -> Self {
        Self(self.0.saturating_abs())
    }

    #[inline]
    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    #[inline]
    pub fn earlier_than(self, other: AudioTime) -> bool {
        self < other
    }

    #[inline]
    pub fn later_than(self, other: AudioTime) -> bool {
        self > other
    }

    #[inline]
    pub const fn saturating_add(self, other: AudioTime) -> Self {
        Self(self.0.saturating_add(other.0))
    }

    #[inline]
    pub const fn saturating_sub(self, other: AudioTime) -> Self {
        Self(self.0.saturating_sub(other.0))
    }
}

/// `round(samples * 1e9 / rate)`.
#[inline]
pub fn samples_to_nanos(samples: i64, sample_rate: f64) -> i64 {
    assert!(sample_rate > 0.0, "sample rate must be positive, got {sample_rate}");
    (samples as f64 * NANOS_PER_SEC / sample_rate).round() as i64
}

/// `round(nanos * rate / 1e9)`.
#[inline]
pub fn nanos_to_samples(nanos: i64, sample_rate: f64) -> i64 {
    assert!(sample_rate > 0.0, "sample rate must be positive, got {sample_rate}");
    (nanos as f64 * sample_rate / NANOS_PER_SEC).round() as i64
}

impl Add for AudioTime {
    type Output = AudioTime;

    #[inline]
    fn add(self, rhs: AudioTime) -> AudioTime {
        AudioTime(self.0 + rhs.0)
    }
}

impl Sub for AudioTime {
    type Output = AudioTime;

    #[inline]
    fn sub(self, rhs: AudioTime) -> AudioTime {
        AudioTime(self.0 - rhs.0)
    }
}

impl AddAssign for AudioTime {
    #[inline]
    fn add_assign(&mut self, rhs: AudioTime) {
        self.0 += rhs.0;
    }
}

impl SubAssign for AudioTime {
    #[inline]
    fn sub_assign(&mut self, rhs: AudioTime) {
        self.0 -= rhs.0;
    }
}

impl Neg for AudioTime {
    type Output = AudioTime;

    #[inline]
    fn neg(self) -> AudioTime {
        AudioTime(-self.0)
    }
}

impl From<core::time::Duration> for AudioTime {
    fn from(d: core::time::Duration) -> Self {
        Self(i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
    }
}

/// Microseconds with `.` thousands separators, e.g. `1.234.567us`.
impl fmt::Display for AudioTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let micros = self.micros();
        let digits = micros.unsigned_abs().to_string();
        let mut grouped = String::with_capacity(digits.len() + digits.len() / 3 + 1);
        for (i, c) in digits.chars().enumerate() {
            if i > 0 && (digits.len() - i) % 3 == 0 {
                grouped.push('.');
            }
            grouped.push(c);
        }
        if micros < 0 {
            write!(f, "-{grouped}us")
        } else {
            write!(f, "{grouped}us")
        }
    }
}
