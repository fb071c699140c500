//! Synthesizer configuration.

use std::time::Duration;

use harmonia_core::{AudioTime, Priority};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Where incoming events are turned into voices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DispatchMode {
    /// On the thread that delivered the event.
    Sync,
    /// On a dedicated dispatch thread, in timestamp order.
    Async,
    /// `Async` when the output latency exceeds the configured threshold,
    /// `Sync` otherwise.
    #[default]
    Auto,
}

impl DispatchMode {
    /// Resolve `Auto` against the output latency.
    pub fn resolve(self, output_latency: AudioTime, threshold: AudioTime) -> DispatchMode {
        match self {
            DispatchMode::Auto if output_latency > threshold => DispatchMode::Async,
            DispatchMode::Auto => DispatchMode::Sync,
            mode => mode,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthConfig {
    pub dispatch_mode: DispatchMode,
    /// Output latency above which `Auto` picks asynchronous dispatch.
    pub async_latency_threshold: AudioTime,
    /// Added to every event time before scheduling.
    pub fixed_delay: AudioTime,
    /// Hold queued events until the rendering front is about to reach them.
    pub realtime_scheduling: bool,
    /// How far ahead of the in-flight slice a held event is released.
    pub scheduling_horizon: AudioTime,
    /// Number of channels with their own controller state.
    pub channels: usize,
    /// Pitch bend range in semitones, each direction.
    pub pitch_bend_range: f32,
    pub priority: Priority,
    pub join_timeout: Duration,
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            dispatch_mode: DispatchMode::Auto,
            async_latency_threshold: AudioTime::from_millis(10),
            fixed_delay: AudioTime::ZERO,
            realtime_scheduling: true,
            scheduling_horizon: AudioTime::from_millis(2),
            channels: 16,
            pitch_bend_range: 2.0,
            priority: Priority::HIGH,
            join_timeout: Duration::from_secs(2),
        }
    }
}

impl SynthConfig {
    pub fn validate(&self) -> Result<()> {
        if self.channels == 0 || self.channels > 256 {
            return Err(Error::InvalidConfig(format!(
                "channels must be within 1..=256, got {}",
                self.channels
            )));
        }
        if self.fixed_delay.is_negative() || self.scheduling_horizon.is_negative() {
            return Err(Error::InvalidConfig(
                "fixed_delay and scheduling_horizon must not be negative".into(),
            ));
        }
        if !(0.0..=48.0).contains(&self.pitch_bend_range) {
            return Err(Error::InvalidConfig(format!(
                "pitch_bend_range {} out of range",
                self.pitch_bend_range
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_resolution() {
        let threshold = AudioTime::from_millis(10);
        assert_eq!(
            DispatchMode::Auto.resolve(AudioTime::from_millis(5), threshold),
            DispatchMode::Sync
        );
        assert_eq!(
            DispatchMode::Auto.resolve(AudioTime::from_millis(40), threshold),
            DispatchMode::Async
        );
        assert_eq!(
            DispatchMode::Sync.resolve(AudioTime::from_millis(40), threshold),
            DispatchMode::Sync
        );
    }

    #[test]
    fn test_validate() {
        assert!(SynthConfig::default().validate().is_ok());
        let bad = SynthConfig {
            channels: 0,
            ..SynthConfig::default()
        };
        assert!(bad.validate().is_err());
        let bad = SynthConfig {
            fixed_delay: AudioTime::from_millis(-1),
            ..SynthConfig::default()
        };
        assert!(bad.validate().is_err());
    }
}
