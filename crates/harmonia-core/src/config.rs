//! Runtime configuration for the rendering kernel.
//!
//! Every component takes its config at construction; nothing is read from
//! global state.

use crate::thread::Priority;
use crate::time::AudioTime;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Pull thread (scheduler) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullConfig {
    /// Length of one rendering quantum. Capped to the sink buffer size.
    pub slice_time: AudioTime,
    /// Reuse one slice buffer instead of allocating per slice.
    pub reuse_buffers: bool,
    /// How far the sink clock may deviate from the scheduled slice end
    /// before the time base is re-derived from the sink.
    pub drift_tolerance: AudioTime,
    pub priority: Priority,
    /// Slices queued for the slave sink before copies are dropped.
    pub slave_queue: usize,
    pub join_timeout: Duration,
}

impl Default for PullConfig {
    fn default() -> Self {
        Self {
            slice_time: AudioTime::from_millis(1),
            reuse_buffers: true,
            drift_tolerance: AudioTime::from_millis(2),
            priority: Priority::REALTIME,
            slave_queue: 32,
            join_timeout: Duration::from_secs(2),
        }
    }
}

impl PullConfig {
    pub fn validate(&self) -> Result<()> {
        if self.slice_time <= AudioTime::ZERO {
            return Err(Error::InvalidConfig(format!(
                "slice_time {} must be positive",
                self.slice_time
            )));
        }
        if self.drift_tolerance.is_negative() {
            return Err(Error::InvalidConfig(format!(
                "drift_tolerance {} must not be negative",
                self.drift_tolerance
            )));
        }
        if self.slave_queue == 0 {
            return Err(Error::InvalidConfig("slave_queue must be at least 1".into()));
        }
        Ok(())
    }
}

/// Mixer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MixerConfig {
    /// Voice count at which rendering is handed to the render pool.
    pub parallel_threshold: usize,
    /// Upper bound on live voices; further allocations fail.
    pub max_voices: usize,
    /// Pool per-voice scratch buffers instead of allocating them per slice.
    pub reuse_buffers: bool,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            parallel_threshold: 8,
            max_voices: 256,
            reuse_buffers: true,
        }
    }
}

impl MixerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_voices == 0 {
            return Err(Error::InvalidConfig("max_voices must be at least 1".into()));
        }
        if self.parallel_threshold == 0 {
            return Err(Error::InvalidConfig(
                "parallel_threshold must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Render pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderPoolConfig {
    /// Worker count. `None` uses the available parallelism, `Some(0)`
    /// disables parallel rendering.
    pub threads: Option<usize>,
    pub priority: Priority,
    /// Longest the pull thread waits for all groups of one slice.
    pub barrier_timeout: Duration,
    pub join_timeout: Duration,
}

impl Default for RenderPoolConfig {
    fn default() -> Self {
        Self {
            threads: None,
            priority: Priority::HIGH,
            barrier_timeout: Duration::from_millis(20),
            join_timeout: Duration::from_secs(2),
        }
    }
}

impl RenderPoolConfig {
    pub fn serial() -> Self {
        Self {
            threads: Some(0),
            ..Self::default()
        }
    }

    pub fn with_threads(threads: usize) -> Self {
        Self {
            threads: Some(threads),
            ..Self::default()
        }
    }

    pub fn resolved_threads(&self) -> usize {
        self.threads.unwrap_or_else(num_cpus::get)
    }

    pub fn validate(&self) -> Result<()> {
        if self.barrier_timeout.is_zero() {
            return Err(Error::InvalidConfig(
                "barrier_timeout must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Maintenance thread configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    pub interval: Duration,
    /// Periodic passes leave offsets alone that moved less than this.
    pub sync_threshold: AudioTime,
    pub priority: Priority,
    pub join_timeout: Duration,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(300),
            sync_threshold: AudioTime::from_micros(50),
            priority: Priority::LOW,
            join_timeout: Duration::from_secs(2),
        }
    }
}

impl MaintenanceConfig {
    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(Error::InvalidConfig("interval must be positive".into()));
        }
        if self.sync_threshold.is_negative() {
            return Err(Error::InvalidConfig(
                "sync_threshold must not be negative".into(),
            ));
        }
        Ok(())
    }
}
