//! Real-time rendering kernel: slice pulling, voice mixing, clock sync.
//!
//! # Primary API
//!
//! - [`AudioTime`]: nanosecond instant used for every timestamp
//! - [`AudioClock`] / [`AdjustableClock`]: clocks and offset alignment
//! - [`Renderable`]: a voice that renders one slice at a time
//! - [`AudioMixer`]: the live voice set, rendered serially or through a [`RenderPool`]
//! - [`AudioPullThread`]: the real-time loop writing slices to an [`AudioSink`]
//! - [`MaintenanceThread`]: periodic clock synchronization and housekeeping
//! - [`ThreadFactory`]: priority thread spawning with a capability probe
//!
//! # Threads
//!
//! - one pull thread (highest priority)
//! - render pool workers, only busy while a slice is being rendered
//! - one low-priority maintenance thread
//! - an optional slave-sink tap thread
//!
//! # Example
//!
//! ```ignore
//! use harmonia_core::*;
//! use std::sync::Arc;
//!
//! let sink = Arc::new(MemorySink::new(AudioFormat::stereo(48000.0), 480).paced());
//! let mixer = Arc::new(AudioMixer::new(MixerConfig::default())?);
//! let pull = AudioPullThread::new(PullConfig::default(), mixer.clone(), sink, ThreadFactory::probe())?;
//! pull.start()?;
//! ```

pub mod error;
pub use error::{Error, Result};

pub mod config;
pub use config::{MaintenanceConfig, MixerConfig, PullConfig, RenderPoolConfig};

pub mod time;
pub use time::{nanos_to_samples, samples_to_nanos, AudioTime};

pub mod clock;
pub use clock::{AdjustableClock, AudioClock, ClockOffset, ManualClock, MonotonicClock};

pub mod buffer;
pub use buffer::{AudioBuffer, AudioFormat};

pub mod render;
pub use render::{ExclusiveKey, RenderTracker, Renderable, VoiceTag, RENDER_GRACE};

pub mod mixer;
pub use mixer::{partition, AudioMixer, MixerStats, MixerVoice, VoiceHandle, VoiceId};

pub mod pool;
pub use pool::{GroupRender, RenderPool, RenderPoolStats, VoiceGroup};

pub mod sink;
pub use sink::{AudioSink, MemorySink, WriteStatus};

pub mod pull;
pub use pull::{
    preferred_sink_buffer, AudioPullThread, PullState, PullStats, SliceLayout, SliceListener,
    SliceRenderer,
};

pub mod maintenance;
pub use maintenance::{offset_for, MaintenanceThread, Serviceable};

pub mod thread;
pub use thread::{Priority, SchedulingBackend, ThreadFactory, ThreadHandle};

pub(crate) mod lockfree;
pub use lockfree::{AtomicDouble, AtomicFlag, AtomicFloat, AtomicTime, Counter};
