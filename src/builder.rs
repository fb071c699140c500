//! Builder for configuring and constructing a `SynthEngine`.

use std::sync::Arc;
use std::time::Duration;

use harmonia_core::{
    AudioClock, AudioMixer, AudioPullThread, AudioSink, AudioTime, MaintenanceConfig,
    MaintenanceThread, MixerConfig, Priority, PullConfig, RenderPool, RenderPoolConfig,
    ThreadFactory,
};
use harmonia_synth::{DispatchMode, OscillatorBank, Soundbank, SynthConfig, Synthesizer};
use serde::{Deserialize, Serialize};

use crate::engine::SynthEngine;
use crate::{Error, Result};

/// Every component's configuration in one place.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    pub pull: PullConfig,
    pub mixer: MixerConfig,
    pub pool: RenderPoolConfig,
    pub maintenance: MaintenanceConfig,
    pub synth: SynthConfig,
    /// Output latency the dispatch mode is resolved against. `None` uses the
    /// sink's buffer duration.
    pub latency: Option<AudioTime>,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        self.pull.validate()?;
        self.mixer.validate()?;
        self.pool.validate()?;
        self.maintenance.validate()?;
        self.synth.validate()?;
        if let Some(latency) = self.latency {
            if latency <= AudioTime::ZERO {
                return Err(Error::Config(format!("latency {latency} must be positive")));
            }
        }
        Ok(())
    }
}

/// The sink is the only required part. Without a soundbank the built-in
/// General MIDI [`OscillatorBank`] is used.
///
/// # Example
///
/// ```ignore
/// use harmonia::prelude::*;
///
/// let sink = Arc::new(MemorySink::new(AudioFormat::stereo(48000.0), 480).paced());
/// let engine = SynthEngine::builder()
///     .sink(sink)
///     .slice_time(AudioTime::from_millis(1))
///     .worker_threads(2)
///     .build()?;
/// engine.start()?;
/// ```
#[derive(Default)]
pub struct EngineBuilder {
    config: EngineConfig,
    sink: Option<(Arc<dyn AudioSink>, Arc<dyn AudioClock>)>,
    soundbank: Option<Arc<dyn Soundbank>>,
    factory: Option<ThreadFactory>,
}

impl EngineBuilder {
    /// Replace the whole configuration. Later setters still apply on top.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Output sink; its clock becomes the master clock.
    pub fn sink<S: AudioSink + 'static>(mut self, sink: Arc<S>) -> Self {
        let clock: Arc<dyn AudioClock> = sink.clone();
        self.sink = Some((sink, clock));
        self
    }

    pub fn soundbank(mut self, soundbank: Arc<dyn Soundbank>) -> Self {
        self.soundbank = Some(soundbank);
        self
    }

    /// Default: 1 ms
    pub fn slice_time(mut self, slice_time: AudioTime) -> Self {
        self.config.pull.slice_time = slice_time;
        self
    }

    pub fn latency(mut self, latency: AudioTime) -> Self {
        self.config.latency = Some(latency);
        self
    }

    /// Render pool size; 0 renders every slice on the pull thread.
    pub fn worker_threads(mut self, threads: usize) -> Self {
        self.config.pool.threads = Some(threads);
        self
    }

    /// Voice count at which a slice is split across the render pool.
    pub fn parallel_threshold(mut self, voices: usize) -> Self {
        self.config.mixer.parallel_threshold = voices;
        self
    }

    pub fn max_voices(mut self, voices: usize) -> Self {
        self.config.mixer.max_voices = voices;
        self
    }

    pub fn dispatch_mode(mut self, mode: DispatchMode) -> Self {
        self.config.synth.dispatch_mode = mode;
        self
    }

    pub fn fixed_delay(mut self, delay: AudioTime) -> Self {
        self.config.synth.fixed_delay = delay;
        self
    }

    /// Default: 300 ms
    pub fn maintenance_interval(mut self, interval: Duration) -> Self {
        self.config.maintenance.interval = interval;
        self
    }

    pub fn pull_priority(mut self, priority: Priority) -> Self {
        self.config.pull.priority = priority;
        self
    }

    pub fn worker_priority(mut self, priority: Priority) -> Self {
        self.config.pool.priority = priority;
        self
    }

    pub fn dispatch_priority(mut self, priority: Priority) -> Self {
        self.config.synth.priority = priority;
        self
    }

    /// Default: [`ThreadFactory::probe`]
    pub fn thread_factory(mut self, factory: ThreadFactory) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn build(self) -> Result<SynthEngine> {
        self.config.validate()?;
        let (sink, master) = self
            .sink
            .ok_or_else(|| Error::Config("no audio sink configured".into()))?;
        let factory = self.factory.unwrap_or_else(ThreadFactory::probe);
        let soundbank = self
            .soundbank
            .unwrap_or_else(|| Arc::new(OscillatorBank::general_midi()));
        let config = self.config;

        let mut mixer = AudioMixer::new(config.mixer.clone())?;
        if config.pool.resolved_threads() > 0 {
            mixer = mixer.with_pool(Arc::new(RenderPool::new(config.pool.clone(), &factory)?));
        }
        let mixer = Arc::new(mixer);

        let pull = AudioPullThread::new(
            config.pull.clone(),
            mixer.clone(),
            Arc::clone(&sink),
            factory.clone(),
        )?;

        let maintenance = MaintenanceThread::new(config.maintenance.clone(), factory.clone())?;
        maintenance.set_master_clock(Arc::clone(&master));
        maintenance.add_serviceable(mixer.clone());

        let synth = Arc::new(Synthesizer::new(
            config.synth.clone(),
            soundbank,
            Arc::clone(&mixer),
            Arc::clone(&master),
            factory.clone(),
        )?);
        pull.add_listener(synth.clone());

        let latency = config.latency.unwrap_or_else(|| sink.latency());
        tracing::debug!(
            channels = sink.channels(),
            rate = sink.sample_rate(),
            slice_frames = pull.slice_frames(),
            %latency,
            backend = ?factory.backend(),
            "engine built"
        );

        Ok(SynthEngine::from_parts(
            config,
            sink,
            master,
            mixer,
            synth,
            pull,
            maintenance,
            factory,
            latency,
        ))
    }
}
