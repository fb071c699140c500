//! SynthEngine that wires the rendering kernel, dispatcher and sinks together

use std::sync::Arc;

use harmonia_core::{
    AdjustableClock, AudioBuffer, AudioClock, AudioMixer, AudioPullThread, AudioSink, AudioTime,
    MaintenanceThread, PullState, SliceListener, ThreadFactory,
};
use harmonia_midi::{EventListener, EventSource, SmfPusher, SourceId, TimedEvent};
use harmonia_synth::{DispatchMode, Synthesizer};
use parking_lot::Mutex;

use crate::builder::{EngineBuilder, EngineConfig};
use crate::Result;

/// Slices between mixer sweeps during offline rendering.
const OFFLINE_SWEEP_INTERVAL: u64 = 32;

struct RegisteredSource {
    id: SourceId,
    source: Arc<dyn EventSource>,
    clock: Arc<dyn AdjustableClock>,
}

/// A running synthesizer: one pull thread feeding a sink, a render pool, a
/// dispatcher and a maintenance thread keeping event source clocks aligned
/// with the sink.
///
/// # Example
///
/// ```ignore
/// use harmonia::prelude::*;
///
/// let engine = SynthEngine::builder().sink(sink).build()?;
/// engine.start()?;
///
/// let keyboard = Arc::new(VirtualSource::new("keyboard"));
/// engine.add_event_source(keyboard.clone());
/// keyboard.send(&[0x90, 60, 100])?;
/// ```
pub struct SynthEngine {
    config: EngineConfig,
    sink: Arc<dyn AudioSink>,
    master: Arc<dyn AudioClock>,
    mixer: Arc<AudioMixer>,
    synth: Arc<Synthesizer>,
    listener: Arc<dyn EventListener>,
    pull: AudioPullThread,
    maintenance: MaintenanceThread,
    factory: ThreadFactory,
    latency: AudioTime,
    sources: Mutex<Vec<RegisteredSource>>,
}

impl SynthEngine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        config: EngineConfig,
        sink: Arc<dyn AudioSink>,
        master: Arc<dyn AudioClock>,
        mixer: Arc<AudioMixer>,
        synth: Arc<Synthesizer>,
        pull: AudioPullThread,
        maintenance: MaintenanceThread,
        factory: ThreadFactory,
        latency: AudioTime,
    ) -> Self {
        let listener: Arc<dyn EventListener> = synth.clone();
        Self {
            config,
            sink,
            master,
            mixer,
            synth,
            listener,
            pull,
            maintenance,
            factory,
            latency,
            sources: Mutex::new(Vec::new()),
        }
    }

    /// Start dispatch, maintenance and the pull thread, in that order. Fails
    /// with `SinkClosed` when the sink is closed and `AlreadyRunning` when
    /// running; nothing is left running on failure.
    pub fn start(&self) -> Result<()> {
        if self.pull.is_running() {
            return Err(harmonia_core::Error::AlreadyRunning.into());
        }
        if !self.sink.is_open() {
            return Err(harmonia_core::Error::SinkClosed.into());
        }
        let mode = self.synth.start(self.latency)?;
        if let Err(e) = self.maintenance.start() {
            self.synth.stop();
            return Err(e.into());
        }
        if let Err(e) = self.pull.start() {
            self.maintenance.stop();
            self.synth.stop();
            return Err(e.into());
        }
        tracing::info!(
            ?mode,
            slice_frames = self.pull.slice_frames(),
            latency = %self.latency,
            "engine started"
        );
        Ok(())
    }

    /// Stop everything. Idempotent.
    pub fn stop(&self) {
        let was_running = self.pull.is_running();
        self.pull.stop();
        self.synth.stop();
        self.maintenance.stop();
        if was_running {
            tracing::info!(
                slices = self.pull.stats().slices.get(),
                resyncs = self.pull.resync_count(),
                "engine stopped"
            );
        }
    }

    pub fn is_running(&self) -> bool {
        self.pull.is_running()
    }

    /// Register an event source: its events reach the dispatcher and its
    /// clock is aligned with the sink right away and then periodically.
    /// Returns `false` when a source with the same id is already registered.
    pub fn add_event_source<S: EventSource + 'static>(&self, source: Arc<S>) -> bool {
        let id = source.id();
        let mut sources = self.sources.lock();
        if sources.iter().any(|s| s.id == id) {
            return false;
        }
        let clock: Arc<dyn AdjustableClock> = source.clone();
        source.add_listener(Arc::clone(&self.listener));
        self.maintenance.add_adjustable_clock(Arc::clone(&clock));
        sources.push(RegisteredSource {
            id,
            source,
            clock,
        });
        drop(sources);
        self.maintenance.synchronize_now();
        tracing::debug!(?id, "event source added");
        true
    }

    pub fn remove_event_source(&self, id: SourceId) -> bool {
        let mut sources = self.sources.lock();
        let Some(index) = sources.iter().position(|s| s.id == id) else {
            return false;
        };
        let removed = sources.remove(index);
        removed.source.remove_listener(&self.listener);
        self.maintenance.remove_adjustable_clock(&removed.clock);
        tracing::debug!(?id, "event source removed");
        true
    }

    pub fn event_source_count(&self) -> usize {
        self.sources.lock().len()
    }

    /// Hand an event straight to the dispatcher.
    pub fn send(&self, event: TimedEvent) {
        self.synth.on_event(event);
    }

    /// Current time on the master (sink) timeline.
    pub fn now(&self) -> AudioTime {
        self.master.now()
    }

    /// Copy every rendered slice into `sink` as well, or stop copying with
    /// `None`. The copy is fed from a bounded queue; a slow recorder loses
    /// slices, never the main output.
    pub fn set_recording_sink(&self, sink: Option<Arc<dyn AudioSink>>) -> Result<()> {
        self.pull.set_slave_sink(sink)?;
        Ok(())
    }

    /// Record the live output to a WAV file until the recording sink is
    /// replaced or the engine is dropped. The file takes the output sink's
    /// sample rate and channel count.
    #[cfg(feature = "export")]
    pub fn record_to_wav(
        &self,
        path: impl AsRef<std::path::Path>,
        bit_depth: harmonia_export::BitDepth,
    ) -> Result<Arc<harmonia_export::WavSink>> {
        let config = harmonia_export::WavConfig::for_format(self.sink.format(), bit_depth)?;
        let wav = Arc::new(harmonia_export::WavSink::create(
            path,
            config,
            self.sink.buffer_size(),
        )?);
        self.set_recording_sink(Some(wav.clone()))?;
        Ok(wav)
    }

    /// Silence every voice and reset all channels.
    pub fn reset(&self) {
        self.synth.reset();
    }

    /// Render `duration` on the calling thread, pushing `events` (times
    /// relative to the start of the render) at the slice they fall in.
    /// Deterministic: no dispatch or pull thread is involved. The engine
    /// must not be running. Returns the number of frames written.
    pub fn render_offline(&self, events: &[TimedEvent], duration: AudioTime) -> Result<u64> {
        match self.pull.state() {
            PullState::Running => return Err(harmonia_core::Error::AlreadyRunning.into()),
            PullState::Stopping => return Err(harmonia_core::Error::StillStopping.into()),
            PullState::Stopped => {}
        }
        self.synth.stop();

        let mut ordered: Vec<&TimedEvent> = events.iter().collect();
        ordered.sort_by_key(|e| e.time);

        let rate = self.sink.sample_rate();
        let frames = self.pull.slice_frames();
        let slice = self.pull.slice_time();
        let start = self.master.now();
        let end = start + duration;
        let mut buffer = AudioBuffer::new(self.sink.channels(), frames, rate);

        let mut pending = ordered.into_iter().peekable();
        let mut time = start;
        let mut slices = 0u64;
        let mut written = 0u64;
        while time < end {
            self.synth.new_audio_slice(time, slice);
            let slice_end = time + slice;
            while let Some(event) = pending.next_if(|e| start + e.time < slice_end) {
                self.synth
                    .on_event(event.clone().with_time(start + event.time));
            }
            self.mixer.render_slice(time, &mut buffer);
            self.sink.write(&buffer)?;
            written += frames as u64;
            slices += 1;
            if slices % OFFLINE_SWEEP_INTERVAL == 0 {
                self.mixer.sweep();
            }
            time = slice_end;
        }
        self.mixer.sweep();
        tracing::debug!(slices, frames = written, "offline render finished");
        Ok(written)
    }

    /// Render a Standard MIDI File followed by `tail` of release time.
    pub fn render_smf(&self, smf: &SmfPusher, tail: AudioTime) -> Result<u64> {
        self.render_offline(smf.events(), smf.duration() + tail)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn sink(&self) -> &Arc<dyn AudioSink> {
        &self.sink
    }

    pub fn mixer(&self) -> &Arc<AudioMixer> {
        &self.mixer
    }

    pub fn synthesizer(&self) -> &Arc<Synthesizer> {
        &self.synth
    }

    pub fn pull_thread(&self) -> &AudioPullThread {
        &self.pull
    }

    pub fn maintenance(&self) -> &MaintenanceThread {
        &self.maintenance
    }

    pub fn thread_factory(&self) -> &ThreadFactory {
        &self.factory
    }

    /// Latency the dispatch mode is resolved against.
    pub fn latency(&self) -> AudioTime {
        self.latency
    }

    /// Dispatch mode in effect; `Auto` until the first start.
    pub fn dispatch_mode(&self) -> DispatchMode {
        self.synth.dispatch_mode()
    }

    pub fn slice_frames(&self) -> usize {
        self.pull.slice_frames()
    }

    pub fn sample_rate(&self) -> f64 {
        self.sink.sample_rate()
    }
}

impl Drop for SynthEngine {
    fn drop(&mut self) {
        self.stop();
        for source in self.sources.get_mut().drain(..) {
            source.source.remove_listener(&self.listener);
        }
    }
}
