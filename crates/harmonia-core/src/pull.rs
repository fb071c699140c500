//! The pull thread: real-time heartbeat of the engine.
//!
//! Each iteration notifies slice listeners, asks the [`SliceRenderer`] for
//! the next slice, writes it to the sink (blocking) and forwards a copy to
//! the optional slave sink. The sink clock is the authority on time: when the
//! sink reports an underrun, or its clock drifts from the scheduled slice
//! end by more than the tolerance, the next slice start is re-derived from
//! `sink.now()` and the resync counter is bumped.

use crate::buffer::AudioBuffer;
use crate::config::PullConfig;
use crate::lockfree::{AtomicDouble, Counter};
use crate::sink::{AudioSink, WriteStatus};
use crate::thread::{ThreadFactory, ThreadHandle};
use crate::time::AudioTime;
use crate::{Error, Result};
use arc_swap::{ArcSwap, ArcSwapOption};
use crossbeam_channel::{bounded, Sender, TrySendError};
use parking_lot::Mutex;
use std::cell::Cell;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Produces the audio for one slice.
pub trait SliceRenderer: Send + Sync {
    /// Overwrite `out` with the slice starting at `time`.
    fn render_slice(&self, time: AudioTime, out: &mut AudioBuffer);
}

/// Notified at the start of every slice, on the pull thread, before the
/// slice is rendered.
pub trait SliceListener: Send + Sync {
    fn new_audio_slice(&self, time: AudioTime, duration: AudioTime);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PullState {
    Stopped = 0,
    Running = 1,
    Stopping = 2,
}

impl PullState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => PullState::Running,
            2 => PullState::Stopping,
            _ => PullState::Stopped,
        }
    }
}

/// Pull thread counters.
#[derive(Debug, Default)]
pub struct PullStats {
    pub slices: Counter,
    pub resyncs: Counter,
    /// Iterations that took longer than slice time plus tolerance.
    pub late_slices: Counter,
    pub slave_drops: Counter,
    pub slave_errors: Counter,
    /// Render time of the last slice relative to its duration.
    pub render_load: AtomicDouble,
}

/// Slice and sink buffer sizes derived from a latency target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceLayout {
    pub slice_frames: usize,
    pub buffer_frames: usize,
}

/// Preferred sink buffer for `latency`: an integer multiple of the slice,
/// with the slice capped to the latency.
pub fn preferred_sink_buffer(latency: AudioTime, slice_time: AudioTime, sample_rate: f64) -> SliceLayout {
    let latency_frames = latency.samples(sample_rate).max(1);
    let slice_frames = slice_time.samples(sample_rate).clamp(1, latency_frames);
    let slices = ((latency_frames + slice_frames / 2) / slice_frames).max(1);
    SliceLayout {
        slice_frames: slice_frames as usize,
        buffer_frames: (slices * slice_frames) as usize,
    }
}

thread_local! {
    static CURRENT_PULL: Cell<usize> = const { Cell::new(0) };
}

struct Shared {
    config: PullConfig,
    state: AtomicU8,
    renderer: Arc<dyn SliceRenderer>,
    sink: Arc<dyn AudioSink>,
    listeners: ArcSwap<Vec<Arc<dyn SliceListener>>>,
    slave_tx: ArcSwapOption<Sender<AudioBuffer>>,
    slice_frames: AtomicUsize,
    stats: PullStats,
}

impl Shared {
    fn state(&self) -> PullState {
        PullState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: PullState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn id(self: &Arc<Self>) -> usize {
        Arc::as_ptr(self) as usize
    }
}

struct SlaveTap {
    sink: Arc<dyn AudioSink>,
    handle: ThreadHandle,
}

/// Drives rendering by pulling slices into a sink.
pub struct AudioPullThread {
    shared: Arc<Shared>,
    factory: ThreadFactory,
    handle: Mutex<Option<ThreadHandle>>,
    slave: Mutex<Option<SlaveTap>>,
}

impl AudioPullThread {
    pub fn new(
        config: PullConfig,
        renderer: Arc<dyn SliceRenderer>,
        sink: Arc<dyn AudioSink>,
        factory: ThreadFactory,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                state: AtomicU8::new(PullState::Stopped as u8),
                renderer,
                sink,
                listeners: ArcSwap::from_pointee(Vec::new()),
                slave_tx: ArcSwapOption::empty(),
                slice_frames: AtomicUsize::new(0),
                stats: PullStats::default(),
            }),
            factory,
            handle: Mutex::new(None),
            slave: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &PullConfig {
        &self.shared.config
    }

    pub fn sink(&self) -> &Arc<dyn AudioSink> {
        &self.shared.sink
    }

    pub fn state(&self) -> PullState {
        self.shared.state()
    }

    pub fn is_running(&self) -> bool {
        self.state() == PullState::Running
    }

    pub fn stats(&self) -> &PullStats {
        &self.shared.stats
    }

    pub fn resync_count(&self) -> u64 {
        self.shared.stats.resyncs.get()
    }

    /// Frames per slice for the current sink.
    pub fn slice_frames(&self) -> usize {
        let sink = &self.shared.sink;
        let mut frames = self.shared.config.slice_time.samples(sink.sample_rate()).max(1) as usize;
        if sink.buffer_size() > 0 {
            frames = frames.min(sink.buffer_size());
        }
        frames
    }

    /// Exact slice duration for the current sink.
    pub fn slice_time(&self) -> AudioTime {
        AudioTime::from_samples(self.slice_frames() as i64, self.shared.sink.sample_rate())
    }

    pub fn add_listener(&self, listener: Arc<dyn SliceListener>) {
        self.shared.listeners.rcu(|current| {
            let mut next = (**current).clone();
            next.push(Arc::clone(&listener));
            next
        });
    }

    pub fn remove_listener(&self, listener: &Arc<dyn SliceListener>) {
        let target = Arc::as_ptr(listener) as *const ();
        self.shared.listeners.rcu(|current| {
            current
                .iter()
                .filter(|l| Arc::as_ptr(l) as *const () != target)
                .cloned()
                .collect::<Vec<_>>()
        });
    }

    /// Attach (or detach with `None`) a secondary sink such as a recording
    /// tap. Slave writes run on their own thread; a slow or failing slave
    /// drops copies instead of delaying the primary sink.
    pub fn set_slave_sink(&self, sink: Option<Arc<dyn AudioSink>>) -> Result<()> {
        let mut slave = self.slave.lock();
        self.shared.slave_tx.store(None);
        if let Some(old) = slave.take() {
            old.handle.join_timeout(self.shared.config.join_timeout);
        }
        let Some(sink) = sink else {
            return Ok(());
        };

        let (tx, rx) = bounded::<AudioBuffer>(self.shared.config.slave_queue);
        let shared = Arc::clone(&self.shared);
        let tap_sink = Arc::clone(&sink);
        let handle = self.factory.spawn("harmonia-slave", self.shared.config.priority, move || {
            for buffer in rx.iter() {
                if !tap_sink.is_open() {
                    tracing::warn!("slave sink closed, dropping tap");
                    break;
                }
                if let Err(e) = tap_sink.write(&buffer) {
                    shared.stats.slave_errors.incr();
                    tracing::warn!(error = %e, "slave sink write failed");
                }
            }
        })?;
        self.shared.slave_tx.store(Some(Arc::new(tx)));
        *slave = Some(SlaveTap { sink, handle });
        Ok(())
    }

    pub fn slave_sink(&self) -> Option<Arc<dyn AudioSink>> {
        self.slave.lock().as_ref().map(|s| Arc::clone(&s.sink))
    }

    pub fn start(&self) -> Result<()> {
        let mut handle = self.handle.lock();
        match self.shared.state() {
            PullState::Running => return Err(Error::AlreadyRunning),
            PullState::Stopping => return Err(Error::StillStopping),
            PullState::Stopped => {}
        }
        // the loop may have ended on its own (closed sink) or still be
        // unwinding from a stop that timed out
        if let Some(old) = handle.as_mut() {
            if !old.try_join(self.shared.config.join_timeout) {
                return Err(Error::StillStopping);
            }
        }
        *handle = None;
        if !self.shared.sink.is_open() {
            return Err(Error::SinkClosed);
        }

        let frames = self.slice_frames();
        self.shared.slice_frames.store(frames, Ordering::Release);
        self.shared.set_state(PullState::Running);

        let shared = Arc::clone(&self.shared);
        match self
            .factory
            .spawn("harmonia-pull", self.shared.config.priority, move || run(shared, frames))
        {
            Ok(h) => {
                *handle = Some(h);
                Ok(())
            }
            Err(e) => {
                self.shared.set_state(PullState::Stopped);
                Err(e)
            }
        }
    }

    /// Stop the loop and wait for it to exit. Idempotent and callable from
    /// any thread; from the pull thread itself it only requests the stop.
    ///
    /// If the loop does not exit within the join timeout (a sink write that
    /// never returns) the state stays [`PullState::Stopping`] until the loop
    /// publishes `Stopped` itself, and `start` is refused until then.
    pub fn stop(&self) {
        let requested = self
            .shared
            .state
            .compare_exchange(
                PullState::Running as u8,
                PullState::Stopping as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if CURRENT_PULL.with(|c| c.get()) == self.shared.id() {
            return;
        }
        let mut handle = self.handle.lock();
        if let Some(h) = handle.as_mut() {
            if !h.try_join(self.shared.config.join_timeout) {
                tracing::error!(
                    timeout = ?self.shared.config.join_timeout,
                    "pull thread did not stop within the join timeout"
                );
                return;
            }
        }
        *handle = None;
        if requested {
            tracing::info!(
                slices = self.shared.stats.slices.get(),
                resyncs = self.shared.stats.resyncs.get(),
                "pull thread stopped"
            );
        }
    }
}

impl Drop for AudioPullThread {
    fn drop(&mut self) {
        self.stop();
        let _ = self.set_slave_sink(None);
    }
}

fn run(shared: Arc<Shared>, frames: usize) {
    CURRENT_PULL.with(|c| c.set(shared.id()));
    let sink = Arc::clone(&shared.sink);
    let config = &shared.config;
    let stats = &shared.stats;

    let rate = sink.sample_rate();
    let channels = sink.channels();
    let slice = AudioTime::from_samples(frames as i64, rate);
    let tolerance = config.drift_tolerance;
    let ahead_limit = sink.latency() + slice + tolerance;
    let late_limit = Duration::from_nanos((slice + tolerance).nanos().max(0) as u64);

    let mut buffer = AudioBuffer::new(channels, frames, rate);
    let mut next = sink.now();
    tracing::info!(start = %next, frames, channels, rate, "pull thread running");

    while shared.state() == PullState::Running {
        if !sink.is_open() {
            tracing::warn!("sink closed, pull thread stopping");
            break;
        }
        let started = Instant::now();

        for listener in shared.listeners.load().iter() {
            listener.new_audio_slice(next, slice);
        }
        if !config.reuse_buffers {
            buffer = AudioBuffer::new(channels, frames, rate);
        }
        shared.renderer.render_slice(next, &mut buffer);
        stats
            .render_load
            .set(started.elapsed().as_secs_f64() / slice.secs_f64());

        if shared.state() != PullState::Running {
            break;
        }
        let before_write = sink.now();
        let status = match sink.write(&buffer) {
            Ok(status) => status,
            Err(e) => {
                tracing::error!(error = %e, "sink write failed, pull thread stopping");
                break;
            }
        };
        if let Some(tx) = shared.slave_tx.load().as_ref() {
            match tx.try_send(buffer.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                    stats.slave_drops.incr();
                }
            }
        }
        stats.slices.incr();
        next += slice;

        let sink_now = sink.now();
        let behind = sink_now - next;
        let underrun = status == WriteStatus::Underrun;
        if underrun || behind > tolerance || -behind > ahead_limit {
            stats.resyncs.incr();
            // after an underrun the slice just written starts where the
            // device ran dry, so the write head is one slice past that
            let resynced = if underrun { before_write + slice } else { sink_now };
            tracing::debug!(
                scheduled = %next,
                sink = %sink_now,
                resynced = %resynced,
                underrun,
                "resynchronizing slice time to sink clock"
            );
            next = resynced;
        }

        if started.elapsed() > late_limit {
            stats.late_slices.incr();
        }
    }

    shared.set_state(PullState::Stopped);
    CURRENT_PULL.with(|c| c.set(0));
}
