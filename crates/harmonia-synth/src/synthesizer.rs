//! Event dispatcher: turns timestamped events into voices in the mixer.
//!
//! Events arrive through [`Synthesizer::on_event`] from any thread. In
//! synchronous mode they are processed right there; in asynchronous mode
//! they go to a dispatch thread that orders them by `(time, arrival)` and,
//! with realtime scheduling, holds each one until the rendering front is
//! within the scheduling horizon of it.
//!
//! Processing never waits on the pull thread, and the pull thread never
//! waits on processing: voice control goes through the mixer's atomics,
//! and "played" notifications are handed over through a channel that the
//! pull thread drains at the start of each slice.

use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::{ArcSwap, ArcSwapOption};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use harmonia_core::{
    AtomicTime, AudioClock, AudioMixer, AudioTime, Counter, SliceListener, ThreadFactory,
    ThreadHandle, VoiceTag,
};
use harmonia_midi::{ChannelVoiceMsg, EventListener, TimedEvent};
use parking_lot::Mutex;

use crate::channel::{ChannelControls, ChannelState, SynthParams};
use crate::config::{DispatchMode, SynthConfig};
use crate::instrument::{Patch, Soundbank};
use crate::voice::SynthVoice;
use crate::{Error, Result};

const NO_SLICE: AudioTime = AudioTime::MIN;
const IDLE_WAIT: Duration = Duration::from_millis(100);
const MIN_WAIT: Duration = Duration::from_micros(200);
const MAX_WAIT: Duration = Duration::from_millis(20);

/// Observer of events as they become audible.
///
/// Called on the pull thread at the start of the slice that first includes
/// the event; implementations must return quickly.
pub trait SynthesizerListener: Send + Sync {
    /// `time` is the event's effective time on the master timeline.
    fn event_played(&self, time: AudioTime, event: &TimedEvent);
}

/// Dispatcher counters.
#[derive(Debug, Default)]
pub struct SynthStats {
    pub events_received: Counter,
    pub events_processed: Counter,
    /// Events whose time had already been passed by the rendering front.
    pub late_events: Counter,
    pub voices_started: Counter,
    /// Note layers lost to the mixer's voice limit.
    pub dropped_notes: Counter,
    /// Events for channels beyond the configured count.
    pub ignored_events: Counter,
}

#[derive(Debug, Clone)]
struct Scheduled {
    time: AudioTime,
    seq: u64,
    event: TimedEvent,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.seq == other.seq
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        (self.time, self.seq).cmp(&(other.time, other.seq))
    }
}

enum DispatchCommand {
    Event(Scheduled),
    Shutdown,
}

struct DispatchState {
    soundbank: Arc<dyn Soundbank>,
    channels: Vec<ChannelState>,
}

struct SynthInner {
    config: SynthConfig,
    mixer: Arc<AudioMixer>,
    master: Arc<dyn AudioClock>,
    params: Arc<SynthParams>,
    state: Mutex<DispatchState>,
    slice_start: AtomicTime,
    seq: AtomicU64,
    listeners: ArcSwap<Vec<Arc<dyn SynthesizerListener>>>,
    played_tx: Sender<Scheduled>,
    played_rx: Receiver<Scheduled>,
    played: Mutex<BinaryHeap<Reverse<Scheduled>>>,
    stats: SynthStats,
}

impl SynthInner {
    /// Start of the slice being rendered, or the master time before the
    /// first slice.
    fn rendering_front(&self) -> AudioTime {
        let start = self.slice_start.get();
        if start == NO_SLICE {
            self.master.now()
        } else {
            start
        }
    }

    fn schedule(&self, event: TimedEvent) -> Scheduled {
        Scheduled {
            time: event.time.saturating_add(self.config.fixed_delay),
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            event,
        }
    }

    fn is_due(&self, time: AudioTime) -> bool {
        !self.config.realtime_scheduling
            || time < self.rendering_front().saturating_add(self.config.scheduling_horizon)
    }

    fn wait_for(&self, time: AudioTime) -> Duration {
        let due_in = time - self.config.scheduling_horizon - self.rendering_front();
        Duration::from_nanos(due_in.nanos().max(0) as u64).clamp(MIN_WAIT, MAX_WAIT)
    }

    fn dispatch(&self, mut scheduled: Scheduled) {
        let front = self.rendering_front();
        if scheduled.time < front {
            self.stats.late_events.incr();
            tracing::trace!(event = %scheduled.event, %front, "late event clamped to slice start");
            scheduled.time = front;
        }
        self.process(&scheduled.event, scheduled.time);
        self.stats.events_processed.incr();
        if !self.listeners.load().is_empty() {
            let _ = self.played_tx.send(scheduled);
        }
    }

    fn process(&self, event: &TimedEvent, time: AudioTime) {
        let mut state = self.state.lock();
        if event.is_reset() {
            self.reset_locked(&mut state);
            return;
        }
        let Some(msg) = event.voice_msg() else {
            return;
        };
        let DispatchState {
            soundbank,
            channels,
        } = &mut *state;
        let Some(channel) = channels.get_mut(usize::from(event.channel)) else {
            self.stats.ignored_events.incr();
            tracing::trace!(channel = event.channel, "event for unconfigured channel ignored");
            return;
        };

        match *msg {
            ChannelVoiceMsg::NoteOn { note, velocity } if velocity > 0 => {
                self.note_on(&**soundbank, channel, note, velocity, time)
            }
            ChannelVoiceMsg::NoteOn { note, .. } | ChannelVoiceMsg::NoteOff { note, .. } => {
                self.note_off(channel, note, time)
            }
            ChannelVoiceMsg::ControlChange { .. } => {
                if let Some((control, value)) = event.control() {
                    self.control_change(channel, control, value, time);
                }
            }
            ChannelVoiceMsg::ProgramChange { program } => channel.program = program,
            ChannelVoiceMsg::PitchBend { bend } => channel
                .controls
                .set_pitch_bend(bend, self.config.pitch_bend_range),
            _ => {}
        }
    }

    fn note_on(
        &self,
        soundbank: &dyn Soundbank,
        channel: &ChannelState,
        note: u8,
        velocity: u8,
        time: AudioTime,
    ) {
        let patch = channel.patch();
        let layers = soundbank.resolve(&patch, note, velocity);
        if layers.is_empty() {
            tracing::trace!(?patch, note, "no instrument mapped");
            return;
        }
        if layers.iter().any(|p| p.self_exclusive) {
            self.release_note(channel.index, note, time);
        }
        for params in layers {
            let mut tag = VoiceTag::new(channel.index, note);
            if let Some(group) = params.exclusive_group {
                tag = tag.with_exclusive_group(group);
            }
            let voice = SynthVoice::new(
                params,
                channel.index,
                time,
                Arc::clone(&channel.controls),
                Arc::clone(&self.params),
            );
            match self.mixer.add(tag, Box::new(voice)) {
                Ok(_) => self.stats.voices_started.incr(),
                Err(e) => {
                    self.stats.dropped_notes.incr();
                    tracing::debug!(channel = channel.index, note, error = %e, "note dropped");
                }
            }
        }
    }

    /// Release every sounding instance of `note`, pedal-held ones included.
    fn release_note(&self, channel: u8, note: u8, time: AudioTime) {
        for voice in self.mixer.voices().iter() {
            let tag = voice.tag();
            if tag.channel == channel && tag.note == note && !voice.is_done() {
                voice.release(time);
            }
        }
    }

    fn note_off(&self, channel: &ChannelState, note: u8, time: AudioTime) {
        if channel.sustain {
            self.mixer.sustain_matching(channel.index, note);
        } else {
            self.mixer.release_matching(channel.index, note, time);
        }
    }

    fn control_change(&self, channel: &mut ChannelState, control: u8, value: u8, time: AudioTime) {
        match control {
            0 => channel.bank_msb = value,
            32 => channel.bank_lsb = value,
            7 => channel.controls.set_volume(value),
            10 => channel.controls.set_pan(value),
            11 => channel.controls.set_expression(value),
            64 => {
                let down = value >= 64;
                if channel.sustain && !down {
                    self.mixer.release_sustained(channel.index, time);
                }
                channel.sustain = down;
            }
            120 => {
                self.mixer.terminate_channel(channel.index);
            }
            121 => {
                channel.controls.reset_controllers();
                if channel.sustain {
                    channel.sustain = false;
                    self.mixer.release_sustained(channel.index, time);
                }
            }
            123 => {
                channel.sustain = false;
                self.mixer.release_channel(channel.index, time);
            }
            _ => {}
        }
    }

    fn reset_locked(&self, state: &mut DispatchState) {
        let terminated = self.mixer.terminate_all();
        for channel in &mut state.channels {
            channel.reset();
        }
        tracing::debug!(terminated, "synthesizer reset");
    }

    fn fire_played(&self, slice_end: AudioTime) {
        let Some(mut heap) = self.played.try_lock() else {
            return;
        };
        while let Ok(scheduled) = self.played_rx.try_recv() {
            heap.push(Reverse(scheduled));
        }
        let listeners = self.listeners.load();
        while let Some(Reverse(next)) = heap.peek() {
            if next.time >= slice_end {
                break;
            }
            let Some(Reverse(played)) = heap.pop() else {
                break;
            };
            for listener in listeners.iter() {
                listener.event_played(played.time, &played.event);
            }
        }
    }
}

fn dispatch_loop(inner: Arc<SynthInner>, rx: Receiver<DispatchCommand>) {
    let mut queue: BinaryHeap<Reverse<Scheduled>> = BinaryHeap::new();
    'run: loop {
        while let Some(Reverse(next)) = queue.peek() {
            if !inner.is_due(next.time) {
                break;
            }
            if let Some(Reverse(due)) = queue.pop() {
                inner.dispatch(due);
            }
        }

        let wait = match queue.peek() {
            Some(Reverse(next)) => inner.wait_for(next.time),
            None => IDLE_WAIT,
        };
        match rx.recv_timeout(wait) {
            Ok(DispatchCommand::Event(e)) => queue.push(Reverse(e)),
            Ok(DispatchCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => break 'run,
            Err(RecvTimeoutError::Timeout) => continue,
        }
        loop {
            match rx.try_recv() {
                Ok(DispatchCommand::Event(e)) => queue.push(Reverse(e)),
                Ok(DispatchCommand::Shutdown) | Err(TryRecvError::Disconnected) => break 'run,
                Err(TryRecvError::Empty) => break,
            }
        }
    }
    if !queue.is_empty() {
        tracing::debug!(pending = queue.len(), "dispatch thread stopped with events queued");
    }
}

struct DispatchWorker {
    handle: Option<ThreadHandle>,
}

/// The synthesizer core: channel state, event scheduling and voice
/// allocation.
pub struct Synthesizer {
    inner: Arc<SynthInner>,
    factory: ThreadFactory,
    mode: Mutex<DispatchMode>,
    worker: Mutex<Option<DispatchWorker>>,
    dispatch_tx: ArcSwapOption<Sender<DispatchCommand>>,
}

impl Synthesizer {
    pub fn new(
        config: SynthConfig,
        soundbank: Arc<dyn Soundbank>,
        mixer: Arc<AudioMixer>,
        master: Arc<dyn AudioClock>,
        factory: ThreadFactory,
    ) -> Result<Self> {
        config.validate()?;
        let channels = (0..config.channels)
            .map(|i| ChannelState::new(i as u8))
            .collect();
        let (played_tx, played_rx) = unbounded();
        let mode = config.dispatch_mode;
        let inner = SynthInner {
            config,
            mixer,
            master,
            params: Arc::new(SynthParams::new()),
            state: Mutex::new(DispatchState {
                soundbank,
                channels,
            }),
            slice_start: AtomicTime::new(NO_SLICE),
            seq: AtomicU64::new(0),
            listeners: ArcSwap::from_pointee(Vec::new()),
            played_tx,
            played_rx,
            played: Mutex::new(BinaryHeap::new()),
            stats: SynthStats::default(),
        };
        Ok(Self {
            inner: Arc::new(inner),
            factory,
            mode: Mutex::new(mode),
            worker: Mutex::new(None),
            dispatch_tx: ArcSwapOption::empty(),
        })
    }

    pub fn config(&self) -> &SynthConfig {
        &self.inner.config
    }

    pub fn mixer(&self) -> &Arc<AudioMixer> {
        &self.inner.mixer
    }

    pub fn params(&self) -> &Arc<SynthParams> {
        &self.inner.params
    }

    pub fn stats(&self) -> &SynthStats {
        &self.inner.stats
    }

    pub fn soundbank(&self) -> Arc<dyn Soundbank> {
        Arc::clone(&self.inner.state.lock().soundbank)
    }

    /// Swap the soundbank. Sounding voices keep playing.
    pub fn set_soundbank(&self, soundbank: Arc<dyn Soundbank>) {
        tracing::debug!(name = soundbank.name(), "soundbank changed");
        self.inner.state.lock().soundbank = soundbank;
    }

    pub fn patch(&self, channel: u8) -> Option<Patch> {
        self.inner
            .state
            .lock()
            .channels
            .get(usize::from(channel))
            .map(ChannelState::patch)
    }

    pub fn channel_controls(&self, channel: u8) -> Option<Arc<ChannelControls>> {
        self.inner
            .state
            .lock()
            .channels
            .get(usize::from(channel))
            .map(|c| Arc::clone(&c.controls))
    }

    /// The configured mode before [`start`](Self::start), the resolved one
    /// after.
    pub fn dispatch_mode(&self) -> DispatchMode {
        *self.mode.lock()
    }

    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }

    /// Start of the slice the pull thread is rendering, if any.
    pub fn slice_start(&self) -> Option<AudioTime> {
        let start = self.inner.slice_start.get();
        (start != NO_SLICE).then_some(start)
    }

    pub fn add_listener(&self, listener: Arc<dyn SynthesizerListener>) {
        self.inner.listeners.rcu(|current| {
            let mut next = Vec::clone(current);
            next.push(Arc::clone(&listener));
            next
        });
    }

    pub fn remove_listener(&self, listener: &Arc<dyn SynthesizerListener>) {
        let target = Arc::as_ptr(listener) as *const ();
        self.inner.listeners.rcu(|current| {
            current
                .iter()
                .filter(|l| Arc::as_ptr(l) as *const () != target)
                .cloned()
                .collect::<Vec<_>>()
        });
    }

    /// Resolve the dispatch mode against `output_latency` and, in
    /// asynchronous mode, start the dispatch thread.
    pub fn start(&self, output_latency: AudioTime) -> Result<DispatchMode> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Err(Error::AlreadyRunning);
        }
        let config = &self.inner.config;
        let mode = config
            .dispatch_mode
            .resolve(output_latency, config.async_latency_threshold);

        let handle = if mode == DispatchMode::Async {
            let (tx, rx) = unbounded();
            let inner = Arc::clone(&self.inner);
            let handle = self
                .factory
                .spawn("harmonia-dispatch", config.priority, move || {
                    dispatch_loop(inner, rx)
                })?;
            self.dispatch_tx.store(Some(Arc::new(tx)));
            Some(handle)
        } else {
            None
        };
        *self.mode.lock() = mode;
        *worker = Some(DispatchWorker { handle });
        tracing::debug!(?mode, %output_latency, "synthesizer started");
        Ok(mode)
    }

    /// Stop the dispatch thread. Events still held in its queue are dropped;
    /// events arriving afterwards are processed inline. Idempotent.
    pub fn stop(&self) {
        let Some(worker) = self.worker.lock().take() else {
            return;
        };
        if let Some(tx) = self.dispatch_tx.swap(None) {
            let _ = tx.send(DispatchCommand::Shutdown);
        }
        if let Some(handle) = worker.handle {
            handle.join_timeout(self.inner.config.join_timeout);
        }
        tracing::debug!("synthesizer stopped");
    }

    /// Accept an event from any thread. Never blocks on the dispatch thread.
    pub fn on_event(&self, event: TimedEvent) {
        self.inner.stats.events_received.incr();
        let scheduled = self.inner.schedule(event);
        let guard = self.dispatch_tx.load();
        if let Some(tx) = &*guard {
            match tx.send(DispatchCommand::Event(scheduled)) {
                Ok(()) => return,
                Err(e) => {
                    if let DispatchCommand::Event(scheduled) = e.into_inner() {
                        self.inner.dispatch(scheduled);
                    }
                    return;
                }
            }
        }
        self.inner.dispatch(scheduled);
    }

    /// Silence everything and return all channels to their initial state.
    pub fn reset(&self) {
        let mut state = self.inner.state.lock();
        self.inner.reset_locked(&mut state);
    }
}

impl Drop for Synthesizer {
    fn drop(&mut self) {
        self.stop();
    }
}

impl EventListener for Synthesizer {
    fn event_received(&self, event: TimedEvent) {
        self.on_event(event);
    }
}

impl SliceListener for Synthesizer {
    fn new_audio_slice(&self, time: AudioTime, duration: AudioTime) {
        self.inner.slice_start.set(time);
        self.inner.fire_played(time + duration);
    }
}
