//! Voice mixer.
//!
//! The live voice set is an immutable `Vec` behind an [`ArcSwap`]. Rendering
//! loads it without locking; `add`/`remove` build a new `Vec` under a short
//! writer lock and swap it in. The pull thread only ever `try_lock`s the
//! writer lock, so the dispatcher can never make it wait.
//!
//! Voice control (release, sustain, terminate) goes through per-voice atomics
//! that the renderer applies before the voice's next slice.

use crate::buffer::AudioBuffer;
use crate::config::MixerConfig;
use crate::lockfree::{AtomicFlag, AtomicTime, Counter};
use crate::maintenance::Serviceable;
use crate::pool::{RenderPool, VoiceGroup};
use crate::pull::SliceRenderer;
use crate::render::{Renderable, VoiceTag};
use crate::time::AudioTime;
use crate::{Error, Result};
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::ops::Range;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub type VoiceId = u64;

/// Shared handle to a voice owned by a mixer.
pub type VoiceHandle = Arc<MixerVoice>;

#[derive(Debug, Default)]
struct VoiceControl {
    done: AtomicFlag,
    terminated: AtomicFlag,
    released: AtomicFlag,
    release_pending: AtomicFlag,
    release_at: AtomicTime,
    sustained: AtomicFlag,
}

/// A voice in the live set, with its tag and control state.
pub struct MixerVoice {
    id: VoiceId,
    tag: VoiceTag,
    control: VoiceControl,
    voice: Mutex<Box<dyn Renderable>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RenderOutcome {
    Rendered,
    Skipped,
    Fault,
}

impl MixerVoice {
    fn new(id: VoiceId, tag: VoiceTag, voice: Box<dyn Renderable>) -> Self {
        Self {
            id,
            tag,
            control: VoiceControl::default(),
            voice: Mutex::new(voice),
        }
    }

    pub fn id(&self) -> VoiceId {
        self.id
    }

    pub fn tag(&self) -> VoiceTag {
        self.tag
    }

    /// Schedule the release at `time`. Returns `false` if already released.
    pub fn release(&self, time: AudioTime) -> bool {
        if self.control.released.swap(true) {
            return false;
        }
        self.control.sustained.set(false);
        self.control.release_at.set(time);
        self.control.release_pending.set(true);
        true
    }

    /// Stop immediately; the voice is skipped from now on and swept.
    pub fn terminate(&self) {
        self.control.terminated.set(true);
    }

    pub fn is_released(&self) -> bool {
        self.control.released.get()
    }

    pub fn is_sustained(&self) -> bool {
        self.control.sustained.get()
    }

    pub fn is_terminated(&self) -> bool {
        self.control.terminated.get()
    }

    pub fn is_done(&self) -> bool {
        self.control.done.get() || self.control.terminated.get()
    }

    pub fn already_rendered(&self, time: AudioTime) -> bool {
        self.voice
            .try_lock()
            .map_or(false, |v| v.already_rendered(time))
    }

    /// Render into `scratch`. Busy voices (still held by a late worker) are
    /// skipped for this slice.
    pub(crate) fn render_into(&self, time: AudioTime, scratch: &mut AudioBuffer) -> RenderOutcome {
        if self.is_done() {
            return RenderOutcome::Skipped;
        }
        let Some(mut voice) = self.voice.try_lock() else {
            return RenderOutcome::Skipped;
        };
        if self.control.release_pending.swap(false) {
            voice.release(self.control.release_at.get());
        }
        if voice.already_rendered(time) {
            return RenderOutcome::Skipped;
        }
        match panic::catch_unwind(AssertUnwindSafe(|| voice.render(time, scratch))) {
            Ok(rendered) => {
                if voice.is_done() {
                    self.control.done.set(true);
                }
                if rendered {
                    RenderOutcome::Rendered
                } else {
                    RenderOutcome::Skipped
                }
            }
            Err(_) => {
                tracing::error!(voice = self.id, %time, "voice panicked during render, terminating");
                self.control.terminated.set(true);
                RenderOutcome::Fault
            }
        }
    }
}

impl std::fmt::Debug for MixerVoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MixerVoice")
            .field("id", &self.id)
            .field("tag", &self.tag)
            .field("done", &self.is_done())
            .finish()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct GroupResult {
    pub rendered: u64,
    pub faults: u64,
}

/// Render `voices` one after another into `out`, accumulating.
pub(crate) fn render_group(
    voices: &[VoiceHandle],
    time: AudioTime,
    scratch: &mut AudioBuffer,
    out: &mut AudioBuffer,
    reuse_buffers: bool,
) -> GroupResult {
    let mut result = GroupResult::default();
    for voice in voices {
        if reuse_buffers {
            scratch.ensure_like(out);
        } else {
            *scratch = AudioBuffer::with_format(out.format(), out.frames());
        }
        match voice.render_into(time, scratch) {
            RenderOutcome::Rendered => {
                out.mix_from(scratch);
                result.rendered += 1;
            }
            RenderOutcome::Fault => result.faults += 1,
            RenderOutcome::Skipped => {}
        }
    }
    result
}

/// Split `len` voices into at most `groups` contiguous ranges.
///
/// Deterministic for a given `len` and `groups`; never yields empty ranges.
pub fn partition(len: usize, groups: usize) -> Vec<Range<usize>> {
    if len == 0 || groups == 0 {
        return Vec::new();
    }
    let size = len.div_ceil(groups);
    (0..len)
        .step_by(size)
        .map(|start| start..(start + size).min(len))
        .collect()
}

/// Mixer counters.
#[derive(Debug, Default)]
pub struct MixerStats {
    pub slices: Counter,
    pub voices_rendered: Counter,
    pub render_faults: Counter,
    pub stolen: Counter,
    pub swept: Counter,
    pub deferred_sweeps: Counter,
    pub rejected: Counter,
}

/// Thread-safe set of live voices, rendered one slice at a time.
pub struct AudioMixer {
    config: MixerConfig,
    voices: ArcSwap<Vec<VoiceHandle>>,
    writer: Mutex<()>,
    pool: Option<Arc<RenderPool>>,
    scratch: Mutex<AudioBuffer>,
    next_id: AtomicU64,
    stats: MixerStats,
}

impl AudioMixer {
    pub fn new(config: MixerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            voices: ArcSwap::from_pointee(Vec::new()),
            writer: Mutex::new(()),
            pool: None,
            scratch: Mutex::new(AudioBuffer::new(0, 0, 1.0)),
            next_id: AtomicU64::new(1),
            stats: MixerStats::default(),
        })
    }

    /// Render through `pool` once the voice count reaches the threshold.
    pub fn with_pool(mut self, pool: Arc<RenderPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn config(&self) -> &MixerConfig {
        &self.config
    }

    pub fn pool(&self) -> Option<&Arc<RenderPool>> {
        self.pool.as_ref()
    }

    pub fn stats(&self) -> &MixerStats {
        &self.stats
    }

    /// Insert a voice.
    ///
    /// If the tag carries an exclusive group, every live voice with the same
    /// `(channel, group)` is terminated and removed in the same update.
    pub fn add(&self, tag: VoiceTag, voice: Box<dyn Renderable>) -> Result<VoiceHandle> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = Arc::new(MixerVoice::new(id, tag, voice));
        let key = tag.exclusive_key();

        let _guard = self.writer.lock();
        let current = self.voices.load();
        let mut next = Vec::with_capacity(current.len() + 1);
        let mut stolen = 0u64;
        for existing in current.iter() {
            if key.is_some() && existing.tag.exclusive_key() == key && !existing.is_done() {
                existing.terminate();
                stolen += 1;
                continue;
            }
            next.push(Arc::clone(existing));
        }
        let live = next.iter().filter(|v| !v.is_done()).count();
        if live >= self.config.max_voices {
            self.stats.rejected.incr();
            return Err(Error::VoiceLimit(self.config.max_voices));
        }
        next.push(Arc::clone(&handle));
        self.voices.store(Arc::new(next));

        if stolen > 0 {
            self.stats.stolen.add(stolen);
            tracing::trace!(voice = id, ?key, stolen, "exclusive group steal");
        }
        Ok(handle)
    }

    /// Remove a voice from the live set.
    pub fn remove(&self, handle: &VoiceHandle) -> bool {
        let _guard = self.writer.lock();
        let current = self.voices.load();
        if !current.iter().any(|v| Arc::ptr_eq(v, handle)) {
            return false;
        }
        let next: Vec<VoiceHandle> = current
            .iter()
            .filter(|v| !Arc::ptr_eq(v, handle))
            .cloned()
            .collect();
        self.voices.store(Arc::new(next));
        true
    }

    /// Voices in the live set, including finished ones not yet swept.
    pub fn count(&self) -> usize {
        self.voices.load().len()
    }

    pub fn voices(&self) -> Arc<Vec<VoiceHandle>> {
        self.voices.load_full()
    }

    /// Release voices playing `note` on `channel` that are neither released
    /// nor held by the sustain pedal.
    pub fn release_matching(&self, channel: u8, note: u8, time: AudioTime) -> usize {
        self.for_each_live(|v| {
            v.tag.channel == channel && v.tag.note == note && !v.is_released() && !v.is_sustained()
        }, |v| {
            v.release(time);
        })
    }

    /// Mark playing voices of `note` as held by the sustain pedal.
    pub fn sustain_matching(&self, channel: u8, note: u8) -> usize {
        self.for_each_live(|v| {
            v.tag.channel == channel && v.tag.note == note && !v.is_released()
        }, |v| {
            v.control.sustained.set(true);
        })
    }

    /// Release every voice held by the sustain pedal on `channel`.
    pub fn release_sustained(&self, channel: u8, time: AudioTime) -> usize {
        self.for_each_live(|v| v.tag.channel == channel && v.is_sustained(), |v| {
            v.release(time);
        })
    }

    pub fn release_channel(&self, channel: u8, time: AudioTime) -> usize {
        self.for_each_live(|v| v.tag.channel == channel && !v.is_released(), |v| {
            v.release(time);
        })
    }

    pub fn terminate_channel(&self, channel: u8) -> usize {
        self.for_each_live(|v| v.tag.channel == channel, |v| v.terminate())
    }

    pub fn terminate_all(&self) -> usize {
        self.for_each_live(|_| true, |v| v.terminate())
    }

    fn for_each_live(
        &self,
        mut filter: impl FnMut(&MixerVoice) -> bool,
        mut action: impl FnMut(&MixerVoice),
    ) -> usize {
        let mut n = 0;
        for voice in self.voices.load().iter() {
            if !voice.is_done() && filter(voice) {
                action(voice);
                n += 1;
            }
        }
        n
    }

    /// Render the slice starting at `time` into `out`.
    pub fn render_slice(&self, time: AudioTime, out: &mut AudioBuffer) {
        let snapshot = self.voices.load_full();
        out.make_silence();
        self.stats.slices.incr();

        let pool = self
            .pool
            .as_ref()
            .filter(|p| p.worker_count() > 0 && snapshot.len() >= self.config.parallel_threshold);

        if let Some(pool) = pool {
            let groups: Vec<VoiceGroup> = partition(snapshot.len(), pool.worker_count())
                .into_iter()
                .map(|range| VoiceGroup::new(Arc::clone(&snapshot), range))
                .collect();
            let render = pool.render_groups(groups, time, out.format(), out.frames(), self.config.reuse_buffers);
            for buffer in &render.buffers {
                out.mix_from(buffer);
            }
            self.stats.voices_rendered.add(render.rendered);
            self.stats.render_faults.add(render.faults);
            pool.recycle(render.buffers);
        } else if !snapshot.is_empty() {
            let mut scratch = self.scratch.lock();
            let result = render_group(&snapshot, time, &mut scratch, out, self.config.reuse_buffers);
            self.stats.voices_rendered.add(result.rendered);
            self.stats.render_faults.add(result.faults);
        }

        if snapshot.iter().any(|v| v.is_done()) {
            match self.writer.try_lock() {
                Some(guard) => self.sweep_locked(&guard),
                None => self.stats.deferred_sweeps.incr(),
            }
        }
    }

    fn sweep_locked(&self, _guard: &parking_lot::MutexGuard<'_, ()>) {
        let current = self.voices.load();
        if !current.iter().any(|v| v.is_done()) {
            return;
        }
        let next: Vec<VoiceHandle> = current.iter().filter(|v| !v.is_done()).cloned().collect();
        let removed = current.len() - next.len();
        self.voices.store(Arc::new(next));
        self.stats.swept.add(removed as u64);
    }

    /// Remove finished voices now.
    pub fn sweep(&self) {
        let guard = self.writer.lock();
        self.sweep_locked(&guard);
    }
}

impl SliceRenderer for AudioMixer {
    fn render_slice(&self, time: AudioTime, out: &mut AudioBuffer) {
        AudioMixer::render_slice(self, time, out);
    }
}

impl Serviceable for AudioMixer {
    fn service(&self) {
        self.sweep();
        tracing::trace!(
            voices = self.count(),
            slices = self.stats.slices.get(),
            faults = self.stats.render_faults.get(),
            stolen = self.stats.stolen.get(),
            "mixer service"
        );
    }
}
