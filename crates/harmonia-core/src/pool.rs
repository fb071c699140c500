//! Render pool: long-lived workers that render voice groups in parallel.
//!
//! The pull thread hands one job per group to the workers and waits at a
//! barrier for all of them, bounded by `barrier_timeout`. A group that does
//! not come back in time (or whose worker panicked) is silence for that
//! slice. Late results carry the sequence number of their slice and are
//! discarded when they eventually arrive.

use crate::buffer::{AudioBuffer, AudioFormat};
use crate::config::RenderPoolConfig;
use crate::lockfree::{AtomicFlag, Counter};
use crate::mixer::{render_group, VoiceHandle};
use crate::thread::{ThreadFactory, ThreadHandle};
use crate::time::AudioTime;
use crate::Result;
use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use std::ops::Range;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A contiguous run of voices from one slice snapshot.
#[derive(Debug, Clone)]
pub struct VoiceGroup {
    voices: Arc<Vec<VoiceHandle>>,
    range: Range<usize>,
}

impl VoiceGroup {
    pub fn new(voices: Arc<Vec<VoiceHandle>>, range: Range<usize>) -> Self {
        Self { voices, range }
    }

    pub fn voices(&self) -> &[VoiceHandle] {
        &self.voices[self.range.clone()]
    }

    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }
}

struct RenderJob {
    seq: u64,
    index: usize,
    group: VoiceGroup,
    time: AudioTime,
    buffer: AudioBuffer,
    reuse_buffers: bool,
}

struct JobResult {
    seq: u64,
    index: usize,
    buffer: AudioBuffer,
    rendered: u64,
    faults: u64,
}

/// Output of [`RenderPool::render_groups`]: one buffer per group, in group
/// order, plus the totals of the groups that made the barrier.
#[derive(Debug)]
pub struct GroupRender {
    pub buffers: Vec<AudioBuffer>,
    pub rendered: u64,
    pub faults: u64,
}

enum WorkerCommand {
    Render(RenderJob),
    Shutdown,
}

/// Render pool counters.
#[derive(Debug, Default)]
pub struct RenderPoolStats {
    pub jobs: Counter,
    pub voices_rendered: Counter,
    pub faults: Counter,
    pub timeouts: Counter,
    pub stale_results: Counter,
}

struct PoolState {
    seq: u64,
    spare: Vec<AudioBuffer>,
}

/// Fixed-size pool of render workers.
pub struct RenderPool {
    config: RenderPoolConfig,
    worker_count: usize,
    job_tx: Sender<WorkerCommand>,
    result_rx: Receiver<JobResult>,
    workers: Mutex<Vec<ThreadHandle>>,
    state: Mutex<PoolState>,
    stats: Arc<RenderPoolStats>,
    stopped: AtomicFlag,
}

impl RenderPool {
    pub fn new(config: RenderPoolConfig, factory: &ThreadFactory) -> Result<Self> {
        config.validate()?;
        let worker_count = config.resolved_threads();
        let (job_tx, job_rx) = bounded::<WorkerCommand>((worker_count * 4).max(1));
        let (result_tx, result_rx) = unbounded::<JobResult>();
        let stats = Arc::new(RenderPoolStats::default());

        let mut workers = Vec::with_capacity(worker_count);
        for i in 0..worker_count {
            let rx = job_rx.clone();
            let tx = result_tx.clone();
            let handle = factory.spawn(&format!("harmonia-render-{i}"), config.priority, move || {
                worker_loop(rx, tx)
            });
            match handle {
                Ok(h) => workers.push(h),
                Err(e) => {
                    for _ in 0..workers.len() {
                        let _ = job_tx.send(WorkerCommand::Shutdown);
                    }
                    return Err(e);
                }
            }
        }
        tracing::debug!(workers = worker_count, "render pool started");

        Ok(Self {
            config,
            worker_count,
            job_tx,
            result_rx,
            workers: Mutex::new(workers),
            state: Mutex::new(PoolState {
                seq: 0,
                spare: Vec::new(),
            }),
            stats,
            stopped: AtomicFlag::new(false),
        })
    }

    pub fn worker_count(&self) -> usize {
        if self.stopped.get() {
            0
        } else {
            self.worker_count
        }
    }

    pub fn stats(&self) -> &RenderPoolStats {
        &self.stats
    }

    /// Render each group on a worker and wait for all of them.
    ///
    /// The returned buffers are in group order; failed groups are silent.
    pub fn render_groups(
        &self,
        groups: Vec<VoiceGroup>,
        time: AudioTime,
        format: AudioFormat,
        frames: usize,
        reuse_buffers: bool,
    ) -> GroupRender {
        let mut state = self.state.lock();
        state.seq += 1;
        let seq = state.seq;

        let mut results: Vec<Option<AudioBuffer>> = (0..groups.len()).map(|_| None).collect();
        let mut pending = 0usize;
        let mut rendered = 0u64;
        let mut faults = 0u64;

        for (index, group) in groups.into_iter().enumerate() {
            let mut buffer = state
                .spare
                .pop()
                .unwrap_or_else(|| AudioBuffer::with_format(format, frames));
            buffer.ensure(format.channels, frames, format.sample_rate);
            let job = RenderJob {
                seq,
                index,
                group,
                time,
                buffer,
                reuse_buffers,
            };
            match self.job_tx.try_send(WorkerCommand::Render(job)) {
                Ok(()) => {
                    pending += 1;
                    self.stats.jobs.incr();
                }
                Err(TrySendError::Full(cmd) | TrySendError::Disconnected(cmd)) => {
                    self.stats.timeouts.incr();
                    if let WorkerCommand::Render(job) = cmd {
                        results[index] = Some(job.buffer);
                    }
                }
            }
        }

        let deadline = Instant::now() + self.config.barrier_timeout;
        while pending > 0 {
            match self.result_rx.recv_deadline(deadline) {
                Ok(result) if result.seq == seq => {
                    pending -= 1;
                    rendered += result.rendered;
                    faults += result.faults;
                    results[result.index] = Some(result.buffer);
                }
                Ok(stale) => {
                    self.stats.stale_results.incr();
                    state.spare.push(stale.buffer);
                }
                Err(_) => {
                    tracing::warn!(%time, missing = pending, "render barrier timed out, groups treated as silence");
                    self.stats.timeouts.add(pending as u64);
                    break;
                }
            }
        }

        self.stats.voices_rendered.add(rendered);
        self.stats.faults.add(faults);
        let buffers = results
            .into_iter()
            .map(|slot| slot.unwrap_or_else(|| AudioBuffer::with_format(format, frames)))
            .collect();
        GroupRender {
            buffers,
            rendered,
            faults,
        }
    }

    /// Hand group buffers back for reuse.
    pub fn recycle(&self, buffers: Vec<AudioBuffer>) {
        let mut state = self.state.lock();
        let cap = self.worker_count * 2;
        for buffer in buffers {
            if state.spare.len() >= cap {
                break;
            }
            state.spare.push(buffer);
        }
    }

    /// Shut the workers down. Idempotent.
    pub fn stop(&self) {
        if self.stopped.swap(true) {
            return;
        }
        let workers: Vec<ThreadHandle> = std::mem::take(&mut *self.workers.lock());
        for _ in 0..workers.len() {
            if self
                .job_tx
                .send_timeout(WorkerCommand::Shutdown, Duration::from_millis(100))
                .is_err()
            {
                break;
            }
        }
        for worker in workers {
            worker.join_timeout(self.config.join_timeout);
        }
        tracing::debug!("render pool stopped");
    }
}

impl Drop for RenderPool {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(rx: Receiver<WorkerCommand>, tx: Sender<JobResult>) {
    let mut scratch = AudioBuffer::new(0, 0, 1.0);
    while let Ok(cmd) = rx.recv() {
        let mut job = match cmd {
            WorkerCommand::Render(job) => job,
            WorkerCommand::Shutdown => break,
        };
        job.buffer.make_silence();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            render_group(
                job.group.voices(),
                job.time,
                &mut scratch,
                &mut job.buffer,
                job.reuse_buffers,
            )
        }));
        let (rendered, faults) = match outcome {
            Ok(r) => (r.rendered, r.faults),
            Err(_) => {
                tracing::error!(group = job.index, "render worker panicked, group is silent");
                job.buffer.make_silence();
                (0, 1)
            }
        };
        let result = JobResult {
            seq: job.seq,
            index: job.index,
            buffer: job.buffer,
            rendered,
            faults,
        };
        if tx.send(result).is_err() {
            break;
        }
    }
}
