//! Audio output sinks.

use crate::buffer::{AudioBuffer, AudioFormat};
use crate::clock::{AdjustableClock, AudioClock, ClockOffset};
use crate::lockfree::{AtomicFlag, Counter};
use crate::time::AudioTime;
use crate::{Error, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// Outcome of a successful [`AudioSink::write`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    Accepted,
    /// Data was accepted, but the device ran dry before it arrived.
    Underrun,
}

/// Destination of rendered slices.
///
/// The sink's clock reports the device position on the shared timeline.
pub trait AudioSink: AdjustableClock {
    /// Blocks until `buffer` is accepted or the sink closes.
    fn write(&self, buffer: &AudioBuffer) -> Result<WriteStatus>;

    fn is_open(&self) -> bool;

    fn close(&self);

    fn channels(&self) -> usize;

    /// Device buffer size in frames.
    fn buffer_size(&self) -> usize;

    fn sample_rate(&self) -> f64;

    fn format(&self) -> AudioFormat {
        AudioFormat::new(self.channels(), self.sample_rate())
    }

    /// Device buffer duration.
    fn latency(&self) -> AudioTime {
        AudioTime::from_samples(self.buffer_size() as i64, self.sample_rate())
    }
}

/// In-memory sink.
///
/// Without pacing the device clock is the number of frames written, which
/// makes rendering run as fast as possible. With pacing the device plays in
/// wall-clock time and `write` blocks while more than `buffer_size` frames
/// are queued; a write that arrives after the device ran dry reports
/// [`WriteStatus::Underrun`].
pub struct MemorySink {
    format: AudioFormat,
    buffer_frames: usize,
    paced: bool,
    capture: bool,
    captured: Mutex<Vec<Vec<f32>>>,
    frames_written: AtomicU64,
    origin: OnceLock<Instant>,
    offset: ClockOffset,
    open: AtomicFlag,
    underruns: Counter,
}

impl MemorySink {
    /// Unpaced sink that keeps everything written.
    pub fn new(format: AudioFormat, buffer_frames: usize) -> Self {
        Self {
            format,
            buffer_frames: buffer_frames.max(1),
            paced: false,
            capture: true,
            captured: Mutex::new(vec![Vec::new(); format.channels]),
            frames_written: AtomicU64::new(0),
            origin: OnceLock::new(),
            offset: ClockOffset::new(),
            open: AtomicFlag::new(true),
            underruns: Counter::default(),
        }
    }

    /// Play in wall-clock time like a hardware device.
    pub fn paced(mut self) -> Self {
        self.paced = true;
        self
    }

    /// Count frames without keeping them.
    pub fn discarding(mut self) -> Self {
        self.capture = false;
        self
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written.load(Ordering::Acquire)
    }

    pub fn underrun_count(&self) -> u64 {
        self.underruns.get()
    }

    /// Everything written so far, one `Vec` per channel.
    pub fn captured(&self) -> Vec<Vec<f32>> {
        self.captured.lock().clone()
    }

    fn played_frames(&self) -> u64 {
        match self.origin.get() {
            Some(origin) => (origin.elapsed().as_secs_f64() * self.format.sample_rate) as u64,
            None => 0,
        }
    }

    fn wait_for_room(&self, frames: u64) {
        loop {
            if !self.open.get() {
                return;
            }
            let queued = self.frames_written().saturating_sub(self.played_frames());
            if queued + frames <= self.buffer_frames as u64 {
                return;
            }
            let excess = queued + frames - self.buffer_frames as u64;
            let wait = Duration::from_secs_f64(excess as f64 / self.format.sample_rate);
            std::thread::sleep(wait.min(Duration::from_millis(1)));
        }
    }
}

impl AudioClock for MemorySink {
    fn now(&self) -> AudioTime {
        self.offset.apply(self.device_time())
    }
}

impl AdjustableClock for MemorySink {
    fn device_time(&self) -> AudioTime {
        let frames = if self.paced {
            self.played_frames()
        } else {
            self.frames_written()
        };
        AudioTime::from_samples(frames as i64, self.format.sample_rate)
    }

    fn offset(&self) -> AudioTime {
        self.offset.get()
    }

    fn set_offset(&self, offset: AudioTime) {
        self.offset.set(offset);
    }
}

impl AudioSink for MemorySink {
    fn write(&self, buffer: &AudioBuffer) -> Result<WriteStatus> {
        if !self.open.get() {
            return Err(Error::SinkClosed);
        }
        if buffer.channels() != self.format.channels {
            return Err(Error::Device(format!(
                "expected {} channels, got {}",
                self.format.channels,
                buffer.channels()
            )));
        }
        let frames = buffer.frames() as u64;
        let mut status = WriteStatus::Accepted;
        let mut gap = 0u64;

        if self.paced {
            let _ = self.origin.get_or_init(Instant::now);
            let played = self.played_frames();
            let written = self.frames_written();
            if played > written {
                status = WriteStatus::Underrun;
                gap = played - written;
                self.underruns.incr();
                self.frames_written.store(played, Ordering::Release);
            }
            self.wait_for_room(frames);
        }

        if self.capture {
            let mut captured = self.captured.lock();
            for (ch, dst) in captured.iter_mut().enumerate() {
                dst.resize(dst.len() + gap as usize, 0.0);
                dst.extend_from_slice(buffer.channel(ch));
            }
        }
        self.frames_written.fetch_add(frames, Ordering::AcqRel);
        Ok(status)
    }

    fn is_open(&self) -> bool {
        self.open.get()
    }

    fn close(&self) {
        self.open.set(false);
    }

    fn channels(&self) -> usize {
        self.format.channels
    }

    fn buffer_size(&self) -> usize {
        self.buffer_frames
    }

    fn sample_rate(&self) -> f64 {
        self.format.sample_rate
    }
}
