//! WAV disk writer using hound
//!
//! Supports 16-bit, 24-bit, and 32-bit float WAV files.

use crate::error::{ExportError, Result};
use harmonia_core::{
    AdjustableClock, AudioBuffer, AudioClock, AudioFormat, AudioSink, AudioTime, ClockOffset,
    WriteStatus,
};
use hound::{SampleFormat, WavSpec, WavWriter};
use parking_lot::Mutex;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Output sample format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BitDepth {
    Int16,
    #[default]
    Int24,
    Float32,
}

impl BitDepth {
    /// Bits per sample.
    pub fn bits(&self) -> u16 {
        match self {
            BitDepth::Int16 => 16,
            BitDepth::Int24 => 24,
            BitDepth::Float32 => 32,
        }
    }
}

/// WAV writer configuration
#[derive(Debug, Clone)]
pub struct WavConfig {
    /// Sample rate in Hz
    pub sample_rate: u32,
    pub bit_depth: BitDepth,
    pub channels: u16,
}

impl Default for WavConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            bit_depth: BitDepth::Int16,
            channels: 2,
        }
    }
}

impl WavConfig {
    pub fn stereo(sample_rate: u32, bit_depth: BitDepth) -> Self {
        Self {
            sample_rate,
            bit_depth,
            channels: 2,
        }
    }

    pub fn mono(sample_rate: u32, bit_depth: BitDepth) -> Self {
        Self {
            sample_rate,
            bit_depth,
            channels: 1,
        }
    }

    /// Same rate and channel count as `format`.
    pub fn for_format(format: AudioFormat, bit_depth: BitDepth) -> Result<Self> {
        let sample_rate = format.sample_rate.round();
        if sample_rate < 1.0 || sample_rate > f64::from(u32::MAX) {
            return Err(ExportError::InvalidOptions(format!(
                "sample rate {} out of range",
                format.sample_rate
            )));
        }
        let channels = u16::try_from(format.channels).map_err(|_| {
            ExportError::InvalidOptions(format!("{} channels out of range", format.channels))
        })?;
        let config = Self {
            sample_rate: sample_rate as u32,
            bit_depth,
            channels,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.channels == 0 {
            return Err(ExportError::InvalidOptions("channels must be > 0".into()));
        }
        if self.sample_rate == 0 {
            return Err(ExportError::InvalidOptions("sample_rate must be > 0".into()));
        }
        Ok(())
    }

    fn spec(&self) -> WavSpec {
        let sample_format = match self.bit_depth {
            BitDepth::Float32 => SampleFormat::Float,
            _ => SampleFormat::Int,
        };
        WavSpec {
            channels: self.channels,
            sample_rate: self.sample_rate,
            bits_per_sample: self.bit_depth.bits(),
            sample_format,
        }
    }
}

type FileWriter = WavWriter<BufWriter<File>>;

/// Sink that writes every slice to a WAV file.
///
/// The device clock counts frames written, so a pull thread driving this sink
/// never waits. The file header is completed by [`finalize`](Self::finalize)
/// or [`AudioSink::close`]; dropping the sink closes it too.
pub struct WavSink {
    config: WavConfig,
    path: PathBuf,
    buffer_frames: usize,
    writer: Mutex<Option<FileWriter>>,
    frames_written: AtomicU64,
    offset: ClockOffset,
}

impl WavSink {
    /// Create (or truncate) the file at `path`. `buffer_frames` is the
    /// device buffer the pull thread sizes its slices against.
    pub fn create(path: impl AsRef<Path>, config: WavConfig, buffer_frames: usize) -> Result<Self> {
        config.validate()?;
        let path = path.as_ref().to_path_buf();
        let writer = WavWriter::create(&path, config.spec())?;
        tracing::debug!(
            path = %path.display(),
            channels = config.channels,
            rate = config.sample_rate,
            bits = config.bit_depth.bits(),
            "WAV sink opened"
        );
        Ok(Self {
            config,
            path,
            buffer_frames: buffer_frames.max(1),
            writer: Mutex::new(Some(writer)),
            frames_written: AtomicU64::new(0),
            offset: ClockOffset::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &WavConfig {
        &self.config
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written.load(Ordering::Acquire)
    }

    /// Write the header and close the file.
    pub fn finalize(&self) -> Result<()> {
        let writer = self.writer.lock().take().ok_or(ExportError::Finalized)?;
        writer.finalize()?;
        tracing::debug!(
            path = %self.path.display(),
            frames = self.frames_written(),
            "WAV sink finalized"
        );
        Ok(())
    }

    fn write_frames(&self, writer: &mut FileWriter, buffer: &AudioBuffer) -> hound::Result<()> {
        for frame in 0..buffer.frames() {
            for ch in 0..buffer.channels() {
                let sample = buffer.channel(ch)[frame];
                match self.config.bit_depth {
                    BitDepth::Int16 => writer.write_sample(float_to_i16(sample))?,
                    BitDepth::Int24 => writer.write_sample(float_to_i24(sample))?,
                    BitDepth::Float32 => writer.write_sample(sample)?,
                }
            }
        }
        Ok(())
    }
}

impl AudioClock for WavSink {
    fn now(&self) -> AudioTime {
        self.offset.apply(self.device_time())
    }
}

impl AdjustableClock for WavSink {
    fn device_time(&self) -> AudioTime {
        AudioTime::from_samples(self.frames_written() as i64, self.sample_rate())
    }

    fn offset(&self) -> AudioTime {
        self.offset.get()
    }

    fn set_offset(&self, offset: AudioTime) {
        self.offset.set(offset);
    }
}

impl AudioSink for WavSink {
    fn write(&self, buffer: &AudioBuffer) -> harmonia_core::Result<WriteStatus> {
        let mut guard = self.writer.lock();
        let writer = guard.as_mut().ok_or(harmonia_core::Error::SinkClosed)?;
        if buffer.channels() != self.channels() {
            return Err(harmonia_core::Error::Device(format!(
                "expected {} channels, got {}",
                self.channels(),
                buffer.channels()
            )));
        }
        if (buffer.sample_rate() - self.sample_rate()).abs() > 0.5 {
            return Err(harmonia_core::Error::Device(format!(
                "expected {} Hz, got {} Hz",
                self.config.sample_rate,
                buffer.sample_rate()
            )));
        }
        self.write_frames(writer, buffer)
            .map_err(|e| harmonia_core::Error::Device(format!("WAV write failed: {e}")))?;
        self.frames_written
            .fetch_add(buffer.frames() as u64, Ordering::AcqRel);
        Ok(WriteStatus::Accepted)
    }

    fn is_open(&self) -> bool {
        self.writer.lock().is_some()
    }

    fn close(&self) {
        match self.finalize() {
            Ok(()) | Err(ExportError::Finalized) => {}
            Err(e) => tracing::error!(path = %self.path.display(), "WAV finalize failed: {e}"),
        }
    }

    fn channels(&self) -> usize {
        usize::from(self.config.channels)
    }

    fn buffer_size(&self) -> usize {
        self.buffer_frames
    }

    fn sample_rate(&self) -> f64 {
        f64::from(self.config.sample_rate)
    }
}

impl Drop for WavSink {
    fn drop(&mut self) {
        self.close();
    }
}

/// Convert float sample to 16-bit integer with clipping
#[inline]
fn float_to_i16(sample: f32) -> i16 {
    let clamped = sample.clamp(-1.0, 1.0);
    (clamped * 32767.0) as i16
}

/// Convert float sample to 24-bit integer (stored as i32) with clipping
#[inline]
fn float_to_i24(sample: f32) -> i32 {
    let clamped = sample.clamp(-1.0, 1.0);
    (clamped * 8388607.0) as i32
}
