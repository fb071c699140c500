//! Planar f32 audio buffers.

use crate::time::AudioTime;
use serde::{Deserialize, Serialize};

/// Channel count and sample rate of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub channels: usize,
    pub sample_rate: f64,
}

impl AudioFormat {
    pub fn new(channels: usize, sample_rate: f64) -> Self {
        Self {
            channels,
            sample_rate,
        }
    }

    pub fn stereo(sample_rate: f64) -> Self {
        Self::new(2, sample_rate)
    }
}

/// Fixed-length planar buffer, one `Vec<f32>` per channel.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    data: Vec<Vec<f32>>,
    frames: usize,
    sample_rate: f64,
}

impl AudioBuffer {
    /// Silent buffer.
    pub fn new(channels: usize, frames: usize, sample_rate: f64) -> Self {
        Self {
            data: vec![vec![0.0; frames]; channels],
            frames,
            sample_rate,
        }
    }

    pub fn with_format(format: AudioFormat, frames: usize) -> Self {
        Self::new(format.channels, frames, format.sample_rate)
    }

    #[inline]
    pub fn format(&self) -> AudioFormat {
        AudioFormat::new(self.data.len(), self.sample_rate)
    }

    #[inline]
    pub fn frames(&self) -> usize {
        self.frames
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Time spanned by the buffer.
    pub fn duration(&self) -> AudioTime {
        AudioTime::from_samples(self.frames as i64, self.sample_rate)
    }

    #[inline]
    pub fn channel(&self, index: usize) -> &[f32] {
        &self.data[index]
    }

    #[inline]
    pub fn channel_mut(&mut self, index: usize) -> &mut [f32] {
        &mut self.data[index]
    }

    pub fn channels_mut(&mut self) -> impl Iterator<Item = &mut [f32]> {
        self.data.iter_mut().map(|c| c.as_mut_slice())
    }

    pub fn make_silence(&mut self) {
        for ch in &mut self.data {
            ch.fill(0.0);
        }
    }

    /// Reshape to the given layout, keeping allocations where possible.
    /// Contents are zeroed.
    pub fn ensure(&mut self, channels: usize, frames: usize, sample_rate: f64) {
        self.data.resize_with(channels, Vec::new);
        for ch in &mut self.data {
            ch.clear();
            ch.resize(frames, 0.0);
        }
        self.frames = frames;
        self.sample_rate = sample_rate;
    }

    /// Same layout as `other`, zeroed.
    pub fn ensure_like(&mut self, other: &AudioBuffer) {
        self.ensure(other.channels(), other.frames, other.sample_rate);
    }

    /// Accumulate `other` into `self`. Mismatched layouts mix the overlap.
    pub fn mix_from(&mut self, other: &AudioBuffer) {
        for (dst, src) in self.data.iter_mut().zip(&other.data) {
            for (d, s) in dst.iter_mut().zip(src) {
                *d += *s;
            }
        }
    }

    /// Overwrite `self` with `other`'s overlapping samples.
    pub fn copy_from(&mut self, other: &AudioBuffer) {
        for (dst, src) in self.data.iter_mut().zip(&other.data) {
            let n = dst.len().min(src.len());
            dst[..n].copy_from_slice(&src[..n]);
        }
    }

    /// Append interleaved frames to `out`.
    pub fn write_interleaved(&self, out: &mut Vec<f32>) {
        out.reserve(self.frames * self.data.len());
        for frame in 0..self.frames {
            for ch in &self.data {
                out.push(ch[frame]);
            }
        }
    }

    pub fn peak(&self) -> f32 {
        self.data
            .iter()
            .flat_map(|c| c.iter())
            .fold(0.0f32, |acc, s| acc.max(s.abs()))
    }

    pub fn is_silent(&self) -> bool {
        self.data.iter().all(|c| c.iter().all(|s| *s == 0.0))
    }
}
