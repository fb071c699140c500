//! Tolerance constants for audio testing.
//!
//! Different operations require different precision levels.

/// Floating point rounding errors (mixing, unity gain).
/// Use for operations that should be mathematically exact.
pub const FLOAT_EPSILON: f32 = 1e-6;

/// Summation order differences, e.g. parallel versus serial mixing of many
/// voices.
pub const MIX_EPSILON: f32 = 1e-5;

/// DSP processing tolerance (envelopes, oscillators).
pub const DSP_EPSILON: f32 = 1e-4;

/// Silence threshold (~-80dB).
/// Values below this are considered silent.
pub const SILENCE_THRESHOLD: f32 = 0.0001;

/// 16-bit quantization step size.
/// Use when testing bit-depth conversion to 16-bit.
pub const INT16_EPSILON: f32 = 1.0 / 32768.0;

/// 24-bit quantization step size.
/// Use when testing bit-depth conversion to 24-bit.
pub const INT24_EPSILON: f32 = 1.0 / 8388608.0;
