//! Integration test modules for harmonia
//!
//! - engine: Engine lifecycle, event sources, live output
//! - mixing: Mixer properties across voice sets and pool sizes
//! - timing: Sample-accurate scheduling scenarios

pub mod engine;
pub mod mixing;
pub mod timing;
