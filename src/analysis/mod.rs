//! Multi-timeframe analysis: per-timeframe evaluation, the weighted
//! consensus across timeframes, and the point-scoring confirmation run on
//! the primary timeframe.

pub mod consensus;
pub mod scoring;
pub mod timeframe;
