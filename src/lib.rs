//! Multi-timeframe crypto signal pipeline.
//!
//! Pulls OHLCV data from Kraken, computes indicators per timeframe, votes a
//! consensus direction, builds and rates trade candidates, delivers them to
//! recipients through a per-recipient risk gate, and tracks every delivered
//! signal until it hits a target, its stop, or expires.

pub mod analysis;
pub mod config;
pub mod error;
pub mod indicators;
pub mod market;
pub mod models;
pub mod notify;
pub mod quality;
pub mod risk;
pub mod signal;
pub mod store;
pub mod supervisor;
pub mod tracker;
pub mod worker;

pub use error::{PulseError, Result};
