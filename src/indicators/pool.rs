//! Dedicated CPU pool for indicator computation.
//!
//! Indicator frames are pure number crunching over a few hundred bars per
//! timeframe. Running them on the tokio runtime would stall the polling and
//! broadcast tasks, so they are handed to a private rayon pool and the
//! result is awaited through a oneshot channel.

use std::sync::Arc;

use tokio::sync::oneshot;

use super::IndicatorFrame;
use crate::models::candle::Candle;
use crate::{PulseError, Result};

/// Handle to the indicator thread pool. Cheap to clone.
#[derive(Clone)]
pub struct IndicatorPool {
    pool: Arc<rayon::ThreadPool>,
}

impl IndicatorPool {
    /// Builds a pool with `threads` workers (0 lets rayon pick).
    ///
    /// # Errors
    ///
    /// Returns [`PulseError::Worker`] if the pool cannot be created.
    pub fn new(threads: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("pulse-indicators-{i}"))
            .build()
            .map_err(|e| PulseError::Worker(format!("failed to build indicator pool: {e}")))?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    /// Computes the indicator frame for `candles` off the async runtime.
    ///
    /// # Errors
    ///
    /// Returns [`PulseError::Worker`] if the computation panicked and the
    /// result channel was dropped.
    pub async fn compute(&self, candles: Vec<Candle>) -> Result<IndicatorFrame> {
        let (tx, rx) = oneshot::channel();
        self.pool.spawn(move || {
            let _ = tx.send(IndicatorFrame::compute(candles));
        });
        rx.await
            .map_err(|_| PulseError::Worker("indicator computation was dropped".into()))
    }

    /// Number of worker threads in the pool.
    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }
}
