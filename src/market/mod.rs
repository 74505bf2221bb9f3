//! Market data access.
//!
//! The pipeline only ever talks to [`MarketData`]. [`kraken::KrakenRest`]
//! implements it against the Kraken public REST API, and
//! [`cache::CachedMarketData`] wraps any implementation with a short-lived
//! candle and ticker cache.

pub mod cache;
pub mod kraken;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::Result;
use crate::models::Timeframe;
use crate::models::candle::Candle;
use crate::models::ticker::Ticker;

/// Source of candles and prices.
///
/// An error from any method means "skip this symbol for now"; callers never
/// retry within the same cycle.
#[async_trait]
pub trait MarketData: Send + Sync {
    /// Returns up to `limit` most recent candles, oldest first.
    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>>;

    /// Returns the last price and 24h quote volume of `symbol`.
    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker>;

    /// Returns last prices for as many of `symbols` as could be fetched.
    async fn fetch_tickers(&self, symbols: &[String]) -> Result<HashMap<String, f64>>;
}
