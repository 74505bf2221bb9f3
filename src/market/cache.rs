//! Short-lived cache in front of a [`MarketData`] source.
//!
//! Candles and 24h tickers are reused for `ttl` (one minute by default) so
//! overlapping consumers in the same cycle do not hit the exchange twice.
//! Entries older than `retain` are pruned on every write. Batched price
//! lookups always go to the source.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::trace;

use super::MarketData;
use crate::Result;
use crate::models::Timeframe;
use crate::models::candle::Candle;
use crate::models::ticker::Ticker;

pub const DEFAULT_TTL: Duration = Duration::from_secs(60);
pub const DEFAULT_RETAIN: Duration = Duration::from_secs(300);

type CandleKey = (String, Timeframe, usize);

struct Cached<T> {
    stored_at: Instant,
    value: T,
}

/// [`MarketData`] decorator with a TTL cache.
pub struct CachedMarketData<M> {
    inner: M,
    ttl: Duration,
    retain: Duration,
    candles: Mutex<HashMap<CandleKey, Cached<Vec<Candle>>>>,
    tickers: Mutex<HashMap<String, Cached<Ticker>>>,
}

impl<M: MarketData> CachedMarketData<M> {
    /// Wraps `inner` with the default one-minute TTL.
    pub fn new(inner: M) -> Self {
        Self::with_ttl(inner, DEFAULT_TTL, DEFAULT_RETAIN)
    }

    /// Wraps `inner` with a custom TTL and retention window.
    pub fn with_ttl(inner: M, ttl: Duration, retain: Duration) -> Self {
        Self {
            inner,
            ttl,
            retain: retain.max(ttl),
            candles: Mutex::new(HashMap::new()),
            tickers: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the wrapped source.
    pub fn inner(&self) -> &M {
        &self.inner
    }

    /// Drops every cached entry.
    pub async fn clear(&self) {
        self.candles.lock().await.clear();
        self.tickers.lock().await.clear();
    }
}

fn prune<K, T>(map: &mut HashMap<K, Cached<T>>, retain: Duration) {
    map.retain(|_, e| e.stored_at.elapsed() < retain);
}

#[async_trait]
impl<M: MarketData> MarketData for CachedMarketData<M> {
    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        let key = (symbol.to_string(), timeframe, limit);
        {
            let cache = self.candles.lock().await;
            if let Some(entry) = cache.get(&key)
                && entry.stored_at.elapsed() < self.ttl
            {
                trace!(symbol, %timeframe, "Candle cache hit");
                return Ok(entry.value.clone());
            }
        }

        let candles = self.inner.fetch_candles(symbol, timeframe, limit).await?;
        let mut cache = self.candles.lock().await;
        prune(&mut cache, self.retain);
        cache.insert(
            key,
            Cached {
                stored_at: Instant::now(),
                value: candles.clone(),
            },
        );
        Ok(candles)
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker> {
        {
            let cache = self.tickers.lock().await;
            if let Some(entry) = cache.get(symbol)
                && entry.stored_at.elapsed() < self.ttl
            {
                return Ok(entry.value.clone());
            }
        }

        let ticker = self.inner.fetch_ticker(symbol).await?;
        let mut cache = self.tickers.lock().await;
        prune(&mut cache, self.retain);
        cache.insert(
            symbol.to_string(),
            Cached {
                stored_at: Instant::now(),
                value: ticker.clone(),
            },
        );
        Ok(ticker)
    }

    async fn fetch_tickers(&self, symbols: &[String]) -> Result<HashMap<String, f64>> {
        self.inner.fetch_tickers(symbols).await
    }
}
