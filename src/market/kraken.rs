//! Kraken public REST adapter.
//!
//! Uses the unauthenticated
//! [`OHLC`](https://docs.kraken.com/api/docs/rest-api/get-ohlc-data) and
//! [`Ticker`](https://docs.kraken.com/api/docs/rest-api/get-ticker-information)
//! endpoints. No API key is needed.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::MarketData;
use crate::models::candle::{Candle, candles_from_ohlc};
use crate::models::ticker::{Ticker, TickerEntry};
use crate::models::{KrakenResponse, Timeframe};
use crate::{PulseError, Result};

/// Default public REST endpoint.
pub const DEFAULT_REST_URL: &str = "https://api.kraken.com";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Converts `BTC/USD` into the Kraken REST pair name `BTCUSD`.
pub fn kraken_pair(symbol: &str) -> String {
    symbol.replace('/', "")
}

/// HTTP client for the Kraken public REST API.
#[derive(Debug, Clone)]
pub struct KrakenRest {
    client: reqwest::Client,
    base_url: String,
}

impl KrakenRest {
    /// Creates a client against `base_url` (no trailing slash).
    ///
    /// # Errors
    ///
    /// Returns [`PulseError::Http`] if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("signalpulse/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await?
            .error_for_status()?;
        let body: KrakenResponse<T> = response.json().await?;
        body.into_result()
    }
}

#[async_trait]
impl MarketData for KrakenRest {
    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        let result: HashMap<String, serde_json::Value> = self
            .get(
                "/0/public/OHLC",
                &[
                    ("pair", kraken_pair(symbol)),
                    ("interval", timeframe.minutes().to_string()),
                ],
            )
            .await?;
        let mut candles = candles_from_ohlc(result)?;
        if candles.len() > limit {
            candles.drain(..candles.len() - limit);
        }
        debug!(symbol, %timeframe, count = candles.len(), "Fetched candles");
        Ok(candles)
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker> {
        let result: HashMap<String, TickerEntry> = self
            .get("/0/public/Ticker", &[("pair", kraken_pair(symbol))])
            .await?;
        let entry = result.values().next().ok_or_else(|| {
            PulseError::MalformedMessage(format!("no ticker entry for {symbol}"))
        })?;
        entry.to_ticker(symbol)
    }

    async fn fetch_tickers(&self, symbols: &[String]) -> Result<HashMap<String, f64>> {
        // Kraken answers with its own pair keys (XXBTZUSD), so one request
        // per symbol keeps the mapping back to our names unambiguous.
        let results = join_all(symbols.iter().map(|s| self.fetch_ticker(s))).await;

        let mut prices = HashMap::with_capacity(symbols.len());
        let mut last_err = None;
        for (symbol, result) in symbols.iter().zip(results) {
            match result {
                Ok(ticker) => {
                    prices.insert(symbol.clone(), ticker.last);
                }
                Err(e) => {
                    debug!(symbol, error = %e, "Ticker fetch failed");
                    last_err = Some(e);
                }
            }
        }

        match last_err {
            Some(e) if prices.is_empty() => Err(e),
            _ => Ok(prices),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_name_drops_separator() {
        assert_eq!(kraken_pair("BTC/USD"), "BTCUSD");
        assert_eq!(kraken_pair("ETHUSD"), "ETHUSD");
    }

    #[test]
    fn base_url_is_normalized() {
        let rest = KrakenRest::new("https://api.kraken.com/").unwrap();
        assert_eq!(rest.base_url, DEFAULT_REST_URL);
    }
}
