//! Ticker snapshot and the Kraken `Ticker` REST payload.

use serde::Deserialize;

use super::parse_price;

/// Last price and 24h quote-currency volume for one symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct Ticker {
    pub symbol: String,
    pub last: f64,
    pub quote_volume_24h: f64,
}

/// Per-pair entry of the Kraken `Ticker` result.
///
/// Only the fields the pipeline reads are modelled: `c` is
/// `[last price, lot volume]`, `v` and `p` are `[today, last 24h]` base
/// volume and VWAP respectively.
#[derive(Debug, Clone, Deserialize)]
pub struct TickerEntry {
    pub c: Vec<String>,
    pub v: Vec<String>,
    pub p: Vec<String>,
}

impl TickerEntry {
    /// Converts the wire entry into a [`Ticker`] for `symbol`.
    ///
    /// Quote volume is the 24h base volume times the 24h VWAP.
    ///
    /// # Errors
    ///
    /// Returns [`PulseError::MalformedMessage`](crate::PulseError::MalformedMessage)
    /// if a required field is missing or not numeric.
    pub fn to_ticker(&self, symbol: &str) -> crate::Result<Ticker> {
        let last = self.c.first().ok_or_else(|| missing("c"))?;
        let volume = self.v.get(1).ok_or_else(|| missing("v"))?;
        let vwap = self.p.get(1).ok_or_else(|| missing("p"))?;

        Ok(Ticker {
            symbol: symbol.to_string(),
            last: parse_price("last", last)?,
            quote_volume_24h: parse_price("volume", volume)? * parse_price("vwap", vwap)?,
        })
    }
}

fn missing(field: &str) -> crate::PulseError {
    crate::PulseError::MalformedMessage(format!("ticker entry missing field {field}"))
}
