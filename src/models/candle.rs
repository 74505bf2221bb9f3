//! OHLCV candle model and the Kraken `OHLC` REST payload.

use std::collections::HashMap;

use serde::Deserialize;

use super::parse_price;

/// A single OHLCV bar for one symbol and timeframe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candle {
    /// Bar open time, milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// One row of the Kraken `OHLC` result:
/// `[time, open, high, low, close, vwap, volume, count]`.
#[derive(Debug, Clone, Deserialize)]
pub struct OhlcRow(
    pub i64,
    pub String,
    pub String,
    pub String,
    pub String,
    pub String,
    pub String,
    pub u64,
);

impl OhlcRow {
    /// Converts the wire row into a [`Candle`].
    ///
    /// # Errors
    ///
    /// Returns [`PulseError::MalformedMessage`](crate::PulseError::MalformedMessage)
    /// if any price or volume field is not a number.
    pub fn to_candle(&self) -> crate::Result<Candle> {
        Ok(Candle {
            timestamp: self.0 * 1000,
            open: parse_price("open", &self.1)?,
            high: parse_price("high", &self.2)?,
            low: parse_price("low", &self.3)?,
            close: parse_price("close", &self.4)?,
            volume: parse_price("volume", &self.6)?,
        })
    }
}

/// Extracts the candle rows from an `OHLC` result object.
///
/// Kraken keys the rows by its own pair name and adds a `last` cursor, so
/// the first array-valued entry is taken.
///
/// # Errors
///
/// Returns [`PulseError::MalformedMessage`](crate::PulseError::MalformedMessage)
/// if no row array is present or a row is malformed.
pub fn candles_from_ohlc(result: HashMap<String, serde_json::Value>) -> crate::Result<Vec<Candle>> {
    let rows = result
        .into_iter()
        .find(|(key, value)| key != "last" && value.is_array())
        .map(|(_, value)| value)
        .ok_or_else(|| {
            crate::PulseError::MalformedMessage("OHLC result contains no candle rows".into())
        })?;

    let rows: Vec<OhlcRow> = serde_json::from_value(rows)?;
    let mut candles = rows
        .iter()
        .map(OhlcRow::to_candle)
        .collect::<crate::Result<Vec<_>>>()?;

    candles.sort_by_key(|c| c.timestamp);
    candles.dedup_by_key(|c| c.timestamp);
    Ok(candles)
}
