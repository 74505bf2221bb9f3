//! Shared market and signal models.
//!
//! Contains the trade direction and timeframe vocabulary used across the
//! pipeline, the terminal outcomes of a tracked signal, and the Kraken REST
//! envelope shared by the candle and ticker DTOs.

pub mod candle;
pub mod ticker;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Trade direction of a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Buy,
    Sell,
}

impl Direction {
    /// Returns the wire-format name (`"buy"` / `"sell"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Buy => "buy",
            Direction::Sell => "sell",
        }
    }

    /// Returns the opposite direction.
    pub fn opposite(&self) -> Direction {
        match self {
            Direction::Buy => Direction::Sell,
            Direction::Sell => Direction::Buy,
        }
    }

    /// Signed percentage move from `entry` to `exit`, positive when the
    /// move is in this direction's favour.
    pub fn profit_pct(&self, entry: f64, exit: f64) -> f64 {
        if entry == 0.0 {
            return 0.0;
        }
        match self {
            Direction::Buy => (exit - entry) / entry * 100.0,
            Direction::Sell => (entry - exit) / entry * 100.0,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Buy => write!(f, "BUY"),
            Direction::Sell => write!(f, "SELL"),
        }
    }
}

/// Candle interval used when requesting market data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
}

impl Timeframe {
    /// Returns the conventional short label (`"15m"`, `"1h"`, ...).
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        }
    }

    /// Candle duration in minutes (also the Kraken `interval` parameter).
    pub fn minutes(&self) -> u32 {
        match self {
            Timeframe::M1 => 1,
            Timeframe::M5 => 5,
            Timeframe::M15 => 15,
            Timeframe::M30 => 30,
            Timeframe::H1 => 60,
            Timeframe::H4 => 240,
            Timeframe::D1 => 1440,
        }
    }

    /// Base consensus weight before normalization.
    ///
    /// The 15m/1h/4h trio carries 0.2/0.3/0.5; anything else counts 0.1.
    pub fn base_weight(&self) -> f64 {
        match self {
            Timeframe::M15 => 0.2,
            Timeframe::H1 => 0.3,
            Timeframe::H4 => 0.5,
            _ => 0.1,
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = crate::PulseError;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim() {
            "1m" => Ok(Timeframe::M1),
            "5m" => Ok(Timeframe::M5),
            "15m" => Ok(Timeframe::M15),
            "30m" => Ok(Timeframe::M30),
            "1h" => Ok(Timeframe::H1),
            "4h" => Ok(Timeframe::H4),
            "1d" => Ok(Timeframe::D1),
            other => Err(crate::PulseError::Config(format!(
                "unknown timeframe {other:?}"
            ))),
        }
    }
}

/// Terminal outcome of a tracked signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    Tp1,
    Tp2,
    Tp3,
    #[serde(rename = "SL")]
    StopLoss,
    Expired,
}

impl Outcome {
    /// Returns the persisted outcome code.
    pub fn code(&self) -> &'static str {
        match self {
            Outcome::Tp1 => "TP1",
            Outcome::Tp2 => "TP2",
            Outcome::Tp3 => "TP3",
            Outcome::StopLoss => "SL",
            Outcome::Expired => "EXPIRED",
        }
    }

    /// Returns `true` for any take-profit outcome.
    pub fn is_target(&self) -> bool {
        matches!(self, Outcome::Tp1 | Outcome::Tp2 | Outcome::Tp3)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Envelope wrapping every Kraken public REST response.
#[derive(Debug, Deserialize)]
pub struct KrakenResponse<T> {
    #[serde(default)]
    pub error: Vec<String>,
    pub result: Option<T>,
}

impl<T> KrakenResponse<T> {
    /// Returns the result payload, or the joined exchange error messages.
    ///
    /// # Errors
    ///
    /// Returns [`PulseError::MalformedMessage`](crate::PulseError::MalformedMessage)
    /// if the error array is non-empty or the result is missing.
    pub fn into_result(self) -> crate::Result<T> {
        if !self.error.is_empty() {
            return Err(crate::PulseError::MalformedMessage(format!(
                "Kraken API error: {}",
                self.error.join(", ")
            )));
        }
        self.result.ok_or_else(|| {
            crate::PulseError::MalformedMessage("missing result in Kraken response".into())
        })
    }
}

/// Parses a Kraken decimal string into `f64`.
pub(crate) fn parse_price(field: &str, raw: &str) -> crate::Result<f64> {
    raw.parse::<f64>().map_err(|e| {
        crate::PulseError::MalformedMessage(format!("invalid {field} value {raw:?}: {e}"))
    })
}
