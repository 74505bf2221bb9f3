//! The canonical trade idea passed between pipeline stages.
//!
//! Storage and notification translate a [`SignalCandidate`] at their own
//! boundaries; nothing downstream re-derives levels.

pub mod builder;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;

use crate::analysis::timeframe::TimeframeResult;
use crate::models::Direction;

/// A fully derived signal awaiting rating and delivery.
///
/// For a buy, `stop_loss < entry < take_profit_1 <= take_profit_2 <=
/// take_profit_3`; a sell mirrors the order.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalCandidate {
    pub symbol: String,
    pub direction: Direction,
    pub entry: f64,
    pub stop_loss: f64,
    pub take_profit_1: f64,
    pub take_profit_2: f64,
    pub take_profit_3: f64,
    /// Consensus confidence in `[0, 1]`.
    pub confidence: f64,
    /// Point score of the direction on the primary timeframe.
    pub score: u32,
    pub atr: f64,
    pub rsi: f64,
    /// Volume of the latest primary-timeframe bar.
    pub volume: f64,
    pub quote_volume_24h: f64,
    pub reasons: Vec<String>,
    pub timeframes: Vec<TimeframeResult>,
    pub generated_at: DateTime<Utc>,
}

impl SignalCandidate {
    /// Absolute distance between entry and stop.
    pub fn risk(&self) -> f64 {
        (self.entry - self.stop_loss).abs()
    }

    /// Reward-to-risk ratio of the first target.
    pub fn reward_risk(&self) -> f64 {
        let risk = self.risk();
        if risk == 0.0 {
            return 0.0;
        }
        (self.take_profit_1 - self.entry).abs() / risk
    }

    /// Stop distance as a percentage of entry.
    pub fn stop_distance_pct(&self) -> f64 {
        if self.entry == 0.0 {
            return 0.0;
        }
        self.risk() / self.entry * 100.0
    }

    /// Stop distance percentage as a decimal for budget arithmetic.
    pub fn risk_pct(&self) -> Decimal {
        Decimal::from_f64(self.stop_distance_pct())
            .map(|d| d.round_dp(4))
            .unwrap_or(Decimal::ZERO)
    }

    /// ATR as a percentage of entry.
    pub fn atr_pct(&self) -> f64 {
        if self.entry == 0.0 {
            return 0.0;
        }
        self.atr / self.entry * 100.0
    }

    /// Targets in order, nearest first.
    pub fn targets(&self) -> [f64; 3] {
        [self.take_profit_1, self.take_profit_2, self.take_profit_3]
    }

    /// Returns `true` if the price levels respect the directional ordering.
    pub fn levels_ordered(&self) -> bool {
        let [tp1, tp2, tp3] = self.targets();
        match self.direction {
            Direction::Buy => {
                self.stop_loss < self.entry && self.entry < tp1 && tp1 <= tp2 && tp2 <= tp3
            }
            Direction::Sell => {
                self.stop_loss > self.entry
                    && self.entry > tp1
                    && tp1 >= tp2
                    && tp2 >= tp3
                    && tp3 > 0.0
            }
        }
    }
}
