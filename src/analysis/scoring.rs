//! Point-scoring confirmation on the primary timeframe.
//!
//! Each rule awards points to the buy side, the sell side, or both, and
//! records a human-readable reason. The candidate builder requires the
//! consensus direction to reach a minimum score.

use crate::indicators::IndicatorRow;
use crate::models::Direction;

const ADX_TRENDING: f64 = 25.0;

/// Points and reasons accumulated per side.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoreCard {
    pub buy: u32,
    pub sell: u32,
    pub buy_reasons: Vec<String>,
    pub sell_reasons: Vec<String>,
    /// Close position inside the Bollinger band, in percent.
    pub bb_position: Option<f64>,
}

impl ScoreCard {
    pub fn score(&self, direction: Direction) -> u32 {
        match direction {
            Direction::Buy => self.buy,
            Direction::Sell => self.sell,
        }
    }

    pub fn reasons(&self, direction: Direction) -> &[String] {
        match direction {
            Direction::Buy => &self.buy_reasons,
            Direction::Sell => &self.sell_reasons,
        }
    }

    fn add(&mut self, direction: Direction, points: u32, reason: impl Into<String>) {
        match direction {
            Direction::Buy => {
                self.buy += points;
                self.buy_reasons.push(reason.into());
            }
            Direction::Sell => {
                self.sell += points;
                self.sell_reasons.push(reason.into());
            }
        }
    }
}

/// Scores the latest bar against the previous one.
///
/// Returns `None` if any indicator the rules read is unavailable.
pub fn score(prev: &IndicatorRow, last: &IndicatorRow) -> Option<ScoreCard> {
    let close = last.candle.close;
    let ema200 = last.ema_long?;
    let ema20 = last.ema_short?;
    let ema50 = last.ema_mid?;
    let adx = last.adx?;
    let rsi = last.rsi?;
    let macd = last.macd?;
    let macd_signal = last.macd_signal?;
    let prev_ema20 = prev.ema_short?;
    let bb_upper = last.bb_upper?;
    let bb_lower = last.bb_lower?;

    let mut card = ScoreCard::default();

    if close > ema200 {
        card.add(Direction::Buy, 10, "Price above EMA200");
    } else {
        card.add(Direction::Sell, 10, "Price below EMA200");
    }

    if ema20 > ema50 {
        card.add(Direction::Buy, 10, "EMA20 > EMA50");
    } else {
        card.add(Direction::Sell, 10, "EMA20 < EMA50");
    }

    if adx > ADX_TRENDING {
        let reason = format!("Strong trend (ADX {adx:.1})");
        card.add(Direction::Buy, 5, reason.clone());
        card.add(Direction::Sell, 5, reason);
    }

    if rsi > 40.0 && rsi < 65.0 {
        card.add(Direction::Buy, 10, format!("RSI {rsi:.1}"));
    } else if rsi > 35.0 && rsi < 60.0 {
        card.add(Direction::Sell, 10, format!("RSI {rsi:.1}"));
    }

    if macd > macd_signal {
        card.add(Direction::Buy, 10, "MACD bullish");
    } else {
        card.add(Direction::Sell, 10, "MACD bearish");
    }

    let prev_close = prev.candle.close;
    if prev_close <= prev_ema20 && close > ema20 {
        card.add(Direction::Buy, 15, "Breakout above EMA20");
    }
    if prev_close >= prev_ema20 && close < ema20 {
        card.add(Direction::Sell, 15, "Breakdown below EMA20");
    }

    let width = bb_upper - bb_lower;
    if width > 0.0 {
        let position = (close - bb_lower) / width * 100.0;
        card.bb_position = Some(position);
        if position < 30.0 {
            card.add(Direction::Buy, 10, format!("Near lower Bollinger band ({position:.1}%)"));
        } else if position > 70.0 {
            card.add(Direction::Sell, 10, format!("Near upper Bollinger band ({position:.1}%)"));
        }
    }

    Some(card)
}
