//! Per-timeframe trend and trigger analysis.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::indicators::pool::IndicatorPool;
use crate::indicators::{IndicatorFrame, IndicatorRow};
use crate::market::MarketData;
use crate::models::{Direction, Timeframe};

const RSI_OVERSOLD: f64 = 30.0;
const RSI_OVERBOUGHT: f64 = 70.0;

const RSI_TRIGGER_WEIGHT: f64 = 0.3;
const EMA_CROSS_WEIGHT: f64 = 0.4;
const MACD_FLIP_WEIGHT: f64 = 0.3;

/// Trend classification of one timeframe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trend {
    Bullish,
    Bearish,
    Neutral,
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Trend::Bullish => "bullish",
            Trend::Bearish => "bearish",
            Trend::Neutral => "neutral",
        })
    }
}

/// Shape of the EMA20/50/200 stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmaTrend {
    Bullish,
    Bearish,
    Mixed,
    Unavailable,
}

impl EmaTrend {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmaTrend::Bullish => "bullish",
            EmaTrend::Bearish => "bearish",
            EmaTrend::Mixed => "mixed",
            EmaTrend::Unavailable => "unavailable",
        }
    }

    /// Returns `true` if the stack points the same way as `direction`.
    pub fn agrees_with(&self, direction: Direction) -> bool {
        matches!(
            (self, direction),
            (EmaTrend::Bullish, Direction::Buy) | (EmaTrend::Bearish, Direction::Sell)
        )
    }
}

/// Analysis of the latest bar of one timeframe.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeframeResult {
    pub timeframe: Timeframe,
    pub trend: Trend,
    pub signal: Option<Direction>,
    /// In `[0, 1]`; 0 whenever `signal` is `None`.
    pub strength: f64,
    pub price: f64,
    pub rsi: Option<f64>,
    pub ema_trend: EmaTrend,
}

/// What happened to one timeframe in an analysis pass.
#[derive(Debug, Clone)]
pub enum TimeframeOutcome {
    Analyzed {
        result: TimeframeResult,
        frame: Arc<IndicatorFrame>,
    },
    /// Fetch or computation failed; counts as neutral with no signal.
    Degraded { timeframe: Timeframe, reason: String },
}

impl TimeframeOutcome {
    pub fn timeframe(&self) -> Timeframe {
        match self {
            TimeframeOutcome::Analyzed { result, .. } => result.timeframe,
            TimeframeOutcome::Degraded { timeframe, .. } => *timeframe,
        }
    }

    pub fn result(&self) -> Option<&TimeframeResult> {
        match self {
            TimeframeOutcome::Analyzed { result, .. } => Some(result),
            TimeframeOutcome::Degraded { .. } => None,
        }
    }

    pub fn frame(&self) -> Option<&Arc<IndicatorFrame>> {
        match self {
            TimeframeOutcome::Analyzed { frame, .. } => Some(frame),
            TimeframeOutcome::Degraded { .. } => None,
        }
    }

    pub fn signal(&self) -> Option<Direction> {
        self.result().and_then(|r| r.signal)
    }

    pub fn strength(&self) -> f64 {
        self.result().map_or(0.0, |r| r.strength)
    }

    pub fn trend(&self) -> Trend {
        self.result().map_or(Trend::Neutral, |r| r.trend)
    }

    pub fn ema_trend(&self) -> EmaTrend {
        self.result().map_or(EmaTrend::Unavailable, |r| r.ema_trend)
    }
}

/// Fetches and analyzes each configured timeframe of a symbol.
pub struct TimeframeAnalyzer {
    market: Arc<dyn MarketData>,
    pool: IndicatorPool,
    timeframes: Vec<Timeframe>,
    candle_limit: usize,
}

impl TimeframeAnalyzer {
    pub fn new(
        market: Arc<dyn MarketData>,
        pool: IndicatorPool,
        timeframes: Vec<Timeframe>,
        candle_limit: usize,
    ) -> Self {
        Self {
            market,
            pool,
            timeframes,
            candle_limit,
        }
    }

    pub fn timeframes(&self) -> &[Timeframe] {
        &self.timeframes
    }

    /// Analyzes every configured timeframe in order. Never fails: each
    /// timeframe that cannot be analyzed is reported as degraded.
    pub async fn analyze(&self, symbol: &str) -> Vec<TimeframeOutcome> {
        let mut outcomes = Vec::with_capacity(self.timeframes.len());
        for &timeframe in &self.timeframes {
            outcomes.push(self.analyze_timeframe(symbol, timeframe).await);
        }
        outcomes
    }

    /// Analyzes a single timeframe.
    pub async fn analyze_timeframe(&self, symbol: &str, timeframe: Timeframe) -> TimeframeOutcome {
        let degraded = |reason: String| {
            warn!(symbol, %timeframe, reason = %reason, "Timeframe analysis degraded");
            TimeframeOutcome::Degraded { timeframe, reason }
        };

        let candles = match self
            .market
            .fetch_candles(symbol, timeframe, self.candle_limit)
            .await
        {
            Ok(c) if c.len() >= 2 => c,
            Ok(c) => return degraded(format!("only {} candles", c.len())),
            Err(e) => return degraded(e.to_string()),
        };

        let frame = match self.pool.compute(candles).await {
            Ok(frame) => frame,
            Err(e) => return degraded(e.to_string()),
        };

        match evaluate(timeframe, &frame) {
            Some(result) => {
                debug!(
                    symbol,
                    %timeframe,
                    trend = %result.trend,
                    signal = ?result.signal,
                    strength = result.strength,
                    "Timeframe analyzed"
                );
                TimeframeOutcome::Analyzed {
                    result,
                    frame: Arc::new(frame),
                }
            }
            None => degraded("frame has fewer than two bars".to_string()),
        }
    }
}

/// Derives the timeframe result from a computed frame.
pub fn evaluate(timeframe: Timeframe, frame: &IndicatorFrame) -> Option<TimeframeResult> {
    let last = frame.latest()?;
    let prev = frame.previous()?;
    let (signal, strength) = detect_signal(&prev, &last);

    Some(TimeframeResult {
        timeframe,
        trend: classify_trend(&last),
        signal,
        strength,
        price: last.candle.close,
        rsi: last.rsi,
        ema_trend: ema_trend(&last),
    })
}

/// EMA stack plus MACD confirmation; any missing value is neutral.
pub fn classify_trend(row: &IndicatorRow) -> Trend {
    let (Some(e20), Some(e50), Some(e200), Some(macd), Some(signal)) = (
        row.ema_short,
        row.ema_mid,
        row.ema_long,
        row.macd,
        row.macd_signal,
    ) else {
        return Trend::Neutral;
    };

    if e20 > e50 && e50 > e200 && macd > signal {
        Trend::Bullish
    } else if e20 < e50 && e50 < e200 && macd < signal {
        Trend::Bearish
    } else {
        Trend::Neutral
    }
}

pub fn ema_trend(row: &IndicatorRow) -> EmaTrend {
    match (row.ema_short, row.ema_mid, row.ema_long) {
        (Some(e20), Some(e50), Some(e200)) if e20 > e50 && e50 > e200 => EmaTrend::Bullish,
        (Some(e20), Some(e50), Some(e200)) if e20 < e50 && e50 < e200 => EmaTrend::Bearish,
        (Some(_), Some(_), Some(_)) => EmaTrend::Mixed,
        _ => EmaTrend::Unavailable,
    }
}

/// Collects crossing triggers between `prev` and `last` and resolves them
/// to a direction and strength.
pub fn detect_signal(prev: &IndicatorRow, last: &IndicatorRow) -> (Option<Direction>, f64) {
    let mut triggers: Vec<(Direction, f64)> = Vec::with_capacity(3);

    if let (Some(p), Some(l)) = (prev.rsi, last.rsi) {
        if l < RSI_OVERSOLD && p >= RSI_OVERSOLD {
            triggers.push((Direction::Buy, RSI_TRIGGER_WEIGHT));
        } else if l > RSI_OVERBOUGHT && p <= RSI_OVERBOUGHT {
            triggers.push((Direction::Sell, RSI_TRIGGER_WEIGHT));
        }
    }

    if let (Some(p20), Some(p50), Some(l20), Some(l50)) =
        (prev.ema_short, prev.ema_mid, last.ema_short, last.ema_mid)
    {
        if l20 > l50 && p20 <= p50 {
            triggers.push((Direction::Buy, EMA_CROSS_WEIGHT));
        } else if l20 < l50 && p20 >= p50 {
            triggers.push((Direction::Sell, EMA_CROSS_WEIGHT));
        }
    }

    if let (Some(p), Some(l)) = (prev.macd_hist, last.macd_hist) {
        if l > 0.0 && p < 0.0 {
            triggers.push((Direction::Buy, MACD_FLIP_WEIGHT));
        } else if l < 0.0 && p > 0.0 {
            triggers.push((Direction::Sell, MACD_FLIP_WEIGHT));
        }
    }

    let side = |d: Direction| -> Vec<f64> {
        triggers
            .iter()
            .filter(|(dir, _)| *dir == d)
            .map(|(_, w)| *w)
            .collect()
    };
    let buys = side(Direction::Buy);
    let sells = side(Direction::Sell);

    let (direction, weights) = match buys.len().cmp(&sells.len()) {
        std::cmp::Ordering::Greater => (Direction::Buy, buys),
        std::cmp::Ordering::Less => (Direction::Sell, sells),
        std::cmp::Ordering::Equal => return (None, 0.0),
    };
    let strength = weights.iter().sum::<f64>() / weights.len() as f64;
    (Some(direction), strength.min(1.0))
}
