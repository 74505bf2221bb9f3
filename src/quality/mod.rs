//! Ten-factor quality rubric for built candidates.
//!
//! The rater is a pure function of the candidate, the primary-timeframe
//! volume history and the UTC hour. Three factors (divergence,
//! support/resistance, news) are [`FactorSlot`] trait objects that score
//! neutral until a real implementation is plugged in.

use std::fmt;

use chrono::{Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::models::Direction;
use crate::signal::SignalCandidate;

/// Fixed scale of the rubric.
pub const MAX_SCORE: u32 = 12;

const VOLUME_PERIOD: usize = 20;

/// Five-level classification of a quality percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Strength {
    Weak,
    Low,
    Medium,
    High,
    Strong,
}

impl Strength {
    /// Thresholds are closed at the lower end: exactly 60 is `Medium`.
    pub fn from_percentage(percentage: f64) -> Self {
        if percentage >= 90.0 {
            Strength::Strong
        } else if percentage >= 75.0 {
            Strength::High
        } else if percentage >= 60.0 {
            Strength::Medium
        } else if percentage >= 40.0 {
            Strength::Low
        } else {
            Strength::Weak
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Strength::Weak => "WEAK",
            Strength::Low => "LOW",
            Strength::Medium => "MEDIUM",
            Strength::High => "HIGH",
            Strength::Strong => "STRONG",
        }
    }

    /// `Weak` and `Low` never reach recipients.
    pub fn is_deliverable(&self) -> bool {
        *self >= Strength::Medium
    }

    pub fn recommendation(&self) -> &'static str {
        match self {
            Strength::Strong => "STRONG BUY/SELL - High confidence",
            Strength::High => "BUY/SELL - Good setup",
            Strength::Medium => "Consider BUY/SELL - Moderate confidence",
            Strength::Low => "Watch for confirmation - Low confidence",
            Strength::Weak => "Avoid - Weak setup",
        }
    }
}

impl fmt::Display for Strength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Score of one factor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactorScore {
    pub name: String,
    pub score: u32,
    pub max: u32,
    pub rationale: String,
}

impl FactorScore {
    /// Builds a score, capping it at `max`.
    pub fn new(name: &str, score: u32, max: u32, rationale: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            score: score.min(max),
            max,
            rationale: rationale.into(),
        }
    }
}

/// Full rating of one candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub factors: Vec<FactorScore>,
    pub total_score: u32,
    pub max_score: u32,
    pub percentage: f64,
    pub strength: Strength,
    pub recommendation: String,
}

impl QualityReport {
    fn from_factors(factors: Vec<FactorScore>) -> Self {
        let total_score = factors.iter().map(|f| f.score).sum::<u32>().min(MAX_SCORE);
        let percentage = f64::from(total_score) / f64::from(MAX_SCORE) * 100.0;
        let strength = Strength::from_percentage(percentage);
        Self {
            factors,
            total_score,
            max_score: MAX_SCORE,
            percentage,
            strength,
            recommendation: strength.recommendation().to_string(),
        }
    }

    pub fn factor(&self, name: &str) -> Option<&FactorScore> {
        self.factors.iter().find(|f| f.name == name)
    }
}

/// Pluggable rubric factor.
pub trait FactorSlot: Send + Sync {
    fn name(&self) -> &'static str;

    fn rate(&self, candidate: &SignalCandidate, volumes: &[f64]) -> FactorScore;
}

/// Placeholder factor that always scores zero.
#[derive(Debug, Clone, Copy)]
pub struct NeutralFactor {
    name: &'static str,
}

impl NeutralFactor {
    pub const fn new(name: &'static str) -> Self {
        Self { name }
    }
}

impl FactorSlot for NeutralFactor {
    fn name(&self) -> &'static str {
        self.name
    }

    fn rate(&self, _: &SignalCandidate, _: &[f64]) -> FactorScore {
        FactorScore::new(self.name, 0, 1, "not evaluated")
    }
}

/// Scores candidates against the ten-factor rubric.
pub struct QualityRater {
    divergence: Box<dyn FactorSlot>,
    support_resistance: Box<dyn FactorSlot>,
    news: Box<dyn FactorSlot>,
}

impl Default for QualityRater {
    fn default() -> Self {
        Self::new()
    }
}

impl QualityRater {
    /// A rater whose pluggable slots all score neutral.
    pub fn new() -> Self {
        Self {
            divergence: Box::new(NeutralFactor::new("divergence")),
            support_resistance: Box::new(NeutralFactor::new("support_resistance")),
            news: Box::new(NeutralFactor::new("news")),
        }
    }

    pub fn with_divergence(mut self, slot: Box<dyn FactorSlot>) -> Self {
        self.divergence = slot;
        self
    }

    pub fn with_support_resistance(mut self, slot: Box<dyn FactorSlot>) -> Self {
        self.support_resistance = slot;
        self
    }

    pub fn with_news(mut self, slot: Box<dyn FactorSlot>) -> Self {
        self.news = slot;
        self
    }

    /// Rates `candidate` as of UTC hour `hour`.
    pub fn rate(&self, candidate: &SignalCandidate, volumes: &[f64], hour: u32) -> QualityReport {
        let factors = vec![
            rate_consensus(candidate),
            rate_trend(candidate),
            rate_volume(candidate, volumes),
            rate_rsi(candidate),
            rate_reward_risk(candidate),
            rate_volatility(candidate),
            self.divergence.rate(candidate, volumes),
            self.support_resistance.rate(candidate, volumes),
            rate_session(hour),
            self.news.rate(candidate, volumes),
        ];
        QualityReport::from_factors(factors)
    }

    /// Rates `candidate` at the current UTC hour.
    pub fn rate_now(&self, candidate: &SignalCandidate, volumes: &[f64]) -> QualityReport {
        self.rate(candidate, volumes, Utc::now().hour())
    }
}

fn rate_consensus(c: &SignalCandidate) -> FactorScore {
    const NAME: &str = "consensus";
    let signals: Vec<Direction> = c.timeframes.iter().filter_map(|t| t.signal).collect();
    if signals.len() < 2 {
        return FactorScore::new(NAME, 0, 2, "fewer than 2 timeframes signal");
    }
    let buys = signals.iter().filter(|d| **d == Direction::Buy).count();
    let sells = signals.len() - buys;

    if buys == signals.len() || sells == signals.len() {
        let dir = if buys > 0 { Direction::Buy } else { Direction::Sell };
        FactorScore::new(NAME, 2, 2, format!("all {} timeframes confirm {dir}", signals.len()))
    } else if buys.abs_diff(sells) >= 2 {
        FactorScore::new(
            NAME,
            1,
            2,
            format!("strong majority ({}/{})", buys.max(sells), signals.len()),
        )
    } else {
        FactorScore::new(NAME, 0, 2, "no clear consensus")
    }
}

fn rate_trend(c: &SignalCandidate) -> FactorScore {
    const NAME: &str = "trend_strength";
    let aligned = c
        .timeframes
        .iter()
        .filter(|t| t.ema_trend.agrees_with(c.direction))
        .count();
    match aligned {
        0 => FactorScore::new(NAME, 0, 2, "trend does not support signal"),
        1 => FactorScore::new(NAME, 1, 2, "weak trend alignment"),
        n => FactorScore::new(
            NAME,
            2,
            2,
            format!("trend aligned on {n}/{} timeframes", c.timeframes.len()),
        ),
    }
}

fn rate_volume(c: &SignalCandidate, volumes: &[f64]) -> FactorScore {
    const NAME: &str = "volume";
    if volumes.len() < VOLUME_PERIOD {
        return FactorScore::new(NAME, 0, 2, "insufficient volume history");
    }
    let recent = &volumes[volumes.len() - VOLUME_PERIOD..];
    let avg = recent.iter().sum::<f64>() / VOLUME_PERIOD as f64;
    if c.volume <= 0.0 || avg <= 0.0 {
        return FactorScore::new(NAME, 0, 2, "invalid volume data");
    }

    let ratio = c.volume / avg;
    if ratio > 2.0 {
        FactorScore::new(NAME, 2, 2, format!("volume spike {ratio:.2}x average"))
    } else if ratio > 1.5 {
        FactorScore::new(NAME, 1, 2, format!("above average volume {ratio:.2}x"))
    } else if ratio < 0.5 {
        FactorScore::new(NAME, 0, 2, format!("low volume {ratio:.2}x average"))
    } else {
        FactorScore::new(NAME, 0, 2, format!("normal volume {ratio:.2}x average"))
    }
}

fn rate_rsi(c: &SignalCandidate) -> FactorScore {
    const NAME: &str = "rsi";
    let rsi = c.rsi;
    match c.direction {
        Direction::Buy if rsi < 30.0 => {
            FactorScore::new(NAME, 1, 1, format!("RSI oversold {rsi:.1}"))
        }
        Direction::Sell if rsi > 70.0 => {
            FactorScore::new(NAME, 1, 1, format!("RSI overbought {rsi:.1}"))
        }
        _ => FactorScore::new(NAME, 0, 1, format!("RSI outside {} zone {rsi:.1}", c.direction)),
    }
}

fn rate_reward_risk(c: &SignalCandidate) -> FactorScore {
    const NAME: &str = "reward_risk";
    if c.risk() == 0.0 {
        return FactorScore::new(NAME, 0, 1, "zero risk");
    }
    let rr = c.reward_risk();
    if rr >= 2.0 {
        FactorScore::new(NAME, 1, 1, format!("excellent R/R 1:{rr:.2}"))
    } else {
        FactorScore::new(NAME, 0, 1, format!("R/R 1:{rr:.2}"))
    }
}

fn rate_volatility(c: &SignalCandidate) -> FactorScore {
    const NAME: &str = "volatility";
    if c.atr <= 0.0 || c.entry <= 0.0 {
        return FactorScore::new(NAME, 0, 1, "no ATR data");
    }
    let pct = c.atr_pct();
    if (1.0..=3.0).contains(&pct) {
        FactorScore::new(NAME, 1, 1, format!("ideal volatility {pct:.2}%"))
    } else if pct < 0.5 {
        FactorScore::new(NAME, 0, 1, format!("low volatility {pct:.2}%, false breakout risk"))
    } else if pct > 5.0 {
        FactorScore::new(NAME, 0, 1, format!("high volatility {pct:.2}%, increased risk"))
    } else {
        FactorScore::new(NAME, 0, 1, format!("normal volatility {pct:.2}%"))
    }
}

fn rate_session(hour: u32) -> FactorScore {
    const NAME: &str = "session_timing";
    match hour {
        8..=15 => FactorScore::new(NAME, 1, 1, format!("London session ({hour}:00 UTC)")),
        13..=20 => FactorScore::new(NAME, 1, 1, format!("New York session ({hour}:00 UTC)")),
        0..=7 => FactorScore::new(NAME, 0, 1, format!("Asian session ({hour}:00 UTC)")),
        _ => FactorScore::new(NAME, 0, 1, format!("between sessions ({hour}:00 UTC)")),
    }
}
