//! Weighted vote across timeframes.

use std::collections::HashMap;

use super::timeframe::TimeframeOutcome;
use crate::models::{Direction, Timeframe};

/// Consensus weights normalized over the configured timeframe set.
#[derive(Debug, Clone)]
pub struct TimeframeWeights {
    weights: HashMap<Timeframe, f64>,
}

impl TimeframeWeights {
    /// Normalizes each timeframe's base weight so the set sums to 1.
    pub fn for_timeframes(timeframes: &[Timeframe]) -> Self {
        let total: f64 = timeframes.iter().map(Timeframe::base_weight).sum();
        let weights = timeframes
            .iter()
            .map(|tf| {
                let w = if total > 0.0 {
                    tf.base_weight() / total
                } else {
                    0.0
                };
                (*tf, w)
            })
            .collect();
        Self { weights }
    }

    /// Weight of `timeframe`, 0 if it is not in the configured set.
    pub fn weight(&self, timeframe: Timeframe) -> f64 {
        self.weights.get(&timeframe).copied().unwrap_or(0.0)
    }
}

/// Summed weight per direction among participating timeframes.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VoteTally {
    pub buy: f64,
    pub sell: f64,
}

impl VoteTally {
    pub fn total(&self) -> f64 {
        self.buy + self.sell
    }
}

/// Combined view of all timeframes of one symbol.
#[derive(Debug, Clone)]
pub struct ConsensusResult {
    pub outcomes: Vec<TimeframeOutcome>,
    pub final_signal: Option<Direction>,
    /// In `[0, 1]`; 0 whenever `final_signal` is `None`.
    pub confidence: f64,
    pub tally: VoteTally,
}

impl ConsensusResult {
    /// Number of timeframes whose own signal is `direction`.
    pub fn count(&self, direction: Direction) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.signal() == Some(direction))
            .count()
    }

    /// Outcome for `timeframe`, if it was part of the pass.
    pub fn outcome(&self, timeframe: Timeframe) -> Option<&TimeframeOutcome> {
        self.outcomes.iter().find(|o| o.timeframe() == timeframe)
    }
}

/// Folds per-timeframe outcomes into one direction and confidence.
///
/// Only timeframes with a signal participate. Confidence is the mean of the
/// winner's share of participating weight and the weight-scaled strength.
pub fn consensus(outcomes: Vec<TimeframeOutcome>, weights: &TimeframeWeights) -> ConsensusResult {
    let mut tally = VoteTally::default();
    let mut weighted_strength = 0.0;

    for outcome in &outcomes {
        let Some(direction) = outcome.signal() else {
            continue;
        };
        let w = weights.weight(outcome.timeframe());
        match direction {
            Direction::Buy => tally.buy += w,
            Direction::Sell => tally.sell += w,
        }
        weighted_strength += outcome.strength() * w;
    }

    let participating = tally.total();
    let winner = if participating <= 0.0 {
        None
    } else if tally.buy > tally.sell {
        Some((Direction::Buy, tally.buy))
    } else if tally.sell > tally.buy {
        Some((Direction::Sell, tally.sell))
    } else {
        None
    };

    let (final_signal, confidence) = match winner {
        Some((direction, votes)) => {
            let confidence = (votes / participating + weighted_strength) / 2.0;
            (Some(direction), confidence.clamp(0.0, 1.0))
        }
        None => (None, 0.0),
    };

    ConsensusResult {
        outcomes,
        final_signal,
        confidence,
        tally,
    }
}
