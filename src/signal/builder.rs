//! Candidate construction: gating, point scoring and level derivation.

use std::fmt;

use chrono::{DateTime, Utc};

use super::SignalCandidate;
use crate::analysis::consensus::ConsensusResult;
use crate::analysis::scoring::{self, ScoreCard};
use crate::config::BuilderConfig;
use crate::indicators::IndicatorFrame;
use crate::models::Direction;
use crate::models::candle::Candle;

/// Why no candidate was produced for a symbol.
#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    LowLiquidity { quote_volume: f64, min: f64 },
    InsufficientHistory { candles: usize, min: usize },
    NoConsensus,
    LowConfidence { confidence: f64, min: f64 },
    LowScore { direction: Direction, score: u32, min: u32 },
    MissingIndicators,
    InvalidLevels(String),
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LowLiquidity { quote_volume, min } => {
                write!(f, "24h quote volume {quote_volume:.0} below minimum {min:.0}")
            }
            Self::InsufficientHistory { candles, min } => {
                write!(f, "{candles} candles on primary timeframe, need {min}")
            }
            Self::NoConsensus => write!(f, "no consensus direction"),
            Self::LowConfidence { confidence, min } => {
                write!(f, "confidence {confidence:.2} below minimum {min:.2}")
            }
            Self::LowScore {
                direction,
                score,
                min,
            } => write!(f, "{direction} score {score} below minimum {min}"),
            Self::MissingIndicators => write!(f, "required indicator values unavailable"),
            Self::InvalidLevels(reason) => write!(f, "invalid levels: {reason}"),
        }
    }
}

impl std::error::Error for Rejection {}

/// Entry, stop and targets of a candidate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Levels {
    pub entry: f64,
    pub stop_loss: f64,
    pub targets: [f64; 3],
}

/// Turns a consensus plus the primary timeframe frame into a candidate.
#[derive(Debug, Clone)]
pub struct CandidateBuilder {
    config: BuilderConfig,
}

impl CandidateBuilder {
    pub fn new(config: BuilderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BuilderConfig {
        &self.config
    }

    /// Runs every gate and derives levels for the consensus direction.
    pub fn build(
        &self,
        symbol: &str,
        quote_volume_24h: f64,
        consensus: &ConsensusResult,
        primary: &IndicatorFrame,
        now: DateTime<Utc>,
    ) -> Result<SignalCandidate, Rejection> {
        let cfg = &self.config;

        if quote_volume_24h < cfg.min_quote_volume {
            return Err(Rejection::LowLiquidity {
                quote_volume: quote_volume_24h,
                min: cfg.min_quote_volume,
            });
        }
        if primary.len() < cfg.min_candles {
            return Err(Rejection::InsufficientHistory {
                candles: primary.len(),
                min: cfg.min_candles,
            });
        }

        let direction = consensus.final_signal.ok_or(Rejection::NoConsensus)?;
        if consensus.confidence < cfg.min_confidence {
            return Err(Rejection::LowConfidence {
                confidence: consensus.confidence,
                min: cfg.min_confidence,
            });
        }

        let (Some(last), Some(prev)) = (primary.latest(), primary.previous()) else {
            return Err(Rejection::MissingIndicators);
        };
        let card: ScoreCard = scoring::score(&prev, &last).ok_or(Rejection::MissingIndicators)?;
        let score = card.score(direction);
        if score < cfg.min_score {
            return Err(Rejection::LowScore {
                direction,
                score,
                min: cfg.min_score,
            });
        }

        let (Some(atr), Some(rsi)) = (last.atr, last.rsi) else {
            return Err(Rejection::MissingIndicators);
        };

        let start = primary.len().saturating_sub(cfg.lookback_bars);
        let levels = derive_levels(direction, last.candle.close, atr, &primary.candles[start..], cfg)?;

        let mut reasons = card.reasons(direction).to_vec();
        reasons.push(format!(
            "Consensus {direction} ({} of {} timeframes, confidence {:.2})",
            consensus.count(direction),
            consensus.outcomes.len(),
            consensus.confidence
        ));

        let candidate = SignalCandidate {
            symbol: symbol.to_string(),
            direction,
            entry: levels.entry,
            stop_loss: levels.stop_loss,
            take_profit_1: levels.targets[0],
            take_profit_2: levels.targets[1],
            take_profit_3: levels.targets[2],
            confidence: consensus.confidence,
            score,
            atr,
            rsi,
            volume: last.candle.volume,
            quote_volume_24h,
            reasons,
            timeframes: consensus
                .outcomes
                .iter()
                .filter_map(|o| o.result().cloned())
                .collect(),
            generated_at: now,
        };

        if !candidate.levels_ordered() {
            return Err(Rejection::InvalidLevels(format!(
                "stop {:.8} entry {:.8} targets {:?}",
                candidate.stop_loss,
                candidate.entry,
                candidate.targets()
            )));
        }
        Ok(candidate)
    }
}

/// Derives stop and targets from recent extremes and volatility, then
/// enforces the minimum reward-to-risk on the first target.
///
/// # Errors
///
/// Returns [`Rejection::InvalidLevels`] if the window is empty, the risk is
/// not positive, or a sell target would fall to zero or below.
pub fn derive_levels(
    direction: Direction,
    entry: f64,
    atr: f64,
    window: &[Candle],
    cfg: &BuilderConfig,
) -> Result<Levels, Rejection> {
    if window.is_empty() {
        return Err(Rejection::InvalidLevels("empty lookback window".into()));
    }
    let min_rr = cfg.min_reward_risk;

    let mut lows: Vec<f64> = window.iter().map(|c| c.low).collect();
    let mut highs: Vec<f64> = window.iter().map(|c| c.high).collect();
    lows.sort_by(f64::total_cmp);
    highs.sort_by(|a, b| b.total_cmp(a));

    let (stop_loss, risk, mut targets) = match direction {
        Direction::Buy => {
            let local_min = lows[0];
            let stop = local_min.min(entry - atr * cfg.atr_stop_multiplier);
            let risk = entry - stop;

            let above: Vec<f64> = highs.iter().copied().filter(|h| *h > entry).take(3).collect();
            let mut targets = if above.len() == 3 {
                [above[2], above[1], above[0]]
            } else {
                [entry + risk, entry + risk * 2.0, entry + risk * 3.0]
            };
            targets[0] = targets[0].max(entry + risk);
            (stop, risk, targets)
        }
        Direction::Sell => {
            let local_max = highs[0];
            let stop = local_max.max(entry + atr * cfg.atr_stop_multiplier);
            let risk = stop - entry;

            let below: Vec<f64> = lows.iter().copied().filter(|l| *l < entry).take(3).collect();
            let targets = if below.len() == 3 {
                [below[2], below[1], below[0]]
            } else {
                [
                    entry - atr * min_rr,
                    entry - atr * min_rr * 1.5,
                    entry - atr * min_rr * 2.0,
                ]
            };
            (stop, risk, targets)
        }
    };

    if risk.is_nan() || risk <= 0.0 {
        return Err(Rejection::InvalidLevels(format!("non-positive risk {risk}")));
    }

    let rr = (targets[0] - entry).abs() / risk;
    let wrong_side = match direction {
        Direction::Buy => targets[0] <= entry,
        Direction::Sell => targets[0] >= entry,
    };
    if wrong_side || rr < min_rr {
        targets[0] = match direction {
            Direction::Buy => entry + risk * min_rr,
            Direction::Sell => entry - risk * min_rr,
        };
    }

    match direction {
        Direction::Buy => {
            targets[1] = targets[1].max(targets[0]);
            targets[2] = targets[2].max(targets[1]);
        }
        Direction::Sell => {
            targets[1] = targets[1].min(targets[0]);
            targets[2] = targets[2].min(targets[1]);
            if targets[2] <= 0.0 {
                return Err(Rejection::InvalidLevels(format!(
                    "sell target {:.8} not above zero",
                    targets[2]
                )));
            }
        }
    }

    Ok(Levels {
        entry,
        stop_loss,
        targets,
    })
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::analysis::consensus::VoteTally;
    use crate::indicators::Series;

    fn bar(low: f64, high: f64) -> Candle {
        Candle {
            timestamp: 0,
            open: (low + high) / 2.0,
            high,
            low,
            close: (low + high) / 2.0,
            volume: 1.0,
        }
    }

    #[test]
    fn buy_targets_come_from_highs_above_entry() {
        let window = vec![
            bar(95.0, 130.0),
            bar(96.0, 125.0),
            bar(97.0, 140.0),
            bar(98.0, 101.0),
        ];
        let levels = derive_levels(Direction::Buy, 100.0, 1.0, &window, &BuilderConfig::default())
            .unwrap();
        // stop = min(95, 100 - 2) = 95, risk 5
        assert_eq!(levels.stop_loss, 95.0);
        assert_eq!(levels.targets, [125.0, 130.0, 140.0]);
    }

    #[test]
    fn buy_falls_back_to_risk_multiples_and_corrects_rr() {
        let window = vec![bar(90.0, 100.0), bar(92.0, 99.0)];
        let levels = derive_levels(Direction::Buy, 100.0, 1.0, &window, &BuilderConfig::default())
            .unwrap();
        // risk 10: fallback 110/120/130, tp1 rr 1 corrected to 2
        assert_eq!(levels.stop_loss, 90.0);
        assert_eq!(levels.targets, [120.0, 120.0, 130.0]);
    }

    #[test]
    fn sell_uses_atr_fallback_and_keeps_order() {
        let window = vec![bar(99.0, 104.0), bar(98.5, 103.0)];
        let levels = derive_levels(Direction::Sell, 100.0, 1.0, &window, &BuilderConfig::default())
            .unwrap();
        // stop = max(104, 102) = 104, risk 4; fallback tp1 98 gives rr 0.5
        assert_eq!(levels.stop_loss, 104.0);
        assert_eq!(levels.targets[0], 92.0);
        assert!(levels.targets[1] <= levels.targets[0]);
        assert!(levels.targets[2] <= levels.targets[1]);
    }

    #[test]
    fn sell_target_below_zero_is_rejected() {
        let window = vec![bar(0.5, 3.0)];
        let err = derive_levels(Direction::Sell, 1.0, 0.1, &window, &BuilderConfig::default())
            .unwrap_err();
        assert!(matches!(err, Rejection::InvalidLevels(_)));
    }

    #[test]
    fn rejection_messages() {
        let r = Rejection::LowScore {
            direction: Direction::Buy,
            score: 25,
            min: 40,
        };
        assert_eq!(r.to_string(), "BUY score 25 below minimum 40");
    }

    /// `n` bars closing at 100 with a buy-leaning indicator stack: score
    /// buy 45 / sell 5, ATR 1.
    fn frame(n: usize) -> IndicatorFrame {
        let col = |v: f64| -> Series { vec![Some(v); n] };
        IndicatorFrame {
            candles: (0..n)
                .map(|i| Candle {
                    timestamp: i as i64 * 3_600_000,
                    open: 100.0,
                    high: 102.0,
                    low: 98.0,
                    close: 100.0,
                    volume: 10.0,
                })
                .collect(),
            ema_short: col(99.5),
            ema_mid: col(98.0),
            ema_long: col(90.0),
            rsi: col(55.0),
            atr: col(1.0),
            adx: col(30.0),
            macd: col(1.0),
            macd_signal: col(0.5),
            macd_hist: col(0.5),
            bb_upper: col(110.0),
            bb_middle: col(100.0),
            bb_lower: col(90.0),
            stoch_k: col(50.0),
            stoch_d: col(50.0),
        }
    }

    fn agreed(direction: Option<Direction>, confidence: f64) -> ConsensusResult {
        ConsensusResult {
            outcomes: Vec::new(),
            final_signal: direction,
            confidence,
            tally: VoteTally::default(),
        }
    }

    fn build(quote_volume: f64, consensus: &ConsensusResult, primary: &IndicatorFrame) -> Result<SignalCandidate, Rejection> {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        CandidateBuilder::new(BuilderConfig::default()).build("BTC/USD", quote_volume, consensus, primary, now)
    }

    #[test]
    fn builds_buy_with_corrected_first_target() {
        let c = build(5_000_000.0, &agreed(Some(Direction::Buy), 0.8), &frame(250)).unwrap();
        assert_eq!(c.direction, Direction::Buy);
        assert_eq!(c.entry, 100.0);
        // stop = min(98, 100 - 2 * 1), risk 2; highs at 102 give rr 1, so tp1 moves to 104
        assert_eq!(c.stop_loss, 98.0);
        assert_eq!(c.targets(), [104.0, 104.0, 104.0]);
        assert!(c.levels_ordered());
        assert!(c.reward_risk() >= 2.0);
        assert_eq!(c.score, 45);
        assert_eq!(c.atr, 1.0);
        assert_eq!(c.rsi, 55.0);
        assert_eq!(c.confidence, 0.8);
        assert!(c.reasons.iter().any(|r| r == "MACD bullish"));
        assert!(c.reasons.last().unwrap().starts_with("Consensus BUY"));
    }

    #[test]
    fn thin_market_is_rejected_first() {
        let err = build(500_000.0, &agreed(None, 0.0), &frame(10)).unwrap_err();
        assert_eq!(
            err,
            Rejection::LowLiquidity {
                quote_volume: 500_000.0,
                min: 1_000_000.0
            }
        );
    }

    #[test]
    fn short_history_is_rejected() {
        let err = build(5_000_000.0, &agreed(Some(Direction::Buy), 0.8), &frame(150)).unwrap_err();
        assert_eq!(err, Rejection::InsufficientHistory { candles: 150, min: 200 });
    }

    #[test]
    fn missing_consensus_direction_is_rejected() {
        let err = build(5_000_000.0, &agreed(None, 0.0), &frame(250)).unwrap_err();
        assert_eq!(err, Rejection::NoConsensus);
    }

    #[test]
    fn weak_consensus_is_rejected() {
        let err = build(5_000_000.0, &agreed(Some(Direction::Buy), 0.5), &frame(250)).unwrap_err();
        assert_eq!(err, Rejection::LowConfidence { confidence: 0.5, min: 0.6 });
    }

    #[test]
    fn direction_without_points_is_rejected() {
        let err = build(5_000_000.0, &agreed(Some(Direction::Sell), 0.8), &frame(250)).unwrap_err();
        assert_eq!(
            err,
            Rejection::LowScore {
                direction: Direction::Sell,
                score: 5,
                min: 40
            }
        );
    }

    #[test]
    fn unavailable_indicators_are_rejected() {
        let consensus = agreed(Some(Direction::Buy), 0.8);

        let mut no_atr = frame(250);
        no_atr.atr[249] = None;
        assert_eq!(build(5_000_000.0, &consensus, &no_atr).unwrap_err(), Rejection::MissingIndicators);

        let mut no_rsi = frame(250);
        no_rsi.rsi[249] = None;
        assert_eq!(build(5_000_000.0, &consensus, &no_rsi).unwrap_err(), Rejection::MissingIndicators);
    }
}
