//! Technical indicators over an ordered candle sequence.
//!
//! Pure computation: no I/O, no shared state. Every output column has one
//! entry per input bar, and bars inside an indicator's warm-up window hold
//! `None` rather than a placeholder number, so downstream comparisons can
//! tell "unavailable" apart from a real reading.
//!
//! Indicators implemented:
//! - Trend: EMA (SMA-seeded), MACD line / signal / histogram
//! - Momentum: RSI (Wilder), Stochastic %K / %D
//! - Volatility: ATR (Wilder), Bollinger Bands
//! - Trend strength: ADX (Wilder)

pub mod pool;

use crate::models::candle::Candle;

/// One indicator column, aligned with the candle sequence.
pub type Series = Vec<Option<f64>>;

pub const EMA_SHORT: usize = 20;
pub const EMA_MID: usize = 50;
pub const EMA_LONG: usize = 200;
pub const RSI_PERIOD: usize = 14;
pub const ATR_PERIOD: usize = 14;
pub const ADX_PERIOD: usize = 14;
pub const MACD_FAST: usize = 12;
pub const MACD_SLOW: usize = 26;
pub const MACD_SIGNAL: usize = 9;
pub const BB_PERIOD: usize = 20;
pub const BB_STD: f64 = 2.0;
pub const STOCH_K: usize = 14;
pub const STOCH_SMOOTH: usize = 3;

/// Candles plus every indicator column the pipeline reads.
#[derive(Debug, Clone)]
pub struct IndicatorFrame {
    pub candles: Vec<Candle>,
    pub ema_short: Series,
    pub ema_mid: Series,
    pub ema_long: Series,
    pub rsi: Series,
    pub atr: Series,
    pub adx: Series,
    pub macd: Series,
    pub macd_signal: Series,
    pub macd_hist: Series,
    pub bb_upper: Series,
    pub bb_middle: Series,
    pub bb_lower: Series,
    pub stoch_k: Series,
    pub stoch_d: Series,
}

/// Indicator values of a single bar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndicatorRow {
    pub candle: Candle,
    pub ema_short: Option<f64>,
    pub ema_mid: Option<f64>,
    pub ema_long: Option<f64>,
    pub rsi: Option<f64>,
    pub atr: Option<f64>,
    pub adx: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub macd_hist: Option<f64>,
    pub bb_upper: Option<f64>,
    pub bb_middle: Option<f64>,
    pub bb_lower: Option<f64>,
    pub stoch_k: Option<f64>,
    pub stoch_d: Option<f64>,
}

impl IndicatorFrame {
    /// Computes every indicator column from scratch.
    pub fn compute(candles: Vec<Candle>) -> Self {
        let close: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let high: Vec<f64> = candles.iter().map(|c| c.high).collect();
        let low: Vec<f64> = candles.iter().map(|c| c.low).collect();
        let close_series: Series = close.iter().copied().map(Some).collect();

        let (macd_line, macd_signal, macd_hist) =
            macd(&close, MACD_FAST, MACD_SLOW, MACD_SIGNAL);
        let (bb_upper, bb_middle, bb_lower) = bollinger(&close, BB_PERIOD, BB_STD);
        let (stoch_k, stoch_d) = stochastic(&high, &low, &close, STOCH_K, STOCH_SMOOTH);

        Self {
            ema_short: ema(&close_series, EMA_SHORT),
            ema_mid: ema(&close_series, EMA_MID),
            ema_long: ema(&close_series, EMA_LONG),
            rsi: rsi(&close, RSI_PERIOD),
            atr: atr(&high, &low, &close, ATR_PERIOD),
            adx: adx(&high, &low, &close, ADX_PERIOD),
            macd: macd_line,
            macd_signal,
            macd_hist,
            bb_upper,
            bb_middle,
            bb_lower,
            stoch_k,
            stoch_d,
            candles,
        }
    }

    /// Number of bars in the frame.
    pub fn len(&self) -> usize {
        self.candles.len()
    }

    /// Returns `true` if the frame holds no bars.
    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    /// Returns the indicator values at bar `index`.
    pub fn row(&self, index: usize) -> Option<IndicatorRow> {
        let candle = *self.candles.get(index)?;
        let at = |s: &Series| s.get(index).copied().flatten();
        Some(IndicatorRow {
            candle,
            ema_short: at(&self.ema_short),
            ema_mid: at(&self.ema_mid),
            ema_long: at(&self.ema_long),
            rsi: at(&self.rsi),
            atr: at(&self.atr),
            adx: at(&self.adx),
            macd: at(&self.macd),
            macd_signal: at(&self.macd_signal),
            macd_hist: at(&self.macd_hist),
            bb_upper: at(&self.bb_upper),
            bb_middle: at(&self.bb_middle),
            bb_lower: at(&self.bb_lower),
            stoch_k: at(&self.stoch_k),
            stoch_d: at(&self.stoch_d),
        })
    }

    /// The most recent bar.
    pub fn latest(&self) -> Option<IndicatorRow> {
        self.len().checked_sub(1).and_then(|i| self.row(i))
    }

    /// The bar before the most recent one.
    pub fn previous(&self) -> Option<IndicatorRow> {
        self.len().checked_sub(2).and_then(|i| self.row(i))
    }

    /// Volumes of the whole frame, oldest first.
    pub fn volumes(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.volume).collect()
    }
}

/// Exponential moving average, seeded with the SMA of the first `period`
/// available values. A gap in the input restarts the seed.
pub fn ema(values: &[Option<f64>], period: usize) -> Series {
    let mut out = vec![None; values.len()];
    if period == 0 {
        return out;
    }
    let k = 2.0 / (period as f64 + 1.0);
    let mut seed: Vec<f64> = Vec::with_capacity(period);
    let mut prev: Option<f64> = None;

    for (i, value) in values.iter().enumerate() {
        let Some(v) = *value else {
            seed.clear();
            prev = None;
            continue;
        };
        match prev {
            Some(p) => {
                let next = v * k + p * (1.0 - k);
                out[i] = Some(next);
                prev = Some(next);
            }
            None => {
                seed.push(v);
                if seed.len() == period {
                    let sma = seed.iter().sum::<f64>() / period as f64;
                    out[i] = Some(sma);
                    prev = Some(sma);
                }
            }
        }
    }
    out
}

/// Simple moving average over the trailing `period` values. Any gap inside
/// the window yields `None`.
pub fn sma(values: &[Option<f64>], period: usize) -> Series {
    let mut out = vec![None; values.len()];
    if period == 0 {
        return out;
    }
    for i in (period - 1)..values.len() {
        let window = &values[i + 1 - period..=i];
        if window.iter().all(Option::is_some) {
            out[i] = Some(window.iter().flatten().sum::<f64>() / period as f64);
        }
    }
    out
}

/// Wilder smoothing: SMA seed over the first `period` values starting at
/// `start`, then `avg = (prev * (n - 1) + x) / n`.
fn wilder(values: &[f64], start: usize, period: usize) -> Series {
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() < start + period {
        return out;
    }
    let n = period as f64;
    let seed_end = start + period - 1;
    let mut avg = values[start..=seed_end].iter().sum::<f64>() / n;
    out[seed_end] = Some(avg);
    for i in (seed_end + 1)..values.len() {
        avg = (avg * (n - 1.0) + values[i]) / n;
        out[i] = Some(avg);
    }
    out
}

/// Relative Strength Index with Wilder smoothing. First value at `period`.
pub fn rsi(close: &[f64], period: usize) -> Series {
    let mut out = vec![None; close.len()];
    if period == 0 || close.len() <= period {
        return out;
    }
    let mut gains = vec![0.0; close.len()];
    let mut losses = vec![0.0; close.len()];
    for i in 1..close.len() {
        let change = close[i] - close[i - 1];
        gains[i] = change.max(0.0);
        losses[i] = (-change).max(0.0);
    }
    let avg_gain = wilder(&gains, 1, period);
    let avg_loss = wilder(&losses, 1, period);
    for i in 0..close.len() {
        if let (Some(g), Some(l)) = (avg_gain[i], avg_loss[i]) {
            out[i] = Some(if l == 0.0 {
                if g == 0.0 { 50.0 } else { 100.0 }
            } else {
                100.0 - 100.0 / (1.0 + g / l)
            });
        }
    }
    out
}

/// True range per bar; the first bar uses `high - low`.
fn true_range(high: &[f64], low: &[f64], close: &[f64]) -> Vec<f64> {
    (0..close.len())
        .map(|i| {
            let hl = high[i] - low[i];
            if i == 0 {
                hl
            } else {
                let prev = close[i - 1];
                hl.max((high[i] - prev).abs()).max((low[i] - prev).abs())
            }
        })
        .collect()
}

/// Average True Range with Wilder smoothing. First value at `period - 1`.
pub fn atr(high: &[f64], low: &[f64], close: &[f64], period: usize) -> Series {
    wilder(&true_range(high, low, close), 0, period)
}

/// Average Directional Index. First value at `2 * period - 1`.
pub fn adx(high: &[f64], low: &[f64], close: &[f64], period: usize) -> Series {
    let len = close.len();
    if period == 0 || len < 2 * period {
        return vec![None; len];
    }

    let tr = true_range(high, low, close);
    let mut plus_dm = vec![0.0; len];
    let mut minus_dm = vec![0.0; len];
    for i in 1..len {
        let up = high[i] - high[i - 1];
        let down = low[i - 1] - low[i];
        if up > down && up > 0.0 {
            plus_dm[i] = up;
        }
        if down > up && down > 0.0 {
            minus_dm[i] = down;
        }
    }

    let tr_s = wilder(&tr, 1, period);
    let plus_s = wilder(&plus_dm, 1, period);
    let minus_s = wilder(&minus_dm, 1, period);

    let mut dx = vec![0.0; len];
    for i in period..len {
        if let (Some(t), Some(p), Some(m)) = (tr_s[i], plus_s[i], minus_s[i]) {
            if t > 0.0 {
                let plus_di = 100.0 * p / t;
                let minus_di = 100.0 * m / t;
                let sum = plus_di + minus_di;
                dx[i] = if sum > 0.0 {
                    100.0 * (plus_di - minus_di).abs() / sum
                } else {
                    0.0
                };
            }
        }
    }

    wilder(&dx, period, period)
}

/// MACD line, signal line and histogram.
pub fn macd(close: &[f64], fast: usize, slow: usize, signal: usize) -> (Series, Series, Series) {
    let close_series: Series = close.iter().copied().map(Some).collect();
    let fast_ema = ema(&close_series, fast);
    let slow_ema = ema(&close_series, slow);

    let line: Series = fast_ema
        .iter()
        .zip(&slow_ema)
        .map(|(f, s)| match (f, s) {
            (Some(f), Some(s)) => Some(f - s),
            _ => None,
        })
        .collect();
    let signal_line = ema(&line, signal);
    let hist = line
        .iter()
        .zip(&signal_line)
        .map(|(m, s)| match (m, s) {
            (Some(m), Some(s)) => Some(m - s),
            _ => None,
        })
        .collect();

    (line, signal_line, hist)
}

/// Bollinger Bands: SMA ± `k` population standard deviations.
pub fn bollinger(close: &[f64], period: usize, k: f64) -> (Series, Series, Series) {
    let len = close.len();
    let mut upper = vec![None; len];
    let mut middle = vec![None; len];
    let mut lower = vec![None; len];
    if period == 0 {
        return (upper, middle, lower);
    }
    for i in (period - 1)..len {
        let window = &close[i + 1 - period..=i];
        let mean = window.iter().sum::<f64>() / period as f64;
        let var = window.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / period as f64;
        let sd = var.sqrt();
        upper[i] = Some(mean + k * sd);
        middle[i] = Some(mean);
        lower[i] = Some(mean - k * sd);
    }
    (upper, middle, lower)
}

/// Stochastic oscillator: smoothed %K and its %D signal.
pub fn stochastic(
    high: &[f64],
    low: &[f64],
    close: &[f64],
    period: usize,
    smooth: usize,
) -> (Series, Series) {
    let len = close.len();
    let mut raw = vec![None; len];
    if period > 0 {
        for i in (period - 1)..len {
            let hh = high[i + 1 - period..=i]
                .iter()
                .copied()
                .fold(f64::MIN, f64::max);
            let ll = low[i + 1 - period..=i]
                .iter()
                .copied()
                .fold(f64::MAX, f64::min);
            let range = hh - ll;
            raw[i] = Some(if range > 0.0 {
                100.0 * (close[i] - ll) / range
            } else {
                50.0
            });
        }
    }
    let k = sma(&raw, smooth);
    let d = sma(&k, smooth);
    (k, d)
}
