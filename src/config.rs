//! Application configuration.
//!
//! Process-level settings come from environment variables:
//! - `PULSE_KRAKEN_URL` overrides the Kraken REST endpoint
//! - `PULSE_PIPELINE_CONFIG` points at a JSON file of pipeline parameters
//! - `PULSE_RECIPIENTS` points at a JSON recipient roster
//! - `PULSE_DEFAULT_SYMBOLS` is the comma-separated fallback symbol set
//!
//! Pipeline parameters live in [`PipelineConfig`]. Every section and every
//! field has a default, so an empty `{}` file (or no file at all) yields the
//! stock configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::market::kraken::DEFAULT_REST_URL;
use crate::models::Timeframe;
use crate::risk::config::RiskConfig;

const DEFAULT_SYMBOLS: &str = "BTC/USD,ETH/USD";

/// Top-level application configuration.
#[derive(Debug)]
pub struct AppConfig {
    pub kraken_url: String,
    pub pipeline_path: Option<PathBuf>,
    pub recipients_path: Option<PathBuf>,
    pub default_symbols: Vec<String>,
}

/// Loads the application configuration from environment variables.
///
/// # Errors
///
/// Returns [`PulseError::Config`](crate::PulseError::Config) if
/// `PULSE_DEFAULT_SYMBOLS` is set but names no symbol.
pub fn fetch_config() -> crate::Result<AppConfig> {
    let kraken_url =
        non_empty_var("PULSE_KRAKEN_URL").unwrap_or_else(|| DEFAULT_REST_URL.to_string());

    let default_symbols = parse_symbols(
        &non_empty_var("PULSE_DEFAULT_SYMBOLS").unwrap_or_else(|| DEFAULT_SYMBOLS.to_string()),
    );
    if default_symbols.is_empty() {
        return Err(crate::PulseError::Config(
            "PULSE_DEFAULT_SYMBOLS contains no symbols".to_string(),
        ));
    }

    Ok(AppConfig {
        kraken_url,
        pipeline_path: non_empty_var("PULSE_PIPELINE_CONFIG").map(PathBuf::from),
        recipients_path: non_empty_var("PULSE_RECIPIENTS").map(PathBuf::from),
        default_symbols,
    })
}

/// Returns the value of an environment variable if it exists and is non-empty.
fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

/// Splits a comma-separated symbol list, upper-casing and dropping blanks.
pub fn parse_symbols(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Tunable pipeline parameters, loaded from JSON.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub analysis: AnalysisConfig,
    pub builder: BuilderConfig,
    pub tracker: TrackerConfig,
    pub worker: WorkerConfig,
    pub risk: RiskConfig,
}

impl PipelineConfig {
    /// Loads the pipeline configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or describes an
    /// unusable configuration.
    pub fn load(path: &Path) -> crate::Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            crate::PulseError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects parameter combinations the pipeline cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`PulseError::Config`](crate::PulseError::Config) describing
    /// the first offending parameter.
    pub fn validate(&self) -> crate::Result<()> {
        let fail = |msg: &str| Err(crate::PulseError::Config(msg.to_string()));
        if self.analysis.timeframes.is_empty() {
            return fail("analysis.timeframes must not be empty");
        }
        if self.analysis.candle_limit < self.builder.min_candles {
            return fail("analysis.candle_limit must be at least builder.min_candles");
        }
        if self.builder.lookback_bars == 0 {
            return fail("builder.lookback_bars must be positive");
        }
        if self.builder.min_reward_risk <= 0.0 || self.builder.atr_stop_multiplier <= 0.0 {
            return fail("builder multipliers must be positive");
        }
        if !(0.0..=1.0).contains(&self.builder.min_confidence) {
            return fail("builder.min_confidence must be within [0, 1]");
        }
        if self.worker.broadcast_batch == 0 {
            return fail("worker.broadcast_batch must be positive");
        }
        Ok(())
    }
}

/// Timeframe analysis parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub timeframes: Vec<Timeframe>,
    pub candle_limit: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            timeframes: vec![Timeframe::M15, Timeframe::H1, Timeframe::H4],
            candle_limit: 300,
        }
    }
}

/// Candidate builder gates and level parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BuilderConfig {
    pub primary_timeframe: Timeframe,
    pub min_quote_volume: f64,
    pub min_candles: usize,
    pub lookback_bars: usize,
    pub atr_stop_multiplier: f64,
    pub min_reward_risk: f64,
    pub min_confidence: f64,
    pub min_score: u32,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            primary_timeframe: Timeframe::H1,
            min_quote_volume: 1_000_000.0,
            min_candles: 200,
            lookback_bars: 100,
            atr_stop_multiplier: 2.0,
            min_reward_risk: 2.0,
            min_confidence: 0.6,
            min_score: 40,
        }
    }
}

/// Lifecycle tracker timings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub poll_interval_secs: u64,
    pub idle_interval_secs: u64,
    pub max_signal_age_hours: i64,
}

impl TrackerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn idle_interval(&self) -> Duration {
        Duration::from_secs(self.idle_interval_secs)
    }

    pub fn max_signal_age(&self) -> chrono::Duration {
        chrono::Duration::hours(self.max_signal_age_hours)
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 20,
            idle_interval_secs: 30,
            max_signal_age_hours: 48,
        }
    }
}

/// Analysis loop and broadcast pacing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub cycle_interval_secs: u64,
    pub error_cooldown_secs: u64,
    pub symbol_delay_ms: u64,
    pub broadcast_batch: usize,
    pub batch_pause_ms: u64,
    pub sweep_interval_secs: u64,
    /// Indicator pool size; 0 uses one thread per core.
    pub indicator_threads: usize,
}

impl WorkerConfig {
    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.cycle_interval_secs)
    }

    pub fn error_cooldown(&self) -> Duration {
        Duration::from_secs(self.error_cooldown_secs)
    }

    pub fn symbol_delay(&self) -> Duration {
        Duration::from_millis(self.symbol_delay_ms)
    }

    pub fn batch_pause(&self) -> Duration {
        Duration::from_millis(self.batch_pause_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            cycle_interval_secs: 300,
            error_cooldown_secs: 60,
            symbol_delay_ms: 300,
            broadcast_batch: 20,
            batch_pause_ms: 500,
            sweep_interval_secs: 3600,
            indicator_threads: 0,
        }
    }
}
