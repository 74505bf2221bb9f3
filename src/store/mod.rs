//! Persistence contract and the records it stores.
//!
//! [`SignalStore`] is the only way the pipeline reads or writes durable
//! state. [`memory::MemoryStore`] is the bundled implementation.

pub mod memory;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::models::{Direction, Outcome};
use crate::quality::{FactorScore, QualityReport, Strength};
use crate::risk::config::RiskLimits;
use crate::signal::SignalCandidate;

/// Subscription tier of a recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Free,
    Premium,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Free => write!(f, "free"),
            Tier::Premium => write!(f, "premium"),
        }
    }
}

/// Daily risk budget of one recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskState {
    /// Percent of deposit that may be put at risk per day.
    pub daily_risk_limit: Decimal,
    pub daily_risk_used: Decimal,
    /// When the current window ends; `None` counts as already elapsed.
    pub reset_time: Option<DateTime<Utc>>,
    pub max_open_positions: u32,
    pub deposit: Decimal,
    pub risk_per_trade: Decimal,
}

impl RiskState {
    /// A fresh, unused budget with the given limits.
    pub fn from_limits(limits: &RiskLimits) -> Self {
        Self {
            daily_risk_limit: limits.daily_risk_limit,
            daily_risk_used: Decimal::ZERO,
            reset_time: None,
            max_open_positions: limits.max_open_positions,
            deposit: limits.deposit,
            risk_per_trade: limits.risk_per_trade,
        }
    }

    /// Starts a new window if the current one has elapsed.
    ///
    /// Returns `true` if the state changed and needs persisting.
    pub fn roll_over(&mut self, now: DateTime<Utc>) -> bool {
        match self.reset_time {
            Some(reset) if reset > now => false,
            _ => {
                self.daily_risk_used = Decimal::ZERO;
                self.reset_time = Some(now + Duration::days(1));
                true
            }
        }
    }

    pub fn remaining(&self) -> Decimal {
        (self.daily_risk_limit - self.daily_risk_used).max(Decimal::ZERO)
    }
}

/// Someone who may receive signals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipient {
    pub id: i64,
    /// Identifier on the delivery channel.
    pub external_id: i64,
    pub username: Option<String>,
    pub tier: Tier,
    pub subscribed_until: Option<DateTime<Utc>>,
    /// Symbols of interest; empty means all.
    pub selected_pairs: Vec<String>,
    pub banned: bool,
    pub risk: RiskState,
}

impl Recipient {
    /// Premium and not banned.
    pub fn receives_signals(&self) -> bool {
        self.tier == Tier::Premium && !self.banned
    }

    /// Whether `symbol` passes the recipient's pair filter.
    pub fn wants(&self, symbol: &str) -> bool {
        self.selected_pairs.is_empty() || self.selected_pairs.iter().any(|p| p == symbol)
    }
}

/// Lifecycle state of a persisted signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "outcome", rename_all = "lowercase")]
pub enum SignalStatus {
    Open,
    Closed(Outcome),
}

/// Persisted signal history row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRecord {
    pub id: i64,
    pub symbol: String,
    pub direction: Direction,
    pub entry: f64,
    pub stop_loss: f64,
    pub take_profit_1: f64,
    pub take_profit_2: f64,
    pub take_profit_3: f64,
    pub status: SignalStatus,
    pub exit_price: Option<f64>,
    pub profit_pct: Option<f64>,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl SignalRecord {
    /// Open record for `candidate` under id `id`.
    pub fn from_candidate(id: i64, candidate: &SignalCandidate) -> Self {
        Self {
            id,
            symbol: candidate.symbol.clone(),
            direction: candidate.direction,
            entry: candidate.entry,
            stop_loss: candidate.stop_loss,
            take_profit_1: candidate.take_profit_1,
            take_profit_2: candidate.take_profit_2,
            take_profit_3: candidate.take_profit_3,
            status: SignalStatus::Open,
            exit_price: None,
            profit_pct: None,
            opened_at: candidate.generated_at,
            closed_at: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == SignalStatus::Open
    }
}

/// Quality audit row tying a rating to the signal's eventual outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalStatistic {
    pub signal_id: i64,
    pub symbol: String,
    pub direction: Direction,
    pub entry: f64,
    pub stop_loss: f64,
    pub take_profit_1: f64,
    pub take_profit_2: f64,
    pub take_profit_3: f64,
    pub strength: Strength,
    pub percentage: f64,
    pub factors: Vec<FactorScore>,
    pub generated_at: DateTime<Utc>,
    pub result: Option<Outcome>,
    pub closed_at: Option<DateTime<Utc>>,
    pub profit_pct: Option<f64>,
}

impl SignalStatistic {
    pub fn new(signal_id: i64, candidate: &SignalCandidate, report: &QualityReport) -> Self {
        Self {
            signal_id,
            symbol: candidate.symbol.clone(),
            direction: candidate.direction,
            entry: candidate.entry,
            stop_loss: candidate.stop_loss,
            take_profit_1: candidate.take_profit_1,
            take_profit_2: candidate.take_profit_2,
            take_profit_3: candidate.take_profit_3,
            strength: report.strength,
            percentage: report.percentage,
            factors: report.factors.clone(),
            generated_at: candidate.generated_at,
            result: None,
            closed_at: None,
            profit_pct: None,
        }
    }
}

/// Durable state used by the pipeline.
#[async_trait]
pub trait SignalStore: Send + Sync {
    /// Returns the recipient with `external_id`, creating a free one if needed.
    async fn get_or_create_recipient(
        &self,
        external_id: i64,
        username: Option<&str>,
    ) -> Result<Recipient>;

    async fn recipient(&self, id: i64) -> Result<Option<Recipient>>;

    async fn recipients_by_tier(&self, tier: Tier) -> Result<Vec<Recipient>>;

    async fn update_risk(&self, recipient_id: i64, risk: &RiskState) -> Result<()>;

    /// Persists a new open signal and returns its id.
    async fn insert_open_signal(&self, candidate: &SignalCandidate) -> Result<i64>;

    async fn latest_open_signal(&self, symbol: &str) -> Result<Option<SignalRecord>>;

    async fn open_signals(&self) -> Result<Vec<SignalRecord>>;

    /// Marks a signal closed, stores exit price and direction-aware profit,
    /// and closes every delivery of it.
    async fn close_signal(
        &self,
        id: i64,
        outcome: Outcome,
        exit_price: f64,
        closed_at: DateTime<Utc>,
    ) -> Result<SignalRecord>;

    /// Records that `symbol`'s open signal reached `recipient_id`.
    async fn record_delivery(&self, recipient_id: i64, symbol: &str) -> Result<()>;

    /// Deliveries to `recipient_id` whose signal is still open.
    async fn count_open_deliveries(&self, recipient_id: i64) -> Result<u32>;

    async fn insert_statistic(&self, statistic: &SignalStatistic) -> Result<()>;

    async fn resolve_statistic(
        &self,
        signal_id: i64,
        outcome: Outcome,
        profit_pct: f64,
        closed_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Demotes premium recipients whose subscription ended before `now`
    /// and returns them.
    async fn expire_subscriptions(&self, now: DateTime<Utc>) -> Result<Vec<Recipient>>;

    /// Rolls over every elapsed risk window; returns how many changed.
    async fn sweep_risk_windows(&self, now: DateTime<Utc>) -> Result<usize>;
}
