//! Per-recipient risk gate for signal delivery.
//!
//! Enforces a daily risk budget and an open-position cap for every
//! recipient and sizes the position. Checks for one recipient are
//! serialized: [`RiskGatekeeper::admit`] hands out a [`RiskPermit`] that
//! holds the recipient's lock until it is committed or dropped, so two
//! signals can never both pass against the same remaining budget.

pub mod config;

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::signal::SignalCandidate;
use crate::store::{RiskState, SignalStore};

/// Reason a signal was not admitted for a recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RiskCheckError {
    UnknownRecipient {
        recipient_id: i64,
    },
    InvalidStopDistance {
        symbol: String,
    },
    DailyLimitExceeded {
        used: Decimal,
        signal_risk: Decimal,
        limit: Decimal,
    },
    MaxOpenPositions {
        open: u32,
        max: u32,
    },
    /// The store could not be read or written.
    Store(String),
}

impl fmt::Display for RiskCheckError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownRecipient { recipient_id } => {
                write!(f, "recipient {recipient_id} not found")
            }
            Self::InvalidStopDistance { symbol } => {
                write!(f, "{symbol}: stop distance must be positive")
            }
            Self::DailyLimitExceeded {
                used,
                signal_risk,
                limit,
            } => write!(
                f,
                "daily risk {used}% + {signal_risk}% exceeds limit of {limit}%"
            ),
            Self::MaxOpenPositions { open, max } => {
                write!(f, "{open} open positions reached limit of {max}")
            }
            Self::Store(msg) => write!(f, "risk state unavailable: {msg}"),
        }
    }
}

impl std::error::Error for RiskCheckError {}

/// Approval to deliver one signal to one recipient.
///
/// Holds the recipient's lock. [`commit`](Self::commit) after a successful
/// delivery charges the budget; dropping the permit charges nothing.
#[derive(Debug)]
#[must_use = "dropping a permit releases it without charging the budget"]
pub struct RiskPermit {
    recipient_id: i64,
    state: RiskState,
    /// Stop distance of the signal, percent of entry.
    pub signal_risk: Decimal,
    /// Position size in deposit currency.
    pub position_size: Decimal,
    /// Deposit percentage charged on commit.
    pub realized_risk: Decimal,
    _guard: OwnedMutexGuard<()>,
}

impl RiskPermit {
    pub fn recipient_id(&self) -> i64 {
        self.recipient_id
    }

    /// Budget state as seen at admission.
    pub fn state(&self) -> &RiskState {
        &self.state
    }

    /// Charges the realized risk, records the delivery of `symbol`, and
    /// releases the recipient's lock.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects either write.
    pub async fn commit(mut self, store: &dyn SignalStore, symbol: &str) -> crate::Result<()> {
        self.state.daily_risk_used += self.realized_risk;
        store.update_risk(self.recipient_id, &self.state).await?;
        store.record_delivery(self.recipient_id, symbol).await?;
        debug!(
            recipient_id = self.recipient_id,
            symbol,
            used = %self.state.daily_risk_used,
            "Risk committed"
        );
        Ok(())
    }
}

/// Admits signals against each recipient's daily budget.
pub struct RiskGatekeeper {
    store: Arc<dyn SignalStore>,
    locks: DashMap<i64, Arc<Mutex<()>>>,
}

impl RiskGatekeeper {
    pub fn new(store: Arc<dyn SignalStore>) -> Self {
        Self {
            store,
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, recipient_id: i64) -> Arc<Mutex<()>> {
        self.locks
            .entry(recipient_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Validates `candidate` for `recipient_id` at time `now`.
    ///
    /// Rolls over an elapsed daily window first (persisting the reset).
    /// Does NOT charge the budget; call [`RiskPermit::commit`] after the
    /// signal is delivered.
    pub async fn admit(
        &self,
        recipient_id: i64,
        candidate: &SignalCandidate,
        now: DateTime<Utc>,
    ) -> Result<RiskPermit, RiskCheckError> {
        let guard = self.lock_for(recipient_id).lock_owned().await;

        let recipient = self
            .store
            .recipient(recipient_id)
            .await
            .map_err(|e| RiskCheckError::Store(e.to_string()))?
            .ok_or(RiskCheckError::UnknownRecipient { recipient_id })?;

        let mut state = recipient.risk;
        if state.roll_over(now) {
            self.store
                .update_risk(recipient_id, &state)
                .await
                .map_err(|e| RiskCheckError::Store(e.to_string()))?;
            debug!(recipient_id, "Daily risk window reset");
        }

        let signal_risk = candidate.risk_pct();
        if signal_risk <= Decimal::ZERO {
            return Err(RiskCheckError::InvalidStopDistance {
                symbol: candidate.symbol.clone(),
            });
        }

        // 1. Daily budget
        if state.daily_risk_used + signal_risk > state.daily_risk_limit {
            return Err(RiskCheckError::DailyLimitExceeded {
                used: state.daily_risk_used,
                signal_risk,
                limit: state.daily_risk_limit,
            });
        }

        // 2. Concurrent exposure
        let open = self
            .store
            .count_open_deliveries(recipient_id)
            .await
            .map_err(|e| RiskCheckError::Store(e.to_string()))?;
        if open >= state.max_open_positions {
            return Err(RiskCheckError::MaxOpenPositions {
                open,
                max: state.max_open_positions,
            });
        }

        let position_size = position_size(state.deposit, state.risk_per_trade, signal_risk);
        let realized_risk = signal_risk * state.risk_per_trade / Decimal::ONE_HUNDRED;

        Ok(RiskPermit {
            recipient_id,
            state,
            signal_risk,
            position_size,
            realized_risk,
            _guard: guard,
        })
    }

    /// Rolls over every elapsed window. Returns how many were reset.
    pub async fn sweep(&self, now: DateTime<Utc>) -> crate::Result<usize> {
        let reset = self.store.sweep_risk_windows(now).await?;
        if reset > 0 {
            debug!(reset, "Swept daily risk windows");
        }
        Ok(reset)
    }

    /// Drops lock entries nobody is holding.
    pub fn prune_locks(&self) {
        let before = self.locks.len();
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        let pruned = before.saturating_sub(self.locks.len());
        if pruned > 0 {
            debug!(pruned, "Pruned idle recipient locks");
        }
    }
}

/// `(deposit × risk_per_trade%) / stop_distance%`, rounded to cents.
pub fn position_size(deposit: Decimal, risk_per_trade: Decimal, signal_risk: Decimal) -> Decimal {
    if signal_risk <= Decimal::ZERO {
        warn!(%signal_risk, "Position size requested for non-positive stop distance");
        return Decimal::ZERO;
    }
    let risk_amount = deposit * risk_per_trade / Decimal::ONE_HUNDRED;
    (risk_amount / (signal_risk / Decimal::ONE_HUNDRED)).round_dp(2)
}
