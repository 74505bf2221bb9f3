//! In-process [`SignalStore`] backed by a single mutex-guarded state.
//!
//! The store can be seeded from a JSON recipient roster:
//!
//! ```json
//! { "recipients": [
//!     { "id": 1, "external_id": 1001, "username": "alice", "tier": "premium",
//!       "subscribed_until": "2026-12-01T00:00:00Z", "selected_pairs": ["BTC/USD"] }
//! ] }
//! ```
//!
//! Risk limits of seeded and newly created recipients come from the
//! [`RiskConfig`].

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::info;

use super::{
    Recipient, RiskState, SignalRecord, SignalStatistic, SignalStatus, SignalStore, Tier,
};
use crate::models::Outcome;
use crate::risk::config::RiskConfig;
use crate::signal::SignalCandidate;
use crate::{PulseError, Result};

#[derive(Debug, Deserialize)]
struct Roster {
    recipients: Vec<RosterEntry>,
}

#[derive(Debug, Deserialize)]
struct RosterEntry {
    id: i64,
    external_id: i64,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    tier: Tier,
    #[serde(default)]
    subscribed_until: Option<DateTime<Utc>>,
    #[serde(default)]
    selected_pairs: Vec<String>,
    #[serde(default)]
    banned: bool,
}

/// Delivery of a still-open signal. Dropped when the signal closes.
#[derive(Debug)]
struct Delivery {
    recipient_id: i64,
    symbol: String,
}

#[derive(Debug, Default)]
struct State {
    recipients: BTreeMap<i64, Recipient>,
    signals: BTreeMap<i64, SignalRecord>,
    statistics: HashMap<i64, SignalStatistic>,
    deliveries: Vec<Delivery>,
    next_recipient_id: i64,
    next_signal_id: i64,
}

/// Memory-resident store. All data is lost on exit.
pub struct MemoryStore {
    risk: RiskConfig,
    state: Mutex<State>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new(risk: RiskConfig) -> Self {
        Self {
            risk,
            state: Mutex::new(State {
                next_recipient_id: 1,
                next_signal_id: 1,
                ..State::default()
            }),
        }
    }

    /// Creates a store seeded from a roster file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if two
    /// entries share an id.
    pub fn from_roster(path: &Path, risk: RiskConfig) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            PulseError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        let roster: Roster = serde_json::from_str(&contents)?;

        let mut store = Self::new(risk);
        {
            let state = store.state.get_mut();
            for entry in roster.recipients {
                if state.recipients.contains_key(&entry.id) {
                    return Err(PulseError::Config(format!(
                        "duplicate recipient id {} in {}",
                        entry.id,
                        path.display()
                    )));
                }
                let recipient = Recipient {
                    id: entry.id,
                    external_id: entry.external_id,
                    username: entry.username,
                    tier: entry.tier,
                    subscribed_until: entry.subscribed_until,
                    selected_pairs: entry
                        .selected_pairs
                        .iter()
                        .map(|p| p.trim().to_uppercase())
                        .collect(),
                    banned: entry.banned,
                    risk: RiskState::from_limits(&store.risk.limits_for(entry.id)),
                };
                state.next_recipient_id = state.next_recipient_id.max(entry.id + 1);
                state.recipients.insert(entry.id, recipient);
            }
            info!(count = state.recipients.len(), path = %path.display(), "Loaded recipient roster");
        }
        Ok(store)
    }

    /// Inserts or replaces a recipient as-is.
    pub async fn upsert_recipient(&self, recipient: Recipient) {
        let mut state = self.state.lock().await;
        state.next_recipient_id = state.next_recipient_id.max(recipient.id + 1);
        state.recipients.insert(recipient.id, recipient);
    }

    /// Every persisted signal, open or closed.
    pub async fn signals(&self) -> Vec<SignalRecord> {
        self.state.lock().await.signals.values().cloned().collect()
    }

    pub async fn statistic(&self, signal_id: i64) -> Option<SignalStatistic> {
        self.state.lock().await.statistics.get(&signal_id).cloned()
    }
}

fn not_found(what: &str, id: i64) -> PulseError {
    PulseError::Store(format!("{what} {id} not found"))
}

#[async_trait]
impl SignalStore for MemoryStore {
    async fn get_or_create_recipient(
        &self,
        external_id: i64,
        username: Option<&str>,
    ) -> Result<Recipient> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state
            .recipients
            .values()
            .find(|r| r.external_id == external_id)
        {
            return Ok(existing.clone());
        }

        let id = state.next_recipient_id;
        state.next_recipient_id += 1;
        let recipient = Recipient {
            id,
            external_id,
            username: username.map(str::to_string),
            tier: Tier::Free,
            subscribed_until: None,
            selected_pairs: Vec::new(),
            banned: false,
            risk: RiskState::from_limits(&self.risk.limits_for(id)),
        };
        state.recipients.insert(id, recipient.clone());
        Ok(recipient)
    }

    async fn recipient(&self, id: i64) -> Result<Option<Recipient>> {
        Ok(self.state.lock().await.recipients.get(&id).cloned())
    }

    async fn recipients_by_tier(&self, tier: Tier) -> Result<Vec<Recipient>> {
        let state = self.state.lock().await;
        Ok(state
            .recipients
            .values()
            .filter(|r| r.tier == tier)
            .cloned()
            .collect())
    }

    async fn update_risk(&self, recipient_id: i64, risk: &RiskState) -> Result<()> {
        let mut state = self.state.lock().await;
        let recipient = state
            .recipients
            .get_mut(&recipient_id)
            .ok_or_else(|| not_found("recipient", recipient_id))?;
        recipient.risk = risk.clone();
        Ok(())
    }

    async fn insert_open_signal(&self, candidate: &SignalCandidate) -> Result<i64> {
        let mut state = self.state.lock().await;
        let id = state.next_signal_id;
        state.next_signal_id += 1;
        state
            .signals
            .insert(id, SignalRecord::from_candidate(id, candidate));
        Ok(id)
    }

    async fn latest_open_signal(&self, symbol: &str) -> Result<Option<SignalRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .signals
            .values()
            .rev()
            .find(|s| s.symbol == symbol && s.is_open())
            .cloned())
    }

    async fn open_signals(&self) -> Result<Vec<SignalRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .signals
            .values()
            .filter(|s| s.is_open())
            .cloned()
            .collect())
    }

    async fn close_signal(
        &self,
        id: i64,
        outcome: Outcome,
        exit_price: f64,
        closed_at: DateTime<Utc>,
    ) -> Result<SignalRecord> {
        let mut state = self.state.lock().await;
        let record = state
            .signals
            .get_mut(&id)
            .ok_or_else(|| not_found("signal", id))?;
        if !record.is_open() {
            return Err(PulseError::Store(format!("signal {id} already closed")));
        }

        record.status = SignalStatus::Closed(outcome);
        record.exit_price = Some(exit_price);
        record.profit_pct = Some(record.direction.profit_pct(record.entry, exit_price));
        record.closed_at = Some(closed_at);
        let closed = record.clone();

        state.deliveries.retain(|d| d.symbol != closed.symbol);
        Ok(closed)
    }

    async fn record_delivery(&self, recipient_id: i64, symbol: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.deliveries.push(Delivery {
            recipient_id,
            symbol: symbol.to_string(),
        });
        Ok(())
    }

    async fn count_open_deliveries(&self, recipient_id: i64) -> Result<u32> {
        let state = self.state.lock().await;
        let count = state
            .deliveries
            .iter()
            .filter(|d| d.recipient_id == recipient_id)
            .count();
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    async fn insert_statistic(&self, statistic: &SignalStatistic) -> Result<()> {
        let mut state = self.state.lock().await;
        state
            .statistics
            .insert(statistic.signal_id, statistic.clone());
        Ok(())
    }

    async fn resolve_statistic(
        &self,
        signal_id: i64,
        outcome: Outcome,
        profit_pct: f64,
        closed_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let stat = state
            .statistics
            .get_mut(&signal_id)
            .ok_or_else(|| not_found("statistic for signal", signal_id))?;
        stat.result = Some(outcome);
        stat.profit_pct = Some(profit_pct);
        stat.closed_at = Some(closed_at);
        Ok(())
    }

    async fn expire_subscriptions(&self, now: DateTime<Utc>) -> Result<Vec<Recipient>> {
        let mut state = self.state.lock().await;
        let mut expired = Vec::new();
        for recipient in state.recipients.values_mut() {
            if recipient.tier == Tier::Premium
                && recipient.subscribed_until.is_some_and(|until| until < now)
            {
                recipient.tier = Tier::Free;
                expired.push(recipient.clone());
            }
        }
        Ok(expired)
    }

    async fn sweep_risk_windows(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut state = self.state.lock().await;
        let mut changed = 0;
        for recipient in state.recipients.values_mut() {
            // Only elapsed windows; never-set windows roll on first access.
            if recipient.risk.reset_time.is_some_and(|t| t <= now) && recipient.risk.roll_over(now)
            {
                changed += 1;
            }
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use chrono::Duration;

    use super::*;
    use crate::signal::tests::buy_candidate;

    #[tokio::test]
    async fn creates_recipient_once() {
        let store = MemoryStore::new(RiskConfig::default());
        let a = store.get_or_create_recipient(555, Some("bob")).await.unwrap();
        let b = store.get_or_create_recipient(555, None).await.unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(a.tier, Tier::Free);
        assert_eq!(b.username.as_deref(), Some("bob"));
    }

    #[tokio::test]
    async fn close_computes_profit_and_closes_deliveries() {
        let store = MemoryStore::new(RiskConfig::default());
        let candidate = buy_candidate();
        let id = store.insert_open_signal(&candidate).await.unwrap();
        store.record_delivery(7, "BTC/USD").await.unwrap();
        store.record_delivery(8, "BTC/USD").await.unwrap();
        store.record_delivery(7, "ETH/USD").await.unwrap();
        assert_eq!(store.count_open_deliveries(7).await.unwrap(), 2);

        let closed = store
            .close_signal(id, Outcome::Tp1, 110.0, Utc::now())
            .await
            .unwrap();
        assert_eq!(closed.status, SignalStatus::Closed(Outcome::Tp1));
        assert!((closed.profit_pct.unwrap() - 10.0).abs() < 1e-9);
        assert_eq!(store.count_open_deliveries(7).await.unwrap(), 1);
        assert_eq!(store.count_open_deliveries(8).await.unwrap(), 0);
        // Closed deliveries are dropped, not kept around.
        assert_eq!(store.state.lock().await.deliveries.len(), 1);
        assert!(store.latest_open_signal("BTC/USD").await.unwrap().is_none());

        let again = store.close_signal(id, Outcome::StopLoss, 95.0, Utc::now()).await;
        assert!(again.is_err());
    }

    #[tokio::test]
    async fn expires_only_lapsed_premium() {
        let now = Utc::now();
        let store = MemoryStore::new(RiskConfig::default());
        let mut lapsed = store.get_or_create_recipient(1, None).await.unwrap();
        lapsed.tier = Tier::Premium;
        lapsed.subscribed_until = Some(now - Duration::hours(1));
        store.upsert_recipient(lapsed).await;

        let mut active = store.get_or_create_recipient(2, None).await.unwrap();
        active.tier = Tier::Premium;
        active.subscribed_until = Some(now + Duration::days(3));
        store.upsert_recipient(active).await;

        let expired = store.expire_subscriptions(now).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].external_id, 1);
        assert_eq!(store.recipients_by_tier(Tier::Premium).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn loads_roster_with_risk_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"recipients": [
                {{"id": 3, "external_id": 3003, "tier": "premium", "selected_pairs": ["btc/usd"]}},
                {{"id": 9, "external_id": 9009}}
            ]}}"#
        )
        .unwrap();
        let risk: RiskConfig =
            serde_json::from_str(r#"{"recipients": {"3": {"deposit": "5000"}}}"#).unwrap();

        let store = MemoryStore::from_roster(file.path(), risk).unwrap();
        let three = store.recipient(3).await.unwrap().unwrap();
        assert_eq!(three.selected_pairs, vec!["BTC/USD"]);
        assert_eq!(three.risk.deposit, rust_decimal::Decimal::from(5000));
        let nine = store.recipient(9).await.unwrap().unwrap();
        assert_eq!(nine.tier, Tier::Free);

        let created = store.get_or_create_recipient(1, None).await.unwrap();
        assert_eq!(created.id, 10);
    }
}
