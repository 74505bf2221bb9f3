//! Risk gate admission against the in-memory store.

mod common;

use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio_test::{assert_ok, assert_pending, task};

use signalpulse::models::Direction;
use signalpulse::risk::config::RiskConfig;
use signalpulse::risk::{RiskCheckError, RiskGatekeeper};
use signalpulse::store::memory::MemoryStore;
use signalpulse::store::{SignalStore, Tier};

use common::{candidate, recipient, t0};

async fn store_with(used: Decimal) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new(RiskConfig::default()));
    let mut r = recipient(1, Tier::Premium, &[]);
    r.risk.daily_risk_used = used;
    r.risk.reset_time = Some(t0() + chrono::Duration::hours(6));
    store.upsert_recipient(r).await;
    store
}

#[tokio::test]
async fn rejects_signal_that_overshoots_daily_budget() {
    let store = store_with(dec!(4.0)).await;
    let gate = RiskGatekeeper::new(store.clone());
    let c = candidate("BTC/USD", Direction::Buy, 100.0, 98.0, [104.0, 106.0, 108.0]);

    let err = gate.admit(1, &c, t0()).await.err().unwrap();
    assert_eq!(
        err,
        RiskCheckError::DailyLimitExceeded {
            used: dec!(4.0),
            signal_risk: dec!(2),
            limit: dec!(5.0),
        }
    );
}

#[tokio::test]
async fn admits_and_sizes_position() {
    let store = store_with(Decimal::ZERO).await;
    let gate = RiskGatekeeper::new(store.clone());
    let c = candidate("BTC/USD", Direction::Buy, 100.0, 99.1, [102.0, 103.0, 104.0]);

    let permit = gate.admit(1, &c, t0()).await.unwrap();
    assert_eq!(permit.signal_risk, dec!(0.9));
    assert_eq!(permit.position_size, dec!(1111.11));
    assert_eq!(permit.realized_risk, dec!(0.009));

    permit.commit(store.as_ref(), "BTC/USD").await.unwrap();
    let r = store.recipient(1).await.unwrap().unwrap();
    assert_eq!(r.risk.daily_risk_used, dec!(0.009));
    assert_eq!(store.count_open_deliveries(1).await.unwrap(), 1);
}

#[tokio::test]
async fn dropped_permit_charges_nothing() {
    let store = store_with(dec!(1.5)).await;
    let gate = RiskGatekeeper::new(store.clone());
    let c = candidate("BTC/USD", Direction::Buy, 100.0, 98.0, [104.0, 106.0, 108.0]);

    drop(gate.admit(1, &c, t0()).await.unwrap());

    let r = store.recipient(1).await.unwrap().unwrap();
    assert_eq!(r.risk.daily_risk_used, dec!(1.5));
    assert_eq!(store.count_open_deliveries(1).await.unwrap(), 0);
}

#[tokio::test]
async fn open_position_cap() {
    let risk: RiskConfig =
        serde_json::from_str(r#"{"recipients": {"1": {"max_open_positions": 1}}}"#).unwrap();
    let store = Arc::new(MemoryStore::new(risk.clone()));
    let mut r = recipient(1, Tier::Premium, &[]);
    r.risk = signalpulse::store::RiskState::from_limits(&risk.limits_for(1));
    store.upsert_recipient(r).await;
    store.record_delivery(1, "ETH/USD").await.unwrap();

    let gate = RiskGatekeeper::new(store.clone());
    let c = candidate("BTC/USD", Direction::Buy, 100.0, 98.0, [104.0, 106.0, 108.0]);
    assert_eq!(
        gate.admit(1, &c, t0()).await.err(),
        Some(RiskCheckError::MaxOpenPositions { open: 1, max: 1 })
    );
}

#[tokio::test]
async fn elapsed_window_is_reset_before_checking() {
    let store = Arc::new(MemoryStore::new(RiskConfig::default()));
    let mut r = recipient(1, Tier::Premium, &[]);
    r.risk.daily_risk_used = dec!(4.9);
    r.risk.reset_time = Some(t0() - chrono::Duration::minutes(1));
    store.upsert_recipient(r).await;

    let gate = RiskGatekeeper::new(store.clone());
    let c = candidate("BTC/USD", Direction::Buy, 100.0, 98.0, [104.0, 106.0, 108.0]);
    drop(gate.admit(1, &c, t0()).await.unwrap());

    let r = store.recipient(1).await.unwrap().unwrap();
    assert_eq!(r.risk.daily_risk_used, Decimal::ZERO);
    assert_eq!(r.risk.reset_time, Some(t0() + chrono::Duration::days(1)));
}

#[tokio::test]
async fn unknown_recipient() {
    let store = Arc::new(MemoryStore::new(RiskConfig::default()));
    let gate = RiskGatekeeper::new(store);
    let c = common::buy_100();
    assert_eq!(
        gate.admit(42, &c, t0()).await.err(),
        Some(RiskCheckError::UnknownRecipient { recipient_id: 42 })
    );
}

#[tokio::test]
async fn admissions_for_one_recipient_are_serialized() {
    let store = store_with(Decimal::ZERO).await;
    let gate = Arc::new(RiskGatekeeper::new(store.clone()));
    let c = candidate("BTC/USD", Direction::Buy, 100.0, 98.0, [104.0, 106.0, 108.0]);

    let permit = gate.admit(1, &c, t0()).await.unwrap();
    let mut waiting = task::spawn(gate.admit(1, &c, t0()));
    assert_pending!(waiting.poll());

    permit.commit(store.as_ref(), "BTC/USD").await.unwrap();
    assert!(waiting.is_woken());
    drop(waiting);
    let second = assert_ok!(gate.admit(1, &c, t0()).await);
    assert_eq!(second.state().daily_risk_used, dec!(0.02));
}

#[tokio::test]
async fn sweep_resets_only_elapsed_windows() {
    let store = Arc::new(MemoryStore::new(RiskConfig::default()));
    let mut elapsed = recipient(1, Tier::Premium, &[]);
    elapsed.risk.daily_risk_used = dec!(3);
    elapsed.risk.reset_time = Some(t0() - chrono::Duration::hours(1));
    store.upsert_recipient(elapsed).await;
    let mut current = recipient(2, Tier::Premium, &[]);
    current.risk.daily_risk_used = dec!(2);
    current.risk.reset_time = Some(t0() + chrono::Duration::hours(1));
    store.upsert_recipient(current).await;
    store.upsert_recipient(recipient(3, Tier::Free, &[])).await;

    let gate = RiskGatekeeper::new(store.clone());
    assert_eq!(gate.sweep(t0()).await.unwrap(), 1);
    assert_eq!(store.recipient(1).await.unwrap().unwrap().risk.daily_risk_used, Decimal::ZERO);
    assert_eq!(store.recipient(2).await.unwrap().unwrap().risk.daily_risk_used, dec!(2));
}
