//! Lifecycle tracker behaviour against an in-memory store and mock prices.

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;

use chrono::Duration;

use signalpulse::config::TrackerConfig;
use signalpulse::models::Outcome;
use signalpulse::quality::QualityRater;
use signalpulse::risk::config::RiskConfig;
use signalpulse::store::memory::MemoryStore;
use signalpulse::store::{SignalStatus, SignalStore, Tier};
use signalpulse::tracker::LifecycleTracker;

use common::{FlakyStore, MockMarket, RecordingNotifier, buy_100, recipient, t0};

struct Harness {
    market: Arc<MockMarket>,
    store: Arc<MemoryStore>,
    notifier: Arc<RecordingNotifier>,
    tracker: LifecycleTracker,
}

async fn harness() -> Harness {
    let market = Arc::new(MockMarket::default());
    let store = Arc::new(MemoryStore::new(RiskConfig::default()));
    store.upsert_recipient(recipient(1, Tier::Premium, &[])).await;
    store.upsert_recipient(recipient(2, Tier::Free, &[])).await;
    let notifier = Arc::new(RecordingNotifier::default());
    let tracker = LifecycleTracker::new(
        market.clone(),
        store.clone(),
        notifier.clone(),
        TrackerConfig::default(),
    );
    Harness {
        market,
        store,
        notifier,
        tracker,
    }
}

#[tokio::test]
async fn buy_reaches_first_target_and_is_removed_once() {
    let h = harness().await;
    let c = buy_100();
    let report = QualityRater::new().rate(&c, &[], 10);
    assert!(h.tracker.open(&c, Some(&report)).await);

    h.market.set_price("BTC/USD", 105.0);
    let tick = h.tracker.tick(t0() + Duration::minutes(5)).await;
    assert_eq!(tick.checked, 1);
    assert!(tick.closed.is_empty());
    assert!(h.tracker.is_tracking("BTC/USD").await);

    h.market.set_price("BTC/USD", 110.0);
    let tick = h.tracker.tick(t0() + Duration::minutes(10)).await;
    assert_eq!(tick.closed, vec![("BTC/USD".to_string(), Outcome::Tp1)]);
    assert!(!h.tracker.is_tracking("BTC/USD").await);

    let records = h.store.signals().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, SignalStatus::Closed(Outcome::Tp1));
    assert_eq!(records[0].exit_price, Some(110.0));
    assert!((records[0].profit_pct.unwrap() - 10.0).abs() < 1e-9);

    let stat = h.store.statistic(records[0].id).await.unwrap();
    assert_eq!(stat.result, Some(Outcome::Tp1));

    // Only the premium recipient hears about it, exactly once.
    assert_eq!(h.notifier.texts_for(1).len(), 1);
    assert!(h.notifier.texts_for(1)[0].starts_with("Target 1 reached"));
    assert!(h.notifier.texts_for(2).is_empty());

    let tick = h.tracker.tick(t0() + Duration::minutes(15)).await;
    assert_eq!(tick, Default::default());
    assert_eq!(h.notifier.count(), 1);
}

#[tokio::test]
async fn furthest_target_wins_in_one_tick() {
    let h = harness().await;
    h.tracker.open(&buy_100(), None).await;
    h.market.set_price("BTC/USD", 121.0);
    let tick = h.tracker.tick(t0()).await;
    assert_eq!(tick.closed, vec![("BTC/USD".to_string(), Outcome::Tp3)]);
}

#[tokio::test]
async fn stop_loss_closes_with_loss() {
    let h = harness().await;
    h.tracker.open(&buy_100(), None).await;
    h.market.set_price("BTC/USD", 95.0);
    let tick = h.tracker.tick(t0()).await;
    assert_eq!(tick.closed, vec![("BTC/USD".to_string(), Outcome::StopLoss)]);
    let record = &h.store.signals().await[0];
    assert!((record.profit_pct.unwrap() + 5.0).abs() < 1e-9);
}

#[tokio::test]
async fn expires_after_max_age() {
    let h = harness().await;
    h.tracker.open(&buy_100(), None).await;
    h.market.set_price("BTC/USD", 101.0);

    let tick = h.tracker.tick(t0() + Duration::hours(47)).await;
    assert!(tick.closed.is_empty());
    let tick = h.tracker.tick(t0() + Duration::hours(48)).await;
    assert_eq!(tick.closed, vec![("BTC/USD".to_string(), Outcome::Expired)]);
}

#[tokio::test]
async fn duplicate_symbol_is_suppressed() {
    let h = harness().await;
    assert!(h.tracker.open(&buy_100(), None).await);

    let mut second = buy_100();
    second.entry = 101.0;
    assert!(!h.tracker.open(&second, None).await);

    assert_eq!(h.store.signals().await.len(), 1);
    assert_eq!(h.tracker.book().get("BTC/USD").await.unwrap().entry, 100.0);
}

#[tokio::test]
async fn missing_price_leaves_signal_open() {
    let h = harness().await;
    h.tracker.open(&buy_100(), None).await;

    let tick = h.tracker.tick(t0()).await;
    assert_eq!(tick.checked, 0);

    h.market.fail_prices.store(true, Ordering::SeqCst);
    h.market.set_price("BTC/USD", 130.0);
    let tick = h.tracker.tick(t0()).await;
    assert!(tick.closed.is_empty());
    assert!(h.tracker.is_tracking("BTC/USD").await);
}

#[tokio::test]
async fn empty_book_skips_price_fetch() {
    let h = harness().await;
    h.tracker.tick(t0()).await;
    assert_eq!(h.market.ticker_batches.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn failed_insert_is_retried_on_next_tick() {
    let market = Arc::new(MockMarket::default());
    let store = Arc::new(FlakyStore::new());
    store.failing_inserts.store(1, Ordering::SeqCst);
    let tracker = LifecycleTracker::new(
        market.clone(),
        store.clone(),
        Arc::new(RecordingNotifier::default()),
        TrackerConfig::default(),
    );

    let c = buy_100();
    let report = QualityRater::new().rate(&c, &[], 10);
    assert!(tracker.open(&c, Some(&report)).await);
    assert!(store.open_signals().await.unwrap().is_empty());
    assert_eq!(tracker.book().get("BTC/USD").await.unwrap().record_id, None);

    market.set_price("BTC/USD", 100.0);
    tracker.tick(t0()).await;

    let open = store.open_signals().await.unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(tracker.book().get("BTC/USD").await.unwrap().record_id, Some(open[0].id));
    assert!(store.inner.statistic(open[0].id).await.is_some());
}

#[tokio::test]
async fn tick_during_slow_insert_does_not_insert_twice() {
    let market = Arc::new(MockMarket::default());
    let store = Arc::new(FlakyStore::new());
    store.insert_delay_ms.store(50, Ordering::SeqCst);
    let tracker = LifecycleTracker::new(
        market.clone(),
        store.clone(),
        Arc::new(RecordingNotifier::default()),
        TrackerConfig::default(),
    );
    market.set_price("BTC/USD", 100.0);

    let c = buy_100();
    let report = QualityRater::new().rate(&c, &[], 10);
    let (opened, _) = tokio::join!(tracker.open(&c, Some(&report)), async {
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        tracker.tick(t0()).await
    });
    assert!(opened);

    let rows = store.inner.signals().await;
    assert_eq!(rows.len(), 1);
    assert_eq!(tracker.book().get("BTC/USD").await.unwrap().record_id, Some(rows[0].id));
    assert!(store.inner.statistic(rows[0].id).await.is_some());

    // Later ticks have nothing left to insert.
    tracker.tick(t0()).await;
    assert_eq!(store.inner.signals().await.len(), 1);
}

#[tokio::test]
async fn failed_close_stays_open_until_write_succeeds() {
    let market = Arc::new(MockMarket::default());
    let store = Arc::new(FlakyStore::new());
    let tracker = LifecycleTracker::new(
        market.clone(),
        store.clone(),
        Arc::new(RecordingNotifier::default()),
        TrackerConfig::default(),
    );
    tracker.open(&buy_100(), None).await;

    store.fail_closes.store(true, Ordering::SeqCst);
    market.set_price("BTC/USD", 111.0);
    let tick = tracker.tick(t0()).await;
    assert!(tick.closed.is_empty());
    assert!(tracker.is_tracking("BTC/USD").await);

    store.fail_closes.store(false, Ordering::SeqCst);
    let tick = tracker.tick(t0()).await;
    assert_eq!(tick.closed, vec![("BTC/USD".to_string(), Outcome::Tp1)]);
    assert!(!tracker.is_tracking("BTC/USD").await);
}

#[tokio::test]
async fn reload_restores_open_signals() {
    let store = Arc::new(MemoryStore::new(RiskConfig::default()));
    let closed_id = store.insert_open_signal(&common::candidate(
        "ETH/USD",
        signalpulse::models::Direction::Sell,
        2000.0,
        2100.0,
        [1800.0, 1700.0, 1600.0],
    ))
    .await
    .unwrap();
    store
        .close_signal(closed_id, Outcome::StopLoss, 2100.0, t0())
        .await
        .unwrap();
    store.insert_open_signal(&buy_100()).await.unwrap();

    let tracker = LifecycleTracker::new(
        Arc::new(MockMarket::default()),
        store,
        Arc::new(RecordingNotifier::default()),
        TrackerConfig::default(),
    );
    assert_eq!(tracker.reload().await.unwrap(), 1);
    assert!(tracker.is_tracking("BTC/USD").await);
    assert!(!tracker.is_tracking("ETH/USD").await);
    assert!(!tracker.open(&buy_100(), None).await);
}
