//! Shared test doubles and builders.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use signalpulse::models::candle::Candle;
use signalpulse::models::ticker::Ticker;
use signalpulse::models::{Direction, Outcome, Timeframe};
use signalpulse::risk::config::{RiskConfig, RiskLimits};
use signalpulse::signal::SignalCandidate;
use signalpulse::store::memory::MemoryStore;
use signalpulse::store::{
    Recipient, RiskState, SignalRecord, SignalStatistic, SignalStore, Tier,
};
use signalpulse::market::MarketData;
use signalpulse::notify::Notifier;
use signalpulse::{PulseError, Result};

/// Path to the JSON fixtures directory.
pub fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

pub fn t0() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

/// `n` identical one-minute bars closing at `price`.
pub fn flat_candles(n: usize, price: f64) -> Vec<Candle> {
    (0..n)
        .map(|i| Candle {
            timestamp: 1_700_000_000_000 + i as i64 * 60_000,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: 10.0,
        })
        .collect()
}

/// Slow uptrend, a four-bar pullback, then a bounce on heavy volume. The
/// last bar crosses EMA20 back above EMA50 with the EMA stack still bullish,
/// which the pipeline turns into a deliverable BUY.
pub fn trending_candles() -> Vec<Candle> {
    const BARS: usize = 300;
    const PULLBACK: usize = 4;

    let mut closes: Vec<f64> = (0..BARS - 1 - PULLBACK)
        .map(|i| 100.0 * (1.0 + 0.0001 * i as f64))
        .collect();
    for _ in 0..PULLBACK {
        let last = closes[closes.len() - 1];
        closes.push(last * (1.0 - 0.003));
    }
    let last = closes[closes.len() - 1];
    closes.push(last * (1.0 + 0.01));

    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| Candle {
            timestamp: 1_700_000_000_000 + i as i64 * 3_600_000,
            open: close,
            high: close * (1.0 + 0.008),
            low: close * (1.0 - 0.008),
            close,
            volume: if i == BARS - 1 { 50.0 } else { 10.0 },
        })
        .collect()
}

/// Candidate with explicit levels and otherwise neutral fields.
pub fn candidate(symbol: &str, direction: Direction, entry: f64, stop: f64, targets: [f64; 3]) -> SignalCandidate {
    SignalCandidate {
        symbol: symbol.to_string(),
        direction,
        entry,
        stop_loss: stop,
        take_profit_1: targets[0],
        take_profit_2: targets[1],
        take_profit_3: targets[2],
        confidence: 0.8,
        score: 55,
        atr: 1.5,
        rsi: 45.0,
        volume: 100.0,
        quote_volume_24h: 5_000_000.0,
        reasons: vec!["MACD crossed above signal".to_string()],
        timeframes: Vec::new(),
        generated_at: t0(),
    }
}

/// BUY at 100 with stop 95 and targets 110/115/120.
pub fn buy_100() -> SignalCandidate {
    candidate("BTC/USD", Direction::Buy, 100.0, 95.0, [110.0, 115.0, 120.0])
}

pub fn recipient(id: i64, tier: Tier, pairs: &[&str]) -> Recipient {
    Recipient {
        id,
        external_id: 1000 + id,
        username: Some(format!("user{id}")),
        tier,
        subscribed_until: None,
        selected_pairs: pairs.iter().map(|p| p.to_string()).collect(),
        banned: false,
        risk: RiskState::from_limits(&RiskLimits::default()),
    }
}

/// Market with fixed candles per timeframe and settable prices.
#[derive(Default)]
pub struct MockMarket {
    pub candles: HashMap<Timeframe, Vec<Candle>>,
    pub prices: Mutex<HashMap<String, f64>>,
    pub quote_volume: f64,
    pub fail_prices: AtomicBool,
    pub ticker_batches: AtomicUsize,
}

impl MockMarket {
    pub fn with_candles(timeframes: &[Timeframe], candles: Vec<Candle>) -> Self {
        Self {
            candles: timeframes.iter().map(|tf| (*tf, candles.clone())).collect(),
            quote_volume: 5_000_000.0,
            ..Self::default()
        }
    }

    pub fn set_price(&self, symbol: &str, price: f64) {
        self.prices.lock().unwrap().insert(symbol.to_string(), price);
    }
}

#[async_trait]
impl MarketData for MockMarket {
    async fn fetch_candles(&self, symbol: &str, timeframe: Timeframe, limit: usize) -> Result<Vec<Candle>> {
        let candles = self
            .candles
            .get(&timeframe)
            .ok_or_else(|| PulseError::MalformedMessage(format!("no {timeframe} data for {symbol}")))?;
        let start = candles.len().saturating_sub(limit);
        Ok(candles[start..].to_vec())
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker> {
        let last = self
            .prices
            .lock()
            .unwrap()
            .get(symbol)
            .copied()
            .ok_or_else(|| PulseError::MalformedMessage(format!("unknown pair {symbol}")))?;
        Ok(Ticker {
            symbol: symbol.to_string(),
            last,
            quote_volume_24h: self.quote_volume,
        })
    }

    async fn fetch_tickers(&self, symbols: &[String]) -> Result<HashMap<String, f64>> {
        self.ticker_batches.fetch_add(1, Ordering::SeqCst);
        if self.fail_prices.load(Ordering::SeqCst) {
            return Err(PulseError::MalformedMessage("service unavailable".into()));
        }
        let prices = self.prices.lock().unwrap();
        Ok(symbols
            .iter()
            .filter_map(|s| prices.get(s).map(|p| (s.clone(), *p)))
            .collect())
    }
}

/// Notifier that records every text and can fail for chosen recipients.
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<(i64, String)>>,
    pub fail_for: HashSet<i64>,
}

impl RecordingNotifier {
    pub fn failing_for(ids: &[i64]) -> Self {
        Self {
            fail_for: ids.iter().copied().collect(),
            ..Self::default()
        }
    }

    pub fn texts_for(&self, recipient_id: i64) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id == recipient_id)
            .map(|(_, text)| text.clone())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_text(&self, recipient: &Recipient, text: &str) -> Result<()> {
        if self.fail_for.contains(&recipient.id) {
            return Err(PulseError::Notify(format!("recipient {} unreachable", recipient.id)));
        }
        self.sent.lock().unwrap().push((recipient.id, text.to_string()));
        Ok(())
    }

    async fn send_image(&self, recipient: &Recipient, _path: &Path, caption: &str) -> Result<()> {
        self.send_text(recipient, caption).await
    }
}

/// [`MemoryStore`] whose signal writes can be made to fail.
pub struct FlakyStore {
    pub inner: MemoryStore,
    /// Number of upcoming `insert_open_signal` calls that fail.
    pub failing_inserts: AtomicUsize,
    pub fail_closes: AtomicBool,
    /// Latency added to every `insert_open_signal`, in milliseconds.
    pub insert_delay_ms: AtomicU64,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryStore::new(RiskConfig::default()),
            failing_inserts: AtomicUsize::new(0),
            fail_closes: AtomicBool::new(false),
            insert_delay_ms: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl SignalStore for FlakyStore {
    async fn get_or_create_recipient(&self, external_id: i64, username: Option<&str>) -> Result<Recipient> {
        self.inner.get_or_create_recipient(external_id, username).await
    }

    async fn recipient(&self, id: i64) -> Result<Option<Recipient>> {
        self.inner.recipient(id).await
    }

    async fn recipients_by_tier(&self, tier: Tier) -> Result<Vec<Recipient>> {
        self.inner.recipients_by_tier(tier).await
    }

    async fn update_risk(&self, recipient_id: i64, risk: &RiskState) -> Result<()> {
        self.inner.update_risk(recipient_id, risk).await
    }

    async fn insert_open_signal(&self, candidate: &SignalCandidate) -> Result<i64> {
        let delay = self.insert_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        let failing = self
            .failing_inserts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(PulseError::Store("database is locked".into()));
        }
        self.inner.insert_open_signal(candidate).await
    }

    async fn latest_open_signal(&self, symbol: &str) -> Result<Option<SignalRecord>> {
        self.inner.latest_open_signal(symbol).await
    }

    async fn open_signals(&self) -> Result<Vec<SignalRecord>> {
        self.inner.open_signals().await
    }

    async fn close_signal(
        &self,
        id: i64,
        outcome: Outcome,
        exit_price: f64,
        closed_at: DateTime<Utc>,
    ) -> Result<SignalRecord> {
        if self.fail_closes.load(Ordering::SeqCst) {
            return Err(PulseError::Store("database is locked".into()));
        }
        self.inner.close_signal(id, outcome, exit_price, closed_at).await
    }

    async fn record_delivery(&self, recipient_id: i64, symbol: &str) -> Result<()> {
        self.inner.record_delivery(recipient_id, symbol).await
    }

    async fn count_open_deliveries(&self, recipient_id: i64) -> Result<u32> {
        self.inner.count_open_deliveries(recipient_id).await
    }

    async fn insert_statistic(&self, statistic: &SignalStatistic) -> Result<()> {
        self.inner.insert_statistic(statistic).await
    }

    async fn resolve_statistic(
        &self,
        signal_id: i64,
        outcome: Outcome,
        profit_pct: f64,
        closed_at: DateTime<Utc>,
    ) -> Result<()> {
        self.inner
            .resolve_statistic(signal_id, outcome, profit_pct, closed_at)
            .await
    }

    async fn expire_subscriptions(&self, now: DateTime<Utc>) -> Result<Vec<Recipient>> {
        self.inner.expire_subscriptions(now).await
    }

    async fn sweep_risk_windows(&self, now: DateTime<Utc>) -> Result<usize> {
        self.inner.sweep_risk_windows(now).await
    }
}
