//! Lifecycle tracking of delivered signals.
//!
//! The tracker owns the open-signal book: at most one open signal per
//! symbol. A polling loop fetches current prices for every open symbol in
//! one batch and resolves each signal to a target, its stop, or expiry.
//!
//! Closing is two-phase within a tick: resolved entries are flagged and
//! only removed after every signal has been evaluated, so a symbol cannot
//! be re-opened inside the tick that closes it.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::TrackerConfig;
use crate::market::MarketData;
use crate::models::{Direction, Outcome};
use crate::notify::{Notifier, format};
use crate::quality::QualityReport;
use crate::signal::SignalCandidate;
use crate::store::{SignalRecord, SignalStatistic, SignalStore, Tier};

/// Insert that has not reached the store yet.
#[derive(Debug, Clone)]
struct PendingInsert {
    candidate: SignalCandidate,
    report: Option<QualityReport>,
}

/// A signal being tracked against live prices.
#[derive(Debug, Clone)]
pub struct OpenSignal {
    /// Store id; `None` until the insert succeeds.
    pub record_id: Option<i64>,
    pub symbol: String,
    pub direction: Direction,
    pub entry: f64,
    pub stop_loss: f64,
    pub take_profit_1: f64,
    pub take_profit_2: f64,
    pub take_profit_3: f64,
    /// Target that counts as "in profit"; always tp1.
    pub take_profit: f64,
    pub opened_at: DateTime<Utc>,
    pending: Option<Box<PendingInsert>>,
}

impl OpenSignal {
    fn from_candidate(candidate: &SignalCandidate, report: Option<&QualityReport>) -> Self {
        Self {
            record_id: None,
            symbol: candidate.symbol.clone(),
            direction: candidate.direction,
            entry: candidate.entry,
            stop_loss: candidate.stop_loss,
            take_profit_1: candidate.take_profit_1,
            take_profit_2: candidate.take_profit_2,
            take_profit_3: candidate.take_profit_3,
            take_profit: candidate.take_profit_1,
            opened_at: candidate.generated_at,
            pending: Some(Box::new(PendingInsert {
                candidate: candidate.clone(),
                report: report.cloned(),
            })),
        }
    }

    fn from_record(record: &SignalRecord) -> Self {
        Self {
            record_id: Some(record.id),
            symbol: record.symbol.clone(),
            direction: record.direction,
            entry: record.entry,
            stop_loss: record.stop_loss,
            take_profit_1: record.take_profit_1,
            take_profit_2: record.take_profit_2,
            take_profit_3: record.take_profit_3,
            take_profit: record.take_profit_1,
            opened_at: record.opened_at,
            pending: None,
        }
    }

    /// Outcome at `price` and time `now`, if any. Targets are tested
    /// before the stop, the stop before expiry; the furthest target
    /// reached wins.
    pub fn evaluate(&self, price: f64, now: DateTime<Utc>, max_age: chrono::Duration) -> Option<Outcome> {
        let reached = |level: f64| match self.direction {
            Direction::Buy => price >= level,
            Direction::Sell => price <= level,
        };

        if reached(self.take_profit_3) {
            return Some(Outcome::Tp3);
        }
        if reached(self.take_profit_2) {
            return Some(Outcome::Tp2);
        }
        if reached(self.take_profit_1) {
            return Some(Outcome::Tp1);
        }

        let stopped = match self.direction {
            Direction::Buy => price <= self.stop_loss,
            Direction::Sell => price >= self.stop_loss,
        };
        if stopped {
            return Some(Outcome::StopLoss);
        }

        if now - self.opened_at >= max_age {
            return Some(Outcome::Expired);
        }
        None
    }
}

#[derive(Debug)]
struct BookEntry {
    signal: OpenSignal,
    closing: bool,
}

/// Open signals keyed by symbol.
#[derive(Debug, Default)]
pub struct OpenSignalBook {
    entries: Mutex<HashMap<String, BookEntry>>,
}

impl OpenSignalBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `signal` unless its symbol is already tracked. First open wins.
    pub async fn try_open(&self, signal: OpenSignal) -> bool {
        let mut entries = self.entries.lock().await;
        if entries.contains_key(&signal.symbol) {
            return false;
        }
        entries.insert(
            signal.symbol.clone(),
            BookEntry {
                signal,
                closing: false,
            },
        );
        true
    }

    /// Whether `symbol` is tracked (closing entries included).
    pub async fn contains(&self, symbol: &str) -> bool {
        self.entries.lock().await.contains_key(symbol)
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Copies of every signal not already closing.
    pub async fn snapshot(&self) -> Vec<OpenSignal> {
        self.entries
            .lock()
            .await
            .values()
            .filter(|e| !e.closing)
            .map(|e| e.signal.clone())
            .collect()
    }

    pub async fn get(&self, symbol: &str) -> Option<OpenSignal> {
        self.entries
            .lock()
            .await
            .get(symbol)
            .map(|e| e.signal.clone())
    }

    /// Claims the unpersisted insert for `symbol`. Only one caller gets it.
    async fn take_pending(&self, symbol: &str) -> Option<Box<PendingInsert>> {
        self.entries
            .lock()
            .await
            .get_mut(symbol)
            .and_then(|e| e.signal.pending.take())
    }

    async fn restore_pending(&self, symbol: &str, pending: Box<PendingInsert>) {
        if let Some(entry) = self.entries.lock().await.get_mut(symbol) {
            entry.signal.pending = Some(pending);
        }
    }

    async fn mark_persisted(&self, symbol: &str, record_id: i64) {
        if let Some(entry) = self.entries.lock().await.get_mut(symbol) {
            entry.signal.record_id = Some(record_id);
        }
    }

    async fn mark_closing(&self, symbol: &str) {
        if let Some(entry) = self.entries.lock().await.get_mut(symbol) {
            entry.closing = true;
        }
    }

    /// Removes every flagged entry in one locked step.
    async fn remove_closing(&self) -> Vec<String> {
        let mut entries = self.entries.lock().await;
        let closing: Vec<String> = entries
            .iter()
            .filter(|(_, e)| e.closing)
            .map(|(s, _)| s.clone())
            .collect();
        for symbol in &closing {
            entries.remove(symbol);
        }
        closing
    }
}

/// Result of one polling pass.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TickReport {
    pub checked: usize,
    pub closed: Vec<(String, Outcome)>,
}

/// Resolves open signals against live prices.
pub struct LifecycleTracker {
    book: OpenSignalBook,
    market: Arc<dyn MarketData>,
    store: Arc<dyn SignalStore>,
    notifier: Arc<dyn Notifier>,
    config: TrackerConfig,
}

impl LifecycleTracker {
    pub fn new(
        market: Arc<dyn MarketData>,
        store: Arc<dyn SignalStore>,
        notifier: Arc<dyn Notifier>,
        config: TrackerConfig,
    ) -> Self {
        Self {
            book: OpenSignalBook::new(),
            market,
            store,
            notifier,
            config,
        }
    }

    pub fn book(&self) -> &OpenSignalBook {
        &self.book
    }

    /// Whether a signal for `symbol` is already open.
    pub async fn is_tracking(&self, symbol: &str) -> bool {
        self.book.contains(symbol).await
    }

    /// Loads open signals persisted by a previous run.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot list open signals.
    pub async fn reload(&self) -> crate::Result<usize> {
        let records = self.store.open_signals().await?;
        let mut loaded = 0;
        for record in &records {
            if self.book.try_open(OpenSignal::from_record(record)).await {
                loaded += 1;
            } else {
                warn!(symbol = %record.symbol, id = record.id, "Skipping duplicate open signal on reload");
            }
        }
        info!(loaded, "Reloaded open signals");
        Ok(loaded)
    }

    /// Starts tracking a delivered candidate and persists it.
    ///
    /// Returns `false` if the symbol is already tracked. A failed insert
    /// keeps the signal tracked and retries on the next tick.
    pub async fn open(&self, candidate: &SignalCandidate, report: Option<&QualityReport>) -> bool {
        let signal = OpenSignal::from_candidate(candidate, report);
        if !self.book.try_open(signal).await {
            debug!(symbol = %candidate.symbol, "Signal already open, not tracking duplicate");
            return false;
        }
        info!(
            symbol = %candidate.symbol,
            direction = %candidate.direction,
            entry = candidate.entry,
            "Tracking signal"
        );
        let Some(pending) = self.book.take_pending(&candidate.symbol).await else {
            return true;
        };
        if let Err(e) = self.persist(pending).await {
            warn!(symbol = %candidate.symbol, error = %e, "Failed to persist signal, will retry");
        }
        true
    }

    /// Inserts a claimed pending signal. On failure the insert is handed
    /// back to the book for the next tick.
    async fn persist(&self, pending: Box<PendingInsert>) -> crate::Result<i64> {
        let id = match self.store.insert_open_signal(&pending.candidate).await {
            Ok(id) => id,
            Err(e) => {
                let symbol = pending.candidate.symbol.clone();
                self.book.restore_pending(&symbol, pending).await;
                return Err(e);
            }
        };
        let PendingInsert { candidate, report } = *pending;
        self.book.mark_persisted(&candidate.symbol, id).await;
        if let Some(report) = &report
            && let Err(e) = self
                .store
                .insert_statistic(&SignalStatistic::new(id, &candidate, report))
                .await
        {
            warn!(symbol = %candidate.symbol, error = %e, "Failed to record signal statistic");
        }
        Ok(id)
    }

    async fn retry_pending(&self) {
        for signal in self.book.snapshot().await {
            if signal.pending.is_none() {
                continue;
            }
            let Some(pending) = self.book.take_pending(&signal.symbol).await else {
                continue;
            };
            match self.persist(pending).await {
                Ok(id) => info!(symbol = %signal.symbol, id, "Persisted signal on retry"),
                Err(e) => warn!(symbol = %signal.symbol, error = %e, "Signal insert still failing"),
            }
        }
    }

    /// Evaluates every open signal once at time `now`.
    pub async fn tick(&self, now: DateTime<Utc>) -> TickReport {
        self.retry_pending().await;

        let open = self.book.snapshot().await;
        let mut report = TickReport::default();
        if open.is_empty() {
            return report;
        }

        let symbols: Vec<String> = open.iter().map(|s| s.symbol.clone()).collect();
        let prices = match self.market.fetch_tickers(&symbols).await {
            Ok(prices) => prices,
            Err(e) => {
                warn!(error = %e, "Price fetch failed, skipping tick");
                return report;
            }
        };

        for signal in &open {
            let Some(&price) = prices.get(&signal.symbol) else {
                debug!(symbol = %signal.symbol, "No price this tick");
                continue;
            };
            report.checked += 1;

            let Some(outcome) = signal.evaluate(price, now, self.config.max_signal_age()) else {
                continue;
            };
            if self.close(signal, outcome, price, now).await {
                report.closed.push((signal.symbol.clone(), outcome));
            }
        }

        self.book.remove_closing().await;
        report
    }

    /// Persists the outcome and flags the entry. Returns `false` (signal
    /// stays open) if the store write fails.
    async fn close(&self, signal: &OpenSignal, outcome: Outcome, price: f64, now: DateTime<Utc>) -> bool {
        let Some(record_id) = signal.record_id else {
            warn!(symbol = %signal.symbol, %outcome, "Signal resolved before it was persisted, retrying next tick");
            return false;
        };

        let record = match self.store.close_signal(record_id, outcome, price, now).await {
            Ok(record) => record,
            Err(e) => {
                error!(symbol = %signal.symbol, id = record_id, error = %e, "Failed to close signal");
                return false;
            }
        };
        let profit = record.profit_pct.unwrap_or_default();
        if let Err(e) = self
            .store
            .resolve_statistic(record_id, outcome, profit, now)
            .await
        {
            debug!(id = record_id, error = %e, "No statistic resolved");
        }

        self.book.mark_closing(&signal.symbol).await;
        info!(
            symbol = %signal.symbol,
            %outcome,
            price,
            profit_pct = profit,
            "Signal closed"
        );
        self.notify_closure(&record, outcome).await;
        true
    }

    async fn notify_closure(&self, record: &SignalRecord, outcome: Outcome) {
        let recipients = match self.store.recipients_by_tier(Tier::Premium).await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "Could not list recipients for closure notice");
                return;
            }
        };
        let text = format::closure(record, outcome);
        let sends = recipients
            .iter()
            .filter(|r| r.receives_signals())
            .map(|r| self.notifier.send_text(r, &text));
        let failed = join_all(sends).await.into_iter().filter(Result::is_err).count();
        if failed > 0 {
            warn!(symbol = %record.symbol, failed, "Some closure notices failed");
        }
    }

    /// Polls forever: every poll interval while signals are open, every
    /// idle interval otherwise.
    pub async fn run(self: Arc<Self>) -> crate::Result<()> {
        info!("Lifecycle tracker started");
        loop {
            let interval = if self.book.is_empty().await {
                self.config.idle_interval()
            } else {
                self.config.poll_interval()
            };
            tokio::time::sleep(interval).await;

            let report = self.tick(Utc::now()).await;
            if !report.closed.is_empty() {
                debug!(checked = report.checked, closed = report.closed.len(), "Tracker tick");
            }
        }
    }
}
