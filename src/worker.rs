//! Analysis and broadcast loop.
//!
//! One cycle walks the symbol set sequentially: timeframe analysis,
//! consensus, candidate building, quality rating, then a paced broadcast
//! to every eligible recipient through the risk gate. Delivered signals
//! are handed to the [`LifecycleTracker`].

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Timelike, Utc};
use futures_util::future::join_all;
use tracing::{debug, error, info, warn};

use crate::analysis::consensus::{TimeframeWeights, consensus};
use crate::analysis::timeframe::TimeframeAnalyzer;
use crate::config::{PipelineConfig, WorkerConfig};
use crate::indicators::pool::IndicatorPool;
use crate::market::MarketData;
use crate::notify::{Notifier, format};
use crate::quality::{QualityRater, QualityReport, Strength};
use crate::risk::RiskGatekeeper;
use crate::signal::SignalCandidate;
use crate::signal::builder::CandidateBuilder;
use crate::store::{Recipient, SignalStore, Tier};
use crate::tracker::LifecycleTracker;

/// What happened to one symbol in a cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum SymbolOutcome {
    /// No candidate; the reason is informational.
    NoSignal(String),
    /// Rated below the delivery threshold.
    Weak(Strength),
    /// A signal for the symbol is already being tracked.
    AlreadyOpen,
    Broadcast(BroadcastReport),
}

/// Per-recipient tally of one broadcast.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    /// Refused by the risk gate.
    pub rejected: usize,
    /// Send errors.
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Delivered,
    Rejected,
    Failed,
}

/// Summary of one pass over the symbol set.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub symbols: usize,
    pub signals: usize,
    pub delivered: usize,
}

/// Runs analysis cycles and broadcasts the resulting signals.
pub struct MarketWorker {
    market: Arc<dyn MarketData>,
    store: Arc<dyn SignalStore>,
    notifier: Arc<dyn Notifier>,
    tracker: Arc<LifecycleTracker>,
    analyzer: TimeframeAnalyzer,
    weights: TimeframeWeights,
    builder: CandidateBuilder,
    rater: QualityRater,
    gatekeeper: RiskGatekeeper,
    config: WorkerConfig,
    default_symbols: Vec<String>,
}

impl MarketWorker {
    pub fn new(
        market: Arc<dyn MarketData>,
        store: Arc<dyn SignalStore>,
        notifier: Arc<dyn Notifier>,
        tracker: Arc<LifecycleTracker>,
        pool: IndicatorPool,
        pipeline: &PipelineConfig,
        default_symbols: Vec<String>,
    ) -> Self {
        let timeframes = pipeline.analysis.timeframes.clone();
        Self {
            analyzer: TimeframeAnalyzer::new(
                market.clone(),
                pool,
                timeframes.clone(),
                pipeline.analysis.candle_limit,
            ),
            weights: TimeframeWeights::for_timeframes(&timeframes),
            builder: CandidateBuilder::new(pipeline.builder.clone()),
            rater: QualityRater::new(),
            gatekeeper: RiskGatekeeper::new(store.clone()),
            config: pipeline.worker.clone(),
            market,
            store,
            notifier,
            tracker,
            default_symbols,
        }
    }

    /// Replaces the quality rater, e.g. to plug in factor slots.
    pub fn with_rater(mut self, rater: QualityRater) -> Self {
        self.rater = rater;
        self
    }

    pub fn gatekeeper(&self) -> &RiskGatekeeper {
        &self.gatekeeper
    }

    /// Symbols to analyze: the pairs selected by active recipients. A
    /// recipient without a filter pulls in the default set, which is also
    /// the fallback when no recipient selects anything.
    pub async fn symbols(&self) -> crate::Result<Vec<String>> {
        let recipients = self.store.recipients_by_tier(Tier::Premium).await?;
        let mut symbols = BTreeSet::new();
        for recipient in recipients.iter().filter(|r| r.receives_signals()) {
            if recipient.selected_pairs.is_empty() {
                symbols.extend(self.default_symbols.iter().cloned());
            } else {
                symbols.extend(recipient.selected_pairs.iter().cloned());
            }
        }
        if symbols.is_empty() {
            return Ok(self.default_symbols.clone());
        }
        Ok(symbols.into_iter().collect())
    }

    /// Analyzes every symbol once.
    ///
    /// # Errors
    ///
    /// Returns an error only if the symbol set cannot be determined.
    /// Failures of individual symbols are logged and skipped.
    pub async fn run_cycle(&self) -> crate::Result<CycleReport> {
        let symbols = self.symbols().await?;
        let mut report = CycleReport {
            symbols: symbols.len(),
            ..CycleReport::default()
        };

        for (i, symbol) in symbols.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.config.symbol_delay()).await;
            }
            match self.analyze_symbol(symbol, Utc::now()).await {
                Ok(SymbolOutcome::Broadcast(b)) => {
                    report.signals += 1;
                    report.delivered += b.delivered;
                }
                Ok(SymbolOutcome::NoSignal(reason)) => debug!(symbol, %reason, "No signal"),
                Ok(SymbolOutcome::Weak(strength)) => {
                    debug!(symbol, %strength, "Signal below delivery threshold");
                }
                Ok(SymbolOutcome::AlreadyOpen) => debug!(symbol, "Signal already open"),
                Err(e) => warn!(symbol, error = %e, "Symbol analysis failed"),
            }
        }
        Ok(report)
    }

    /// Runs the full pipeline for one symbol at time `now`.
    ///
    /// # Errors
    ///
    /// Returns an error if the recipient list cannot be read for the
    /// broadcast. Market data problems are reported as
    /// [`SymbolOutcome::NoSignal`].
    pub async fn analyze_symbol(&self, symbol: &str, now: DateTime<Utc>) -> crate::Result<SymbolOutcome> {
        if self.tracker.is_tracking(symbol).await {
            return Ok(SymbolOutcome::AlreadyOpen);
        }

        let outcomes = self.analyzer.analyze(symbol).await;
        let result = consensus(outcomes, &self.weights);

        let primary_tf = self.builder.config().primary_timeframe;
        let primary = match result.outcome(primary_tf).and_then(|o| o.frame()) {
            Some(frame) => frame.clone(),
            None => match self.analyzer.analyze_timeframe(symbol, primary_tf).await.frame() {
                Some(frame) => frame.clone(),
                None => {
                    return Ok(SymbolOutcome::NoSignal(format!(
                        "{primary_tf} data unavailable"
                    )));
                }
            },
        };

        let ticker = match self.market.fetch_ticker(symbol).await {
            Ok(t) => t,
            Err(e) => {
                warn!(symbol, error = %e, "Ticker unavailable");
                return Ok(SymbolOutcome::NoSignal(format!("ticker unavailable: {e}")));
            }
        };

        let candidate = match self
            .builder
            .build(symbol, ticker.quote_volume_24h, &result, &primary, now)
        {
            Ok(c) => c,
            Err(rejection) => return Ok(SymbolOutcome::NoSignal(rejection.to_string())),
        };

        let report = self.rater.rate(&candidate, &primary.volumes(), now.hour());
        info!(
            symbol,
            direction = %candidate.direction,
            score = candidate.score,
            strength = %report.strength,
            percentage = report.percentage,
            "Candidate rated"
        );
        if !report.strength.is_deliverable() {
            return Ok(SymbolOutcome::Weak(report.strength));
        }

        if self.tracker.is_tracking(symbol).await {
            return Ok(SymbolOutcome::AlreadyOpen);
        }

        let broadcast = self.broadcast(&candidate, &report, now).await?;
        if broadcast.delivered > 0 {
            self.tracker.open(&candidate, Some(&report)).await;
        }
        Ok(SymbolOutcome::Broadcast(broadcast))
    }

    /// Sends `candidate` to every eligible recipient, in paced batches.
    ///
    /// # Errors
    ///
    /// Returns an error if the recipient list cannot be read.
    pub async fn broadcast(
        &self,
        candidate: &SignalCandidate,
        report: &QualityReport,
        now: DateTime<Utc>,
    ) -> crate::Result<BroadcastReport> {
        let recipients: Vec<Recipient> = self
            .store
            .recipients_by_tier(Tier::Premium)
            .await?
            .into_iter()
            .filter(|r| r.receives_signals() && r.wants(&candidate.symbol))
            .collect();

        let mut tally = BroadcastReport::default();
        let batch = self.config.broadcast_batch.max(1);
        for (i, chunk) in recipients.chunks(batch).enumerate() {
            if i > 0 {
                tokio::time::sleep(self.config.batch_pause()).await;
            }
            let results = join_all(chunk.iter().map(|r| self.deliver(r, candidate, report, now))).await;
            for result in results {
                match result {
                    Delivery::Delivered => tally.delivered += 1,
                    Delivery::Rejected => tally.rejected += 1,
                    Delivery::Failed => tally.failed += 1,
                }
            }
        }

        info!(
            symbol = %candidate.symbol,
            recipients = recipients.len(),
            delivered = tally.delivered,
            rejected = tally.rejected,
            failed = tally.failed,
            "Broadcast finished"
        );
        Ok(tally)
    }

    async fn deliver(
        &self,
        recipient: &Recipient,
        candidate: &SignalCandidate,
        report: &QualityReport,
        now: DateTime<Utc>,
    ) -> Delivery {
        let permit = match self.gatekeeper.admit(recipient.id, candidate, now).await {
            Ok(permit) => permit,
            Err(e) => {
                debug!(recipient_id = recipient.id, symbol = %candidate.symbol, reason = %e, "Risk gate refused");
                return Delivery::Rejected;
            }
        };

        let text = format::signal(candidate, report, Some(&permit));
        if let Err(e) = self.notifier.send_text(recipient, &text).await {
            warn!(recipient_id = recipient.id, error = %e, "Signal delivery failed");
            return Delivery::Failed;
        }

        if let Err(e) = permit.commit(self.store.as_ref(), &candidate.symbol).await {
            error!(recipient_id = recipient.id, error = %e, "Delivered but risk was not recorded");
        }
        Delivery::Delivered
    }

    /// Demotes lapsed subscriptions and tells the affected recipients.
    pub async fn sweep_subscriptions(&self, now: DateTime<Utc>) -> crate::Result<usize> {
        let expired = self.store.expire_subscriptions(now).await?;
        for recipient in &expired {
            info!(recipient_id = recipient.id, "Subscription expired");
            let text = format::subscription_expired(recipient);
            if let Err(e) = self.notifier.send_text(recipient, &text).await {
                warn!(recipient_id = recipient.id, error = %e, "Expiry notice failed");
            }
        }
        Ok(expired.len())
    }

    /// Resets elapsed risk windows and drops idle recipient locks.
    pub async fn sweep_risk(&self, now: DateTime<Utc>) -> crate::Result<usize> {
        let reset = self.gatekeeper.sweep(now).await?;
        self.gatekeeper.prune_locks();
        Ok(reset)
    }

    /// Cycles forever. A failed cycle is followed by the error cooldown
    /// instead of the regular interval.
    pub async fn run(self: Arc<Self>) -> crate::Result<()> {
        info!(
            timeframes = ?self.analyzer.timeframes(),
            interval = ?self.config.cycle_interval(),
            "Market worker started"
        );
        loop {
            match self.run_cycle().await {
                Ok(report) => {
                    info!(
                        symbols = report.symbols,
                        signals = report.signals,
                        delivered = report.delivered,
                        "Cycle complete"
                    );
                    tokio::time::sleep(self.config.cycle_interval()).await;
                }
                Err(e) => {
                    error!(error = %e, cooldown = ?self.config.error_cooldown(), "Cycle failed");
                    tokio::time::sleep(self.config.error_cooldown()).await;
                }
            }
        }
    }

    /// Runs both sweeps every sweep interval.
    pub async fn run_sweeps(self: Arc<Self>) -> crate::Result<()> {
        loop {
            tokio::time::sleep(self.config.sweep_interval()).await;
            let now = Utc::now();
            match self.sweep_subscriptions(now).await {
                Ok(0) => {}
                Ok(n) => info!(expired = n, "Subscription sweep"),
                Err(e) => warn!(error = %e, "Subscription sweep failed"),
            }
            match self.sweep_risk(now).await {
                Ok(n) => debug!(reset = n, "Risk sweep"),
                Err(e) => warn!(error = %e, "Risk sweep failed"),
            }
        }
    }
}
