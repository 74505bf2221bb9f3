use std::sync::Arc;

use futures_util::FutureExt;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use signalpulse::PulseError;
use signalpulse::config::{PipelineConfig, fetch_config};
use signalpulse::indicators::pool::IndicatorPool;
use signalpulse::market::MarketData;
use signalpulse::market::cache::CachedMarketData;
use signalpulse::market::kraken::KrakenRest;
use signalpulse::notify::{LogNotifier, Notifier};
use signalpulse::store::SignalStore;
use signalpulse::store::memory::MemoryStore;
use signalpulse::supervisor::Supervisor;
use signalpulse::tracker::LifecycleTracker;
use signalpulse::worker::MarketWorker;

const ANALYSIS_TASK: &str = "analysis";

#[tokio::main]
async fn main() -> Result<(), PulseError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let app_config = fetch_config()?;
    let pipeline = match &app_config.pipeline_path {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };
    info!("{}", pipeline.risk.describe_limits());

    let market: Arc<dyn MarketData> =
        Arc::new(CachedMarketData::new(KrakenRest::new(&app_config.kraken_url)?));
    let store: Arc<dyn SignalStore> = Arc::new(match &app_config.recipients_path {
        Some(path) => MemoryStore::from_roster(path, pipeline.risk.clone())?,
        None => {
            warn!("PULSE_RECIPIENTS not set, starting without recipients");
            MemoryStore::new(pipeline.risk.clone())
        }
    });
    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);
    let pool = IndicatorPool::new(pipeline.worker.indicator_threads)?;

    let tracker = Arc::new(LifecycleTracker::new(
        market.clone(),
        store.clone(),
        notifier.clone(),
        pipeline.tracker.clone(),
    ));
    tracker.reload().await?;

    let worker = Arc::new(MarketWorker::new(
        market,
        store,
        notifier,
        tracker.clone(),
        pool,
        &pipeline,
        app_config.default_symbols.clone(),
    ));

    let mut supervisor = Supervisor::new();
    {
        let tracker = tracker.clone();
        supervisor.spawn("tracker", move || tracker.clone().run().boxed());
    }
    {
        let worker = worker.clone();
        supervisor.spawn("sweeps", move || worker.clone().run_sweeps().boxed());
    }
    {
        let worker = worker.clone();
        supervisor.spawn(ANALYSIS_TASK, move || worker.clone().run().boxed());
    }

    let cooldown = pipeline.worker.error_cooldown();
    while let Some(exit) = supervisor.next_exit().await {
        if exit.name == ANALYSIS_TASK {
            supervisor.shutdown();
            return Err(PulseError::Worker(format!(
                "analysis loop terminated ({})",
                exit.status
            )));
        }
        tokio::time::sleep(cooldown).await;
        if let Err(e) = supervisor.restart(&exit.name) {
            error!(task = %exit.name, error = %e, "Restart failed");
        }
    }

    Ok(())
}
