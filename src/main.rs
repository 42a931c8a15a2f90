//! fundbot: tiered funding-offer rebalancer.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! wires the exchange, rate tracker, alert engines and per-market
//! rebalancers together, and runs until Ctrl+C.

use anyhow::{bail, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use fundbot::config::{self, AppConfig};
use fundbot::dashboard::{self, StatusBoard};
use fundbot::engine::{scheduler, CallThrottle, CycleSettings, Rebalancer};
use fundbot::exchange::paper::PaperExchange;
use fundbot::exchange::FundingExchange;
use fundbot::notifications::{self, Notifier};
use fundbot::tracker::alerts::AlertEngine;
use fundbot::tracker::{RateTracker, TrackerTask, SAMPLE_CHANNEL_CAPACITY};

/// Pause after the rate feed starts before the first rebalance, so the
/// tracker has seen some trades.
const STARTUP_WARMUP: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.toml".into());
    let cfg = AppConfig::load(&config_path)?;

    init_logging(&cfg);

    info!(
        config = %config_path,
        markets = cfg.markets.len(),
        interval_minutes = cfg.server.update_interval_minutes,
        rate_limit_ms = cfg.server.rate_limit_ms,
        "fundbot starting up"
    );

    // -- Initialise components -------------------------------------------

    let exchange = build_exchange(&cfg)?;
    info!(venue = exchange.name(), "Exchange ready");

    let notifier: Arc<dyn Notifier> = Arc::from(notifications::from_webhook(cfg.webhook_url())?);

    let tracker = RateTracker::new();
    let board = Arc::new(StatusBoard::new(tracker.clone()));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let engines = cfg
        .markets
        .iter()
        .map(|m| AlertEngine::new(&m.symbol, &m.alerts, notifier.clone()))
        .collect();
    let mut tracker_task = TrackerTask::new(tracker.clone(), engines);
    if cfg.dashboard.enabled {
        tracker_task = tracker_task.with_status_board(board.clone());
    }

    // -- Rate feed -------------------------------------------------------

    let (sample_tx, sample_rx) = mpsc::channel(SAMPLE_CHANNEL_CAPACITY);
    let tracker_handle = tokio::spawn(tracker_task.run(sample_rx, shutdown_rx.clone()));

    let symbols: Vec<String> = cfg.markets.iter().map(|m| m.symbol.clone()).collect();
    let feed_handle = {
        let exchange = exchange.clone();
        tokio::spawn(async move {
            if let Err(e) = exchange.stream_rates(symbols, sample_tx).await {
                error!(error = %e, "Rate feed stopped");
            }
        })
    };

    // -- Rebalancers -----------------------------------------------------

    let throttle = Arc::new(CallThrottle::new(cfg.rate_limit()));
    let settings = CycleSettings {
        call_timeout: cfg.call_timeout(),
        settle_max_attempts: cfg.server.settle_max_attempts,
    };
    let rebalancers: Vec<Rebalancer> = cfg
        .markets
        .iter()
        .map(|m| {
            Rebalancer::new(
                m.clone(),
                exchange.clone(),
                tracker.clone(),
                throttle.clone(),
                settings.clone(),
            )
        })
        .collect();

    let board_for_markets = cfg.dashboard.enabled.then(|| board.clone());
    let market_handles = scheduler::spawn_all(
        rebalancers,
        cfg.update_interval(),
        STARTUP_WARMUP,
        board_for_markets,
        shutdown_rx.clone(),
    );

    let dashboard_handle = if cfg.dashboard.enabled {
        Some(dashboard::spawn_dashboard(board.clone(), cfg.dashboard.port, shutdown_rx.clone()).await?)
    } else {
        None
    };

    // -- Run until Ctrl+C ------------------------------------------------

    info!("Running. Press Ctrl+C to stop.");
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl+C, shutting down");
    }
    info!("Shutdown signal received.");

    let _ = shutdown_tx.send(true);
    feed_handle.abort();

    let mut handles = market_handles;
    handles.push(tracker_handle);
    handles.extend(dashboard_handle);
    for result in futures::future::join_all(handles).await {
        if let Err(e) = result {
            error!(error = %e, "Task ended abnormally");
        }
    }

    info!("fundbot shut down cleanly.");
    Ok(())
}

fn build_exchange(cfg: &AppConfig) -> Result<Arc<dyn FundingExchange>> {
    match cfg.exchange.mode.as_str() {
        "paper" => {
            for market in &cfg.markets {
                if !cfg.exchange.paper.contains_key(&market.symbol) {
                    warn!(symbol = %market.symbol, "No paper wallet configured; market will be skipped every cycle");
                }
            }
            Ok(Arc::new(PaperExchange::from_config(
                &cfg.exchange.paper,
                Duration::from_secs(cfg.exchange.feed_interval_secs),
            )))
        }
        other => bail!("Unsupported exchange mode: {other}"),
    }
}

/// Initialise the `tracing` subscriber.
fn init_logging(cfg: &config::AppConfig) {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("fundbot={}", cfg.server.log_level)));

    let json_logging = std::env::var("FUNDBOT_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
