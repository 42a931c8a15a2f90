//! Rate tracking.
//!
//! Keeps the best recent lending rate per symbol, shared between the
//! tracker task (writer) and the rebalancers (readers). Samples arrive on
//! a bounded channel and are consumed by a single task, which also owns
//! the per-market alert engines.

pub mod alerts;

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, RwLock};
use tracing::{debug, info};

use crate::dashboard::routes::StatusBoard;
use crate::types::{format_rate_pct, RateSample};
use alerts::AlertEngine;

/// How long a best-rate sample stays authoritative.
pub const FRESHNESS_WINDOW_MINUTES: i64 = 10;

/// Capacity of the sample channel between the exchange feed and the tracker.
pub const SAMPLE_CHANNEL_CAPACITY: usize = 1024;

/// Best recent rate per symbol, safe to share across tasks.
#[derive(Debug, Clone, Default)]
pub struct RateTracker {
    tracks: Arc<RwLock<HashMap<String, RateSample>>>,
}

impl RateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer a sample to the best-rate table.
    ///
    /// A sample older than the stored one is ignored. Otherwise the stored
    /// sample is replaced when the new one is at least as high, or when the
    /// stored one has aged past the freshness window relative to the new
    /// sample. Returns `true` if the table changed.
    pub async fn record(&self, sample: &RateSample) -> bool {
        let window = Duration::minutes(FRESHNESS_WINDOW_MINUTES);
        let mut tracks = self.tracks.write().await;

        let replace = match tracks.get(&sample.symbol) {
            None => true,
            Some(stored) if sample.timestamp < stored.timestamp => false,
            Some(stored) => {
                sample.rate >= stored.rate || sample.timestamp - stored.timestamp > window
            }
        };

        if replace {
            tracks.insert(sample.symbol.clone(), sample.clone());
        }
        replace
    }

    /// Best recent rate for a symbol, 0 when nothing fresh has been seen.
    pub async fn best_rate(&self, symbol: &str) -> f64 {
        self.best_rate_at(symbol, Utc::now()).await
    }

    /// Best rate for a symbol as of `now`. A stored sample older than the
    /// freshness window counts as nothing seen.
    pub async fn best_rate_at(&self, symbol: &str, now: DateTime<Utc>) -> f64 {
        self.tracks
            .read()
            .await
            .get(symbol)
            .filter(|s| is_fresh(s, now))
            .map(|s| s.rate)
            .unwrap_or(0.0)
    }

    pub async fn get(&self, symbol: &str) -> Option<RateSample> {
        let now = Utc::now();
        self.tracks
            .read()
            .await
            .get(symbol)
            .filter(|s| is_fresh(s, now))
            .cloned()
    }

    /// Copy of every symbol with a fresh best rate, sorted by symbol.
    pub async fn snapshot(&self) -> Vec<RateSample> {
        let now = Utc::now();
        let mut all: Vec<RateSample> = self
            .tracks
            .read()
            .await
            .values()
            .filter(|s| is_fresh(s, now))
            .cloned()
            .collect();
        all.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        all
    }
}

fn is_fresh(sample: &RateSample, now: DateTime<Utc>) -> bool {
    now - sample.timestamp <= Duration::minutes(FRESHNESS_WINDOW_MINUTES)
}

/// Consumes rate samples: updates the best-rate table and evaluates alerts.
pub struct TrackerTask {
    tracker: RateTracker,
    alerts: HashMap<String, AlertEngine>,
    /// Previous sample per symbol, used to detect upward moves.
    last_rates: HashMap<String, f64>,
    board: Option<Arc<StatusBoard>>,
}

impl TrackerTask {
    pub fn new(tracker: RateTracker, engines: Vec<AlertEngine>) -> Self {
        let alerts = engines
            .into_iter()
            .map(|e| (e.symbol().to_string(), e))
            .collect();
        Self {
            tracker,
            alerts,
            last_rates: HashMap::new(),
            board: None,
        }
    }

    pub fn with_status_board(mut self, board: Arc<StatusBoard>) -> Self {
        self.board = Some(board);
        self
    }

    /// Handle one sample end to end. Returns the alert outcomes it produced.
    pub async fn on_sample(&mut self, sample: RateSample) -> Vec<alerts::AlertOutcome> {
        if self.tracker.record(&sample).await {
            debug!(symbol = %sample.symbol, rate = %format_rate_pct(sample.rate), "Best rate updated");
        }

        let previous = self.last_rates.insert(sample.symbol.clone(), sample.rate);
        let old_rate = match previous {
            Some(old) if sample.rate > old => old,
            // First sample is the baseline; flat or falling moves never alert.
            _ => return Vec::new(),
        };

        let outcomes = match self.alerts.get_mut(&sample.symbol) {
            Some(engine) => engine.evaluate(old_rate, sample.rate, sample.timestamp).await,
            None => Vec::new(),
        };

        if let Some(board) = &self.board {
            for outcome in &outcomes {
                board.record_alert(outcome.clone()).await;
            }
        }
        outcomes
    }

    /// Drain the channel until it closes or shutdown is signalled.
    pub async fn run(mut self, mut rx: mpsc::Receiver<RateSample>, mut shutdown: watch::Receiver<bool>) {
        info!(markets = self.alerts.len(), "Rate tracker started");
        loop {
            tokio::select! {
                maybe = rx.recv() => match maybe {
                    Some(sample) => {
                        self.on_sample(sample).await;
                    }
                    None => break,
                },
                _ = shutdown.changed() => break,
            }
        }
        info!("Rate tracker stopped");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
