//! Status API route handlers.
//!
//! All endpoints return JSON. State is shared via `Arc<StatusBoard>`.

use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::tracker::alerts::AlertOutcome;
use crate::tracker::RateTracker;
use crate::types::{format_rate_pct, CycleReport};

/// Cycle reports and alert outcomes kept in memory.
const HISTORY_LIMIT: usize = 100;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// In-memory record of what the bot has been doing.
///
/// Written by the market loops (cycle reports) and the tracker task
/// (alert outcomes); read by the route handlers.
pub struct StatusBoard {
    started_at: DateTime<Utc>,
    tracker: RateTracker,
    cycles: RwLock<Vec<CycleReport>>,
    alerts: RwLock<Vec<AlertLogEntry>>,
    /// Lifetime totals; the history above is capped.
    cycles_run: AtomicU64,
    failed_cycles: AtomicU64,
    alerts_fired: AtomicU64,
}

impl StatusBoard {
    pub fn new(tracker: RateTracker) -> Self {
        Self {
            started_at: Utc::now(),
            tracker,
            cycles: RwLock::new(Vec::new()),
            alerts: RwLock::new(Vec::new()),
            cycles_run: AtomicU64::new(0),
            failed_cycles: AtomicU64::new(0),
            alerts_fired: AtomicU64::new(0),
        }
    }

    pub async fn record_cycle(&self, report: CycleReport) {
        self.cycles_run.fetch_add(1, Ordering::Relaxed);
        if report.outcome.is_failure() {
            self.failed_cycles.fetch_add(1, Ordering::Relaxed);
        }
        let mut cycles = self.cycles.write().await;
        cycles.push(report);
        trim_front(&mut cycles);
    }

    pub async fn record_alert(&self, outcome: AlertOutcome) {
        if outcome.is_fired() {
            self.alerts_fired.fetch_add(1, Ordering::Relaxed);
        }
        let mut alerts = self.alerts.write().await;
        alerts.push(AlertLogEntry {
            timestamp: Utc::now(),
            outcome,
        });
        trim_front(&mut alerts);
    }

    /// Recent cycle reports, oldest first.
    pub async fn cycles(&self) -> Vec<CycleReport> {
        self.cycles.read().await.clone()
    }

    /// Recent alert outcomes, oldest first.
    pub async fn alerts(&self) -> Vec<AlertLogEntry> {
        self.alerts.read().await.clone()
    }
}

fn trim_front<T>(log: &mut Vec<T>) {
    if log.len() > HISTORY_LIMIT {
        let excess = log.len() - HISTORY_LIMIT;
        log.drain(..excess);
    }
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct AlertLogEntry {
    pub timestamp: DateTime<Utc>,
    pub outcome: AlertOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct MarketStatus {
    pub last_cycle: u64,
    pub last_outcome: String,
    pub last_finished_at: DateTime<Utc>,
    pub open_offers: usize,
    pub offered: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: i64,
    pub cycles_run: u64,
    pub failed_cycles: u64,
    pub alerts_fired: u64,
    pub markets: BTreeMap<String, MarketStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RateEntry {
    pub symbol: String,
    pub rate: f64,
    pub rate_pct: String,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

pub type AppState = Arc<StatusBoard>;

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// GET /api/status
pub async fn get_status(State(board): State<AppState>) -> Json<StatusResponse> {
    let cycles = board.cycles.read().await;

    // later reports overwrite earlier ones
    let markets = cycles
        .iter()
        .map(|r| {
            (
                r.symbol.clone(),
                MarketStatus {
                    last_cycle: r.cycle_number,
                    last_outcome: r.outcome.to_string(),
                    last_finished_at: r.finished_at,
                    open_offers: r.placed,
                    offered: r.total_offered(),
                },
            )
        })
        .collect();

    Json(StatusResponse {
        status: "running".to_string(),
        started_at: board.started_at,
        uptime_secs: (Utc::now() - board.started_at).num_seconds(),
        cycles_run: board.cycles_run.load(Ordering::Relaxed),
        failed_cycles: board.failed_cycles.load(Ordering::Relaxed),
        alerts_fired: board.alerts_fired.load(Ordering::Relaxed),
        markets,
    })
}

/// GET /api/rates
pub async fn get_rates(State(board): State<AppState>) -> Json<Vec<RateEntry>> {
    let rates = board
        .tracker
        .snapshot()
        .await
        .into_iter()
        .map(|s| RateEntry {
            rate_pct: format_rate_pct(s.rate),
            symbol: s.symbol,
            rate: s.rate,
            timestamp: s.timestamp,
        })
        .collect();
    Json(rates)
}

/// GET /api/cycles
pub async fn get_cycles(State(board): State<AppState>) -> Json<Vec<CycleReport>> {
    Json(board.cycles().await)
}

/// GET /api/alerts
pub async fn get_alerts(State(board): State<AppState>) -> Json<Vec<AlertLogEntry>> {
    Json(board.alerts().await)
}
