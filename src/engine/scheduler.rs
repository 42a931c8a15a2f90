//! Staggered per-market scheduling.
//!
//! Every market gets its own task. Start times are spread evenly over one
//! rebalance interval so the markets do not all hit the exchange at once;
//! after that each market repeats on its own interval. A market runs one
//! cycle at a time, so a slow cycle delays its next tick instead of
//! overlapping it.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use super::rebalancer::Rebalancer;
use crate::dashboard::routes::StatusBoard;
use crate::types::{CycleOutcome, CycleReport};

/// Start delay of each of `markets` markets: market `i` waits
/// `warmup + i * interval / markets`.
pub fn stagger_delays(interval: Duration, markets: usize, warmup: Duration) -> Vec<Duration> {
    if markets == 0 {
        return Vec::new();
    }
    let step = interval / markets as u32;
    (0..markets as u32).map(|i| warmup + step * i).collect()
}

/// Drive one market until shutdown is signalled.
pub async fn run_market(
    mut rebalancer: Rebalancer,
    interval: Duration,
    initial_delay: Duration,
    board: Option<Arc<StatusBoard>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let symbol = rebalancer.symbol().to_string();
    info!(
        symbol = %symbol,
        delay_secs = initial_delay.as_secs_f64(),
        interval_secs = interval.as_secs(),
        "Market scheduled"
    );

    let start = tokio::time::Instant::now() + initial_delay;
    let mut ticker = tokio::time::interval_at(start, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let report = rebalancer.run_cycle().await;
                log_cycle_report(&report);
                if let Some(board) = &board {
                    board.record_cycle(report).await;
                }
            }
            _ = shutdown.changed() => {
                info!(symbol = %symbol, "Market loop stopping");
                break;
            }
        }
    }
}

/// Spawn one task per rebalancer, staggered over `interval`.
pub fn spawn_all(
    rebalancers: Vec<Rebalancer>,
    interval: Duration,
    warmup: Duration,
    board: Option<Arc<StatusBoard>>,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    let delays = stagger_delays(interval, rebalancers.len(), warmup);
    rebalancers
        .into_iter()
        .zip(delays)
        .map(|(rb, delay)| {
            tokio::spawn(run_market(rb, interval, delay, board.clone(), shutdown.clone()))
        })
        .collect()
}

/// Log a human-readable cycle summary.
pub fn log_cycle_report(report: &CycleReport) {
    let elapsed_ms = (report.finished_at - report.started_at).num_milliseconds();
    match &report.outcome {
        CycleOutcome::Failed { phase, reason } => error!(
            symbol = %report.symbol,
            cycle = report.cycle_number,
            phase = %phase,
            reason = %reason,
            cancelled = report.cancelled,
            placed = report.placed,
            elapsed_ms,
            "Cycle failed"
        ),
        CycleOutcome::Completed => info!(
            symbol = %report.symbol,
            cycle = report.cycle_number,
            cancelled = report.cancelled,
            placed = report.placed,
            total_funds = report.total_funds,
            offered = report.total_offered(),
            elapsed_ms,
            "Cycle complete"
        ),
        skipped => warn!(
            symbol = %report.symbol,
            cycle = report.cycle_number,
            cancelled = report.cancelled,
            outcome = %skipped,
            elapsed_ms,
            "Cycle skipped"
        ),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
