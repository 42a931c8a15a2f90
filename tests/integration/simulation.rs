//! End-to-end simulations: rebalance cycles, scheduling and alerting
//! wired together the way the binary wires them, against the recording
//! exchange and with tokio's clock paused.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

use fundbot::config::{AlertRuleConfig, AppConfig, MarketConfig, OfferTier};
use fundbot::dashboard::StatusBoard;
use fundbot::engine::{scheduler, CallThrottle, CycleSettings, Rebalancer};
use fundbot::exchange::FundingExchange;
use fundbot::notifications::Notifier;
use fundbot::tracker::alerts::AlertEngine;
use fundbot::tracker::{RateTracker, TrackerTask};
use fundbot::types::{CycleOutcome, CyclePhase, RateSample};

use crate::mock_exchange::RecordingExchange;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn tier(amount: f64, order_count: u32) -> OfferTier {
    OfferTier {
        amount,
        min_order_size: 50.0,
        order_count,
        at_least_low: 0.01,
        at_least_high: 0.05,
        frr_multiple_low: 1.0,
        frr_multiple_high: 2.0,
        easing: "linear".into(),
        randomise: 0.0,
        rate_jitter: 0.0,
        lending_period_low: 0.01,
        lending_period_high: 0.05,
    }
}

fn market(symbol: &str, tiers: Vec<OfferTier>) -> MarketConfig {
    MarketConfig {
        symbol: symbol.into(),
        sleep_secs: 1,
        min_order_size: 50.0,
        rounding: 2,
        min_days: 2,
        max_days: 30,
        tiers,
        alerts: Vec::new(),
    }
}

fn settings(max_attempts: u32) -> CycleSettings {
    CycleSettings {
        call_timeout: Duration::from_secs(10),
        settle_max_attempts: max_attempts,
    }
}

fn rebalancer(
    market: MarketConfig,
    exchange: &RecordingExchange,
    tracker: &RateTracker,
    throttle: &Arc<CallThrottle>,
    max_attempts: u32,
) -> Rebalancer {
    Rebalancer::new(
        market,
        Arc::new(exchange.clone()),
        tracker.clone(),
        throttle.clone(),
        settings(max_attempts),
    )
}

fn throttle(ms: u64) -> Arc<CallThrottle> {
    Arc::new(CallThrottle::new(Duration::from_millis(ms)))
}

/// Notifier that keeps every message it is asked to send.
#[derive(Clone, Default)]
struct CollectingNotifier {
    sent: Arc<Mutex<Vec<String>>>,
}

impl CollectingNotifier {
    fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for CollectingNotifier {
    async fn send(&self, message: &str) -> Result<()> {
        self.sent.lock().unwrap().push(message.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Rebalance cycles
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_cycle_cancels_then_places_tiered_ladder() {
    let exchange = RecordingExchange::new()
        .with_wallet("USD", 1000.0, 1000.0, 0.0)
        .with_open_offers("USD", 3);
    let tracker = RateTracker::new();
    let mut rb = rebalancer(
        market("USD", vec![tier(50.0, 5), tier(30.0, 3)]),
        &exchange,
        &tracker,
        &throttle(100),
        5,
    );

    let report = rb.run_cycle_with_rng(&mut StdRng::seed_from_u64(1)).await;
    assert_eq!(report.outcome, CycleOutcome::Completed);
    assert_eq!(report.cancelled, 3);

    // first tier takes half of the funds, the second 30%
    assert!((report.tiers[0].allocated - 500.0).abs() < 1e-9);
    assert!((report.tiers[1].allocated - 300.0).abs() < 1e-9);
    assert_eq!(report.placed, 8);

    let placed = exchange.placed("USD");
    assert_eq!(placed.len(), 8);
    let offered: f64 = placed.iter().map(|o| o.amount).sum();
    assert!(offered <= 800.0 + 1e-9);
    // only the offers we just placed remain open
    assert_eq!(exchange.open_count("USD"), 8);

    let names = exchange.call_names("USD");
    let first_new = names.iter().position(|n| *n == "new_offer").unwrap();
    let last_cancel = names.iter().rposition(|n| *n == "cancel_offer").unwrap();
    assert!(last_cancel < first_new);
}

#[tokio::test(start_paused = true)]
async fn test_below_minimum_skips_without_placing() {
    let exchange = RecordingExchange::new()
        .with_wallet("USD", 1000.0, 30.0, 0.0002)
        .with_open_offers("USD", 2);
    let tracker = RateTracker::new();
    let mut rb = rebalancer(market("USD", vec![tier(50.0, 5)]), &exchange, &tracker, &throttle(0), 5);

    let report = rb.run_cycle_with_rng(&mut StdRng::seed_from_u64(2)).await;
    assert!(matches!(report.outcome, CycleOutcome::SkippedBelowMinimum { .. }));
    assert_eq!(
        exchange.call_names("USD"),
        vec![
            "list_open_offers",
            "cancel_offer",
            "cancel_offer",
            "total_funds",
            "refresh_balance",
            "available_funds",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_settle_polls_until_balance_is_ready() {
    let exchange = RecordingExchange::new()
        .with_wallet("USD", 1000.0, 1000.0, 0.0)
        .with_pending_reads("USD", 2);
    let tracker = RateTracker::new();
    let mut rb = rebalancer(market("USD", vec![tier(20.0, 2)]), &exchange, &tracker, &throttle(0), 5);

    let started = tokio::time::Instant::now();
    let report = rb.run_cycle_with_rng(&mut StdRng::seed_from_u64(3)).await;
    assert_eq!(report.outcome, CycleOutcome::Completed);
    assert_eq!(report.available_funds, Some(1000.0));

    let refreshes = exchange
        .call_names("USD")
        .into_iter()
        .filter(|n| *n == "refresh_balance")
        .count();
    assert_eq!(refreshes, 3);
    // one settle wait per round
    assert!(started.elapsed() >= Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn test_settle_exhaustion_fails_cycle() {
    let exchange = RecordingExchange::new()
        .with_wallet("USD", 1000.0, 1000.0, 0.0)
        .with_pending_reads("USD", 100);
    let tracker = RateTracker::new();
    let mut rb = rebalancer(market("USD", vec![tier(20.0, 2)]), &exchange, &tracker, &throttle(0), 4);

    let report = rb.run_cycle_with_rng(&mut StdRng::seed_from_u64(4)).await;
    assert!(matches!(
        report.outcome,
        CycleOutcome::Failed { phase: CyclePhase::Settling, .. }
    ));
    let names = exchange.call_names("USD");
    assert_eq!(names.iter().filter(|n| **n == "available_funds").count(), 4);
    assert!(!names.contains(&"new_offer"));
}

#[tokio::test(start_paused = true)]
async fn test_exchange_error_abandons_cycle() {
    let exchange = RecordingExchange::new().with_wallet("USD", 1000.0, 1000.0, 0.0);
    exchange.fail_on("reference_rate", "503 service unavailable");
    let tracker = RateTracker::new();
    let mut rb = rebalancer(market("USD", vec![tier(50.0, 2)]), &exchange, &tracker, &throttle(0), 3);

    let report = rb.run_cycle_with_rng(&mut StdRng::seed_from_u64(5)).await;
    match report.outcome {
        CycleOutcome::Failed { phase, reason } => {
            assert_eq!(phase, CyclePhase::Allocating);
            assert!(reason.contains("503"), "{reason}");
        }
        other => panic!("expected failure, got {other}"),
    }
    assert!(exchange.placed("USD").is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_partial_placement_keeps_planned_tiers() {
    let exchange = RecordingExchange::new().with_wallet("USD", 1000.0, 1000.0, 0.0);
    exchange.fail_after("new_offer", 2, "insufficient balance");
    let tracker = RateTracker::new();
    let mut rb = rebalancer(market("USD", vec![tier(50.0, 4)]), &exchange, &tracker, &throttle(0), 3);

    let report = rb.run_cycle_with_rng(&mut StdRng::seed_from_u64(8)).await;
    assert!(matches!(
        report.outcome,
        CycleOutcome::Failed { phase: CyclePhase::Placing, .. }
    ));
    assert_eq!(report.placed, 2);
    assert_eq!(exchange.placed("USD").len(), 2);
    // the plan is still reported even though placement stopped halfway
    assert_eq!(report.tiers.len(), 1);
    assert_eq!(report.tiers[0].offers.len(), 4);
    assert!(report.total_offered() > 0.0);
}

#[tokio::test(start_paused = true)]
async fn test_throttle_spaces_calls_across_markets() {
    let exchange = RecordingExchange::new()
        .with_wallet("USD", 1000.0, 1000.0, 0.0)
        .with_wallet("BTC", 2.0, 2.0, 0.0)
        .with_open_offers("USD", 2)
        .with_open_offers("BTC", 2);
    let tracker = RateTracker::new();
    let shared = throttle(250);

    let mut btc_market = market("BTC", vec![tier(100.0, 2)]);
    btc_market.min_order_size = 0.5;
    btc_market.tiers[0].min_order_size = 0.5;

    let mut usd = rebalancer(market("USD", vec![tier(50.0, 3)]), &exchange, &tracker, &shared, 3);
    let mut btc = rebalancer(btc_market, &exchange, &tracker, &shared, 3);

    let mut rng_a = StdRng::seed_from_u64(6);
    let mut rng_b = StdRng::seed_from_u64(7);
    let (a, b) = tokio::join!(
        usd.run_cycle_with_rng(&mut rng_a),
        btc.run_cycle_with_rng(&mut rng_b)
    );
    assert_eq!(a.outcome, CycleOutcome::Completed);
    assert_eq!(b.outcome, CycleOutcome::Completed);

    let mut throttled: Vec<_> = exchange
        .calls()
        .into_iter()
        .filter(|c| matches!(c.name, "cancel_offer" | "new_offer" | "refresh_balance"))
        .map(|c| c.at)
        .collect();
    throttled.sort();
    assert!(throttled.len() >= 10);
    for pair in throttled.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_millis(250));
    }
}

// ---------------------------------------------------------------------------
// Scheduling
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_failing_market_does_not_stop_others() {
    let exchange = RecordingExchange::new()
        .with_wallet("USD", 1000.0, 1000.0, 0.0)
        .with_wallet("EUR", 1000.0, 1000.0, 0.0);
    exchange.fail_for("EUR", "new_offer", "rejected");

    let tracker = RateTracker::new();
    let board = Arc::new(StatusBoard::new(tracker.clone()));
    let shared = throttle(10);
    let rebalancers = vec![
        rebalancer(market("USD", vec![tier(50.0, 2)]), &exchange, &tracker, &shared, 3),
        rebalancer(market("EUR", vec![tier(50.0, 2)]), &exchange, &tracker, &shared, 3),
    ];

    let (stop_tx, stop_rx) = watch::channel(false);
    let handles = scheduler::spawn_all(
        rebalancers,
        Duration::from_secs(60),
        Duration::ZERO,
        Some(board.clone()),
        stop_rx,
    );

    // two full intervals: each market runs twice
    tokio::time::sleep(Duration::from_secs(100)).await;
    stop_tx.send(true).unwrap();
    for handle in handles {
        handle.await.unwrap();
    }

    let cycles = board.cycles().await;
    let usd: Vec<_> = cycles.iter().filter(|r| r.symbol == "USD").collect();
    let eur: Vec<_> = cycles.iter().filter(|r| r.symbol == "EUR").collect();
    assert_eq!(usd.len(), 2);
    assert_eq!(eur.len(), 2);
    assert!(usd.iter().all(|r| r.outcome == CycleOutcome::Completed));
    assert!(eur.iter().all(|r| r.outcome.is_failure()));
    assert_eq!(eur[1].cycle_number, 2);
}

#[tokio::test(start_paused = true)]
async fn test_slow_cycle_delays_next_tick() {
    let exchange = RecordingExchange::new().with_wallet("USD", 1000.0, 1000.0, 0.0);
    let tracker = RateTracker::new();
    let board = Arc::new(StatusBoard::new(tracker.clone()));

    // each cycle spends 90s settling against a 60s interval
    let mut slow = market("USD", vec![tier(50.0, 2)]);
    slow.sleep_secs = 90;
    let rebalancers = vec![rebalancer(slow, &exchange, &tracker, &throttle(10), 3)];

    let (stop_tx, stop_rx) = watch::channel(false);
    let handles = scheduler::spawn_all(
        rebalancers,
        Duration::from_secs(60),
        Duration::ZERO,
        Some(board.clone()),
        stop_rx,
    );

    // cycles start at ~0s, ~90s, ~180s and ~270s, not every 60s
    tokio::time::sleep(Duration::from_secs(300)).await;

    let calls: Vec<_> = exchange
        .calls()
        .into_iter()
        .filter(|c| c.symbol == "USD")
        .collect();
    let starts: Vec<_> = calls
        .iter()
        .filter(|c| c.name == "list_open_offers")
        .map(|c| c.at)
        .collect();
    assert_eq!(starts.len(), 4);
    assert_eq!(board.cycles().await.len(), 3);
    for pair in starts.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_secs(90));
    }

    // every completed cycle placed its own two offers before the next began
    for pair in starts.windows(2) {
        let placed_between = calls
            .iter()
            .filter(|c| c.name == "new_offer" && c.at >= pair[0] && c.at < pair[1])
            .count();
        assert_eq!(placed_between, 2);
    }

    // the in-flight cycle finishes before the loop sees shutdown
    stop_tx.send(true).unwrap();
    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(exchange.open_count("USD"), 2);
}

// ---------------------------------------------------------------------------
// Rate tracking and alerts
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_feed_drives_alerts_and_best_rate() {
    let t0 = Utc::now();
    let exchange = RecordingExchange::new()
        .with_wallet("USD", 1000.0, 1000.0, 0.0)
        .with_feed(vec![
            RateSample::new("USD", 0.00004, t0),
            RateSample::new("USD", 0.00006, t0 + ChronoDuration::seconds(1)),
            RateSample::new("USD", 0.00004, t0 + ChronoDuration::seconds(20)),
            RateSample::new("USD", 0.00006, t0 + ChronoDuration::seconds(31)),
        ]);

    let notifier = CollectingNotifier::default();
    let engine = AlertEngine::new(
        "USD",
        &[AlertRuleConfig {
            rate: 0.005,
            message: "{{symbol}} crossed {{rate}}: {{oldRate}} -> {{newRate}}".into(),
            cooldown_minutes: 5,
        }],
        Arc::new(notifier.clone()),
    );

    let tracker = RateTracker::new();
    let board = Arc::new(StatusBoard::new(tracker.clone()));
    let task = TrackerTask::new(tracker.clone(), vec![engine]).with_status_board(board.clone());

    let (tx, rx) = mpsc::channel(16);
    let (_stop_tx, stop_rx) = watch::channel(false);
    let tracker_handle = tokio::spawn(task.run(rx, stop_rx));

    exchange.stream_rates(vec!["USD".into()], tx).await.unwrap();
    tracker_handle.await.unwrap();

    assert_eq!(
        notifier.sent(),
        vec!["USD crossed 0.0050%: 0.0040% -> 0.0060%".to_string()]
    );
    let alerts = board.alerts().await;
    assert_eq!(alerts.len(), 2);
    assert!(alerts[0].outcome.is_fired());
    assert!(!alerts[1].outcome.is_fired());
    assert_eq!(tracker.best_rate("USD").await, 0.00006);

    // the next cycle anchors its ladder to the best recent rate
    let mut rb = rebalancer(market("USD", vec![tier(50.0, 2)]), &exchange, &tracker, &throttle(0), 3);
    let report = rb.run_cycle_with_rng(&mut StdRng::seed_from_u64(8)).await;
    let plan = &report.tiers[0];
    assert!((plan.low_rate - 0.0001).abs() < 1e-12);
    assert!((plan.high_rate - 0.0005).abs() < 1e-12);
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[test]
fn test_shipped_config_is_valid() {
    let cfg = AppConfig::load(concat!(env!("CARGO_MANIFEST_DIR"), "/config.toml")).unwrap();
    assert!(!cfg.markets.is_empty());
    for market in &cfg.markets {
        assert!(cfg.exchange.paper.contains_key(&market.symbol));
    }
}
