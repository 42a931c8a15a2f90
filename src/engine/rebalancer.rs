//! Per-market rebalance cycle.
//!
//! One `Rebalancer` owns one market. Each cycle cancels our open offers,
//! waits for the wallet to settle, plans a fresh ladder with the
//! allocation engine and places it. Any failing exchange call abandons
//! the cycle; the next scheduled cycle simply starts over.

use anyhow::Result;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::throttle::CallThrottle;
use crate::allocation::{self, rounding, RateContext};
use crate::config::MarketConfig;
use crate::exchange::FundingExchange;
use crate::tracker::RateTracker;
use crate::types::{
    format_rate_pct, CycleOutcome, CyclePhase, CycleReport, FundbotError, TierOutcome,
};

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Limits applied to every cycle, shared by all markets.
#[derive(Debug, Clone)]
pub struct CycleSettings {
    /// Upper bound on any single exchange call.
    pub call_timeout: Duration,
    /// Refresh/wait/re-check rounds before the settle step gives up.
    pub settle_max_attempts: u32,
}

impl Default for CycleSettings {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(30),
            settle_max_attempts: 12,
        }
    }
}

// ---------------------------------------------------------------------------
// Rebalancer
// ---------------------------------------------------------------------------

pub struct Rebalancer {
    market: MarketConfig,
    exchange: Arc<dyn FundingExchange>,
    tracker: RateTracker,
    throttle: Arc<CallThrottle>,
    settings: CycleSettings,
    cycles: u64,
    phase: CyclePhase,
}

impl Rebalancer {
    pub fn new(
        market: MarketConfig,
        exchange: Arc<dyn FundingExchange>,
        tracker: RateTracker,
        throttle: Arc<CallThrottle>,
        settings: CycleSettings,
    ) -> Self {
        Self {
            market,
            exchange,
            tracker,
            throttle,
            settings,
            cycles: 0,
            phase: CyclePhase::Idle,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.market.symbol
    }

    pub fn market(&self) -> &MarketConfig {
        &self.market
    }

    /// Phase the last cycle ended in (`Idle` or `Failed`).
    pub fn phase(&self) -> CyclePhase {
        self.phase
    }

    /// Run one full cycle with an entropy-seeded random source.
    pub async fn run_cycle(&mut self) -> CycleReport {
        let mut rng = StdRng::from_entropy();
        self.run_cycle_with_rng(&mut rng).await
    }

    /// Run one full cycle. Never returns an error: failures are recorded
    /// in the report's outcome.
    pub async fn run_cycle_with_rng<R>(&mut self, rng: &mut R) -> CycleReport
    where
        R: Rng + Send + ?Sized,
    {
        self.cycles += 1;
        let mut report = CycleReport::new(&self.market.symbol, self.cycles);
        info!(symbol = %self.market.symbol, cycle = self.cycles, "Refreshing offers");

        match self.drive(&mut report, rng).await {
            Ok(outcome) => {
                report.outcome = outcome;
                self.phase = CyclePhase::Idle;
            }
            Err(e) => {
                let failed_in = self.phase;
                error!(
                    symbol = %self.market.symbol,
                    phase = %failed_in,
                    error = %e,
                    "Cycle failed, will retry next interval"
                );
                report.outcome = CycleOutcome::Failed {
                    phase: failed_in,
                    reason: format!("{e:#}"),
                };
                self.phase = CyclePhase::Failed;
            }
        }

        report.finished_at = Utc::now();
        report
    }

    fn enter(&mut self, phase: CyclePhase) {
        debug!(symbol = %self.market.symbol, from = %self.phase, to = %phase, "Cycle phase");
        self.phase = phase;
    }

    async fn drive<R>(&mut self, report: &mut CycleReport, rng: &mut R) -> Result<CycleOutcome>
    where
        R: Rng + Send + ?Sized,
    {
        let symbol = self.market.symbol.clone();

        // -- Cancel ----------------------------------------------------------

        self.enter(CyclePhase::Cancelling);
        let open = self
            .call("list_open_offers", self.exchange.list_open_offers(&symbol))
            .await?;
        for offer_id in &open {
            self.throttle.wait().await;
            self.call("cancel_offer", self.exchange.cancel_offer(offer_id))
                .await?;
            report.cancelled += 1;
        }
        debug!(symbol = %symbol, cancelled = report.cancelled, "Open offers cancelled");

        // -- Settle ----------------------------------------------------------

        self.enter(CyclePhase::Settling);
        let total = self
            .call("total_funds", self.exchange.total_funds(&symbol))
            .await?;
        report.total_funds = total;
        if rounding::round(total, self.market.rounding) <= 0.0 {
            info!(symbol = %symbol, "No funds in wallet, skipping");
            return Ok(CycleOutcome::SkippedNoFunds);
        }

        let available = self.settle().await?;
        report.available_funds = Some(available);

        // -- Allocate --------------------------------------------------------

        self.enter(CyclePhase::Allocating);
        if available < self.market.min_order_size {
            info!(
                symbol = %symbol,
                available,
                min_order_size = self.market.min_order_size,
                "Not enough funds available to offer, skipping"
            );
            return Ok(CycleOutcome::SkippedBelowMinimum {
                available,
                min_order_size: self.market.min_order_size,
            });
        }

        let frr = self
            .call("reference_rate", self.exchange.reference_rate(&symbol))
            .await?;
        let best_rate = self.tracker.best_rate(&symbol).await;
        let ctx = RateContext { frr, best_rate };
        let plans = allocation::allocate(&self.market, total, available, ctx, rng);

        for plan in &plans {
            match &plan.outcome {
                TierOutcome::Planned { orders, per_order } => info!(
                    symbol = %symbol,
                    tier = plan.tier_index,
                    orders,
                    per_order,
                    low = %format_rate_pct(plan.low_rate),
                    high = %format_rate_pct(plan.high_rate),
                    "Tier ladder planned"
                ),
                TierOutcome::SkippedInsufficientFunds { .. } => info!(
                    symbol = %symbol,
                    tier = plan.tier_index,
                    outcome = %plan.outcome,
                    "Tier skipped, insufficient funds"
                ),
            }
        }

        // -- Place -----------------------------------------------------------

        self.enter(CyclePhase::Placing);
        report.tiers = plans;
        for offer in report.tiers.iter().flat_map(|p| p.offers.iter()) {
            self.throttle.wait().await;
            self.call("new_offer", self.exchange.new_offer(offer)).await?;
            report.placed += 1;
        }

        info!(
            symbol = %symbol,
            placed = report.placed,
            offered = report.total_offered(),
            "Offers updated"
        );
        Ok(CycleOutcome::Completed)
    }

    /// Refresh, wait, re-check until the exchange reports an available
    /// balance, up to `settle_max_attempts` rounds.
    async fn settle(&self) -> Result<f64> {
        let symbol = &self.market.symbol;
        let max_attempts = self.settings.settle_max_attempts;

        for attempt in 1..=max_attempts {
            self.throttle.wait().await;
            self.call("refresh_balance", self.exchange.refresh_balance(symbol))
                .await?;
            tokio::time::sleep(self.market.settle_duration()).await;

            if let Some(available) = self
                .call("available_funds", self.exchange.available_funds(symbol))
                .await?
            {
                debug!(symbol = %symbol, attempt, available, "Balance settled");
                return Ok(available);
            }
            warn!(symbol = %symbol, attempt, max_attempts, "Available balance not ready yet");
        }

        Err(FundbotError::SettleExhausted {
            symbol: symbol.clone(),
            attempts: max_attempts,
        }
        .into())
    }

    /// Run one exchange call under the configured timeout.
    async fn call<T, F>(&self, name: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.settings.call_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(FundbotError::ExchangeCall {
                call: name.to_string(),
                message: format!("{e:#}"),
            }
            .into()),
            Err(_) => Err(FundbotError::Timeout {
                call: name.to_string(),
                secs: self.settings.call_timeout.as_secs(),
            }
            .into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
