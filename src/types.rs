//! Shared types for fundbot.
//!
//! These types form the data model used across the allocation engine,
//! the rate tracker and the per-market rebalancers. They carry no
//! behaviour beyond formatting and small helpers so every module can
//! depend on them without circular references.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Rates
// ---------------------------------------------------------------------------

/// A single observed lending rate for a funding symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateSample {
    pub symbol: String,
    /// Fractional daily rate (0.0001 = 0.01% per day).
    pub rate: f64,
    pub timestamp: DateTime<Utc>,
}

impl RateSample {
    pub fn new(symbol: impl Into<String>, rate: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.into(),
            rate,
            timestamp,
        }
    }

    /// Sample stamped with the current wall-clock time.
    pub fn now(symbol: impl Into<String>, rate: f64) -> Self {
        Self::new(symbol, rate, Utc::now())
    }
}

impl fmt::Display for RateSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} @ {}",
            self.symbol,
            format_rate_pct(self.rate),
            self.timestamp.format("%H:%M:%S"),
        )
    }
}

/// Format a fractional daily rate as a percentage string (`0.0001` → `0.0100%`).
pub fn format_rate_pct(rate: f64) -> String {
    format!("{:.4}%", rate * 100.0)
}

// ---------------------------------------------------------------------------
// Offers
// ---------------------------------------------------------------------------

/// A funding offer ready to be submitted to the exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferRequest {
    pub symbol: String,
    pub amount: f64,
    pub rate: f64,
    pub period_days: u32,
}

impl fmt::Display for OfferRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} @ {} for {}d",
            self.amount,
            self.symbol,
            format_rate_pct(self.rate),
            self.period_days,
        )
    }
}

/// Why a tier produced no offers, or how many it produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum TierOutcome {
    /// Offers were planned for this tier.
    Planned { orders: usize, per_order: f64 },
    /// The slice of funds left for this tier was below its minimum order size.
    SkippedInsufficientFunds { allocated: f64, min_order_size: f64 },
}

impl fmt::Display for TierOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TierOutcome::Planned { orders, per_order } => {
                write!(f, "{orders} orders of ~{per_order}")
            }
            TierOutcome::SkippedInsufficientFunds {
                allocated,
                min_order_size,
            } => write!(
                f,
                "skipped: {allocated} allocated, below minimum order size {min_order_size}"
            ),
        }
    }
}

/// The allocation result for one configured tier.
#[derive(Debug, Clone, Serialize)]
pub struct TierPlan {
    /// Position of the tier in the market configuration.
    pub tier_index: usize,
    /// Funds assigned to this tier (before per-order rounding).
    pub allocated: f64,
    /// Lowest and highest rate of the ladder.
    pub low_rate: f64,
    pub high_rate: f64,
    pub offers: Vec<OfferRequest>,
    pub outcome: TierOutcome,
}

impl TierPlan {
    pub fn is_skipped(&self) -> bool {
        matches!(self.outcome, TierOutcome::SkippedInsufficientFunds { .. })
    }

    /// Sum of all offer amounts in this tier.
    pub fn total_offered(&self) -> f64 {
        self.offers.iter().map(|o| o.amount).sum()
    }
}

// ---------------------------------------------------------------------------
// Rebalance cycles
// ---------------------------------------------------------------------------

/// Phases of a single rebalance cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CyclePhase {
    Idle,
    Cancelling,
    Settling,
    Allocating,
    Placing,
    Failed,
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CyclePhase::Idle => "idle",
            CyclePhase::Cancelling => "cancelling",
            CyclePhase::Settling => "settling",
            CyclePhase::Allocating => "allocating",
            CyclePhase::Placing => "placing",
            CyclePhase::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// How a rebalance cycle ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum CycleOutcome {
    /// Offers were placed (possibly zero if every tier was skipped).
    Completed,
    /// Total funds for the symbol round to zero.
    SkippedNoFunds,
    /// Available funds after settling were below the market minimum order size.
    SkippedBelowMinimum { available: f64, min_order_size: f64 },
    /// An exchange call failed; the cycle was abandoned in the given phase.
    Failed { phase: CyclePhase, reason: String },
}

impl CycleOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, CycleOutcome::Failed { .. })
    }
}

impl fmt::Display for CycleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleOutcome::Completed => write!(f, "completed"),
            CycleOutcome::SkippedNoFunds => write!(f, "skipped: no funds"),
            CycleOutcome::SkippedBelowMinimum {
                available,
                min_order_size,
            } => write!(
                f,
                "skipped: {available} available, minimum order size {min_order_size}"
            ),
            CycleOutcome::Failed { phase, reason } => write!(f, "failed while {phase}: {reason}"),
        }
    }
}

/// Summary of one cancel → settle → allocate → place cycle for a market.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub symbol: String,
    pub cycle_number: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total_funds: f64,
    pub available_funds: Option<f64>,
    pub cancelled: usize,
    pub placed: usize,
    pub tiers: Vec<TierPlan>,
    pub outcome: CycleOutcome,
}

impl CycleReport {
    pub fn new(symbol: &str, cycle_number: u64) -> Self {
        let now = Utc::now();
        Self {
            symbol: symbol.to_string(),
            cycle_number,
            started_at: now,
            finished_at: now,
            total_funds: 0.0,
            available_funds: None,
            cancelled: 0,
            placed: 0,
            tiers: Vec::new(),
            outcome: CycleOutcome::Completed,
        }
    }

    /// Total amount offered across all placed tiers.
    pub fn total_offered(&self) -> f64 {
        self.tiers.iter().map(|t| t.total_offered()).sum()
    }
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] cycle #{}: cancelled={} placed={} total={} ({})",
            self.symbol, self.cycle_number, self.cancelled, self.placed, self.total_funds, self.outcome,
        )
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for fundbot.
#[derive(Debug, thiserror::Error)]
pub enum FundbotError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Exchange call failed ({call}): {message}")]
    ExchangeCall { call: String, message: String },

    #[error("Exchange call timed out ({call}) after {secs}s")]
    Timeout { call: String, secs: u64 },

    #[error("Available balance for {symbol} did not settle after {attempts} attempts")]
    SettleExhausted { symbol: String, attempts: u32 },

    #[error("Notification delivery failed: {0}")]
    Notification(String),
}

impl FundbotError {
    /// Whether this error came from the exchange collaborator.
    pub fn is_exchange_error(&self) -> bool {
        matches!(
            self,
            FundbotError::ExchangeCall { .. }
                | FundbotError::Timeout { .. }
                | FundbotError::SettleExhausted { .. }
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
