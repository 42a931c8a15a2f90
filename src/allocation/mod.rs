//! Tiered allocation engine.
//!
//! Turns a market's funds and tier configuration into a concrete list of
//! offers: how much each tier gets, how many orders it splits into, the
//! rate of each order (`prices`) and the size of each order (`amounts`).
//! Everything here is pure apart from the random source, which callers
//! pass in so tests can seed it.

pub mod amounts;
pub mod easing;
pub mod prices;
pub mod rounding;

use rand::Rng;
use tracing::debug;

use crate::config::{MarketConfig, OfferTier};
use crate::types::{OfferRequest, TierOutcome, TierPlan};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Decimal places used for offered rates.
pub const RATE_DECIMALS: u32 = 8;

/// The ladder never starts more than 1% below the best recent market rate.
const BEST_RATE_LOW_FACTOR: f64 = 0.99;

/// The ladder always reaches at least 10% above the best recent market rate.
const BEST_RATE_HIGH_FACTOR: f64 = 1.1;

// ---------------------------------------------------------------------------
// Rate context
// ---------------------------------------------------------------------------

/// Market rates the ladder is anchored to for one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RateContext {
    /// Exchange reference floating rate (fractional per day).
    pub frr: f64,
    /// Best recent trade rate from the rate tracker, 0 when unknown.
    pub best_rate: f64,
}

/// Low and high ends of a tier's rate ladder.
pub fn rate_bounds(tier: &OfferTier, ctx: RateContext) -> (f64, f64) {
    let low = (ctx.frr * tier.frr_multiple_low)
        .max(tier.at_least_low / 100.0)
        .max(ctx.best_rate * BEST_RATE_LOW_FACTOR);
    let high = (ctx.frr * tier.frr_multiple_high)
        .max(tier.at_least_high / 100.0)
        .max(ctx.best_rate * BEST_RATE_HIGH_FACTOR);
    (low, high.max(low))
}

/// Position of `rate` between `min` and `max`, clamped to `[0, 1]`.
pub fn normalise_rate(rate: f64, min: f64, max: f64) -> f64 {
    if rate <= min {
        return 0.0;
    }
    if rate >= max {
        return 1.0;
    }
    (rate - min) / (max - min)
}

/// Lending period for an offer at `rate`: the higher the rate within the
/// tier's lending-period band, the longer the loan.
pub fn period_days(rate: f64, tier: &OfferTier, market: &MarketConfig) -> u32 {
    let (min_days, max_days) = market.period_bounds();
    let t = normalise_rate(
        rate,
        tier.lending_period_low / 100.0,
        tier.lending_period_high / 100.0,
    );
    let days = min_days as f64 + (max_days - min_days) as f64 * t;
    (rounding::round(days, 0) as u32).clamp(min_days, max_days)
}

// ---------------------------------------------------------------------------
// Allocation
// ---------------------------------------------------------------------------

/// Plan every tier of `market` against the given funds.
///
/// Each tier targets a percentage of `total_funds` but can only take what
/// is still left of `available_funds` after the tiers before it. Tiers
/// whose slice falls below their minimum order size are reported as
/// skipped and produce no offers.
pub fn allocate<R: Rng + ?Sized>(
    market: &MarketConfig,
    total_funds: f64,
    available_funds: f64,
    ctx: RateContext,
    rng: &mut R,
) -> Vec<TierPlan> {
    let mut remaining = available_funds.max(0.0);
    let mut plans = Vec::with_capacity(market.tiers.len());

    for (index, tier) in market.tiers.iter().enumerate() {
        let desired = total_funds * tier.amount / 100.0;
        let allocated = desired.min(remaining).max(0.0);
        remaining = (remaining - allocated).max(0.0);

        let plan = plan_tier(market, index, tier, allocated, ctx, rng);
        debug!(
            symbol = %market.symbol,
            tier = index,
            desired,
            allocated,
            remaining,
            outcome = %plan.outcome,
            "Tier planned"
        );
        plans.push(plan);
    }

    plans
}

fn plan_tier<R: Rng + ?Sized>(
    market: &MarketConfig,
    index: usize,
    tier: &OfferTier,
    allocated: f64,
    ctx: RateContext,
    rng: &mut R,
) -> TierPlan {
    let (low_rate, high_rate) = rate_bounds(tier, ctx);
    let skipped = |allocated: f64| TierPlan {
        tier_index: index,
        allocated,
        low_rate,
        high_rate,
        offers: Vec::new(),
        outcome: TierOutcome::SkippedInsufficientFunds {
            allocated,
            min_order_size: tier.min_order_size,
        },
    };

    if allocated <= 0.0 || allocated < tier.min_order_size {
        return skipped(allocated);
    }

    let per_order = rounding::round_down(
        (allocated / tier.order_count as f64).max(tier.min_order_size),
        market.rounding,
    );
    if per_order <= 0.0 {
        return skipped(allocated);
    }
    let order_count = (allocated / per_order).floor() as usize;
    if order_count == 0 {
        return skipped(allocated);
    }

    let rates = prices::scaled_prices(
        order_count,
        low_rate,
        high_rate,
        tier.rate_jitter,
        tier.easing(),
        |r| rounding::round(r, RATE_DECIMALS),
        rng,
    );
    let spend = rounding::round_down(allocated, market.rounding);
    let sizes = amounts::scaled_amounts(
        order_count,
        spend,
        tier.min_order_size,
        tier.randomise,
        |a| rounding::round(a, market.rounding),
        rng,
    );

    let offers = rates
        .into_iter()
        .zip(sizes)
        .map(|(rate, amount)| OfferRequest {
            symbol: market.symbol.clone(),
            amount,
            rate,
            period_days: period_days(rate, tier, market),
        })
        .collect();

    TierPlan {
        tier_index: index,
        allocated,
        low_rate,
        high_rate,
        offers,
        outcome: TierOutcome::Planned {
            orders: order_count,
            per_order,
        },
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
