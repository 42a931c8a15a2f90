//! Explicit-precision decimal rounding.
//!
//! Amounts and rates are computed as `f64` but rounded through
//! `rust_decimal` so that "round to 5 places" means the same thing on
//! every platform, without binary floating-point drift.

use rust_decimal::prelude::*;

fn round_with(value: f64, dp: u32, strategy: RoundingStrategy) -> f64 {
    match Decimal::from_f64(value) {
        Some(d) => d
            .round_dp_with_strategy(dp, strategy)
            .to_f64()
            .unwrap_or(value),
        // NaN / infinities pass through untouched
        None => value,
    }
}

/// Round half away from zero to `dp` decimal places.
pub fn round(value: f64, dp: u32) -> f64 {
    round_with(value, dp, RoundingStrategy::MidpointAwayFromZero)
}

/// Round towards negative infinity to `dp` decimal places.
pub fn round_down(value: f64, dp: u32) -> f64 {
    round_with(value, dp, RoundingStrategy::ToNegativeInfinity)
}

/// Round towards positive infinity to `dp` decimal places.
pub fn round_up(value: f64, dp: u32) -> f64 {
    round_with(value, dp, RoundingStrategy::ToPositiveInfinity)
}

/// The smallest step representable at `dp` decimal places.
pub fn unit(dp: u32) -> f64 {
    10f64.powi(-(dp as i32))
}
