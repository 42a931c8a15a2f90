//! Order-size generation.
//!
//! Splits a total spend into `count` orders of roughly equal size, with
//! optional random variation, while keeping every order at or above the
//! minimum size. Rounding error is carried from one order into the next
//! so the rounded amounts still add back up to the total.

use rand::Rng;

/// Split `total_spend` into `count` order amounts.
///
/// The effective randomisation is capped so that, before rounding, no
/// order is pushed below `min_size`. When `total_spend < count * min_size`
/// orders are floored at `min_size` and the sum overshoots the total.
pub fn scaled_amounts<R, F>(
    count: usize,
    total_spend: f64,
    min_size: f64,
    random_fraction: f64,
    round: F,
    rng: &mut R,
) -> Vec<f64>
where
    R: Rng + ?Sized,
    F: Fn(f64) -> f64,
{
    if count < 1 {
        return Vec::new();
    }
    if count == 1 {
        return vec![total_spend];
    }

    let per_order = total_spend / count as f64;
    let max_safe = if per_order < min_size || per_order <= 0.0 {
        0.0
    } else {
        (per_order - min_size) / per_order
    };
    let safe = random_fraction.min(max_safe).clamp(0.0, 1.0);

    let weights: Vec<f64> = (0..count)
        .map(|_| {
            if safe == 0.0 {
                1.0
            } else {
                1.0 + rng.gen::<f64>() * safe * 2.0 - safe
            }
        })
        .collect();

    let unscaled: f64 = weights.iter().sum();
    let scale = total_spend / unscaled;

    let mut carried = 0.0;
    weights
        .into_iter()
        .map(|w| {
            let wish = (w * scale + carried).max(min_size);
            let have = round(wish);
            carried = wish - have;
            have
        })
        .collect()
}
