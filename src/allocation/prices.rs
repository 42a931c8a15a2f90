//! Rate ladder generation.
//!
//! Spreads `count` offers between `from` and `to` along an easing curve,
//! optionally jittered. The first rung is never jittered so the lowest
//! offer always sits exactly on `from`.

use rand::Rng;

use super::easing::Easing;

/// Build a ladder of `count` rates from `from` up to `to`.
///
/// `random_spread` (clamped to `[0, 1]`) adds up to that much extra
/// progress to every rung but the first before the ladder is rescaled,
/// so the highest raw rung still lands exactly on `to`.
pub fn scaled_prices<R, F>(
    count: usize,
    from: f64,
    to: f64,
    random_spread: f64,
    easing: Easing,
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
        return vec![round(from)];
    }

    let spread = random_spread.clamp(0.0, 1.0);
    let last = (count - 1) as f64;

    let raw: Vec<f64> = (0..count)
        .map(|i| {
            let eased = easing.apply(i as f64 / last);
            if i == 0 || spread == 0.0 {
                eased
            } else {
                eased + rng.gen::<f64>() * spread
            }
        })
        .collect();

    let max = raw.iter().cloned().fold(0.0_f64, f64::max);
    let scale = if max > 0.0 { (to - from) / max } else { 0.0 };

    raw.into_iter().map(|r| round(from + r * scale)).collect()
}
