//! Numeric helpers shared by the scanner, the labeler and the ranker
//!
//! All percentages are expressed in percent units (2.0 == 2%).

use crate::Percent;

// ============================================================
// PRICE ARITHMETIC
// ============================================================

/// Percentage fall from `trigger_high` to `entry_price`
#[inline]
pub fn drop_pct(trigger_high: f64, entry_price: f64) -> f64 {
    (trigger_high - entry_price) / trigger_high * 100.0
}

/// Percentage gain of `high` over `entry_price`
#[inline]
pub fn rally_pct(entry_price: f64, high: f64) -> f64 {
    (high - entry_price) / entry_price * 100.0
}

/// Price a candle low must reach for the drop from `trigger_high` to qualify
#[inline]
pub fn drop_threshold(trigger_high: f64, min_drop: Percent) -> f64 {
    trigger_high * (1.0 - min_drop.fraction())
}

/// Stop-loss price below `entry_price`
#[inline]
pub fn stop_price(entry_price: f64, stop_loss: Percent) -> f64 {
    entry_price * (1.0 - stop_loss.fraction())
}

// ============================================================
// DISTRIBUTION STATISTICS
// ============================================================

/// Percentile with linear interpolation between order statistics.
///
/// `pct` is in percent units and is clamped to 0..=100. Returns `None` for an
/// empty input. The result never exceeds the upper order statistic it was
/// interpolated towards, so the 100th percentile is exactly the maximum.
pub fn percentile(values: &[f64], pct: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let rank = pct.clamp(0.0, 100.0) / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;

    let value = sorted[lo] + (sorted[hi] - sorted[lo]) * frac;
    Some(value.min(sorted[hi]))
}

/// Median (mean of the two middle values for even lengths)
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        Some(sorted[mid])
    } else {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    }
}

/// Arithmetic mean
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}
