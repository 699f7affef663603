//! Outcome labeling for a single entry
//!
//! Given the forward rally samples collected after an entry, the labeler picks
//! the take-profit target as a percentile of those samples, then walks the
//! window a second time to find when (if ever) the target first traded before
//! the stop-loss fired.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use super::helpers::{percentile, stop_price};
use crate::Percent;

/// One forward candle seen from the entry
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RallySample {
    /// Index of the candle in the scanned series
    pub index: usize,
    pub timestamp: DateTime<Utc>,
    /// Gain of the candle's high over the entry price, in percent
    pub rally_pct: f64,
    pub low: f64,
}

/// Labeled outcome of an entry
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Outcome {
    pub optimal_target_pct: f64,
    pub max_rally_pct: f64,
    /// `None` when the target never traded inside the window
    pub hold_duration: Option<TimeDelta>,
    pub target_hit: bool,
}

/// Computes the percentile target and time-to-target for an entry
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutcomeLabeler {
    pub target_percentile: Percent,
    pub stop_loss_pct: Percent,
}

impl Default for OutcomeLabeler {
    fn default() -> Self {
        Self {
            target_percentile: Percent::new_const(75.0),
            stop_loss_pct: Percent::new_const(5.0),
        }
    }
}

impl OutcomeLabeler {
    pub fn new(target_percentile: Percent, stop_loss_pct: Percent) -> Self {
        Self {
            target_percentile,
            stop_loss_pct,
        }
    }

    /// Label an entry from its forward samples. Returns `None` for an empty window.
    pub fn label(
        &self,
        entry_price: f64,
        entry_time: DateTime<Utc>,
        samples: &[RallySample],
    ) -> Option<Outcome> {
        let rallies: Vec<f64> = samples.iter().map(|s| s.rally_pct).collect();
        let optimal_target_pct = percentile(&rallies, self.target_percentile.get())?;
        let max_rally_pct = rallies.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        let hold_duration = self
            .first_hit(entry_price, samples, optimal_target_pct)
            .map(|s| s.timestamp - entry_time);

        Some(Outcome {
            optimal_target_pct,
            max_rally_pct,
            hold_duration,
            target_hit: hold_duration.is_some(),
        })
    }

    /// First sample whose rally reaches `target_pct`.
    ///
    /// The target is checked before the stop on the same candle. The walk ends
    /// with `None` at the first candle whose low breaches the stop price.
    pub fn first_hit<'s>(
        &self,
        entry_price: f64,
        samples: &'s [RallySample],
        target_pct: f64,
    ) -> Option<&'s RallySample> {
        let stop = stop_price(entry_price, self.stop_loss_pct);
        for sample in samples {
            if sample.rally_pct >= target_pct {
                return Some(sample);
            }
            if sample.low <= stop {
                return None;
            }
        }
        None
    }
}
