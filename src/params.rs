//! Parameter metadata for the scan configuration
//!
//! This module describes every tunable scan parameter, enabling:
//! - Grid search over scan settings
//! - Parameter documentation
//! - Building a validated [`ScanConfig`] from loosely typed input
//!
//! # Example
//!
//! ```rust
//! use std::collections::HashMap;
//! use peakdrop::prelude::*;
//!
//! for param in ScanConfig::param_meta() {
//!     println!("{}: {:?} (default: {})", param.name, param.param_type, param.default);
//! }
//!
//! let mut params = HashMap::new();
//! params.insert("min_drop_pct", 3.0);
//! let config = ScanConfig::with_params(&params).unwrap();
//! assert_eq!(config.min_drop_pct.get(), 3.0);
//! ```

use std::collections::HashMap;

use crate::scanner::ScanConfig;
use crate::{AnalysisError, Percent, Period, Result};

// ============================================================
// PARAMETER TYPES
// ============================================================

/// Type of parameter value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
  /// Percentage in 0.0..=100.0
  Percent,
  /// Candle count (positive integer)
  Period,
}

/// Metadata for a single scan parameter
#[derive(Debug, Clone)]
pub struct ParamMeta {
  /// Parameter name (e.g., "min_drop_pct")
  pub name: &'static str,
  /// Parameter type (Percent or Period)
  pub param_type: ParamType,
  /// Default value
  pub default: f64,
  /// Range for sweeps: (min, max, step)
  pub range: (f64, f64, f64),
  /// Human-readable description
  pub description: &'static str,
}

impl ParamMeta {
  /// Create a new ParamMeta for a Percent parameter
  pub const fn percent(
    name: &'static str,
    default: f64,
    range: (f64, f64, f64),
    description: &'static str,
  ) -> Self {
    Self { name, param_type: ParamType::Percent, default, range, description }
  }

  /// Create a new ParamMeta for a Period parameter
  pub const fn period(
    name: &'static str,
    default: f64,
    range: (f64, f64, f64),
    description: &'static str,
  ) -> Self {
    Self { name, param_type: ParamType::Period, default, range, description }
  }

  /// Generate all values for grid search
  pub fn generate_grid(&self) -> Vec<f64> {
    let (min, max, step) = self.range;
    let mut values = Vec::new();
    let mut v = min;
    while v <= max + f64::EPSILON {
      values.push(v);
      v += step;
    }
    values
  }

  /// Validate a value for this parameter
  pub fn validate(&self, value: f64) -> Result<()> {
    let (min, max, _) = self.range;
    if value < min || value > max {
      return Err(AnalysisError::OutOfRange { field: self.name, value, min, max });
    }
    match self.param_type {
      ParamType::Percent => Ok(()),
      ParamType::Period => {
        if value < 1.0 || value.fract() != 0.0 {
          return Err(AnalysisError::InvalidValue("Period must be a positive integer"));
        }
        Ok(())
      },
    }
  }
}

// ============================================================
// SCAN CONFIG PARAMETERS
// ============================================================

static SCAN_PARAMS: [ParamMeta; 6] = [
  ParamMeta::percent(
    "min_drop_pct",
    2.0,
    (0.5, 10.0, 0.5),
    "Minimum fall from the trigger high for a candle low to qualify as an entry",
  ),
  ParamMeta::period(
    "peak_window",
    72.0,
    (12.0, 288.0, 12.0),
    "Maximum candles followed while highs keep rising",
  ),
  ParamMeta::period(
    "lookahead_window",
    288.0,
    (48.0, 576.0, 48.0),
    "Forward candles sampled after an entry",
  ),
  ParamMeta::percent(
    "stop_loss_pct",
    5.0,
    (1.0, 20.0, 1.0),
    "Fall below the entry price that ends the forward window",
  ),
  ParamMeta::percent(
    "target_percentile",
    75.0,
    (50.0, 95.0, 5.0),
    "Percentile of the forward rally distribution used as the target",
  ),
  ParamMeta::period(
    "min_candles",
    200.0,
    (50.0, 1000.0, 50.0),
    "Instruments with fewer candles are skipped",
  ),
];

impl ScanConfig {
  /// Returns metadata for all configurable parameters
  pub fn param_meta() -> &'static [ParamMeta] {
    &SCAN_PARAMS
  }

  /// Creates a config from a name -> value map.
  ///
  /// Missing parameters use their default values; unknown names are rejected.
  pub fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
    let metas = Self::param_meta();
    for (&key, &value) in params {
      let meta = metas
        .iter()
        .find(|m| m.name == key)
        .ok_or_else(|| AnalysisError::InvalidConfig(format!("unknown parameter: {key}")))?;
      meta.validate(value)?;
    }

    let defaults = ScanConfig::default();
    let config = ScanConfig {
      min_drop_pct: get_percent(params, "min_drop_pct", defaults.min_drop_pct.get())?,
      peak_window: get_period(params, "peak_window", defaults.peak_window.get())?,
      lookahead_window: get_period(params, "lookahead_window", defaults.lookahead_window.get())?,
      stop_loss_pct: get_percent(params, "stop_loss_pct", defaults.stop_loss_pct.get())?,
      target_percentile: get_percent(
        params,
        "target_percentile",
        defaults.target_percentile.get(),
      )?,
      min_candles: get_period(params, "min_candles", defaults.min_candles)?.get(),
    };
    config.validate()?;
    Ok(config)
  }
}

// ============================================================
// PARAMETER VALUE HELPERS
// ============================================================

/// Helper to get a Percent from params with default fallback
pub fn get_percent(params: &HashMap<&str, f64>, key: &str, default: f64) -> Result<Percent> {
  let value = params.get(key).copied().unwrap_or(default);
  Percent::new(value)
}

/// Helper to get a Period from params with default fallback
pub fn get_period(params: &HashMap<&str, f64>, key: &str, default: usize) -> Result<Period> {
  let value = params.get(key).copied().unwrap_or(default as f64);
  Period::new(value as usize)
}

// ============================================================
// TESTS
// ============================================================
