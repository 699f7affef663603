//! Peak → drop → rebound scanner
//!
//! A single forward pass over a candle series. Each iteration runs three
//! phases, and each phase hands the next one an explicit index:
//!
//! - **SeekPeak**: from the cursor, follow rising highs for at most
//!   `peak_window` candles. The last rising high is the *trigger high*.
//! - **SeekEntry**: after the peak, find the first candle whose low is at least
//!   `min_drop_pct` below the trigger high. A higher high seen first
//!   invalidates the peak and the scan restarts just past it.
//! - **SeekOutcome**: collect up to `lookahead_window` forward rally samples,
//!   stopping at the first stop-loss breach, and label them.
//!
//! After an entry the cursor moves just past the entry candle, so detections
//! never overlap.

pub mod helpers;
pub mod labeler;

pub use helpers::*;
pub use labeler::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{AnalysisError, EntryEvent, OHLCExt, Percent, Period, Result, OHLC};

// ============================================================
// CONFIGURATION
// ============================================================

/// Scan parameters. Defaults describe 5-minute candles: a 6 hour peak window
/// and a 24 hour lookahead.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub min_drop_pct: Percent,
    pub peak_window: Period,
    pub lookahead_window: Period,
    pub stop_loss_pct: Percent,
    pub target_percentile: Percent,
    /// Instruments with fewer candles are skipped
    pub min_candles: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            min_drop_pct: Percent::new_const(2.0),
            peak_window: Period::new_const(72),
            lookahead_window: Period::new_const(288),
            stop_loss_pct: Percent::new_const(5.0),
            target_percentile: Percent::new_const(75.0),
            min_candles: 200,
        }
    }
}

impl ScanConfig {
    pub fn validate(&self) -> Result<()> {
        if self.min_drop_pct.get() <= 0.0 || self.min_drop_pct.get() >= 100.0 {
            return Err(AnalysisError::InvalidConfig(format!(
                "min_drop_pct must be in (0, 100), got {}",
                self.min_drop_pct.get()
            )));
        }
        if self.stop_loss_pct.get() <= 0.0 || self.stop_loss_pct.get() >= 100.0 {
            return Err(AnalysisError::InvalidConfig(format!(
                "stop_loss_pct must be in (0, 100), got {}",
                self.stop_loss_pct.get()
            )));
        }
        Ok(())
    }

    pub fn labeler(&self) -> OutcomeLabeler {
        OutcomeLabeler::new(self.target_percentile, self.stop_loss_pct)
    }
}

// ============================================================
// PHASES
// ============================================================

/// Follow rising highs from `start` for at most `window` candles.
///
/// Returns the index of the last rising high, or `None` when `start` is past
/// the end of the series.
pub fn find_peak<T: OHLC>(bars: &[T], start: usize, window: usize) -> Option<usize> {
    let first = bars.get(start)?;
    let end = start.saturating_add(window).min(bars.len());

    let mut peak = first.high();
    let mut peak_index = start;
    for (i, bar) in bars.iter().enumerate().take(end).skip(start + 1) {
        if bar.high() > peak {
            peak = bar.high();
            peak_index = i;
        } else {
            break;
        }
    }
    Some(peak_index)
}

/// Result of looking for an entry after a peak
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntrySearch {
    /// A candle's low reached the drop threshold
    FoundEntry { entry_index: usize },
    /// A higher high came first; resume the peak search at `resume`
    PeakInvalidated { resume: usize },
    /// The series ended without either
    NoEntry,
}

/// Look for the first candle after `peak_index` that drops `min_drop` below
/// the peak's high. The drop is checked before the invalidating higher high on
/// the same candle.
pub fn find_entry<T: OHLC>(bars: &[T], peak_index: usize, min_drop: Percent) -> EntrySearch {
    let Some(peak) = bars.get(peak_index) else {
        return EntrySearch::NoEntry;
    };
    let trigger_high = peak.high();
    let threshold = drop_threshold(trigger_high, min_drop);

    for (i, bar) in bars.iter().enumerate().skip(peak_index + 1) {
        if bar.low() <= threshold {
            return EntrySearch::FoundEntry { entry_index: i };
        }
        if bar.high() > trigger_high {
            return EntrySearch::PeakInvalidated {
                resume: peak_index + 1,
            };
        }
    }
    EntrySearch::NoEntry
}

/// Collect rally samples for at most `lookahead` candles after the entry.
///
/// The candle that breaches `stop` is included and ends the window.
pub fn forward_window<T: OHLC>(
    bars: &[T],
    entry_index: usize,
    entry_price: f64,
    lookahead: usize,
    stop: f64,
) -> Vec<RallySample> {
    let start = entry_index + 1;
    let end = start.saturating_add(lookahead).min(bars.len());

    let mut samples = Vec::with_capacity(end.saturating_sub(start));
    for (index, bar) in bars.iter().enumerate().take(end).skip(start) {
        samples.push(RallySample {
            index,
            timestamp: bar.timestamp(),
            rally_pct: bar.rally_pct_from(entry_price),
            low: bar.low(),
        });
        if bar.breaches(stop) {
            break;
        }
    }
    samples
}

// ============================================================
// DETECTION ITERATOR
// ============================================================

/// A labeled entry, before it is tagged with an instrument
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub peak_index: usize,
    pub entry_index: usize,
    pub trigger_time: DateTime<Utc>,
    pub trigger_high: f64,
    pub entry_time: DateTime<Utc>,
    pub entry_price: f64,
    pub outcome: Outcome,
}

impl Detection {
    #[inline]
    pub fn drop_from_high_pct(&self) -> f64 {
        drop_pct(self.trigger_high, self.entry_price)
    }

    pub fn into_event(self, instrument: &str) -> EntryEvent {
        EntryEvent {
            instrument: instrument.to_string(),
            entry_time: self.entry_time,
            entry_price: self.entry_price,
            trigger_time: self.trigger_time,
            trigger_high: self.trigger_high,
            drop_from_high_pct: self.drop_from_high_pct(),
            optimal_target_pct: self.outcome.optimal_target_pct,
            max_rally_pct: self.outcome.max_rally_pct,
            hold_duration: self.outcome.hold_duration,
            target_hit: self.outcome.target_hit,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    SeekPeak { cursor: usize },
    SeekEntry { peak_index: usize },
    SeekOutcome { peak_index: usize, entry_index: usize },
    Done,
}

/// Iterator over the detections in a candle series
pub struct Detections<'a, T: OHLC> {
    bars: &'a [T],
    config: ScanConfig,
    labeler: OutcomeLabeler,
    phase: Phase,
}

impl<'a, T: OHLC> Detections<'a, T> {
    fn new(bars: &'a [T], config: ScanConfig) -> Self {
        Self {
            bars,
            config,
            labeler: config.labeler(),
            phase: Phase::SeekPeak { cursor: 0 },
        }
    }
}

impl<'a, T: OHLC> Iterator for Detections<'a, T> {
    type Item = Detection;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.phase {
                Phase::Done => return None,

                Phase::SeekPeak { cursor } => {
                    self.phase = match find_peak(self.bars, cursor, self.config.peak_window.get()) {
                        Some(peak_index) => Phase::SeekEntry { peak_index },
                        None => Phase::Done,
                    };
                }

                Phase::SeekEntry { peak_index } => {
                    self.phase = match find_entry(self.bars, peak_index, self.config.min_drop_pct) {
                        EntrySearch::FoundEntry { entry_index } => Phase::SeekOutcome {
                            peak_index,
                            entry_index,
                        },
                        EntrySearch::PeakInvalidated { resume } => {
                            debug!(peak_index, "peak invalidated by a higher high");
                            Phase::SeekPeak { cursor: resume }
                        }
                        EntrySearch::NoEntry => Phase::Done,
                    };
                }

                Phase::SeekOutcome {
                    peak_index,
                    entry_index,
                } => {
                    self.phase = Phase::SeekPeak {
                        cursor: entry_index + 1,
                    };

                    let peak = &self.bars[peak_index];
                    let entry = &self.bars[entry_index];
                    let entry_price = entry.low();
                    let samples = forward_window(
                        self.bars,
                        entry_index,
                        entry_price,
                        self.config.lookahead_window.get(),
                        stop_price(entry_price, self.config.stop_loss_pct),
                    );

                    let Some(outcome) = self.labeler.label(entry_price, entry.timestamp(), &samples)
                    else {
                        debug!(entry_index, "entry has no forward candles, discarded");
                        continue;
                    };

                    return Some(Detection {
                        peak_index,
                        entry_index,
                        trigger_time: peak.timestamp(),
                        trigger_high: peak.high(),
                        entry_time: entry.timestamp(),
                        entry_price,
                        outcome,
                    });
                }
            }
        }
    }
}

// ============================================================
// SCANNER
// ============================================================

/// Validated scanner: configuration plus input checking
#[derive(Debug, Clone)]
pub struct PatternScanner {
    config: ScanConfig,
    validate_data: bool,
}

impl Default for PatternScanner {
    fn default() -> Self {
        Self {
            config: ScanConfig::default(),
            validate_data: true,
        }
    }
}

impl PatternScanner {
    pub fn new(config: ScanConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            validate_data: true,
        })
    }

    #[inline]
    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Lazily iterate detections. Input is not validated here.
    pub fn detections<'a, T: OHLC>(&self, bars: &'a [T]) -> Detections<'a, T> {
        Detections::new(bars, self.config)
    }

    /// Scan one series and tag every detection with `instrument`.
    pub fn scan<T: OHLC>(&self, instrument: &str, bars: &[T]) -> Result<Vec<EntryEvent>> {
        if self.validate_data {
            validate_bars(bars)?;
        }

        Ok(self
            .detections(bars)
            .map(|d| d.into_event(instrument))
            .collect())
    }

    /// Like [`scan`](Self::scan), but rejects series shorter than `min_candles`.
    pub fn scan_instrument<T: OHLC>(
        &self,
        instrument: &str,
        bars: &[T],
    ) -> Result<Vec<EntryEvent>> {
        if bars.len() < self.config.min_candles {
            return Err(AnalysisError::InsufficientData {
                need: self.config.min_candles,
                got: bars.len(),
            });
        }
        self.scan(instrument, bars)
    }
}

fn validate_bars<T: OHLC>(bars: &[T]) -> Result<()> {
    for (i, bar) in bars.iter().enumerate() {
        bar.validate().map_err(|e| match e {
            AnalysisError::InvalidCandle { reason, .. } => {
                AnalysisError::InvalidCandle { index: i, reason }
            }
            other => other,
        })?;
    }
    if let Some(i) = bars
        .windows(2)
        .position(|w| w[1].timestamp() <= w[0].timestamp())
    {
        return Err(AnalysisError::UnorderedTimestamps { index: i + 1 });
    }
    Ok(())
}

// ============================================================
// BUILDER
// ============================================================

/// Builder for [`PatternScanner`]; values are validated in [`build`](Self::build)
#[derive(Debug, Clone)]
pub struct ScannerBuilder {
    min_drop_pct: f64,
    peak_window: usize,
    lookahead_window: usize,
    stop_loss_pct: f64,
    target_percentile: f64,
    min_candles: usize,
    validate_data: bool,
}

impl Default for ScannerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ScannerBuilder {
    pub fn new() -> Self {
        Self::from_config(ScanConfig::default())
    }

    /// Start from an existing configuration
    pub fn from_config(config: ScanConfig) -> Self {
        Self {
            min_drop_pct: config.min_drop_pct.get(),
            peak_window: config.peak_window.get(),
            lookahead_window: config.lookahead_window.get(),
            stop_loss_pct: config.stop_loss_pct.get(),
            target_percentile: config.target_percentile.get(),
            min_candles: config.min_candles,
            validate_data: true,
        }
    }

    pub fn min_drop_pct(mut self, pct: f64) -> Self {
        self.min_drop_pct = pct;
        self
    }

    pub fn peak_window(mut self, candles: usize) -> Self {
        self.peak_window = candles;
        self
    }

    pub fn lookahead_window(mut self, candles: usize) -> Self {
        self.lookahead_window = candles;
        self
    }

    pub fn stop_loss_pct(mut self, pct: f64) -> Self {
        self.stop_loss_pct = pct;
        self
    }

    pub fn target_percentile(mut self, pct: f64) -> Self {
        self.target_percentile = pct;
        self
    }

    pub fn min_candles(mut self, candles: usize) -> Self {
        self.min_candles = candles;
        self
    }

    /// Enable/disable candle validation
    pub fn validate_data(mut self, enable: bool) -> Self {
        self.validate_data = enable;
        self
    }

    /// Build the scanner
    pub fn build(self) -> Result<PatternScanner> {
        let config = ScanConfig {
            min_drop_pct: Percent::new(self.min_drop_pct)?,
            peak_window: Period::new(self.peak_window)?,
            lookahead_window: Period::new(self.lookahead_window)?,
            stop_loss_pct: Percent::new(self.stop_loss_pct)?,
            target_percentile: Percent::new(self.target_percentile)?,
            min_candles: self.min_candles,
        };
        let mut scanner = PatternScanner::new(config)?;
        scanner.validate_data = self.validate_data;
        Ok(scanner)
    }
}

// ============================================================
// TESTS
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Candle;
    use chrono::{TimeDelta, TimeZone};

    fn bar(i: i64, high: f64, low: f64) -> Candle {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Candle::new(start + TimeDelta::minutes(5 * i), high, low, low)
    }

    fn series(hl: &[(f64, f64)]) -> Vec<Candle> {
        hl.iter()
            .enumerate()
            .map(|(i, &(h, l))| bar(i as i64, h, l))
            .collect()
    }

    #[test]
    fn test_find_peak_stops_at_first_lower_high() {
        let bars = series(&[
            (100.0, 99.0),
            (101.0, 100.0),
            (102.0, 101.0),
            (101.5, 100.0),
            (103.0, 102.0),
        ]);
        assert_eq!(find_peak(&bars, 0, 72), Some(2));
    }

    #[test]
    fn test_find_peak_equal_high_is_not_higher() {
        let bars = series(&[(100.0, 99.0), (100.0, 99.0), (101.0, 99.0)]);
        assert_eq!(find_peak(&bars, 0, 72), Some(0));
    }

    #[test]
    fn test_find_peak_window_clamped() {
        let rising: Vec<(f64, f64)> = (0..10).map(|i| (100.0 + i as f64, 99.0)).collect();
        let bars = series(&rising);
        // Window of 4 covers candles 0..4
        assert_eq!(find_peak(&bars, 0, 4), Some(3));
        // Window longer than the series is clamped to its end
        assert_eq!(find_peak(&bars, 0, 72), Some(9));
        assert_eq!(find_peak(&bars, 10, 72), None);
    }

    #[test]
    fn test_find_entry() {
        let min_drop = Percent::new_const(2.0);
        let bars = series(&[(110.0, 109.0), (109.0, 108.0), (108.5, 107.0)]);
        assert_eq!(
            find_entry(&bars, 0, min_drop),
            EntrySearch::FoundEntry { entry_index: 2 }
        );

        let bars = series(&[(110.0, 109.0), (109.0, 108.0), (111.0, 109.0), (105.0, 100.0)]);
        assert_eq!(
            find_entry(&bars, 0, min_drop),
            EntrySearch::PeakInvalidated { resume: 1 }
        );

        let bars = series(&[(110.0, 109.0), (109.0, 108.5)]);
        assert_eq!(find_entry(&bars, 0, min_drop), EntrySearch::NoEntry);
        assert_eq!(find_entry(&bars, 5, min_drop), EntrySearch::NoEntry);
    }

    #[test]
    fn test_find_entry_drop_wins_over_higher_high() {
        // Outside candle: spikes above the peak and drops through the threshold
        let bars = series(&[(110.0, 109.0), (111.0, 107.0)]);
        assert_eq!(
            find_entry(&bars, 0, Percent::new_const(2.0)),
            EntrySearch::FoundEntry { entry_index: 1 }
        );
    }

    #[test]
    fn test_forward_window_stops_on_breach() {
        let bars = series(&[(100.0, 100.0), (101.0, 99.0), (102.0, 94.0), (110.0, 100.0)]);
        let samples = forward_window(&bars, 0, 100.0, 288, 95.0);
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[1].index, 2);
        assert!((samples[1].rally_pct - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_forward_window_limited_by_lookahead() {
        let bars = series(&[(100.0, 100.0); 10]);
        assert_eq!(forward_window(&bars, 0, 100.0, 3, 95.0).len(), 3);
        assert_eq!(forward_window(&bars, 8, 100.0, 3, 95.0).len(), 1);
        assert!(forward_window(&bars, 9, 100.0, 3, 95.0).is_empty());
    }

    #[test]
    fn test_entry_on_last_candle_is_discarded() {
        let bars = series(&[(110.0, 109.0), (108.0, 107.0)]);
        let scanner = ScannerBuilder::new().min_candles(0).build().unwrap();
        assert!(scanner.scan("X", &bars).unwrap().is_empty());
    }

    #[test]
    fn test_builder_rejects_bad_values() {
        assert!(ScannerBuilder::new().min_drop_pct(0.0).build().is_err());
        assert!(ScannerBuilder::new().min_drop_pct(120.0).build().is_err());
        assert!(ScannerBuilder::new().stop_loss_pct(-1.0).build().is_err());
        assert!(ScannerBuilder::new().peak_window(0).build().is_err());
        assert!(ScannerBuilder::new().lookahead_window(0).build().is_err());
        assert!(ScannerBuilder::new().target_percentile(101.0).build().is_err());
        assert!(ScannerBuilder::new().build().is_ok());
    }

    #[test]
    fn test_validation_rejects_unordered_timestamps() {
        let mut bars = series(&[(100.0, 99.0), (101.0, 100.0), (102.0, 101.0)]);
        bars.swap(1, 2);
        let scanner = ScannerBuilder::new().min_candles(0).build().unwrap();
        assert!(matches!(
            scanner.scan("X", &bars),
            Err(AnalysisError::UnorderedTimestamps { index: 2 })
        ));

        let unchecked = ScannerBuilder::new()
            .min_candles(0)
            .validate_data(false)
            .build()
            .unwrap();
        assert!(unchecked.scan("X", &bars).is_ok());
    }

    #[test]
    fn test_validation_rejects_duplicate_timestamps() {
        // Peak and entry on the same timestamp would make the entry no later than its trigger
        let mut bars = series(&[(110.0, 109.0), (108.0, 107.0), (108.0, 107.5)]);
        bars[1].timestamp = bars[0].timestamp;
        let scanner = ScannerBuilder::new().min_candles(0).build().unwrap();
        assert!(matches!(
            scanner.scan("X", &bars),
            Err(AnalysisError::UnorderedTimestamps { index: 1 })
        ));
    }

    #[test]
    fn test_forward_window_spans_full_lookahead() {
        let bars = series(&[(100.0, 100.0); 400]);
        let samples = forward_window(&bars, 0, 100.0, 288, 95.0);
        assert_eq!(samples.len(), 288);
        assert_eq!(samples.last().map(|s| s.index), Some(288));
    }

    #[test]
    fn test_validation_reports_candle_index() {
        let bars = series(&[(100.0, 99.0), (98.0, 99.0)]);
        let scanner = ScannerBuilder::new().min_candles(0).build().unwrap();
        assert!(matches!(
            scanner.scan("X", &bars),
            Err(AnalysisError::InvalidCandle { index: 1, .. })
        ));
    }

    #[test]
    fn test_config_deserialize_with_defaults() {
        let config: ScanConfig =
            serde_json::from_str(r#"{"min_drop_pct": 3.0, "lookahead_window": 144}"#).unwrap();
        assert_eq!(config.min_drop_pct.get(), 3.0);
        assert_eq!(config.lookahead_window.get(), 144);
        assert_eq!(config.peak_window.get(), 72);
        assert_eq!(config.min_candles, 200);

        assert!(serde_json::from_str::<ScanConfig>(r#"{"peak_window": 0}"#).is_err());
    }
}
