//! # peakdrop - peak → drop → rebound scanner
//!
//! Detects the "local peak → minimum drop → rebound" reversal in historical
//! candles, labels every instance with a take-profit target derived from its
//! own forward rally distribution, and ranks instruments by how reliably and
//! how quickly those targets were reached.
//!
//! ## Quick Start
//!
//! ```rust
//! use chrono::{TimeDelta, TimeZone, Utc};
//! use peakdrop::prelude::*;
//!
//! let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
//! let candles: Vec<Candle> = (0..300)
//!     .map(|i| Candle::new(start + TimeDelta::minutes(5 * i), 100.0, 100.0, 100.0))
//!     .collect();
//!
//! let scanner = ScannerBuilder::new().min_drop_pct(2.0).build().unwrap();
//!
//! // A flat market never drops far enough to qualify an entry
//! let events = scanner.scan("SOLUSDT", &candles).unwrap();
//! assert!(events.is_empty());
//! ```

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub mod params;
pub mod ranking;
pub mod scanner;
pub mod source;

pub mod prelude {
    pub use crate::{
        // Parameters
        params::{get_percent, get_period, ParamMeta, ParamType},
        // Ranking
        ranking::{
            InstrumentSummary, LiveSignal, Ranking, RankingConfig, ReportingPeriod, ScoreWeights,
            SuccessRateMode,
        },
        // Scanner
        scanner::{
            Detection, Detections, EntrySearch, Outcome, OutcomeLabeler, PatternScanner,
            RallySample, ScanConfig, ScannerBuilder,
        },
        // Data source
        source::{CandleSource, FetchError},
        // Parallel
        scan_parallel,
        // Errors
        AnalysisError,
        // Pipeline
        AnalysisReport,
        Analyzer,
        // Types
        Candle,
        EntryEvent,
        InstrumentScan,
        OHLCExt,
        Percent,
        Period,
        Result,
        SkippedInstrument,
        OHLC,
    };
}

// ============================================================
// ERRORS
// ============================================================

pub type Result<T> = std::result::Result<T, AnalysisError>;

/// Errors that can occur while scanning or configuring the analysis
#[derive(Debug, Clone, thiserror::Error)]
pub enum AnalysisError {
    #[error("Invalid value: {0}")]
    InvalidValue(&'static str),

    #[error("{field} = {value} out of range [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Insufficient data: need {need} candles, got {got}")]
    InsufficientData { need: usize, got: usize },

    #[error("Invalid candle at index {index}: {reason}")]
    InvalidCandle { index: usize, reason: &'static str },

    #[error("Candle at index {index} is not newer than the one before it")]
    UnorderedTimestamps { index: usize },

    #[error("Fetching {instrument} failed: {source}")]
    Fetch {
        instrument: String,
        #[source]
        source: source::FetchError,
    },
}

// ============================================================
// VALIDATED TYPES
// ============================================================

/// Percentage in range 0.0..=100.0
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Percent(f64);

impl Percent {
    /// Create a new Percent, validating the value is in [0.0, 100.0]
    pub fn new(value: f64) -> Result<Self> {
        if value.is_nan() || value.is_infinite() {
            return Err(AnalysisError::InvalidValue(
                "Percent cannot be NaN or infinite",
            ));
        }
        if !(0.0..=100.0).contains(&value) {
            return Err(AnalysisError::OutOfRange {
                field: "Percent",
                value,
                min: 0.0,
                max: 100.0,
            });
        }
        Ok(Self(value))
    }

    /// Create a Percent from a compile-time constant (library internal use)
    #[doc(hidden)]
    pub const fn new_const(value: f64) -> Self {
        Self(value)
    }

    #[inline]
    pub fn get(self) -> f64 {
        self.0
    }

    /// The percentage as a fraction (2.0 -> 0.02)
    #[inline]
    pub fn fraction(self) -> f64 {
        self.0 / 100.0
    }
}

impl Serialize for Percent {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        self.0.serialize(s)
    }
}

impl<'de> Deserialize<'de> for Percent {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let value = f64::deserialize(d)?;
        Percent::new(value).map_err(serde::de::Error::custom)
    }
}

/// Candle count (must be > 0)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Period(usize);

impl Period {
    /// Create a new Period, validating value is > 0
    pub fn new(value: usize) -> Result<Self> {
        if value == 0 {
            return Err(AnalysisError::InvalidValue("Period must be > 0"));
        }
        Ok(Self(value))
    }

    #[doc(hidden)]
    pub const fn new_const(value: usize) -> Self {
        Self(value)
    }

    #[inline]
    pub fn get(self) -> usize {
        self.0
    }
}

impl Serialize for Period {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        self.0.serialize(s)
    }
}

impl<'de> Deserialize<'de> for Period {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let value = usize::deserialize(d)?;
        Period::new(value).map_err(serde::de::Error::custom)
    }
}

// ============================================================
// CANDLE TRAITS
// ============================================================

/// Core candle trait: the fields the scanner reads
pub trait OHLC {
    fn timestamp(&self) -> DateTime<Utc>;
    fn high(&self) -> f64;
    fn low(&self) -> f64;
    fn close(&self) -> f64;
}

/// Extension trait with computed properties for candle data
pub trait OHLCExt: OHLC {
    /// Gain of this candle's high over `entry_price`, in percent
    #[inline]
    fn rally_pct_from(&self, entry_price: f64) -> f64 {
        scanner::rally_pct(entry_price, self.high())
    }

    /// True when the low trades at or through `stop_price`
    #[inline]
    fn breaches(&self, stop_price: f64) -> bool {
        self.low() <= stop_price
    }

    /// Validate candle consistency
    fn validate(&self) -> Result<()> {
        if self.high().is_nan() || self.low().is_nan() || self.close().is_nan() {
            return Err(AnalysisError::InvalidCandle {
                index: 0,
                reason: "NaN in candle",
            });
        }
        if self.high().is_infinite() || self.low().is_infinite() || self.close().is_infinite() {
            return Err(AnalysisError::InvalidCandle {
                index: 0,
                reason: "Infinite value in candle",
            });
        }
        if self.high() < self.low() {
            return Err(AnalysisError::InvalidCandle {
                index: 0,
                reason: "high < low",
            });
        }
        if self.low() <= 0.0 {
            return Err(AnalysisError::InvalidCandle {
                index: 0,
                reason: "non-positive price",
            });
        }
        Ok(())
    }
}

impl<T: OHLC> OHLCExt for T {}

/// Plain time-stamped candle record, as delivered by a [`source::CandleSource`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl Candle {
    pub fn new(timestamp: DateTime<Utc>, high: f64, low: f64, close: f64) -> Self {
        Self {
            timestamp,
            high,
            low,
            close,
        }
    }
}

impl OHLC for Candle {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    fn high(&self) -> f64 {
        self.high
    }

    fn low(&self) -> f64 {
        self.low
    }

    fn close(&self) -> f64 {
        self.close
    }
}

// ============================================================
// ENTRY EVENT - one labeled reversal instance
// ============================================================

/// A detected peak → drop entry together with its forward outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryEvent {
    pub instrument: String,
    pub entry_time: DateTime<Utc>,
    pub entry_price: f64,
    /// Timestamp of the candle that made the trigger high
    pub trigger_time: DateTime<Utc>,
    pub trigger_high: f64,
    pub drop_from_high_pct: f64,
    /// Target percentile of this entry's own forward rally distribution
    pub optimal_target_pct: f64,
    pub max_rally_pct: f64,
    /// Time from entry until the optimal target first traded; `None` if it never did
    #[serde(rename = "hold_minutes", with = "hold_minutes")]
    pub hold_duration: Option<TimeDelta>,
    pub target_hit: bool,
}

impl EntryEvent {
    /// Hold duration in fractional minutes
    pub fn hold_minutes(&self) -> Option<f64> {
        self.hold_duration.map(minutes)
    }
}

#[inline]
pub(crate) fn minutes(duration: TimeDelta) -> f64 {
    duration.num_milliseconds() as f64 / 60_000.0
}

/// Serializes an optional hold duration as optional minutes.
mod hold_minutes {
    use chrono::TimeDelta;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<TimeDelta>,
        s: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        match value {
            Some(duration) => s.serialize_some(&super::minutes(*duration)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> std::result::Result<Option<TimeDelta>, D::Error> {
        let minutes = Option::<f64>::deserialize(d)?;
        Ok(minutes.map(|m| TimeDelta::milliseconds((m * 60_000.0).round() as i64)))
    }
}

// ============================================================
// PARALLEL SCANNING
// ============================================================

use rayon::prelude::*;
use scanner::PatternScanner;

/// Result of scanning a single instrument
#[derive(Debug)]
pub struct InstrumentScan {
    pub instrument: String,
    pub events: Vec<EntryEvent>,
    /// Timestamp of the newest candle scanned
    pub last_candle: Option<DateTime<Utc>>,
}

/// Instrument left out of the analysis, with the reason
#[derive(Debug)]
pub struct SkippedInstrument {
    pub instrument: String,
    pub error: AnalysisError,
}

/// Parallel scanning of multiple instruments.
///
/// Results keep the input order. Instruments below the configured minimum
/// candle count, or with invalid data, end up in the skipped list.
pub fn scan_parallel<'a, T, I>(
    scanner: &PatternScanner,
    instruments: I,
) -> (Vec<InstrumentScan>, Vec<SkippedInstrument>)
where
    T: OHLC + Sync + 'a,
    I: IntoParallelIterator<Item = (&'a str, &'a [T])>,
{
    let results: Vec<_> = instruments
        .into_par_iter()
        .map(|(instrument, bars)| {
            scanner
                .scan_instrument(instrument, bars)
                .map(|events| InstrumentScan {
                    instrument: instrument.to_string(),
                    events,
                    last_candle: bars.last().map(|b| b.timestamp()),
                })
                .map_err(|error| SkippedInstrument {
                    instrument: instrument.to_string(),
                    error,
                })
        })
        .collect();

    let mut successes = Vec::new();
    let mut skipped = Vec::new();

    for result in results {
        match result {
            Ok(r) => successes.push(r),
            Err(e) => skipped.push(e),
        }
    }

    (successes, skipped)
}

// ============================================================
// PIPELINE
// ============================================================

/// The three output tables of one analysis run
#[derive(Debug, Default, Serialize)]
pub struct AnalysisReport {
    /// Every entry event across all instruments, in instrument order
    pub events: Vec<EntryEvent>,
    /// Top instruments by score
    pub ranking: Vec<ranking::InstrumentSummary>,
    /// Current-period entries of top-ranked instruments, newest first
    pub live_signals: Vec<ranking::LiveSignal>,
    /// Reporting day the live signals were taken from
    pub period: Option<chrono::NaiveDate>,
    #[serde(skip)]
    pub skipped: Vec<SkippedInstrument>,
}

/// Scan → aggregate → rank pipeline
#[derive(Debug, Clone)]
pub struct Analyzer {
    scanner: PatternScanner,
    ranking: ranking::RankingConfig,
}

impl Analyzer {
    pub fn new(scanner: PatternScanner, ranking: ranking::RankingConfig) -> Result<Self> {
        ranking.validate()?;
        Ok(Self { scanner, ranking })
    }

    pub fn scanner(&self) -> &PatternScanner {
        &self.scanner
    }

    pub fn ranking_config(&self) -> &ranking::RankingConfig {
        &self.ranking
    }

    /// Run over candle series already in memory
    pub fn run<'a, T, I>(&self, instruments: I) -> AnalysisReport
    where
        T: OHLC + Sync + 'a,
        I: IntoParallelIterator<Item = (&'a str, &'a [T])>,
    {
        let (scans, skipped) = scan_parallel(&self.scanner, instruments);
        self.assemble(scans, skipped)
    }

    /// Fetch each instrument from `source` in turn, then scan and rank.
    ///
    /// Fetches are sequential so the source can pace itself against its
    /// upstream service.
    pub fn run_with_source<S: source::CandleSource + ?Sized>(
        &self,
        source: &S,
        instruments: &[&str],
        lookback: TimeDelta,
    ) -> AnalysisReport {
        let mut scans = Vec::new();
        let mut skipped = Vec::new();

        for (n, &instrument) in instruments.iter().enumerate() {
            info!(instrument, progress = n + 1, total = instruments.len(), "fetching candles");
            let result = source
                .fetch_candles(instrument, lookback)
                .map_err(|source| AnalysisError::Fetch {
                    instrument: instrument.to_string(),
                    source,
                })
                .and_then(|candles| {
                    let events = self.scanner.scan_instrument(instrument, &candles)?;
                    Ok((events, candles.last().map(|c| c.timestamp())))
                });

            match result {
                Ok((events, last_candle)) => scans.push(InstrumentScan {
                    instrument: instrument.to_string(),
                    events,
                    last_candle,
                }),
                Err(error) => skipped.push(SkippedInstrument {
                    instrument: instrument.to_string(),
                    error,
                }),
            }
        }

        self.assemble(scans, skipped)
    }

    fn assemble(
        &self,
        scans: Vec<InstrumentScan>,
        skipped: Vec<SkippedInstrument>,
    ) -> AnalysisReport {
        for s in &skipped {
            warn!(instrument = %s.instrument, error = %s.error, "instrument skipped");
        }

        // Skipped instruments do not move the reporting day
        let data_end = scans.iter().filter_map(|s| s.last_candle).max();

        let events: Vec<EntryEvent> = scans
            .into_iter()
            .inspect(|s| {
                info!(instrument = %s.instrument, entries = s.events.len(), "scan complete")
            })
            .flat_map(|s| s.events)
            .collect();

        let ranked = ranking::rank(&events, &self.ranking, data_end);
        info!(
            entries = events.len(),
            ranked = ranked.summaries.len(),
            live = ranked.live_signals.len(),
            skipped = skipped.len(),
            "analysis complete"
        );

        AnalysisReport {
            events,
            ranking: ranked.summaries,
            live_signals: ranked.live_signals,
            period: ranked.period,
            skipped,
        }
    }
}

// ============================================================
// TESTS
// ============================================================
