//! Per-instrument aggregation and ranking
//!
//! Entry events are grouped by instrument, summarized over the events that
//! reached their target, scored, and cut to the top N. Entries from the
//! reporting day that belong to top-ranked instruments become live signals.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::scanner::{mean, median};
use crate::{AnalysisError, EntryEvent, Result};

// ============================================================
// CONFIGURATION
// ============================================================

/// How `success_rate` is computed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuccessRateMode {
    /// Mean of `target_hit` over the events that hit. Always 1.0; kept so
    /// scores stay comparable with earlier reports.
    #[default]
    HitOnly,
    /// Hits divided by every event of the instrument
    AllEvents,
}

/// Which calendar day counts as "today"
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportingPeriod {
    /// Day of the newest scanned candle. Without candle data, the latest day
    /// on which any event was entered.
    #[default]
    LatestDay,
    Day(NaiveDate),
}

/// Weights of the composite score
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    /// Weight of `ln(1 + total_entries)`
    pub entries: f64,
    /// Weight of the mean optimal target
    pub target: f64,
    /// Weight of `hold_reference_minutes / (median_hold_minutes + 1)`
    pub speed: f64,
    /// Weight of the success rate
    pub reliability: f64,
    pub hold_reference_minutes: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            entries: 0.25,
            target: 0.35,
            speed: 0.25,
            reliability: 0.15,
            hold_reference_minutes: 600.0,
        }
    }
}

impl ScoreWeights {
    pub fn score(
        &self,
        total_entries: usize,
        optimal_tp: f64,
        median_hold_minutes: f64,
        success_rate: f64,
    ) -> f64 {
        self.entries * (total_entries as f64).ln_1p()
            + self.target * optimal_tp
            + self.speed * (self.hold_reference_minutes / (median_hold_minutes + 1.0))
            + self.reliability * success_rate
    }

    pub fn validate(&self) -> Result<()> {
        let weights = [
            ("entries", self.entries),
            ("target", self.target),
            ("speed", self.speed),
            ("reliability", self.reliability),
            ("hold_reference_minutes", self.hold_reference_minutes),
        ];
        for (name, w) in weights {
            if !w.is_finite() || w < 0.0 {
                return Err(AnalysisError::InvalidConfig(format!(
                    "score weight {name} must be finite and >= 0, got {w}"
                )));
            }
        }
        if self.hold_reference_minutes <= 0.0 {
            return Err(AnalysisError::InvalidConfig(
                "hold_reference_minutes must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Ranking configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    pub top_n: usize,
    pub weights: ScoreWeights,
    pub success_rate: SuccessRateMode,
    pub period: ReportingPeriod,
    /// Zone in which calendar days are cut
    pub timezone: Tz,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            top_n: 10,
            weights: ScoreWeights::default(),
            success_rate: SuccessRateMode::default(),
            period: ReportingPeriod::default(),
            timezone: Tz::UTC,
        }
    }
}

impl RankingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.top_n == 0 {
            return Err(AnalysisError::InvalidConfig("top_n must be > 0".to_string()));
        }
        self.weights.validate()
    }
}

// ============================================================
// OUTPUT ROWS
// ============================================================

/// Aggregate statistics of one instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentSummary {
    pub instrument: String,
    /// Number of events that reached their target
    pub total_entries: usize,
    pub median_hold_minutes: f64,
    pub success_rate: f64,
    /// Mean optimal target over the completed events
    pub optimal_tp_coin: f64,
    /// Largest forward rally over the completed events
    pub max_rally_coin: f64,
    /// Events of any outcome entered during the reporting day
    pub entries_today: usize,
    pub score: f64,
}

/// A reporting-day entry of a top-ranked instrument
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiveSignal {
    #[serde(flatten)]
    pub event: EntryEvent,
    /// The instrument's median hold time
    pub est_hold_minutes: f64,
}

/// Ranking plus live signals
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Ranking {
    pub period: Option<NaiveDate>,
    pub summaries: Vec<InstrumentSummary>,
    pub live_signals: Vec<LiveSignal>,
}

// ============================================================
// PERIOD
// ============================================================

/// Calendar day of `time` in `tz`
#[inline]
pub fn local_day(time: DateTime<Utc>, tz: Tz) -> NaiveDate {
    time.with_timezone(&tz).date_naive()
}

/// Resolve the reporting day.
///
/// `data_end` is the timestamp of the newest candle that was scanned. `None`
/// when the period is the latest day and there is neither data nor an event.
pub fn resolve_period(
    events: &[EntryEvent],
    period: ReportingPeriod,
    tz: Tz,
    data_end: Option<DateTime<Utc>>,
) -> Option<NaiveDate> {
    match period {
        ReportingPeriod::Day(day) => Some(day),
        ReportingPeriod::LatestDay => data_end
            .map(|t| local_day(t, tz))
            .or_else(|| events.iter().map(|e| local_day(e.entry_time, tz)).max()),
    }
}

// ============================================================
// AGGREGATION
// ============================================================

#[derive(Default)]
struct Group<'a> {
    completed: Vec<&'a EntryEvent>,
    all: usize,
    today: usize,
}

/// Summarize every instrument with at least one completed event, best score first.
///
/// `day` is the reporting day used for `entries_today`.
pub fn summarize(
    events: &[EntryEvent],
    config: &RankingConfig,
    day: Option<NaiveDate>,
) -> Vec<InstrumentSummary> {
    let mut groups: BTreeMap<&str, Group> = BTreeMap::new();
    for event in events {
        let group = groups.entry(event.instrument.as_str()).or_default();
        group.all += 1;
        if day == Some(local_day(event.entry_time, config.timezone)) {
            group.today += 1;
        }
        if event.target_hit {
            group.completed.push(event);
        }
    }

    let mut summaries: Vec<InstrumentSummary> = groups
        .into_iter()
        .filter_map(|(instrument, group)| summarize_group(instrument, &group, config))
        .collect();

    summaries.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.instrument.cmp(&b.instrument))
    });
    summaries
}

fn summarize_group(
    instrument: &str,
    group: &Group<'_>,
    config: &RankingConfig,
) -> Option<InstrumentSummary> {
    if group.completed.is_empty() {
        return None;
    }

    // Undefined hold durations never reach the median
    let holds: Vec<f64> = group.completed.iter().filter_map(|e| e.hold_minutes()).collect();
    let Some(median_hold_minutes) = median(&holds) else {
        debug!(instrument, "completed events carry no hold duration, skipped");
        return None;
    };

    let targets: Vec<f64> = group.completed.iter().map(|e| e.optimal_target_pct).collect();
    let optimal_tp_coin = mean(&targets)?;
    let max_rally_coin = group
        .completed
        .iter()
        .map(|e| e.max_rally_pct)
        .fold(f64::NEG_INFINITY, f64::max);

    let total_entries = group.completed.len();
    let success_rate = match config.success_rate {
        SuccessRateMode::HitOnly => {
            let hits: Vec<f64> = group
                .completed
                .iter()
                .map(|e| if e.target_hit { 1.0 } else { 0.0 })
                .collect();
            mean(&hits)?
        }
        SuccessRateMode::AllEvents => total_entries as f64 / group.all as f64,
    };

    let score = config
        .weights
        .score(total_entries, optimal_tp_coin, median_hold_minutes, success_rate);

    Some(InstrumentSummary {
        instrument: instrument.to_string(),
        total_entries,
        median_hold_minutes,
        success_rate,
        optimal_tp_coin,
        max_rally_coin,
        entries_today: group.today,
        score,
    })
}

/// Entries of `day` whose instrument is in `ranking`, newest first
pub fn live_signals(
    events: &[EntryEvent],
    ranking: &[InstrumentSummary],
    day: NaiveDate,
    tz: Tz,
) -> Vec<LiveSignal> {
    let hold_by_instrument: BTreeMap<&str, f64> = ranking
        .iter()
        .map(|s| (s.instrument.as_str(), s.median_hold_minutes))
        .collect();

    let mut signals: Vec<LiveSignal> = events
        .iter()
        .filter(|e| local_day(e.entry_time, tz) == day)
        .filter_map(|e| {
            hold_by_instrument
                .get(e.instrument.as_str())
                .map(|&est_hold_minutes| LiveSignal {
                    event: e.clone(),
                    est_hold_minutes,
                })
        })
        .collect();

    signals.sort_by(|a, b| {
        b.event
            .entry_time
            .cmp(&a.event.entry_time)
            .then_with(|| a.event.instrument.cmp(&b.event.instrument))
    });
    signals
}

/// Rank instruments and extract live signals.
///
/// `data_end` is the newest candle timestamp across the scanned instruments.
/// With no completed events anywhere the result is empty, not an error.
pub fn rank(
    events: &[EntryEvent],
    config: &RankingConfig,
    data_end: Option<DateTime<Utc>>,
) -> Ranking {
    let period = resolve_period(events, config.period, config.timezone, data_end);

    let mut summaries = summarize(events, config, period);
    if summaries.is_empty() {
        info!("no completed events, ranking skipped");
        return Ranking {
            period,
            ..Ranking::default()
        };
    }
    summaries.truncate(config.top_n);

    let live_signals = period
        .map(|day| live_signals(events, &summaries, day, config.timezone))
        .unwrap_or_default();

    Ranking {
        period,
        summaries,
        live_signals,
    }
}
