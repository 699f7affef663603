//! End-to-end runs of the scan → aggregate → rank pipeline.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, TimeDelta, TimeZone, Utc};
use peakdrop::prelude::*;

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap()
}

/// 5-minute candles from (high, low) pairs
fn candles(hl: &[(f64, f64)]) -> Vec<Candle> {
    hl.iter()
        .enumerate()
        .map(|(i, &(h, l))| {
            Candle::new(start() + TimeDelta::minutes(5 * i as i64), h, l, (h + l) / 2.0)
        })
        .collect()
}

/// One reversal: peak at 100, entry at 97.5, then a rise to `rally_to`
/// over `climb` candles, padded flat to `len`
fn reversal(rally_to: f64, climb: usize, len: usize) -> Vec<Candle> {
    let mut hl = vec![(100.0, 99.5), (98.0, 97.5)];
    for k in 1..=climb {
        let h = 97.5 + (rally_to - 97.5) * k as f64 / climb as f64;
        hl.push((h, h - 0.1));
    }
    let last = hl[hl.len() - 1];
    hl.resize(len, (last.0, last.0 - 0.1));
    candles(&hl)
}

fn flat(len: usize) -> Vec<Candle> {
    candles(&vec![(100.0, 100.0); len])
}

fn analyzer() -> Analyzer {
    let scanner = ScannerBuilder::new().min_candles(20).build().unwrap();
    Analyzer::new(scanner, RankingConfig::default()).unwrap()
}

struct FailingSource {
    inner: HashMap<String, Vec<Candle>>,
    failing: &'static str,
}

impl CandleSource for FailingSource {
    fn fetch_candles(
        &self,
        instrument: &str,
        lookback: TimeDelta,
    ) -> std::result::Result<Vec<Candle>, FetchError> {
        if instrument == self.failing {
            return Err(FetchError::RateLimited);
        }
        self.inner.fetch_candles(instrument, lookback)
    }
}

#[test]
fn test_fast_instrument_outranks_slow_one() {
    let fast = reversal(110.0, 4, 40);
    let slow = reversal(103.0, 30, 40);
    let instruments: Vec<(&str, &[Candle])> = vec![("SLOWUSDT", &slow), ("FASTUSDT", &fast)];

    let report = analyzer().run(instruments);

    assert_eq!(report.ranking.len(), 2);
    assert_eq!(report.ranking[0].instrument, "FASTUSDT");
    assert_eq!(report.ranking[1].instrument, "SLOWUSDT");
    assert!(report.ranking[0].optimal_tp_coin > report.ranking[1].optimal_tp_coin);
    assert!(report.ranking[0].median_hold_minutes < report.ranking[1].median_hold_minutes);

    // Both entries happened on the reporting day, newest first then by name
    assert_eq!(report.period, Some(NaiveDate::from_ymd_opt(2024, 7, 1).unwrap()));
    assert_eq!(report.live_signals.len(), 2);
    assert_eq!(report.live_signals[0].event.instrument, "FASTUSDT");
    assert_eq!(
        report.live_signals[0].est_hold_minutes,
        report.ranking[0].median_hold_minutes
    );
}

#[test]
fn test_run_with_source_skips_failures() {
    let mut inner = HashMap::new();
    inner.insert("SOLUSDT".to_string(), reversal(108.0, 6, 60));
    inner.insert("XRPUSDT".to_string(), flat(60));
    inner.insert("SHORTUSDT".to_string(), flat(5));
    let source = FailingSource {
        inner,
        failing: "DOGEUSDT",
    };

    let report = analyzer().run_with_source(
        &source,
        &["SOLUSDT", "XRPUSDT", "SHORTUSDT", "DOGEUSDT", "MISSINGUSDT"],
        TimeDelta::days(45),
    );

    assert_eq!(report.events.len(), 1);
    assert_eq!(report.ranking.len(), 1);
    assert_eq!(report.ranking[0].instrument, "SOLUSDT");

    let skipped: Vec<&str> = report.skipped.iter().map(|s| s.instrument.as_str()).collect();
    assert_eq!(skipped, ["SHORTUSDT", "DOGEUSDT", "MISSINGUSDT"]);
    assert!(matches!(
        report.skipped[0].error,
        AnalysisError::InsufficientData { need: 20, got: 5 }
    ));
    assert!(matches!(
        report.skipped[1].error,
        AnalysisError::Fetch {
            source: FetchError::RateLimited,
            ..
        }
    ));
    assert!(matches!(
        report.skipped[2].error,
        AnalysisError::Fetch {
            source: FetchError::EmptyResult,
            ..
        }
    ));
}

#[test]
fn test_lookback_trims_history() {
    // Reversal in the first hour, then 3 flat days; a 1-day lookback misses it
    let mut series = reversal(108.0, 6, 12);
    let last = series[series.len() - 1].timestamp;
    series.extend(
        (1..=864).map(|i| Candle::new(last + TimeDelta::minutes(5 * i), 108.0, 107.9, 107.95)),
    );

    let mut source = HashMap::new();
    source.insert("SOLUSDT".to_string(), series);

    let full = analyzer().run_with_source(&source, &["SOLUSDT"], TimeDelta::days(45));
    assert_eq!(full.events.len(), 1);

    let recent = analyzer().run_with_source(&source, &["SOLUSDT"], TimeDelta::days(1));
    assert!(recent.events.is_empty());
    assert!(recent.ranking.is_empty());
}

#[test]
fn test_old_entry_is_not_a_live_signal() {
    // Entry on July 1st, then flat candles through July 4th
    let mut series = reversal(108.0, 6, 12);
    let last = series[series.len() - 1].timestamp;
    series.extend(
        (1..=864).map(|i| Candle::new(last + TimeDelta::minutes(5 * i), 108.0, 107.9, 107.95)),
    );
    let flat_tail = flat(30);

    let instruments: Vec<(&str, &[Candle])> = vec![("SOLUSDT", &series), ("XRPUSDT", &flat_tail)];
    let report = analyzer().run(instruments);

    assert_eq!(report.events.len(), 1);
    assert_eq!(report.period, Some(NaiveDate::from_ymd_opt(2024, 7, 4).unwrap()));
    assert_eq!(report.ranking.len(), 1);
    assert_eq!(report.ranking[0].entries_today, 0);
    assert!(report.live_signals.is_empty());
}

#[test]
fn test_report_serializes_three_tables() {
    let sol = reversal(108.0, 6, 40);
    let report = analyzer().run(vec![("SOLUSDT", sol.as_slice())]);

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["events"].as_array().unwrap().len(), 1);
    assert_eq!(json["ranking"][0]["instrument"], "SOLUSDT");
    assert_eq!(json["live_signals"][0]["instrument"], "SOLUSDT");
    assert!(json["live_signals"][0]["est_hold_minutes"].is_number());
    assert_eq!(json["period"], "2024-07-01");
    assert!(json.get("skipped").is_none());
}

#[test]
fn test_invalid_ranking_config_is_rejected() {
    let config = RankingConfig {
        top_n: 0,
        ..RankingConfig::default()
    };
    assert!(Analyzer::new(PatternScanner::default(), config).is_err());
}
