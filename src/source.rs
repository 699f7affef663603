//! Candle retrieval interface.
//!
//! Market-data clients live outside this crate. They implement
//! [`CandleSource`] and hand back a complete, time-ordered series per call;
//! retries and rate limiting are their business.

use std::collections::{BTreeMap, HashMap};

use chrono::TimeDelta;

use crate::{Candle, OHLC};

/// Why a fetch produced no candles
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("network failure: {0}")]
    NetworkFailure(String),

    #[error("rate limited by provider")]
    RateLimited,

    #[error("provider returned no candles")]
    EmptyResult,
}

/// Blocking provider of candle series
pub trait CandleSource {
    /// Candles for `instrument` covering the last `lookback`, oldest first
    fn fetch_candles(
        &self,
        instrument: &str,
        lookback: TimeDelta,
    ) -> std::result::Result<Vec<Candle>, FetchError>;
}

impl<S: CandleSource + ?Sized> CandleSource for &S {
    fn fetch_candles(
        &self,
        instrument: &str,
        lookback: TimeDelta,
    ) -> std::result::Result<Vec<Candle>, FetchError> {
        (**self).fetch_candles(instrument, lookback)
    }
}

/// Trailing `lookback` of an already loaded series, measured from its last candle
fn trailing(
    candles: &[Candle],
    lookback: TimeDelta,
) -> std::result::Result<Vec<Candle>, FetchError> {
    let last = candles.last().ok_or(FetchError::EmptyResult)?;
    let from = last.timestamp() - lookback;
    Ok(candles
        .iter()
        .filter(|c| c.timestamp() >= from)
        .copied()
        .collect())
}

/// Candles held in memory, e.g. replayed from disk
impl CandleSource for HashMap<String, Vec<Candle>> {
    fn fetch_candles(
        &self,
        instrument: &str,
        lookback: TimeDelta,
    ) -> std::result::Result<Vec<Candle>, FetchError> {
        let candles = self.get(instrument).ok_or(FetchError::EmptyResult)?;
        trailing(candles, lookback)
    }
}

impl CandleSource for BTreeMap<String, Vec<Candle>> {
    fn fetch_candles(
        &self,
        instrument: &str,
        lookback: TimeDelta,
    ) -> std::result::Result<Vec<Candle>, FetchError> {
        let candles = self.get(instrument).ok_or(FetchError::EmptyResult)?;
        trailing(candles, lookback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn candles(n: i64) -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        (0..n)
            .map(|i| Candle::new(start + TimeDelta::hours(i), 101.0, 99.0, 100.0))
            .collect()
    }

    #[test]
    fn test_memory_source_trims_to_lookback() {
        let mut source: HashMap<String, Vec<Candle>> = HashMap::new();
        source.insert("SOLUSDT".to_string(), candles(48));

        let got = source.fetch_candles("SOLUSDT", TimeDelta::hours(10)).unwrap();
        assert_eq!(got.len(), 11);
        assert_eq!(got.last(), source["SOLUSDT"].last());
    }

    #[test]
    fn test_memory_source_missing_or_empty() {
        let mut source: BTreeMap<String, Vec<Candle>> = BTreeMap::new();
        source.insert("EMPTYUSDT".to_string(), Vec::new());

        assert_eq!(
            source.fetch_candles("SOLUSDT", TimeDelta::days(45)),
            Err(FetchError::EmptyResult)
        );
        assert_eq!(
            source.fetch_candles("EMPTYUSDT", TimeDelta::days(45)),
            Err(FetchError::EmptyResult)
        );
    }
}
