use std::collections::BTreeMap;

use chrono::DateTime;

use super::structs::{Candle, TimestampMS};

/// Human-readable UTC time for log lines
pub fn format_timestamp(timestamp_ms: TimestampMS) -> String {
    DateTime::from_timestamp_millis(timestamp_ms)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| format!("INVALID_TIME({})", timestamp_ms))
}

/// Union two bar sequences by open_time. Bars from `incoming` replace `existing`
/// bars with the same bucket. Output is ascending with no duplicate buckets.
pub fn merge_candles(existing: &[Candle], incoming: &[Candle]) -> Vec<Candle> {
    let mut by_time: BTreeMap<TimestampMS, Candle> = existing
        .iter()
        .map(|candle| (candle.open_time, *candle))
        .collect();

    for candle in incoming {
        by_time.insert(candle.open_time, *candle);
    }

    by_time.into_values().collect()
}

/// Ascending with strictly increasing open_time.
pub fn is_strictly_ascending(candles: &[Candle]) -> bool {
    candles.windows(2).all(|pair| pair[0].open_time < pair[1].open_time)
}
