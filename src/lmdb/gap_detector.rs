use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::historical::structs::{Candle, Interval, TimestampMS};

pub struct GapDetector {
    interval: Interval,
}

impl GapDetector {
    pub fn new(interval: Interval) -> Self {
        Self { interval }
    }

    /// Missing bucket ranges `[first_missing, next_present)` between consecutive bars.
    pub fn detect_internal_gaps(&self, sorted_candles: &[Candle]) -> Vec<(TimestampMS, TimestampMS)> {
        let interval_ms = self.interval.duration_ms();
        let mut gaps = Vec::new();

        for window in sorted_candles.windows(2) {
            let expected_next_open_time = window[0].open_time + interval_ms;
            if window[1].open_time > expected_next_open_time {
                debug!(
                    "Internal gap detected: expected_next_open={}, actual_next_open={}",
                    expected_next_open_time, window[1].open_time
                );
                gaps.push((expected_next_open_time, window[1].open_time));
            }
        }

        gaps
    }

    pub fn analyze_gaps(&self, gaps: &[(TimestampMS, TimestampMS)], series: &str) -> GapAnalysis {
        if gaps.is_empty() {
            return GapAnalysis::default();
        }

        let total_missing_time_ms: i64 = gaps.iter().map(|(start, end)| end - start).sum();
        let largest_gap = gaps
            .iter()
            .max_by_key(|(start, end)| end - start)
            .copied();

        let analysis = GapAnalysis {
            series: series.to_string(),
            gap_count: gaps.len(),
            total_missing_candles: (total_missing_time_ms / self.interval.duration_ms()) as u64,
            largest_gap,
        };

        warn!(
            "🕳️ Gap analysis for {}: {} gaps, {} missing candles",
            series, analysis.gap_count, analysis.total_missing_candles
        );

        analysis
    }

    /// Contiguous window of `target_count` buckets ending at the bucket containing `now`.
    /// Missing buckets become flat zero-volume bars at the last known close. Before the first
    /// real bar the anchor is the midpoint of the second-newest bar (or the only bar's close).
    pub fn hydrate(&self, candles: &[Candle], now: TimestampMS, target_count: usize) -> Vec<Candle> {
        if candles.is_empty() || target_count == 0 {
            return Vec::new();
        }

        let interval_ms = self.interval.duration_ms();
        let end_time = self.interval.align(now);
        let start_time = end_time - interval_ms * (target_count as i64 - 1);

        let by_time: FxHashMap<TimestampMS, &Candle> =
            candles.iter().map(|candle| (candle.open_time, candle)).collect();

        let mut sorted: Vec<&Candle> = candles.iter().collect();
        sorted.sort_by_key(|candle| candle.open_time);

        let mut last_close = match sorted.len() {
            1 => sorted[0].close,
            n => (sorted[n - 2].open + sorted[n - 2].close) / 2.0,
        };

        let mut filled = Vec::with_capacity(target_count);
        for step in 0..target_count as i64 {
            let open_time = start_time + step * interval_ms;
            match by_time.get(&open_time) {
                Some(candle) => {
                    last_close = candle.close;
                    filled.push(**candle);
                }
                None => filled.push(Candle::flat(open_time, last_close)),
            }
        }

        filled
    }
}

#[derive(Debug, Default, Clone)]
pub struct GapAnalysis {
    pub series: String,
    pub gap_count: usize,
    pub total_missing_candles: u64,
    pub largest_gap: Option<(TimestampMS, TimestampMS)>,
}
