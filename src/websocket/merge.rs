use std::collections::VecDeque;

use tracing::debug;

use crate::common::constants::MAX_LIVE_BARS_IN_MEMORY;
use crate::historical::structs::{Candle, SeriesKey, TimestampMS};
use crate::historical::utils::merge_candles;
use crate::websocket::kline::PushUpdate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// New bucket after the latest one
    Appended,
    /// Latest bucket overwritten in place
    Replaced,
    /// Older than the latest applied bucket
    DroppedLate,
    /// Topic belongs to another subscription
    DroppedForeignTopic,
}

/// In-memory live view of one series, fed by the shared push channel.
#[derive(Debug, Clone)]
pub struct RealtimeMergeEngine {
    series: SeriesKey,
    topic: String,
    bars: VecDeque<Candle>,
    capacity: usize,
}

impl RealtimeMergeEngine {
    pub fn new(series: SeriesKey, topic: String) -> Self {
        Self::with_capacity(series, topic, MAX_LIVE_BARS_IN_MEMORY)
    }

    pub fn with_capacity(series: SeriesKey, topic: String, capacity: usize) -> Self {
        Self {
            series,
            topic,
            bars: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn series(&self) -> &SeriesKey {
        &self.series
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Merge the persisted series into the live view. Live bars win on overlap
    /// since they are never older than what was persisted.
    pub fn seed(&mut self, persisted: &[Candle]) {
        let live: Vec<Candle> = self.bars.iter().copied().collect();
        let merged = merge_candles(persisted, &live);
        self.bars = merged.into_iter().collect();
        self.enforce_capacity();
    }

    pub fn apply(&mut self, update: &PushUpdate) -> MergeOutcome {
        if update.topic != self.topic {
            return MergeOutcome::DroppedForeignTopic;
        }

        let candle = update.candle;
        let outcome = match self.bars.back_mut() {
            Some(latest) if candle.open_time < latest.open_time => MergeOutcome::DroppedLate,
            Some(latest) if candle.open_time == latest.open_time => {
                *latest = candle;
                MergeOutcome::Replaced
            }
            _ => {
                self.bars.push_back(candle);
                self.enforce_capacity();
                MergeOutcome::Appended
            }
        };

        if outcome == MergeOutcome::DroppedLate {
            debug!(
                "⏪ Dropping late bar {} for {} (latest {:?})",
                candle.open_time,
                self.series,
                self.latest_open_time()
            );
        }
        outcome
    }

    pub fn latest(&self) -> Option<&Candle> {
        self.bars.back()
    }

    pub fn latest_open_time(&self) -> Option<TimestampMS> {
        self.bars.back().map(|c| c.open_time)
    }

    pub fn bars(&self) -> Vec<Candle> {
        self.bars.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    fn enforce_capacity(&mut self) {
        while self.bars.len() > self.capacity {
            self.bars.pop_front();
        }
    }
}
