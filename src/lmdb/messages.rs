use serde::{Deserialize, Serialize};
use kameo::Reply;

use crate::historical::structs::{Candle, SeriesKey, TimestampMS};
use super::storage::SeriesRange;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LmdbActorMessage {
    /// Upsert candles by (series, open_time)
    PutCandles {
        series: SeriesKey,
        candles: Vec<Candle>,
    },
    /// Every stored candle of a series, ascending
    GetAll {
        series: SeriesKey,
    },
    /// Newest stored candle of a series
    GetLatest {
        series: SeriesKey,
    },
    /// Candles in an inclusive time range
    GetRange {
        series: SeriesKey,
        start: TimestampMS,
        end: TimestampMS,
        limit: Option<usize>,
    },
    /// Drop a whole series
    DeleteSeries {
        series: SeriesKey,
    },
    /// Trim to the newest `low_water` candles once more than `high_water` are stored
    Prune {
        series: SeriesKey,
        high_water: usize,
        low_water: usize,
    },
    /// Missing buckets between stored candles
    DetectGaps {
        series: SeriesKey,
    },
    GetSeriesStats {
        series: SeriesKey,
    },
    GetStorageStats,
}

/// Fire-and-forget messages for LmdbActor (Tell messages)
#[derive(Debug, Clone)]
pub enum LmdbActorTell {
    /// Persist live updates without waiting for the write
    StoreCandlesAsync {
        series: SeriesKey,
        candles: Vec<Candle>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, Reply)]
pub enum LmdbActorResponse {
    Stored {
        inserted: u64,
        replaced: u64,
    },
    Candles(Vec<Candle>),
    Latest(Option<Candle>),
    Deleted(usize),
    Pruned(usize),
    Gaps(Vec<(TimestampMS, TimestampMS)>),
    SeriesStats(Option<SeriesRange>),
    StorageStats {
        series: Vec<SeriesStats>,
        total_candles: u64,
        map_size_bytes: u64,
    },
    ErrorResponse(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesStats {
    pub series: String,
    pub candle_count: u64,
    pub earliest: Option<TimestampMS>,
    pub latest: Option<TimestampMS>,
}
