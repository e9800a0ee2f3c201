use std::ops::Bound;
use std::path::Path;

use heed::types::{SerdeBincode, Str};
use heed::{Database, Env, RwTxn};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::common::constants::*;
use crate::common::error_utils::ErrorContext;
use crate::common::lmdb_config::open_lmdb_environment;
use crate::historical::errors::HistoricalDataError;
use crate::historical::structs::{Candle, SeriesKey, TimestampMS};

/// Secondary index entry kept per series alongside the candle table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesRange {
    pub count: u64,
    pub earliest: TimestampMS,
    pub latest: TimestampMS,
}

#[derive(Debug, Clone)]
pub struct StorageStatsInternal {
    pub series: Vec<SeriesStatsInternal>,
    pub total_candles: u64,
    pub map_size_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct SeriesStatsInternal {
    pub series: String,
    pub candle_count: u64,
    pub earliest: Option<TimestampMS>,
    pub latest: Option<TimestampMS>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PutSummary {
    pub inserted: u64,
    pub replaced: u64,
    pub rejected: u64,
}

/// LMDB-backed candle store. One environment holds every series; candle keys are
/// `"{series}|{open_time:015}"` so a series is a contiguous, time-ordered key range.
pub struct LmdbStorage {
    env: Env,
    candles: Database<Str, SerdeBincode<Candle>>,
    series_index: Database<Str, SerdeBincode<SeriesRange>>,
}

fn candle_key(series: &str, open_time: TimestampMS) -> String {
    format!(
        "{}{}{:0width$}",
        series,
        CANDLE_KEY_SEPARATOR,
        open_time,
        width = CANDLE_KEY_TIME_WIDTH
    )
}

/// Half-open key bounds covering exactly one series. `}` sorts directly after `|`.
fn series_bounds(series: &str) -> (String, String) {
    (format!("{}{}", series, CANDLE_KEY_SEPARATOR), format!("{}}}", series))
}

impl LmdbStorage {
    pub fn open(path: &Path) -> Result<Self, HistoricalDataError> {
        let env = open_lmdb_environment(path)?;

        let mut wtxn = env
            .write_txn()
            .with_db_context("Failed to create initial LMDB write transaction")?;

        let candles = env
            .create_database::<Str, SerdeBincode<Candle>>(&mut wtxn, Some(CANDLES_DB_NAME))
            .with_db_context("Failed to create candle database")?;

        let series_index = env
            .create_database::<Str, SerdeBincode<SeriesRange>>(&mut wtxn, Some(SERIES_INDEX_DB_NAME))
            .with_db_context("Failed to create series index database")?;

        wtxn.commit()
            .with_db_context("Failed to commit database creation transaction")?;

        info!("✅ Initialized LMDB candle store at {}", path.display());

        Ok(Self {
            env,
            candles,
            series_index,
        })
    }

    /// Upsert bars by (series, open_time). Incoming values overwrite stored ones.
    pub fn put_many(&self, series: &SeriesKey, candles: &[Candle]) -> Result<PutSummary, HistoricalDataError> {
        let prefix = series.storage_key();
        let mut summary = PutSummary::default();

        let mut wtxn = self
            .env
            .write_txn()
            .with_db_context(&format!("Failed to create write transaction for {}", prefix))?;

        let mut range = self.series_index.get(&wtxn, &prefix)?;

        for candle in candles {
            if !candle.is_well_formed() {
                summary.rejected += 1;
                continue;
            }

            let key = candle_key(&prefix, candle.open_time);
            let existed = self.candles.get(&wtxn, &key)?.is_some();

            self.candles
                .put(&mut wtxn, &key, candle)
                .with_db_context(&format!("Failed to store candle {}", key))?;

            if existed {
                summary.replaced += 1;
                continue;
            }

            summary.inserted += 1;
            range = Some(match range {
                Some(r) => SeriesRange {
                    count: r.count + 1,
                    earliest: r.earliest.min(candle.open_time),
                    latest: r.latest.max(candle.open_time),
                },
                None => SeriesRange {
                    count: 1,
                    earliest: candle.open_time,
                    latest: candle.open_time,
                },
            });
        }

        if let Some(range) = range {
            self.series_index
                .put(&mut wtxn, &prefix, &range)
                .with_db_context(&format!("Failed to update series index for {}", prefix))?;
        }

        wtxn.commit()
            .with_db_context(&format!("Failed to commit candles for {}", prefix))?;

        if summary.rejected > 0 {
            warn!("⚠️ Rejected {} malformed candles for {}", summary.rejected, prefix);
        }
        debug!(
            "✅ Stored candles for {}: {} new, {} replaced",
            prefix, summary.inserted, summary.replaced
        );

        Ok(summary)
    }

    /// Every bar of the series in ascending open_time order.
    pub fn get_all(&self, series: &SeriesKey) -> Result<Vec<Candle>, HistoricalDataError> {
        let prefix = series.storage_key();
        let (start, end) = series_bounds(&prefix);

        let rtxn = self
            .env
            .read_txn()
            .with_db_context(&format!("Failed to create read transaction for {}", prefix))?;

        let mut candles = Vec::new();
        for result in self
            .candles
            .range(&rtxn, &(Bound::Included(&start[..]), Bound::Excluded(&end[..])))?
        {
            let (_key, candle) = result?;
            candles.push(candle);
        }

        Ok(candles)
    }

    /// Bars with open_time in `[start_time, end_time]`, optionally capped at `limit`.
    pub fn get_range(
        &self,
        series: &SeriesKey,
        start_time: TimestampMS,
        end_time: TimestampMS,
        limit: Option<usize>,
    ) -> Result<Vec<Candle>, HistoricalDataError> {
        let prefix = series.storage_key();
        let start_key = candle_key(&prefix, start_time.max(0));
        let end_key = candle_key(&prefix, end_time.max(0));

        let rtxn = self
            .env
            .read_txn()
            .with_db_context(&format!("Failed to create read transaction for {}", prefix))?;

        let mut candles = Vec::new();
        for result in self
            .candles
            .range(&rtxn, &(Bound::Included(&start_key[..]), Bound::Included(&end_key[..])))?
        {
            let (_key, candle) = result?;
            candles.push(candle);
            if limit.is_some_and(|limit| candles.len() >= limit) {
                break;
            }
        }

        Ok(candles)
    }

    pub fn get_latest(&self, series: &SeriesKey) -> Result<Option<Candle>, HistoricalDataError> {
        let prefix = series.storage_key();
        let (start, end) = series_bounds(&prefix);

        let rtxn = self
            .env
            .read_txn()
            .with_db_context(&format!("Failed to create read transaction for {}", prefix))?;

        let latest = self
            .candles
            .rev_range(&rtxn, &(Bound::Included(&start[..]), Bound::Excluded(&end[..])))?
            .next()
            .transpose()?
            .map(|(_key, candle)| candle);

        Ok(latest)
    }

    /// Remove the whole series and its index entry. Returns the number of bars deleted.
    pub fn delete_all(&self, series: &SeriesKey) -> Result<usize, HistoricalDataError> {
        let prefix = series.storage_key();
        let (start, end) = series_bounds(&prefix);

        let mut wtxn = self
            .env
            .write_txn()
            .with_db_context(&format!("Failed to create write transaction for {}", prefix))?;

        let deleted = self
            .candles
            .delete_range(&mut wtxn, &(Bound::Included(&start[..]), Bound::Excluded(&end[..])))
            .with_db_context(&format!("Failed to delete candles for {}", prefix))?;
        self.series_index.delete(&mut wtxn, &prefix)?;

        wtxn.commit()
            .with_db_context(&format!("Failed to commit delete for {}", prefix))?;

        info!("🗑️ Deleted {} cached candles for {}", deleted, prefix);
        Ok(deleted)
    }

    /// When the series holds more than `high_water` bars, keep only the newest `low_water`.
    pub fn prune(&self, series: &SeriesKey, high_water: usize, low_water: usize) -> Result<usize, HistoricalDataError> {
        if low_water >= high_water {
            return Err(HistoricalDataError::Validation(format!(
                "prune low-water mark {} must be below high-water mark {}",
                low_water, high_water
            )));
        }

        let prefix = series.storage_key();
        let (start, end) = series_bounds(&prefix);

        let mut wtxn = self
            .env
            .write_txn()
            .with_db_context(&format!("Failed to create write transaction for {}", prefix))?;

        let count = self.count_in_range(&wtxn, &start, &end)?;
        if count <= high_water {
            return Ok(0);
        }

        // First key that survives: the (count - low_water)th bar in ascending order.
        let cutoff = match self
            .candles
            .range(&wtxn, &(Bound::Included(&start[..]), Bound::Excluded(&end[..])))?
            .nth(count - low_water)
            .transpose()?
        {
            Some((key, _candle)) => key.to_string(),
            None => return Ok(0),
        };

        let deleted = self
            .candles
            .delete_range(&mut wtxn, &(Bound::Included(&start[..]), Bound::Excluded(&cutoff[..])))
            .with_db_context(&format!("Failed to prune candles for {}", prefix))?;

        self.refresh_index(&mut wtxn, &prefix)?;

        wtxn.commit()
            .with_db_context(&format!("Failed to commit prune for {}", prefix))?;

        info!("✂️ Pruned {} candles for {} ({} -> {})", deleted, prefix, count, count - deleted);
        Ok(deleted)
    }

    pub fn series_stats(&self, series: &SeriesKey) -> Result<Option<SeriesRange>, HistoricalDataError> {
        let prefix = series.storage_key();
        let rtxn = self
            .env
            .read_txn()
            .with_db_context(&format!("Failed to create read transaction for {}", prefix))?;
        Ok(self.series_index.get(&rtxn, &prefix)?)
    }

    pub fn storage_stats(&self) -> Result<StorageStatsInternal, HistoricalDataError> {
        let rtxn = self
            .env
            .read_txn()
            .with_db_context("Failed to create read transaction for storage stats")?;

        let mut series = Vec::new();
        let mut total_candles = 0u64;

        for result in self.series_index.iter(&rtxn)? {
            let (name, range) = result?;
            total_candles += range.count;
            series.push(SeriesStatsInternal {
                series: name.to_string(),
                candle_count: range.count,
                earliest: Some(range.earliest),
                latest: Some(range.latest),
            });
        }

        let map_size_bytes = self.env.info().map_size as u64;

        info!(
            "📊 Storage stats: {} series, {} candles, {} byte map",
            series.len(),
            total_candles,
            map_size_bytes
        );

        Ok(StorageStatsInternal {
            series,
            total_candles,
            map_size_bytes,
        })
    }

    fn count_in_range(&self, wtxn: &RwTxn, start: &str, end: &str) -> Result<usize, HistoricalDataError> {
        let mut count = 0;
        for result in self
            .candles
            .range(wtxn, &(Bound::Included(start), Bound::Excluded(end)))?
        {
            result?;
            count += 1;
        }
        Ok(count)
    }

    fn refresh_index(&self, wtxn: &mut RwTxn, prefix: &str) -> Result<(), HistoricalDataError> {
        let (start, end) = series_bounds(prefix);
        let bounds = (Bound::Included(&start[..]), Bound::Excluded(&end[..]));

        let mut range: Option<SeriesRange> = None;
        for result in self.candles.range(wtxn, &bounds)? {
            let (_key, candle) = result?;
            range = Some(match range {
                Some(r) => SeriesRange {
                    count: r.count + 1,
                    earliest: r.earliest,
                    latest: candle.open_time,
                },
                None => SeriesRange {
                    count: 1,
                    earliest: candle.open_time,
                    latest: candle.open_time,
                },
            });
        }

        match range {
            Some(range) => self.series_index.put(wtxn, prefix, &range)?,
            None => {
                self.series_index.delete(wtxn, prefix)?;
            }
        }
        Ok(())
    }
}
