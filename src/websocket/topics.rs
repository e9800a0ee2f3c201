use rustc_hash::FxHashMap;

use crate::common::constants::KLINE_TOPIC_PREFIX;
use crate::historical::errors::HistoricalDataError;
use crate::historical::structs::SeriesKey;

/// Chain tag to push-channel series id. Extensible through configuration.
#[derive(Debug, Clone)]
pub struct ChainRegistry {
    series_ids: FxHashMap<String, u32>,
}

impl Default for ChainRegistry {
    fn default() -> Self {
        let series_ids = [("bsc", 14), ("sol", 16), ("solana", 16), ("base", 199)]
            .into_iter()
            .map(|(chain, id)| (chain.to_string(), id))
            .collect();
        Self { series_ids }
    }
}

impl ChainRegistry {
    /// Built-in table with `overrides` layered on top
    pub fn with_overrides<I, S>(overrides: I) -> Self
    where
        I: IntoIterator<Item = (S, u32)>,
        S: AsRef<str>,
    {
        let mut registry = Self::default();
        for (chain, id) in overrides {
            registry.series_ids.insert(chain.as_ref().trim().to_lowercase(), id);
        }
        registry
    }

    pub fn series_id(&self, chain: &str) -> Option<u32> {
        self.series_ids.get(&chain.to_lowercase()).copied()
    }

    /// `kl@{series_id}@{address}@{interval}` with the address lowercased
    pub fn topic_for(&self, series: &SeriesKey) -> Result<String, HistoricalDataError> {
        let series_id = self
            .series_id(&series.chain)
            .ok_or_else(|| HistoricalDataError::UnsupportedChain(series.chain.clone()))?;

        Ok(format!(
            "{}@{}@{}@{}",
            KLINE_TOPIC_PREFIX,
            series_id,
            series.address.to_lowercase(),
            series.interval
        ))
    }
}
