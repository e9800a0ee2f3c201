use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::historical::structs::{Candle, SeriesKey, TimestampMS};

/// One bounded historical request: the newest `limit` bars of a series.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KlineRequest {
    pub series: SeriesKey,
    pub limit: u32,
}

impl KlineRequest {
    pub fn new(series: SeriesKey, limit: u32) -> Self {
        Self { series, limit }
    }

    /// Platform name the endpoint expects for the series' chain.
    pub fn platform(&self) -> &str {
        match self.series.chain.as_str() {
            "sol" => "solana",
            other => other,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    #[error("Historical endpoint returned {0}")]
    Http(String),

    #[error("Unreadable kline response: {0}")]
    Parse(String),

    #[error("Historical endpoint rate limited: {0}")]
    RateLimit(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Historical fetch timed out: {0}")]
    Timeout(String),
}

/// Per-client fetch counters
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct FetchStats {
    pub requests: u64,
    pub bars_received: u64,
    pub empty_responses: u64,
    pub rate_limited: u64,
    pub timeouts: u64,
    pub other_failures: u64,
    pub last_request_at: Option<TimestampMS>,
}

impl FetchStats {
    pub fn record(&mut self, result: &Result<Vec<Candle>, ApiError>) {
        self.requests += 1;
        self.last_request_at = Some(chrono::Utc::now().timestamp_millis());
        match result {
            Ok(bars) if bars.is_empty() => self.empty_responses += 1,
            Ok(bars) => self.bars_received += bars.len() as u64,
            Err(ApiError::RateLimit(_)) => self.rate_limited += 1,
            Err(ApiError::Timeout(_)) => self.timeouts += 1,
            Err(_) => self.other_failures += 1,
        }
    }

    pub fn failures(&self) -> u64 {
        self.rate_limited + self.timeouts + self.other_failures
    }
}

/// Source of historical bars. Implementations return bars ascending by open_time;
/// the caller bounds the call with its own timeout.
#[async_trait]
pub trait HistoricalFetcher: Send + Sync {
    async fn fetch_klines(&self, request: &KlineRequest) -> Result<Vec<Candle>, ApiError>;

    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_normalization() {
        let sol = KlineRequest::new(SeriesKey::new("So1Mint", "SOL", "1m").unwrap(), 10);
        assert_eq!(sol.platform(), "solana");

        let bsc = KlineRequest::new(SeriesKey::new("0xabc", "bsc", "1m").unwrap(), 10);
        assert_eq!(bsc.platform(), "bsc");
    }

    #[test]
    fn test_fetch_stats_classify_outcomes() {
        let mut stats = FetchStats::default();
        stats.record(&Ok(vec![Candle::flat(60_000, 1.0), Candle::flat(120_000, 1.0)]));
        stats.record(&Ok(Vec::new()));
        stats.record(&Err(ApiError::RateLimit("429".to_string())));
        stats.record(&Err(ApiError::Timeout("10s".to_string())));
        stats.record(&Err(ApiError::Parse("bad row".to_string())));

        assert_eq!(stats.requests, 5);
        assert_eq!(stats.bars_received, 2);
        assert_eq!(stats.empty_responses, 1);
        assert_eq!(stats.failures(), 3);
        assert!(stats.last_request_at.is_some());
    }
}
