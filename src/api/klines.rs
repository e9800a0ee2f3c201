use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::api::types::{ApiError, FetchStats, HistoricalFetcher, KlineRequest};
use crate::historical::structs::{Candle, TimestampMS};

/// HTTP client for the historical candle endpoint.
///
/// The endpoint URL is a template with `{address}`, `{interval}`, `{limit}` and
/// `{platform}` placeholders so the same client works against mirrors and test servers.
pub struct KlineApiClient {
    client: reqwest::Client,
    url_template: String,
    max_limit: u32,
    stats: Mutex<FetchStats>,
}

impl KlineApiClient {
    pub fn new(url_template: String, request_timeout: Duration, max_limit: u32) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| ApiError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url_template,
            max_limit,
            stats: Mutex::new(FetchStats::default()),
        })
    }

    pub async fn stats(&self) -> FetchStats {
        *self.stats.lock().await
    }

    /// Build the complete URL for a klines request
    pub fn build_klines_url(&self, request: &KlineRequest) -> String {
        let limit = request.limit.min(self.max_limit);
        self.url_template
            .replace("{address}", &request.series.address)
            .replace("{interval}", &request.series.interval.api_label())
            .replace("{limit}", &limit.to_string())
            .replace("{platform}", request.platform())
    }

    async fn fetch_body(&self, url: &str) -> Result<String, ApiError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                ApiError::Timeout(format!("Request timed out: {}", e))
            } else {
                ApiError::Network(format!("Request failed: {}", e))
            }
        })?;

        if response.status().as_u16() == 429 {
            return Err(ApiError::RateLimit(format!("HTTP 429 from {}", url)));
        }

        if !response.status().is_success() {
            return Err(ApiError::Http(format!(
                "HTTP {}: {}",
                response.status(),
                response.status().canonical_reason().unwrap_or("Unknown")
            )));
        }

        response
            .text()
            .await
            .map_err(|e| ApiError::Parse(format!("Failed to read response body: {}", e)))
    }
}

#[async_trait]
impl HistoricalFetcher for KlineApiClient {
    async fn fetch_klines(&self, request: &KlineRequest) -> Result<Vec<Candle>, ApiError> {
        let url = self.build_klines_url(request);
        debug!("Fetching klines from: {}", url);

        let result = match self.fetch_body(&url).await {
            Ok(body) => {
                debug!(
                    "Received response body ({}b): {}",
                    body.len(),
                    body.chars().take(200).collect::<String>()
                );
                parse_klines_body(&body)
            }
            Err(e) => Err(e),
        };

        self.stats.lock().await.record(&result);
        match &result {
            Ok(candles) => info!("✅ Fetched {} klines for {}", candles.len(), request.series),
            Err(ApiError::RateLimit(_)) => warn!("⚠️ Rate limited fetching {}", request.series),
            Err(e) => warn!("❌ Failed to fetch klines for {}: {}", request.series, e),
        }

        result
    }

    fn name(&self) -> &'static str {
        "kline_http"
    }
}

/// Normalize either response shape into ascending, de-duplicated candles.
///
/// Accepts a bare array or a `{"data": [...]}` wrapper whose rows are either
/// `[open, high, low, close, volume, open_time_ms]` tuples or objects with named fields.
pub fn parse_klines_body(body: &str) -> Result<Vec<Candle>, ApiError> {
    let value: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| ApiError::Parse(format!("Failed to parse JSON: {}", e)))?;

    let rows = match &value {
        serde_json::Value::Array(rows) => rows,
        serde_json::Value::Object(map) => match map.get("data") {
            Some(serde_json::Value::Array(rows)) => rows,
            Some(serde_json::Value::Null) | None => return Ok(Vec::new()),
            Some(other) => {
                return Err(ApiError::Parse(format!("Expected data to be an array, got: {}", other)));
            }
        },
        other => return Err(ApiError::Parse(format!("Unexpected response shape: {}", other))),
    };

    let mut candles = rows.iter().map(parse_row).collect::<Result<Vec<_>, _>>()?;

    candles.sort_by_key(|candle| candle.open_time);
    // Keep the last occurrence of a duplicated bucket
    candles.reverse();
    candles.dedup_by_key(|candle| candle.open_time);
    candles.reverse();

    Ok(candles)
}

fn parse_row(row: &serde_json::Value) -> Result<Candle, ApiError> {
    let candle = match row {
        serde_json::Value::Array(values) => {
            if values.len() < 6 {
                return Err(ApiError::Parse(format!(
                    "Expected at least 6 elements in kline array, got {}",
                    values.len()
                )));
            }
            Candle::new(
                parse_timestamp(&values[5])?,
                parse_f64(&values[0])?,
                parse_f64(&values[1])?,
                parse_f64(&values[2])?,
                parse_f64(&values[3])?,
                parse_f64(&values[4])?,
            )
        }
        serde_json::Value::Object(map) => {
            let field = |name: &str| {
                map.get(name)
                    .ok_or_else(|| ApiError::Parse(format!("Missing field '{}' in kline object", name)))
            };
            let time = ["time", "timestamp", "openTime", "t"]
                .iter()
                .find_map(|name| map.get(*name))
                .ok_or_else(|| ApiError::Parse("Missing time field in kline object".to_string()))?;

            Candle::new(
                parse_timestamp(time)?,
                parse_f64(field("open")?)?,
                parse_f64(field("high")?)?,
                parse_f64(field("low")?)?,
                parse_f64(field("close")?)?,
                parse_f64(field("volume")?)?,
            )
        }
        other => return Err(ApiError::Parse(format!("Expected kline array or object, got: {}", other))),
    };

    if !candle.is_well_formed() {
        return Err(ApiError::Parse(format!("Malformed kline row: {}", row)));
    }
    Ok(candle)
}

/// Parse f64 from a JSON string or number
pub(crate) fn parse_f64(value: &serde_json::Value) -> Result<f64, ApiError> {
    match value {
        serde_json::Value::String(s) => s
            .parse::<f64>()
            .map_err(|_| ApiError::Parse(format!("Failed to parse '{}' as f64", s))),
        serde_json::Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| ApiError::Parse(format!("Failed to convert number to f64: {:?}", n))),
        _ => Err(ApiError::Parse(format!("Expected string or number, got: {:?}", value))),
    }
}

/// Parse a millisecond timestamp from a JSON string or number
pub(crate) fn parse_timestamp(value: &serde_json::Value) -> Result<TimestampMS, ApiError> {
    match value {
        serde_json::Value::String(s) => s
            .parse::<i64>()
            .map_err(|_| ApiError::Parse(format!("Failed to parse '{}' as timestamp", s))),
        serde_json::Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .ok_or_else(|| ApiError::Parse(format!("Failed to convert number to timestamp: {:?}", n))),
        _ => Err(ApiError::Parse(format!("Expected timestamp, got: {:?}", value))),
    }
}
