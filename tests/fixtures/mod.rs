#![allow(dead_code)]

use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use market_feeder::api::{ApiError, HistoricalFetcher, KlineRequest};
use market_feeder::historical::{Candle, SeriesKey, TimestampMS};

pub const MINUTE: i64 = 60_000;
/// Minute-aligned reference time
pub const BASE: TimestampMS = 1_700_000_040_000;

pub fn bar(open_time: TimestampMS, close: f64) -> Candle {
    Candle::new(open_time, close, close + 1.0, close - 1.0, close, 10.0)
}

/// `count` consecutive one-minute bars, the last opening at `last_open`
pub fn minute_bars(last_open: TimestampMS, count: usize, close: f64) -> Vec<Candle> {
    (0..count as i64)
        .rev()
        .map(|i| bar(last_open - i * MINUTE, close))
        .collect()
}

pub fn series(address: &str) -> SeriesKey {
    SeriesKey::new(address, "bsc", "1m").unwrap()
}

/// Serves `limit` bars ending at a movable "exchange clock", or fails on demand.
pub struct ScriptedFetcher {
    exchange_now: Mutex<TimestampMS>,
    close: Mutex<f64>,
    failing: Mutex<bool>,
    requested: Mutex<Vec<u32>>,
}

impl ScriptedFetcher {
    pub fn new(exchange_now: TimestampMS) -> Self {
        Self {
            exchange_now: Mutex::new(exchange_now),
            close: Mutex::new(100.0),
            failing: Mutex::new(false),
            requested: Mutex::new(Vec::new()),
        }
    }

    pub fn advance_to(&self, now: TimestampMS) {
        *self.exchange_now.lock().unwrap() = now;
    }

    pub fn set_close(&self, close: f64) {
        *self.close.lock().unwrap() = close;
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }

    pub fn requested(&self) -> Vec<u32> {
        self.requested.lock().unwrap().clone()
    }
}

#[async_trait]
impl HistoricalFetcher for ScriptedFetcher {
    async fn fetch_klines(&self, request: &KlineRequest) -> Result<Vec<Candle>, ApiError> {
        self.requested.lock().unwrap().push(request.limit);
        if *self.failing.lock().unwrap() {
            return Err(ApiError::Http("503 Service Unavailable".to_string()));
        }

        let interval = request.series.interval;
        let last = interval.align(*self.exchange_now.lock().unwrap());
        let close = *self.close.lock().unwrap();
        Ok((0..request.limit as i64)
            .rev()
            .map(|i| bar(last - i * interval.duration_ms(), close))
            .collect())
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

pub fn market_row(address: &str, symbol: &str, price: f64) -> Value {
    json!({
        "contractAddress": address,
        "symbol": symbol,
        "price": price,
        "chain": "bsc",
        "volume24h": 1000.0,
        "rowHeight": 48,
    })
}

/// JSON pointer to the leaf component the extraction root handle names
pub const ROOT_POINTER: &str = "/app/children/table/children/cell";

/// Host state shaped like a rendered component tree: the record array lives in
/// an ancestor's state, not under the leaf the root pointer names.
pub fn host_document(rows: Vec<Value>) -> Value {
    json!({
        "app": {
            "props": {"theme": "dark"},
            "children": {
                "header": {"props": {"title": "Markets"}},
                "table": {
                    "props": {"columns": ["symbol", "price"]},
                    "state": {"page": 1, "store": {"markets": {"list": rows}}},
                    "children": {"cell": {"props": {"index": 0}}}
                }
            }
        }
    })
}

/// Same rows moved from the table's state into its props.
pub fn restructured_document(rows: Vec<Value>) -> Value {
    json!({
        "app": {
            "props": {"theme": "dark"},
            "children": {
                "table": {
                    "props": {"rows": rows},
                    "state": {"page": 1},
                    "children": {"cell": {"props": {"index": 0}}}
                }
            }
        }
    })
}
