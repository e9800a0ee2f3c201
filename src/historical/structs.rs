use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::historical::errors::HistoricalDataError;

pub type TimestampMS = i64;

/// One OHLCV bucket. The owning series is carried by the container
/// (store key, subscription, request) rather than by every bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: TimestampMS,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    pub fn new(open_time: TimestampMS, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            open_time,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Synthetic bar with every price at `price` and zero volume.
    pub fn flat(open_time: TimestampMS, price: f64) -> Self {
        Self::new(open_time, price, price, price, price, 0.0)
    }

    /// Shape check applied to every bar crossing a trust boundary.
    pub fn is_well_formed(&self) -> bool {
        self.open_time > 0
            && [self.open, self.high, self.low, self.close, self.volume]
                .iter()
                .all(|v| v.is_finite())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntervalUnit {
    Minute,
    Hour,
    Day,
}

impl IntervalUnit {
    fn millis(self) -> i64 {
        match self {
            IntervalUnit::Minute => 60 * 1000,
            IntervalUnit::Hour => 60 * 60 * 1000,
            IntervalUnit::Day => 24 * 60 * 60 * 1000,
        }
    }

    fn suffix(self) -> char {
        match self {
            IntervalUnit::Minute => 'm',
            IntervalUnit::Hour => 'h',
            IntervalUnit::Day => 'd',
        }
    }
}

/// Fixed bar width such as `1m`, `15m`, `4h` or `1d`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Interval {
    count: u32,
    unit: IntervalUnit,
}

impl Interval {
    pub fn new(count: u32, unit: IntervalUnit) -> Result<Self, HistoricalDataError> {
        if count == 0 {
            return Err(HistoricalDataError::InvalidInterval("interval count must be positive".to_string()));
        }
        Ok(Self { count, unit })
    }

    pub fn duration_ms(&self) -> i64 {
        self.count as i64 * self.unit.millis()
    }

    /// Label understood by the historical endpoint (`1m` is sent as `1min`).
    pub fn api_label(&self) -> String {
        match self.unit {
            IntervalUnit::Minute => format!("{}min", self.count),
            _ => self.to_string(),
        }
    }

    /// Start of the bucket containing `timestamp`.
    pub fn align(&self, timestamp: TimestampMS) -> TimestampMS {
        let width = self.duration_ms();
        timestamp - timestamp.rem_euclid(width)
    }
}

impl FromStr for Interval {
    type Err = HistoricalDataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let unit = match s.chars().last() {
            Some('m') => IntervalUnit::Minute,
            Some('h') => IntervalUnit::Hour,
            Some('d') => IntervalUnit::Day,
            _ => return Err(HistoricalDataError::InvalidInterval(s.to_string())),
        };
        let count = s[..s.len() - 1]
            .parse::<u32>()
            .map_err(|_| HistoricalDataError::InvalidInterval(s.to_string()))?;
        Interval::new(count, unit)
    }
}

impl TryFrom<String> for Interval {
    type Error = HistoricalDataError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Interval> for String {
    fn from(interval: Interval) -> Self {
        interval.to_string()
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.count, self.unit.suffix())
    }
}

/// Identity of one independent candle series: (address, chain, interval).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SeriesKey {
    pub address: String,
    pub chain: String,
    pub interval: Interval,
}

impl SeriesKey {
    pub fn new(address: &str, chain: &str, interval: &str) -> Result<Self, HistoricalDataError> {
        let address = address.trim().to_string();
        let chain = chain.trim().to_lowercase();

        for (name, value) in [("address", &address), ("chain", &chain)] {
            if value.is_empty() {
                return Err(HistoricalDataError::Validation(format!("{} cannot be empty", name)));
            }
            if value.contains(['@', '|']) {
                return Err(HistoricalDataError::Validation(format!(
                    "{} '{}' contains a reserved separator",
                    name, value
                )));
            }
        }

        Ok(Self {
            address,
            chain,
            interval: interval.parse()?,
        })
    }

    /// Deterministic join used as the store's series prefix.
    pub fn storage_key(&self) -> String {
        format!("{}@{}@{}", self.address, self.chain, self.interval)
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.storage_key())
    }
}
