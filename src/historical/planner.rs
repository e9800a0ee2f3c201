use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::historical::structs::{Candle, Interval, TimestampMS};

/// What a subscribe-time backfill should do for one series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackfillPlan {
    /// Nothing cached; fetch the maximum single-call limit.
    ColdStart { limit: u32 },
    /// The gap is wider than one call can cover; evict the series and cold-start.
    StaleReset { missing: i64, limit: u32 },
    /// Latest cached bar is the current bucket; rely on the live stream.
    Fresh,
    /// Fetch exactly the missing trailing bars.
    Incremental { limit: u32 },
}

impl BackfillPlan {
    pub fn fetch_limit(&self) -> Option<u32> {
        match self {
            BackfillPlan::ColdStart { limit }
            | BackfillPlan::StaleReset { limit, .. }
            | BackfillPlan::Incremental { limit } => Some(*limit),
            BackfillPlan::Fresh => None,
        }
    }

    pub fn evicts_cache(&self) -> bool {
        matches!(self, BackfillPlan::StaleReset { .. })
    }
}

/// `floor(elapsed / interval) + 1`; the extra bar re-covers the possibly unfinished latest bucket.
/// A latest bucket in the future (clock skew) counts as fresh.
pub fn missing_bars(latest_open_time: TimestampMS, now: TimestampMS, interval: Interval) -> i64 {
    let elapsed = (now - latest_open_time).max(0);
    elapsed / interval.duration_ms() + 1
}

#[derive(Debug, Clone, Copy)]
pub struct BackfillPlanner {
    max_fetch_limit: u32,
}

impl BackfillPlanner {
    pub fn new(max_fetch_limit: u32) -> Self {
        Self {
            max_fetch_limit: max_fetch_limit.max(1),
        }
    }

    pub fn max_fetch_limit(&self) -> u32 {
        self.max_fetch_limit
    }

    pub fn plan(&self, latest: Option<&Candle>, now: TimestampMS, interval: Interval) -> BackfillPlan {
        let Some(latest) = latest else {
            debug!("🆕 No cached candles, cold start with limit {}", self.max_fetch_limit);
            return BackfillPlan::ColdStart {
                limit: self.max_fetch_limit,
            };
        };

        let missing = missing_bars(latest.open_time, now, interval);

        if missing > self.max_fetch_limit as i64 {
            warn!(
                "⚠️ Cache is {} bars behind (limit {}), evicting and cold starting",
                missing, self.max_fetch_limit
            );
            BackfillPlan::StaleReset {
                missing,
                limit: self.max_fetch_limit,
            }
        } else if missing <= 1 {
            debug!("✨ Cache is current, skipping historical fetch");
            BackfillPlan::Fresh
        } else {
            info!("🔄 Cache is {} bars behind, requesting limit={}", missing - 1, missing);
            BackfillPlan::Incremental {
                limit: missing as u32,
            }
        }
    }
}
