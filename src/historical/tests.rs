use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use kameo::actor::ActorRef;
use tempfile::tempdir;

use crate::api::types::{ApiError, HistoricalFetcher, KlineRequest};
use crate::lmdb::{LmdbActor, LmdbActorMessage};
use super::planner::BackfillPlan;
use super::reconciler::{GapReconciler, ReconcilerConfig};
use super::structs::{Candle, Interval, SeriesKey, TimestampMS};
use super::utils::{is_strictly_ascending, merge_candles};

const MINUTE: i64 = 60_000;
const NOW: i64 = 1_700_000_000_000 + 30_000;

fn bar(open_time: TimestampMS, close: f64) -> Candle {
    Candle::new(open_time, close, close + 1.0, close - 1.0, close, 1.0)
}

enum Script {
    /// Return `limit` bars ending at the bucket containing `end`
    Bars { end: TimestampMS, close: f64 },
    Fail,
    Hang,
}

struct ScriptedFetcher {
    script: Script,
    requested: Mutex<Vec<u32>>,
}

impl ScriptedFetcher {
    fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            requested: Mutex::new(Vec::new()),
        })
    }

    fn requested(&self) -> Vec<u32> {
        self.requested.lock().unwrap().clone()
    }
}

#[async_trait]
impl HistoricalFetcher for ScriptedFetcher {
    async fn fetch_klines(&self, request: &KlineRequest) -> Result<Vec<Candle>, ApiError> {
        self.requested.lock().unwrap().push(request.limit);
        match &self.script {
            Script::Bars { end, close } => {
                let interval = request.series.interval;
                let last = interval.align(*end);
                Ok((0..request.limit as i64)
                    .rev()
                    .map(|i| bar(last - i * interval.duration_ms(), *close))
                    .collect())
            }
            Script::Fail => Err(ApiError::Network("connection refused".to_string())),
            Script::Hang => {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(Vec::new())
            }
        }
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

fn config() -> ReconcilerConfig {
    ReconcilerConfig {
        max_fetch_limit: 500,
        prune_high_water: 1000,
        prune_low_water: 500,
        fetch_timeout: Duration::from_millis(200),
        hydrate_gaps: false,
        hydrate_target_count: 500,
    }
}

fn series() -> SeriesKey {
    SeriesKey::new("0xToken", "bsc", "1m").unwrap()
}

async fn seed(store: &ActorRef<LmdbActor>, candles: Vec<Candle>) {
    store
        .ask(LmdbActorMessage::PutCandles { series: series(), candles })
        .await
        .unwrap();
}

#[test]
fn test_interval_parsing() {
    let interval: Interval = "15m".parse().unwrap();
    assert_eq!(interval.duration_ms(), 15 * MINUTE);
    assert_eq!(interval.api_label(), "15min");
    assert_eq!(interval.to_string(), "15m");

    let day: Interval = "1d".parse().unwrap();
    assert_eq!(day.duration_ms(), 24 * 60 * MINUTE);
    assert_eq!(day.api_label(), "1d");

    assert!("0m".parse::<Interval>().is_err());
    assert!("5s".parse::<Interval>().is_err());
    assert!("m".parse::<Interval>().is_err());
}

#[test]
fn test_series_key_format() {
    let key = SeriesKey::new(" 0xAbC ", "BSC", "1h").unwrap();
    assert_eq!(key.storage_key(), "0xAbC@bsc@1h");
    assert!(SeriesKey::new("a@b", "bsc", "1m").is_err());
    assert!(SeriesKey::new("", "bsc", "1m").is_err());
}

#[test]
fn test_merge_is_ascending_and_fetched_wins() {
    let cached: Vec<_> = (1..=5).map(|m| bar(m * MINUTE, 1.0)).collect();
    let fetched: Vec<_> = (4..=8).map(|m| bar(m * MINUTE, 2.0)).collect();

    let merged = merge_candles(&cached, &fetched);

    assert_eq!(merged.len(), 8);
    assert!(is_strictly_ascending(&merged));
    assert!(merged[..3].iter().all(|c| c.close == 1.0));
    assert!(merged[3..].iter().all(|c| c.close == 2.0));
}

#[tokio::test]
async fn test_cold_start_requests_max_limit() {
    let dir = tempdir().unwrap();
    let store = kameo::spawn(LmdbActor::new(dir.path()).unwrap());
    let fetcher = ScriptedFetcher::new(Script::Bars { end: NOW, close: 10.0 });
    let reconciler = GapReconciler::new(store, fetcher.clone(), config());

    let outcome = reconciler.reconcile(&series(), NOW).await.unwrap();

    assert_eq!(outcome.plan, BackfillPlan::ColdStart { limit: 500 });
    assert_eq!(fetcher.requested(), vec![500]);
    assert_eq!(outcome.candles.len(), 500);
    assert!(is_strictly_ascending(&outcome.candles));
    assert!(outcome.fetch_error.is_none());
}

#[tokio::test]
async fn test_incremental_backfill_overwrites_overlap() {
    let dir = tempdir().unwrap();
    let store = kameo::spawn(LmdbActor::new(dir.path()).unwrap());
    let current = NOW - NOW % MINUTE;
    seed(&store, (1..=10).rev().map(|i| bar(current - i * MINUTE, 1.0)).collect()).await;

    let fetcher = ScriptedFetcher::new(Script::Bars { end: NOW, close: 7.0 });
    let reconciler = GapReconciler::new(store, fetcher.clone(), config());
    let outcome = reconciler.reconcile(&series(), NOW).await.unwrap();

    // Latest cached bucket is one interval behind the current one
    assert_eq!(outcome.plan, BackfillPlan::Incremental { limit: 2 });
    assert_eq!(fetcher.requested(), vec![2]);
    assert_eq!(outcome.candles.len(), 11);
    assert_eq!(outcome.candles[9].close, 7.0);
    assert_eq!(outcome.candles[10].open_time, current);
    assert!(is_strictly_ascending(&outcome.candles));
}

#[tokio::test]
async fn test_fresh_cache_skips_fetch() {
    let dir = tempdir().unwrap();
    let store = kameo::spawn(LmdbActor::new(dir.path()).unwrap());
    let current = NOW - NOW % MINUTE;
    seed(&store, vec![bar(current - MINUTE, 1.0), bar(current, 1.0)]).await;

    let fetcher = ScriptedFetcher::new(Script::Fail);
    let reconciler = GapReconciler::new(store, fetcher.clone(), config());
    let outcome = reconciler.reconcile(&series(), NOW).await.unwrap();

    assert_eq!(outcome.plan, BackfillPlan::Fresh);
    assert!(fetcher.requested().is_empty());
    assert_eq!(outcome.candles.len(), 2);
}

#[tokio::test]
async fn test_stale_cache_is_evicted() {
    let dir = tempdir().unwrap();
    let store = kameo::spawn(LmdbActor::new(dir.path()).unwrap());
    let ancient = NOW - 10_000 * MINUTE;
    seed(&store, (0..3).map(|i| bar(ancient + i * MINUTE, 1.0)).collect()).await;

    let fetcher = ScriptedFetcher::new(Script::Bars { end: NOW, close: 3.0 });
    let reconciler = GapReconciler::new(store, fetcher.clone(), config());
    let outcome = reconciler.reconcile(&series(), NOW).await.unwrap();

    assert!(matches!(outcome.plan, BackfillPlan::StaleReset { limit: 500, .. }));
    assert_eq!(outcome.candles.len(), 500);
    assert!(outcome.candles.iter().all(|c| c.open_time > ancient + 2 * MINUTE));
}

#[tokio::test]
async fn test_fetch_failure_leaves_series_unchanged() {
    let dir = tempdir().unwrap();
    let store = kameo::spawn(LmdbActor::new(dir.path()).unwrap());
    let current = NOW - NOW % MINUTE;
    let cached: Vec<_> = (3..=5).rev().map(|i| bar(current - i * MINUTE, 1.0)).collect();
    seed(&store, cached.clone()).await;

    let fetcher = ScriptedFetcher::new(Script::Fail);
    let reconciler = GapReconciler::new(store, fetcher.clone(), config());
    let outcome = reconciler.reconcile(&series(), NOW).await.unwrap();

    assert_eq!(fetcher.requested(), vec![4]);
    assert!(matches!(outcome.fetch_error, Some(ApiError::Network(_))));
    assert_eq!(outcome.candles, cached);
}

#[tokio::test]
async fn test_fetch_timeout_is_bounded() {
    let dir = tempdir().unwrap();
    let store = kameo::spawn(LmdbActor::new(dir.path()).unwrap());
    let fetcher = ScriptedFetcher::new(Script::Hang);
    let reconciler = GapReconciler::new(store, fetcher, config());

    let started = std::time::Instant::now();
    let outcome = reconciler.reconcile(&series(), NOW).await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(matches!(outcome.fetch_error, Some(ApiError::Timeout(_))));
    assert!(outcome.candles.is_empty());
}

#[tokio::test]
async fn test_backfill_prunes_to_low_water() {
    let dir = tempdir().unwrap();
    let store = kameo::spawn(LmdbActor::new(dir.path()).unwrap());
    let current = NOW - NOW % MINUTE;
    // 20 cached bars ending 4 buckets ago, then a 5-bar fetch pushes the count over 20
    seed(&store, (4..24).rev().map(|i| bar(current - i * MINUTE, 1.0)).collect()).await;

    let fetcher = ScriptedFetcher::new(Script::Bars { end: NOW, close: 2.0 });
    let mut cfg = config();
    cfg.prune_high_water = 20;
    cfg.prune_low_water = 8;
    let reconciler = GapReconciler::new(store, fetcher, cfg);
    let outcome = reconciler.reconcile(&series(), NOW).await.unwrap();

    assert_eq!(outcome.pruned, 16);
    assert_eq!(outcome.candles.len(), 8);
    assert_eq!(outcome.candles.last().map(|c| c.open_time), Some(current));
}

#[tokio::test]
async fn test_hydrated_window_is_not_persisted() {
    let dir = tempdir().unwrap();
    let store = kameo::spawn(LmdbActor::new(dir.path()).unwrap());
    let current = NOW - NOW % MINUTE;
    seed(&store, vec![bar(current - 5 * MINUTE, 4.0), bar(current, 5.0)]).await;

    let fetcher = ScriptedFetcher::new(Script::Fail);
    let mut cfg = config();
    cfg.hydrate_gaps = true;
    cfg.hydrate_target_count = 10;
    let reconciler = GapReconciler::new(store.clone(), fetcher, cfg);
    let outcome = reconciler.reconcile(&series(), NOW).await.unwrap();

    let hydrated = outcome.hydrated.expect("hydration enabled");
    assert_eq!(hydrated.len(), 10);
    assert_eq!(hydrated.last().map(|c| c.open_time), Some(current));
    assert_eq!(outcome.candles.len(), 2);
}
