use std::sync::Arc;
use std::time::Duration;

use kameo::actor::ActorRef;
use kameo::request::MessageSend;
use tracing::{debug, info, warn};

use crate::api::types::{ApiError, HistoricalFetcher, KlineRequest};
use crate::historical::errors::HistoricalDataError;
use crate::historical::planner::{BackfillPlan, BackfillPlanner};
use crate::historical::structs::{Candle, SeriesKey, TimestampMS};
use crate::historical::utils::format_timestamp;
use crate::lmdb::gap_detector::GapDetector;
use crate::lmdb::{LmdbActor, LmdbActorMessage, LmdbActorResponse};

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub max_fetch_limit: u32,
    pub prune_high_water: usize,
    pub prune_low_water: usize,
    pub fetch_timeout: Duration,
    pub hydrate_gaps: bool,
    pub hydrate_target_count: usize,
}

/// Result of one backfill pass over a series.
#[derive(Debug, Clone)]
pub struct ReconcileOutcome {
    pub series: SeriesKey,
    pub plan: BackfillPlan,
    pub fetched: usize,
    pub pruned: usize,
    /// Full persisted series after the pass, ascending
    pub candles: Vec<Candle>,
    /// Gap-free display window; never persisted
    pub hydrated: Option<Vec<Candle>>,
    /// Set when the fetch failed or timed out; the series kept its pre-fetch state
    pub fetch_error: Option<ApiError>,
}

/// Sequential read-plan-fetch-write pass for one series at subscribe or reconnect time.
#[derive(Clone)]
pub struct GapReconciler {
    store: ActorRef<LmdbActor>,
    fetcher: Arc<dyn HistoricalFetcher>,
    planner: BackfillPlanner,
    config: ReconcilerConfig,
}

impl GapReconciler {
    pub fn new(store: ActorRef<LmdbActor>, fetcher: Arc<dyn HistoricalFetcher>, config: ReconcilerConfig) -> Self {
        Self {
            store,
            fetcher,
            planner: BackfillPlanner::new(config.max_fetch_limit),
            config,
        }
    }

    pub fn store(&self) -> &ActorRef<LmdbActor> {
        &self.store
    }

    pub async fn reconcile(&self, series: &SeriesKey, now: TimestampMS) -> Result<ReconcileOutcome, HistoricalDataError> {
        let latest = match self.ask_store(LmdbActorMessage::GetLatest { series: series.clone() }).await? {
            LmdbActorResponse::Latest(latest) => latest,
            other => return Err(unexpected_response("GetLatest", other)),
        };

        let plan = self.planner.plan(latest.as_ref(), now, series.interval);

        if let BackfillPlan::StaleReset { missing, .. } = plan {
            warn!("♻️ {} is {} bars stale, clearing cache before cold start", series, missing);
            self.ask_store(LmdbActorMessage::DeleteSeries { series: series.clone() }).await?;
        }

        let mut fetched = 0;
        let mut pruned = 0;
        let mut fetch_error = None;

        if let Some(limit) = plan.fetch_limit() {
            match self.fetch(series, limit).await {
                Ok(candles) => {
                    fetched = candles.len();
                    self.persist(series, candles).await?;
                    pruned = self.prune(series).await?;
                }
                Err(e) => {
                    warn!("⚠️ Backfill fetch for {} failed, keeping cached state: {}", series, e);
                    fetch_error = Some(e);
                }
            }
        }

        let candles = match self.ask_store(LmdbActorMessage::GetAll { series: series.clone() }).await? {
            LmdbActorResponse::Candles(candles) => candles,
            other => return Err(unexpected_response("GetAll", other)),
        };

        let hydrated = self.config.hydrate_gaps.then(|| {
            GapDetector::new(series.interval).hydrate(&candles, now, self.config.hydrate_target_count)
        });

        info!(
            "✅ Reconciled {}: plan={:?}, fetched={}, pruned={}, cached={}, latest={}",
            series,
            plan,
            fetched,
            pruned,
            candles.len(),
            candles.last().map(|c| format_timestamp(c.open_time)).unwrap_or_else(|| "none".to_string())
        );

        Ok(ReconcileOutcome {
            series: series.clone(),
            plan,
            fetched,
            pruned,
            candles,
            hydrated,
            fetch_error,
        })
    }

    async fn fetch(&self, series: &SeriesKey, limit: u32) -> Result<Vec<Candle>, ApiError> {
        let request = KlineRequest::new(series.clone(), limit);
        debug!("🌐 Requesting {} bars for {} via {}", limit, series, self.fetcher.name());

        match tokio::time::timeout(self.config.fetch_timeout, self.fetcher.fetch_klines(&request)).await {
            Ok(result) => result,
            Err(_) => Err(ApiError::Timeout(format!(
                "historical fetch for {} exceeded {:?}",
                series, self.config.fetch_timeout
            ))),
        }
    }

    async fn persist(&self, series: &SeriesKey, candles: Vec<Candle>) -> Result<(), HistoricalDataError> {
        if candles.is_empty() {
            return Ok(());
        }
        match self
            .ask_store(LmdbActorMessage::PutCandles { series: series.clone(), candles })
            .await?
        {
            LmdbActorResponse::Stored { inserted, replaced } => {
                debug!("💾 {}: {} new bars, {} refreshed", series, inserted, replaced);
                Ok(())
            }
            other => Err(unexpected_response("PutCandles", other)),
        }
    }

    async fn prune(&self, series: &SeriesKey) -> Result<usize, HistoricalDataError> {
        match self
            .ask_store(LmdbActorMessage::Prune {
                series: series.clone(),
                high_water: self.config.prune_high_water,
                low_water: self.config.prune_low_water,
            })
            .await?
        {
            LmdbActorResponse::Pruned(count) => Ok(count),
            other => Err(unexpected_response("Prune", other)),
        }
    }

    async fn ask_store(&self, message: LmdbActorMessage) -> Result<LmdbActorResponse, HistoricalDataError> {
        match self.store.ask(message).send().await {
            Ok(LmdbActorResponse::ErrorResponse(e)) => Err(HistoricalDataError::DatabaseError(e)),
            Ok(response) => Ok(response),
            Err(e) => Err(HistoricalDataError::DatabaseError(format!("LmdbActor unavailable: {}", e))),
        }
    }
}

fn unexpected_response(operation: &str, response: LmdbActorResponse) -> HistoricalDataError {
    HistoricalDataError::DatabaseError(format!("Unexpected {} response: {:?}", operation, response))
}
