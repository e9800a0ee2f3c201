use std::path::Path;

use kameo::actor::ActorRef;
use kameo::error::{ActorStopReason, BoxError};
use kameo::message::{Context, Message};
use kameo::{Actor, mailbox::unbounded::UnboundedMailbox};
use tracing::{debug, error, info, warn};

use crate::historical::errors::HistoricalDataError;
use crate::historical::structs::{Candle, SeriesKey, TimestampMS};
use super::gap_detector::GapDetector;
use super::messages::{LmdbActorMessage, LmdbActorResponse, LmdbActorTell, SeriesStats};
use super::storage::LmdbStorage;

/// Serializes every candle store access behind one mailbox. LMDB transactions make each
/// write atomic; the mailbox keeps writers for the same series from interleaving.
pub struct LmdbActor {
    storage: LmdbStorage,
}

impl LmdbActor {
    pub fn new(base_path: &Path) -> Result<Self, HistoricalDataError> {
        let storage = LmdbStorage::open(base_path)?;
        info!("🎭 LmdbActor initialized with base path: {}", base_path.display());
        Ok(Self { storage })
    }

    fn handle_put_candles(&mut self, series: SeriesKey, candles: Vec<Candle>) -> LmdbActorResponse {
        debug!("💾 Storing {} candles for {}", candles.len(), series);

        match self.storage.put_many(&series, &candles) {
            Ok(summary) => LmdbActorResponse::Stored {
                inserted: summary.inserted,
                replaced: summary.replaced,
            },
            Err(e) => {
                error!("❌ Failed to store candles for {}: {}", series, e);
                LmdbActorResponse::ErrorResponse(format!("Failed to store candles: {}", e))
            }
        }
    }

    fn handle_get_range(
        &mut self,
        series: SeriesKey,
        start: TimestampMS,
        end: TimestampMS,
        limit: Option<usize>,
    ) -> LmdbActorResponse {
        debug!("📈 Getting candles for {} from {} to {} (limit: {:?})", series, start, end, limit);

        match self.storage.get_range(&series, start, end, limit) {
            Ok(candles) => LmdbActorResponse::Candles(candles),
            Err(e) => {
                error!("❌ Failed to get candles for {}: {}", series, e);
                LmdbActorResponse::ErrorResponse(format!("Failed to get candles: {}", e))
            }
        }
    }

    fn handle_detect_gaps(&mut self, series: SeriesKey) -> LmdbActorResponse {
        match self.storage.get_all(&series) {
            Ok(candles) => {
                let detector = GapDetector::new(series.interval);
                let gaps = detector.detect_internal_gaps(&candles);
                if gaps.is_empty() {
                    debug!("✅ No internal gaps for {}", series);
                } else {
                    detector.analyze_gaps(&gaps, &series.storage_key());
                }
                LmdbActorResponse::Gaps(gaps)
            }
            Err(e) => {
                error!("❌ Failed to retrieve candles for gap analysis: {}", e);
                LmdbActorResponse::ErrorResponse(format!("Failed to retrieve candles: {}", e))
            }
        }
    }

    fn handle_get_storage_stats(&mut self) -> LmdbActorResponse {
        match self.storage.storage_stats() {
            Ok(stats) => LmdbActorResponse::StorageStats {
                series: stats
                    .series
                    .into_iter()
                    .map(|s| SeriesStats {
                        series: s.series,
                        candle_count: s.candle_count,
                        earliest: s.earliest,
                        latest: s.latest,
                    })
                    .collect(),
                total_candles: stats.total_candles,
                map_size_bytes: stats.map_size_bytes,
            },
            Err(e) => {
                error!("❌ Failed to get storage stats: {}", e);
                LmdbActorResponse::ErrorResponse(format!("Failed to get storage stats: {}", e))
            }
        }
    }
}

impl Actor for LmdbActor {
    type Mailbox = UnboundedMailbox<Self>;

    fn name() -> &'static str {
        "LmdbActor"
    }

    async fn on_start(&mut self, _actor_ref: ActorRef<Self>) -> Result<(), BoxError> {
        info!("🎭 LmdbActor started");
        Ok(())
    }

    async fn on_stop(&mut self, _actor_ref: kameo::actor::WeakActorRef<Self>, _reason: ActorStopReason) -> Result<(), BoxError> {
        info!("🎭 LmdbActor stopped");
        Ok(())
    }
}

impl Message<LmdbActorMessage> for LmdbActor {
    type Reply = LmdbActorResponse;

    async fn handle(
        &mut self,
        message: LmdbActorMessage,
        _ctx: Context<'_, Self, Self::Reply>,
    ) -> Self::Reply {
        match message {
            LmdbActorMessage::PutCandles { series, candles } => {
                self.handle_put_candles(series, candles)
            }
            LmdbActorMessage::GetAll { series } => match self.storage.get_all(&series) {
                Ok(candles) => LmdbActorResponse::Candles(candles),
                Err(e) => {
                    error!("❌ Failed to read {}: {}", series, e);
                    LmdbActorResponse::ErrorResponse(format!("Failed to read series: {}", e))
                }
            },
            LmdbActorMessage::GetLatest { series } => match self.storage.get_latest(&series) {
                Ok(latest) => LmdbActorResponse::Latest(latest),
                Err(e) => {
                    error!("❌ Failed to read latest candle for {}: {}", series, e);
                    LmdbActorResponse::ErrorResponse(format!("Failed to read latest candle: {}", e))
                }
            },
            LmdbActorMessage::GetRange { series, start, end, limit } => {
                self.handle_get_range(series, start, end, limit)
            }
            LmdbActorMessage::DeleteSeries { series } => match self.storage.delete_all(&series) {
                Ok(deleted) => LmdbActorResponse::Deleted(deleted),
                Err(e) => {
                    error!("❌ Failed to delete {}: {}", series, e);
                    LmdbActorResponse::ErrorResponse(format!("Failed to delete series: {}", e))
                }
            },
            LmdbActorMessage::Prune { series, high_water, low_water } => {
                match self.storage.prune(&series, high_water, low_water) {
                    Ok(pruned) => LmdbActorResponse::Pruned(pruned),
                    Err(e) => {
                        warn!("⚠️ Failed to prune {}: {}", series, e);
                        LmdbActorResponse::ErrorResponse(format!("Failed to prune series: {}", e))
                    }
                }
            }
            LmdbActorMessage::DetectGaps { series } => self.handle_detect_gaps(series),
            LmdbActorMessage::GetSeriesStats { series } => match self.storage.series_stats(&series) {
                Ok(stats) => LmdbActorResponse::SeriesStats(stats),
                Err(e) => LmdbActorResponse::ErrorResponse(format!("Failed to read series stats: {}", e)),
            },
            LmdbActorMessage::GetStorageStats => self.handle_get_storage_stats(),
        }
    }
}

impl Message<LmdbActorTell> for LmdbActor {
    type Reply = ();

    async fn handle(
        &mut self,
        message: LmdbActorTell,
        _ctx: Context<'_, Self, Self::Reply>,
    ) -> Self::Reply {
        match message {
            LmdbActorTell::StoreCandlesAsync { series, candles } => {
                match self.storage.put_many(&series, &candles) {
                    Ok(summary) => {
                        debug!(
                            "💾 Async stored {} candles for {} ({} new)",
                            candles.len(),
                            series,
                            summary.inserted
                        );
                    }
                    Err(e) => {
                        error!("❌ Async storage failed for {}: {}", series, e);
                    }
                }
            }
        }
    }
}
