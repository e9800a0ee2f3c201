use std::collections::VecDeque;

use kameo::actor::{ActorRef, WeakActorRef};
use kameo::error::{ActorStopReason, BoxError};
use kameo::message::{Context, Message};
use kameo::request::MessageSend;
use kameo::{mailbox::unbounded::UnboundedMailbox, Actor};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::common::constants::MAX_LIVE_BARS_IN_MEMORY;
use crate::historical::reconciler::{GapReconciler, ReconcileOutcome};
use crate::historical::structs::{Candle, SeriesKey, TimestampMS};
use crate::lmdb::LmdbActorTell;
use crate::websocket::kline::{parse_push_frame, PushFrame, PushUpdate};
use crate::websocket::merge::{MergeOutcome, RealtimeMergeEngine};
use crate::websocket::topics::ChainRegistry;
use crate::websocket::types::{ChannelCommand, ConnectionStatus, StreamStats, SubscriptionState};

/// Fire-and-forget messages for KlineSyncActor
#[derive(Debug)]
pub enum KlineSyncTell {
    /// Raw text frame from the shared push connection
    PushFrame(String),
    /// Push connection dropped
    ConnectionLost,
    /// Sent on every successful connect, first one included
    ConnectionRestored,
    /// Result of a spawned backfill pass (internal use)
    BackfillCompleted {
        series: SeriesKey,
        epoch: u64,
        result: Result<ReconcileOutcome, String>,
    },
}

/// Request-response messages for KlineSyncActor
#[derive(Debug, Clone)]
pub enum KlineSyncAsk {
    Subscribe { series: SeriesKey },
    Unsubscribe { series: SeriesKey },
    GetSubscription { series: SeriesKey },
    GetSubscriptions,
    GetLiveBars { series: SeriesKey, limit: usize },
    GetConnectionStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionInfo {
    pub series: SeriesKey,
    pub topic: String,
    pub state: SubscriptionState,
    pub subscribers: usize,
    pub live_bars: usize,
    pub latest_open_time: Option<TimestampMS>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum KlineSyncReply {
    Subscribed(SubscriptionInfo),
    Unsubscribed { remaining_subscribers: usize },
    Subscription(Option<SubscriptionInfo>),
    Subscriptions(Vec<SubscriptionInfo>),
    LiveBars(Vec<Candle>),
    ConnectionStatus {
        status: ConnectionStatus,
        stats: StreamStats,
    },
}

struct Subscription {
    state: SubscriptionState,
    subscribers: usize,
    engine: RealtimeMergeEngine,
    /// Identifies the backfill pass whose result is still wanted
    epoch: u64,
    /// Updates held back until the engine is seeded from the store
    pending: VecDeque<PushUpdate>,
}

impl Subscription {
    fn info(&self) -> SubscriptionInfo {
        SubscriptionInfo {
            series: self.engine.series().clone(),
            topic: self.engine.topic().to_string(),
            state: self.state,
            subscribers: self.subscribers,
            live_bars: self.engine.len(),
            latest_open_time: self.engine.latest_open_time(),
        }
    }
}

/// Owns every live series subscription: backfills on subscribe and reconnect,
/// then merges push updates from the shared channel until the last unsubscribe.
pub struct KlineSyncActor {
    registry: ChainRegistry,
    reconciler: GapReconciler,
    commands: mpsc::UnboundedSender<ChannelCommand>,
    subscriptions: FxHashMap<SeriesKey, Subscription>,
    connection_status: ConnectionStatus,
    stats: StreamStats,
    next_epoch: u64,
}

impl KlineSyncActor {
    pub fn new(
        registry: ChainRegistry,
        reconciler: GapReconciler,
        commands: mpsc::UnboundedSender<ChannelCommand>,
    ) -> Self {
        Self {
            registry,
            reconciler,
            commands,
            subscriptions: FxHashMap::default(),
            connection_status: ConnectionStatus::Connecting,
            stats: StreamStats::new(),
            next_epoch: 0,
        }
    }

    fn subscribe(&mut self, series: SeriesKey, actor_ref: ActorRef<Self>) -> Result<SubscriptionInfo, String> {
        if let Some(existing) = self.subscriptions.get_mut(&series) {
            existing.subscribers += 1;
            debug!("➕ {} now has {} subscribers", series, existing.subscribers);
            return Ok(existing.info());
        }

        let topic = self.registry.topic_for(&series).map_err(|e| e.to_string())?;

        self.send_command(ChannelCommand::Subscribe(topic.clone()));

        let epoch = self.bump_epoch();
        self.subscriptions.insert(
            series.clone(),
            Subscription {
                state: SubscriptionState::Backfilling,
                subscribers: 1,
                engine: RealtimeMergeEngine::new(series.clone(), topic.clone()),
                epoch,
                pending: VecDeque::new(),
            },
        );

        info!("📡 Subscribed {} on topic {}", series, topic);
        self.spawn_backfill(series.clone(), epoch, actor_ref);

        self.subscriptions
            .get(&series)
            .map(Subscription::info)
            .ok_or_else(|| format!("subscription for {} vanished", series))
    }

    fn unsubscribe(&mut self, series: &SeriesKey) -> usize {
        let Some(subscription) = self.subscriptions.get_mut(series) else {
            debug!("Unsubscribe for unknown series {}", series);
            return 0;
        };

        subscription.subscribers = subscription.subscribers.saturating_sub(1);
        if subscription.subscribers > 0 {
            return subscription.subscribers;
        }

        if let Some(removed) = self.subscriptions.remove(series) {
            let topic = removed.engine.topic().to_string();
            // Another series can map onto the same topic (e.g. sol and solana)
            let topic_still_used = self.subscriptions.values().any(|s| s.engine.topic() == topic);
            if !topic_still_used {
                self.send_command(ChannelCommand::Unsubscribe(topic.clone()));
            }
            info!("➖ Unsubscribed {} from {}", series, topic);
        }
        0
    }

    fn spawn_backfill(&self, series: SeriesKey, epoch: u64, actor_ref: ActorRef<Self>) {
        let reconciler = self.reconciler.clone();
        tokio::spawn(async move {
            let now = chrono::Utc::now().timestamp_millis();
            let result = reconciler.reconcile(&series, now).await.map_err(|e| e.to_string());
            if let Err(e) = actor_ref
                .tell(KlineSyncTell::BackfillCompleted { series, epoch, result })
                .send()
                .await
            {
                warn!("Failed to deliver backfill result: {}", e);
            }
        });
    }

    /// Seeds the engine and replays the updates held back during the pass.
    /// Returns the replayed bars that still need persisting.
    fn complete_backfill(
        &mut self,
        series: SeriesKey,
        epoch: u64,
        result: Result<ReconcileOutcome, String>,
    ) -> Vec<Candle> {
        let Some(subscription) = self.subscriptions.get_mut(&series) else {
            debug!("Discarding backfill result for unsubscribed {}", series);
            return Vec::new();
        };
        if subscription.epoch != epoch {
            debug!("Discarding superseded backfill result for {}", series);
            return Vec::new();
        }

        let pending = std::mem::take(&mut subscription.pending);
        let mut applied = Vec::new();
        match result {
            Ok(outcome) => {
                if let Some(e) = &outcome.fetch_error {
                    warn!("⚠️ {} went live without fresh history: {}", series, e);
                }
                subscription.engine.seed(&outcome.candles);

                for update in &pending {
                    match subscription.engine.apply(update) {
                        MergeOutcome::Appended | MergeOutcome::Replaced => {
                            self.stats.bars_applied += 1;
                            applied.push(update.candle);
                        }
                        MergeOutcome::DroppedLate => self.stats.bars_dropped_late += 1,
                        MergeOutcome::DroppedForeignTopic => {}
                    }
                }
                if !pending.is_empty() {
                    debug!(
                        "⏩ Replayed {} held updates for {}, {} applied",
                        pending.len(),
                        series,
                        applied.len()
                    );
                }
            }
            Err(e) => {
                // Without the persisted latest there is no floor to check held updates against
                self.stats.bars_dropped_late += pending.len() as u64;
                error!("❌ Backfill for {} failed, dropped {} held updates: {}", series, pending.len(), e);
            }
        }

        // A drop during the pass leaves the series Stale until the next reconnect
        if subscription.state == SubscriptionState::Backfilling {
            subscription.state = SubscriptionState::Live;
            info!("🟢 {} is live with {} bars", series, subscription.engine.len());
        }
        applied
    }

    /// Returns the (series, bar) pairs the frame applied.
    fn handle_push_frame(&mut self, text: &str) -> Vec<(SeriesKey, Candle)> {
        self.stats.record_frame();

        match parse_push_frame(text) {
            Ok(PushFrame::Kline(update)) => {
                self.stats.kline_updates += 1;
                return self.apply_update(&update);
            }
            Ok(PushFrame::Ack) => {
                self.stats.acks += 1;
                debug!("Subscription acknowledged: {}", text);
            }
            Ok(PushFrame::Other(stream)) => {
                self.stats.ignored_streams += 1;
                debug!("Ignoring stream {}", stream);
            }
            Err(e) => {
                self.stats.rejected_frames += 1;
                warn!("🚫 Dropping push frame: {}", e);
            }
        }
        Vec::new()
    }

    fn apply_update(&mut self, update: &PushUpdate) -> Vec<(SeriesKey, Candle)> {
        let mut applied = Vec::new();

        for (series, subscription) in self.subscriptions.iter_mut() {
            if subscription.engine.topic() != update.topic {
                continue;
            }

            // The engine has no floor until it is seeded from the store
            if subscription.state != SubscriptionState::Live {
                if subscription.pending.len() >= MAX_LIVE_BARS_IN_MEMORY {
                    subscription.pending.pop_front();
                }
                subscription.pending.push_back(update.clone());
                continue;
            }

            match subscription.engine.apply(update) {
                MergeOutcome::Appended | MergeOutcome::Replaced => {
                    self.stats.bars_applied += 1;
                    applied.push((series.clone(), update.candle));
                }
                MergeOutcome::DroppedLate => self.stats.bars_dropped_late += 1,
                MergeOutcome::DroppedForeignTopic => {}
            }
        }

        if applied.is_empty() {
            debug!("No live subscription consumed update on {}", update.topic);
        }
        applied
    }

    /// Queues applied bars on the store in arrival order; the store's mailbox
    /// keeps that order so the last update to a bucket is the one persisted.
    async fn persist(&self, applied: Vec<(SeriesKey, Candle)>) {
        let store = self.reconciler.store();
        for (series, candle) in applied {
            let message = LmdbActorTell::StoreCandlesAsync {
                series,
                candles: vec![candle],
            };
            if let Err(e) = store.tell(message).send().await {
                warn!("Failed to queue live bar for persistence: {}", e);
            }
        }
    }

    fn connection_lost(&mut self) {
        self.connection_status = ConnectionStatus::Closed;
        for (series, subscription) in self.subscriptions.iter_mut() {
            if subscription.state != SubscriptionState::Stale {
                subscription.state = SubscriptionState::Stale;
                warn!("🔌 {} is stale", series);
            }
        }
    }

    fn connection_restored(&mut self, actor_ref: ActorRef<Self>) {
        self.connection_status = ConnectionStatus::Connected;

        let stale: Vec<SeriesKey> = self
            .subscriptions
            .iter()
            .filter(|(_, s)| s.state == SubscriptionState::Stale)
            .map(|(series, _)| series.clone())
            .collect();

        for series in stale {
            let epoch = self.bump_epoch();
            if let Some(subscription) = self.subscriptions.get_mut(&series) {
                subscription.state = SubscriptionState::Backfilling;
                subscription.epoch = epoch;
            }
            info!("🔄 Re-backfilling {} after reconnect", series);
            self.spawn_backfill(series, epoch, actor_ref.clone());
        }
    }

    fn send_command(&self, command: ChannelCommand) {
        if let Err(e) = self.commands.send(command) {
            warn!("Push connection is not running, dropped {:?}", e.0);
        }
    }

    fn bump_epoch(&mut self) -> u64 {
        self.next_epoch += 1;
        self.next_epoch
    }
}

impl Actor for KlineSyncActor {
    type Mailbox = UnboundedMailbox<Self>;

    fn name() -> &'static str {
        "KlineSyncActor"
    }

    async fn on_start(&mut self, _actor_ref: ActorRef<Self>) -> Result<(), BoxError> {
        info!("🚀 Starting KlineSyncActor");
        Ok(())
    }

    async fn on_stop(&mut self, _actor_ref: WeakActorRef<Self>, _reason: ActorStopReason) -> Result<(), BoxError> {
        info!(
            "🛑 Stopping KlineSyncActor: {} subscriptions, {} frames, {} bars applied, {} late bars dropped",
            self.subscriptions.len(),
            self.stats.frames,
            self.stats.bars_applied,
            self.stats.bars_dropped_late
        );
        Ok(())
    }
}

impl Message<KlineSyncTell> for KlineSyncActor {
    type Reply = ();

    async fn handle(&mut self, msg: KlineSyncTell, ctx: Context<'_, Self, Self::Reply>) -> Self::Reply {
        match msg {
            KlineSyncTell::PushFrame(text) => {
                let applied = self.handle_push_frame(&text);
                self.persist(applied).await;
            }
            KlineSyncTell::ConnectionLost => self.connection_lost(),
            KlineSyncTell::ConnectionRestored => {
                let actor_ref = ctx.actor_ref().clone();
                self.connection_restored(actor_ref);
            }
            KlineSyncTell::BackfillCompleted { series, epoch, result } => {
                let replayed = self.complete_backfill(series.clone(), epoch, result);
                self.persist(replayed.into_iter().map(|candle| (series.clone(), candle)).collect())
                    .await;
            }
        }
    }
}

impl Message<KlineSyncAsk> for KlineSyncActor {
    type Reply = Result<KlineSyncReply, String>;

    async fn handle(&mut self, msg: KlineSyncAsk, ctx: Context<'_, Self, Self::Reply>) -> Self::Reply {
        match msg {
            KlineSyncAsk::Subscribe { series } => {
                let actor_ref = ctx.actor_ref().clone();
                self.subscribe(series, actor_ref).map(KlineSyncReply::Subscribed)
            }
            KlineSyncAsk::Unsubscribe { series } => Ok(KlineSyncReply::Unsubscribed {
                remaining_subscribers: self.unsubscribe(&series),
            }),
            KlineSyncAsk::GetSubscription { series } => Ok(KlineSyncReply::Subscription(
                self.subscriptions.get(&series).map(Subscription::info),
            )),
            KlineSyncAsk::GetSubscriptions => Ok(KlineSyncReply::Subscriptions(
                self.subscriptions.values().map(Subscription::info).collect(),
            )),
            KlineSyncAsk::GetLiveBars { series, limit } => {
                let bars = self
                    .subscriptions
                    .get(&series)
                    .map(|s| {
                        let bars = s.engine.bars();
                        let start = bars.len().saturating_sub(limit);
                        bars[start..].to_vec()
                    })
                    .unwrap_or_default();
                Ok(KlineSyncReply::LiveBars(bars))
            }
            KlineSyncAsk::GetConnectionStatus => Ok(KlineSyncReply::ConnectionStatus {
                status: self.connection_status.clone(),
                stats: self.stats,
            }),
        }
    }
}
