use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kameo::actor::ActorRef;
use kameo::request::MessageSend;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::time::sleep;

use crate::api::types::{ApiError, HistoricalFetcher, KlineRequest};
use crate::historical::reconciler::{GapReconciler, ReconcilerConfig};
use crate::historical::structs::{Candle, SeriesKey};
use crate::lmdb::{LmdbActor, LmdbActorMessage, LmdbActorResponse};
use crate::websocket::actor::{KlineSyncActor, KlineSyncAsk, KlineSyncReply, KlineSyncTell, SubscriptionInfo};
use crate::websocket::topics::ChainRegistry;
use crate::websocket::types::{ChannelCommand, SubscriptionState};

const MINUTE: i64 = 60_000;
const TOPIC: &str = "kl@14@0xabc@1m";

/// Serves `limit` flat bars ending at the current bucket, after `delay`
struct RecentBarsFetcher {
    calls: AtomicUsize,
    delay: Duration,
}

#[async_trait]
impl HistoricalFetcher for RecentBarsFetcher {
    async fn fetch_klines(&self, request: &KlineRequest) -> Result<Vec<Candle>, ApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }
        let interval = request.series.interval;
        let current = interval.align(chrono::Utc::now().timestamp_millis());
        Ok((0..request.limit as i64)
            .rev()
            .map(|i| Candle::flat(current - i * interval.duration_ms(), 1.0))
            .collect())
    }

    fn name(&self) -> &'static str {
        "recent-bars"
    }
}

struct Harness {
    _dir: TempDir,
    store: ActorRef<LmdbActor>,
    fetcher: Arc<RecentBarsFetcher>,
    actor: ActorRef<KlineSyncActor>,
    commands: mpsc::UnboundedReceiver<ChannelCommand>,
}

fn harness() -> Harness {
    harness_with_delay(Duration::ZERO)
}

fn harness_with_delay(delay: Duration) -> Harness {
    let dir = TempDir::new().unwrap();
    let store = kameo::spawn(LmdbActor::new(dir.path()).unwrap());
    let fetcher = Arc::new(RecentBarsFetcher {
        calls: AtomicUsize::new(0),
        delay,
    });
    let config = ReconcilerConfig {
        max_fetch_limit: 50,
        prune_high_water: 1000,
        prune_low_water: 500,
        fetch_timeout: Duration::from_secs(2),
        hydrate_gaps: false,
        hydrate_target_count: 50,
    };
    let reconciler = GapReconciler::new(store.clone(), fetcher.clone(), config);
    let (tx, commands) = mpsc::unbounded_channel();
    let actor = kameo::spawn(KlineSyncActor::new(ChainRegistry::default(), reconciler, tx));

    Harness {
        _dir: dir,
        store,
        fetcher,
        actor,
        commands,
    }
}

fn series() -> SeriesKey {
    SeriesKey::new("0xAbC", "bsc", "1m").unwrap()
}

async fn subscription(actor: &ActorRef<KlineSyncActor>, series: &SeriesKey) -> Option<SubscriptionInfo> {
    match actor
        .ask(KlineSyncAsk::GetSubscription { series: series.clone() })
        .await
        .unwrap()
    {
        KlineSyncReply::Subscription(info) => info,
        other => panic!("unexpected reply {:?}", other),
    }
}

async fn wait_for_state(actor: &ActorRef<KlineSyncActor>, series: &SeriesKey, state: SubscriptionState) -> SubscriptionInfo {
    for _ in 0..200 {
        if let Some(info) = subscription(actor, series).await {
            if info.state == state {
                return info;
            }
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("{} never reached {}", series, state);
}

async fn live_bars(actor: &ActorRef<KlineSyncActor>, series: &SeriesKey) -> Vec<Candle> {
    match actor
        .ask(KlineSyncAsk::GetLiveBars { series: series.clone(), limit: usize::MAX })
        .await
        .unwrap()
    {
        KlineSyncReply::LiveBars(bars) => bars,
        other => panic!("unexpected reply {:?}", other),
    }
}

fn push_frame(topic: &str, candle: &Candle) -> String {
    serde_json::json!({
        "stream": topic,
        "data": {"d": {"u": [
            candle.open.to_string(),
            candle.high.to_string(),
            candle.low.to_string(),
            candle.close.to_string(),
            candle.volume.to_string(),
            candle.open_time.to_string(),
        ]}}
    })
    .to_string()
}

#[tokio::test]
async fn test_subscribe_backfills_then_goes_live() {
    let mut h = harness();

    let reply = h.actor.ask(KlineSyncAsk::Subscribe { series: series() }).await.unwrap();
    let KlineSyncReply::Subscribed(info) = reply else {
        panic!("expected Subscribed");
    };
    assert_eq!(info.topic, "kl@14@0xabc@1m");
    assert_eq!(h.commands.recv().await, Some(ChannelCommand::Subscribe("kl@14@0xabc@1m".to_string())));

    let info = wait_for_state(&h.actor, &series(), SubscriptionState::Live).await;
    assert_eq!(info.live_bars, 50);
    assert_eq!(h.fetcher.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_push_updates_merge_by_bucket() {
    let h = harness();
    h.actor.ask(KlineSyncAsk::Subscribe { series: series() }).await.unwrap();
    wait_for_state(&h.actor, &series(), SubscriptionState::Live).await;

    let bars = live_bars(&h.actor, &series()).await;
    let latest = *bars.last().unwrap();

    // Same bucket, wider range: replaced in place
    let widened = Candle::new(latest.open_time, 1.0, 9.0, 0.1, 2.0, 5.0);
    h.actor
        .tell(KlineSyncTell::PushFrame(push_frame("kl@14@0xabc@1m", &widened)))
        .send()
        .await
        .unwrap();

    // Older bucket and a foreign topic are both ignored
    let late = Candle::new(latest.open_time - 10 * 60_000, 1.0, 99.0, 0.0, 1.0, 1.0);
    h.actor
        .tell(KlineSyncTell::PushFrame(push_frame("kl@14@0xabc@1m", &late)))
        .send()
        .await
        .unwrap();
    let foreign = Candle::new(latest.open_time + 60_000, 1.0, 99.0, 0.0, 1.0, 1.0);
    h.actor
        .tell(KlineSyncTell::PushFrame(push_frame("kl@14@0xabc@5m", &foreign)))
        .send()
        .await
        .unwrap();

    let after = live_bars(&h.actor, &series()).await;
    assert_eq!(after.len(), bars.len());
    assert_eq!(*after.last().unwrap(), widened);
    assert!(after.iter().all(|c| c.high != 99.0));

    // Next bucket appends
    let next = Candle::new(latest.open_time + 60_000, 2.0, 3.0, 1.5, 2.5, 1.0);
    h.actor
        .tell(KlineSyncTell::PushFrame(push_frame("kl@14@0xabc@1m", &next)))
        .send()
        .await
        .unwrap();
    let after = live_bars(&h.actor, &series()).await;
    assert_eq!(after.len(), bars.len() + 1);

    // Applied updates reach the store asynchronously
    for _ in 0..200 {
        if let Ok(LmdbActorResponse::Latest(Some(stored))) =
            h.store.ask(LmdbActorMessage::GetLatest { series: series() }).await
        {
            if stored == next {
                return;
            }
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("live bar was never persisted");
}

async fn stored_bars(store: &ActorRef<LmdbActor>, series: &SeriesKey) -> Vec<Candle> {
    match store.ask(LmdbActorMessage::GetAll { series: series.clone() }).await.unwrap() {
        LmdbActorResponse::Candles(candles) => candles,
        other => panic!("unexpected response {:?}", other),
    }
}

async fn push(actor: &ActorRef<KlineSyncActor>, candle: &Candle) {
    actor
        .tell(KlineSyncTell::PushFrame(push_frame(TOPIC, candle)))
        .send()
        .await
        .unwrap();
}

#[tokio::test]
async fn test_late_update_during_backfill_never_touches_closed_bars() {
    let h = harness_with_delay(Duration::from_millis(300));
    let current = chrono::Utc::now().timestamp_millis() / MINUTE * MINUTE;

    // Cache written by an earlier run, ending five minutes ago
    let cached: Vec<Candle> = (0..20)
        .rev()
        .map(|i| Candle::new(current - (5 + i) * MINUTE, 1.0, 2.0, 0.5, 1.5, 10.0))
        .collect();
    h.store
        .ask(LmdbActorMessage::PutCandles { series: series(), candles: cached })
        .await
        .unwrap();

    h.actor.ask(KlineSyncAsk::Subscribe { series: series() }).await.unwrap();
    assert_eq!(
        subscription(&h.actor, &series()).await.map(|s| s.state),
        Some(SubscriptionState::Backfilling)
    );

    let late_bucket = current - 15 * MINUTE;
    let late = Candle::new(late_bucket, 1.0, 99.0, 0.0, 1.0, 1.0);
    let next = Candle::new(current + MINUTE, 2.0, 7.0, 1.5, 2.5, 1.0);
    push(&h.actor, &late).await;
    push(&h.actor, &next).await;

    // Held back while the pass runs: nothing reaches the store or the live view
    let during = stored_bars(&h.store, &series()).await;
    let closed = during.iter().find(|c| c.open_time == late_bucket).unwrap();
    assert_eq!(closed.high, 2.0);
    assert!(during.iter().all(|c| c.open_time != next.open_time));

    wait_for_state(&h.actor, &series(), SubscriptionState::Live).await;

    let live = live_bars(&h.actor, &series()).await;
    assert_eq!(live.last(), Some(&next));
    assert!(live.iter().all(|c| c.high != 99.0));

    let stored = stored_bars(&h.store, &series()).await;
    let closed = stored.iter().find(|c| c.open_time == late_bucket).unwrap();
    assert_eq!(closed.high, 2.0);
    assert_eq!(stored.last(), Some(&next));

    match h.actor.ask(KlineSyncAsk::GetConnectionStatus).await.unwrap() {
        KlineSyncReply::ConnectionStatus { stats, .. } => {
            assert_eq!(stats.bars_dropped_late, 1);
            assert_eq!(stats.bars_applied, 1);
        }
        other => panic!("unexpected reply {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_same_bucket_updates_persist_in_arrival_order() {
    let h = harness();
    h.actor.ask(KlineSyncAsk::Subscribe { series: series() }).await.unwrap();
    wait_for_state(&h.actor, &series(), SubscriptionState::Live).await;
    let latest = *live_bars(&h.actor, &series()).await.last().unwrap();

    for round in 1..=5i64 {
        let bucket = latest.open_time + round * MINUTE;
        let updates: Vec<Candle> = (1..=20)
            .map(|n| Candle::new(bucket, 1.0, n as f64, 0.5, n as f64, n as f64))
            .collect();
        for update in &updates {
            push(&h.actor, update).await;
        }

        // The actor has handled every frame once this returns, so every write is queued
        assert_eq!(live_bars(&h.actor, &series()).await.last(), updates.last());

        match h.store.ask(LmdbActorMessage::GetLatest { series: series() }).await.unwrap() {
            LmdbActorResponse::Latest(stored) => assert_eq!(stored.as_ref(), updates.last()),
            other => panic!("unexpected response {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_malformed_frames_do_not_stop_merging() {
    let h = harness();
    h.actor.ask(KlineSyncAsk::Subscribe { series: series() }).await.unwrap();
    wait_for_state(&h.actor, &series(), SubscriptionState::Live).await;
    let before = live_bars(&h.actor, &series()).await;
    let latest = *before.last().unwrap();

    for frame in ["{broken", r#"{"stream":"kl@14@0xabc@1m","data":{"d":{"u":["1"]}}}"#, r#"{"result":null,"id":3}"#] {
        h.actor.tell(KlineSyncTell::PushFrame(frame.to_string())).send().await.unwrap();
    }
    let next = Candle::new(latest.open_time + 60_000, 2.0, 3.0, 1.5, 2.5, 1.0);
    h.actor
        .tell(KlineSyncTell::PushFrame(push_frame("kl@14@0xabc@1m", &next)))
        .send()
        .await
        .unwrap();

    assert_eq!(live_bars(&h.actor, &series()).await.last(), Some(&next));

    match h.actor.ask(KlineSyncAsk::GetConnectionStatus).await.unwrap() {
        KlineSyncReply::ConnectionStatus { stats, .. } => {
            assert_eq!(stats.frames, 4);
            assert_eq!(stats.rejected_frames, 2);
            assert_eq!(stats.bars_applied, 1);
            assert_eq!(stats.acks, 1);
        }
        other => panic!("unexpected reply {:?}", other),
    }
}

#[tokio::test]
async fn test_subscriptions_are_reference_counted() {
    let mut h = harness();

    h.actor.ask(KlineSyncAsk::Subscribe { series: series() }).await.unwrap();
    h.actor.ask(KlineSyncAsk::Subscribe { series: series() }).await.unwrap();
    assert!(matches!(h.commands.recv().await, Some(ChannelCommand::Subscribe(_))));

    let reply = h.actor.ask(KlineSyncAsk::Unsubscribe { series: series() }).await.unwrap();
    assert!(matches!(reply, KlineSyncReply::Unsubscribed { remaining_subscribers: 1 }));
    assert!(h.commands.try_recv().is_err());
    assert_eq!(subscription(&h.actor, &series()).await.map(|s| s.subscribers), Some(1));

    h.actor.ask(KlineSyncAsk::Unsubscribe { series: series() }).await.unwrap();
    assert_eq!(
        h.commands.recv().await,
        Some(ChannelCommand::Unsubscribe("kl@14@0xabc@1m".to_string()))
    );
    assert!(subscription(&h.actor, &series()).await.is_none());

    // The persisted cache outlives the subscription
    sleep(Duration::from_millis(100)).await;
    match h.store.ask(LmdbActorMessage::GetAll { series: series() }).await.unwrap() {
        LmdbActorResponse::Candles(candles) => assert!(!candles.is_empty()),
        other => panic!("unexpected response {:?}", other),
    }
}

#[tokio::test]
async fn test_reconnect_moves_stale_series_back_through_backfill() {
    let h = harness();
    h.actor.ask(KlineSyncAsk::Subscribe { series: series() }).await.unwrap();
    wait_for_state(&h.actor, &series(), SubscriptionState::Live).await;

    h.actor.tell(KlineSyncTell::ConnectionLost).send().await.unwrap();
    wait_for_state(&h.actor, &series(), SubscriptionState::Stale).await;

    h.actor.tell(KlineSyncTell::ConnectionRestored).send().await.unwrap();
    wait_for_state(&h.actor, &series(), SubscriptionState::Live).await;

    assert!(live_bars(&h.actor, &series()).await.len() >= 50);
}

#[tokio::test]
async fn test_unknown_chain_is_rejected() {
    let h = harness();
    let series = SeriesKey::new("0xabc", "eth", "1m").unwrap();

    let result = h.actor.ask(KlineSyncAsk::Subscribe { series: series.clone() }).await;

    assert!(result.is_err());
    assert!(subscription(&h.actor, &series).await.is_none());
}
