use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use kameo::actor::ActorRef;
use kameo::request::MessageSend;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use market_feeder::api::{HistoricalFetcher, KlineApiClient};
use market_feeder::config::AppConfig;
use market_feeder::extraction::{ExtractionEvent, ExtractionScheduler, JsonFileSource};
use market_feeder::historical::GapReconciler;
use market_feeder::lmdb::LmdbActor;
use market_feeder::logging::{cleanup_old_logs, init_dual_logging};
use market_feeder::websocket::{ConnectionManager, KlineSyncActor, KlineSyncAsk, KlineSyncReply};

const STATUS_INTERVAL_SECS: u64 = 60;

#[tokio::main]
async fn main() {
    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.toml".to_string());

    let config = if Path::new(&config_path).exists() {
        match AppConfig::from_toml_file(&config_path) {
            Ok(config) => {
                // Simple print until logging is initialized
                println!("✅ Loaded configuration from {}", config_path);
                config
            }
            Err(e) => {
                eprintln!("❌ {}: {}", config_path, e);
                std::process::exit(1);
            }
        }
    } else {
        println!("⚠️ {} not found. Using default configuration", config_path);
        AppConfig::default()
    };

    let logging_config = config.logging_config();
    let _logging_guard = match init_dual_logging(&logging_config) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("❌ Failed to initialize logging system: {}", e);
            tracing_subscriber::fmt()
                .with_env_filter("info,market_feeder=info")
                .init();
            error!("⚠️ Using fallback console-only logging due to error: {}", e);
            None
        }
    };

    if let Some(keep_days) = config.logging.cleanup_days {
        cleanup_old_logs(Path::new(&logging_config.log_dir), &logging_config.file_prefix, keep_days);
    }

    info!(
        subscriptions = config.subscriptions.len(),
        storage_path = %config.application.storage_path.display(),
        stream_url = %config.stream.url,
        extraction = config.extraction.enabled,
        "🔧 System configuration loaded"
    );

    if let Err(e) = run(config).await {
        error!("❌ Fatal: {}", e);
        std::process::exit(1);
    }
}

async fn run(config: AppConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    info!("🚀 Starting market feeder");

    let lmdb_actor = {
        let actor = LmdbActor::new(&config.application.storage_path)
            .map_err(|e| format!("Failed to create LMDB actor: {}", e))?;
        kameo::spawn(actor)
    };

    let kline_client = Arc::new(
        KlineApiClient::new(
            config.api.base_url.clone(),
            Duration::from_secs(config.api.request_timeout_secs),
            config.backfill.max_fetch_limit,
        )
        .map_err(|e| format!("Failed to create kline client: {}", e))?,
    );
    let fetcher: Arc<dyn HistoricalFetcher> = kline_client.clone();
    let reconciler = GapReconciler::new(lmdb_actor, fetcher, config.reconciler_config());

    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let sync_actor = kameo::spawn(KlineSyncActor::new(config.chain_registry(), reconciler, command_tx));

    let connection = ConnectionManager::new(
        config.stream.url.clone(),
        Duration::from_secs(config.stream.heartbeat_interval_secs),
        Duration::from_secs(config.stream.reconnect_delay_secs),
    );
    tokio::spawn(connection.run(command_rx, sync_actor.clone()));

    for series in config.series_keys()? {
        match sync_actor.ask(KlineSyncAsk::Subscribe { series: series.clone() }).send().await {
            Ok(KlineSyncReply::Subscribed(info)) => {
                info!("📡 Subscribed {} on {} ({})", info.series, info.topic, info.state);
            }
            Ok(other) => warn!("⚠️ Unexpected reply subscribing {}: {:?}", series, other),
            Err(e) => error!("❌ Failed to subscribe {}: {:?}", series, e),
        }
    }

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<ExtractionEvent>();
    match (config.extraction.enabled, &config.extraction.state_file) {
        (true, Some(state_file)) => {
            let source = JsonFileSource::new(state_file.clone(), config.extraction.root_pointer.clone());
            let scheduler = ExtractionScheduler::new(config.extraction_settings());
            info!("🔍 Extracting market list from {}", state_file.display());
            tokio::spawn(scheduler.run(source, event_tx));
        }
        (true, None) => {
            warn!("⚠️ Extraction enabled but no state_file configured - skipping");
            drop(event_tx);
        }
        (false, _) => drop(event_tx),
    }

    let mut status_interval = tokio::time::interval(Duration::from_secs(STATUS_INTERVAL_SECS));
    info!("⏹️  Press Ctrl+C to stop");

    loop {
        tokio::select! {
            Some(event) = event_rx.recv() => {
                match serde_json::to_string(&event) {
                    Ok(line) => info!(target: "market_feeder::extraction::events", "{}", line),
                    Err(e) => warn!("⚠️ Failed to encode extraction event: {}", e),
                }
            }
            _ = status_interval.tick() => {
                log_status(&sync_actor, &kline_client).await;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("🛑 Shutdown signal received");
                break;
            }
        }
    }

    info!("🏁 Graceful shutdown completed");
    Ok(())
}

async fn log_status(sync_actor: &ActorRef<KlineSyncActor>, kline_client: &KlineApiClient) {
    match sync_actor.ask(KlineSyncAsk::GetConnectionStatus).send().await {
        Ok(KlineSyncReply::ConnectionStatus { status, stats }) => {
            info!(
                "💓 Stream {}: {} frames, {:.1}% accepted, {} bars applied, {} late bars dropped",
                status,
                stats.frames,
                stats.accepted_ratio() * 100.0,
                stats.bars_applied,
                stats.bars_dropped_late
            );
        }
        Ok(_) => {}
        Err(e) => warn!("⚠️ Status check failed: {:?}", e),
    }

    let fetches = kline_client.stats().await;
    info!(
        "🌐 Historical fetches: {} requests, {} bars, {} failures",
        fetches.requests,
        fetches.bars_received,
        fetches.failures()
    );

    if let Ok(KlineSyncReply::Subscriptions(subscriptions)) =
        sync_actor.ask(KlineSyncAsk::GetSubscriptions).send().await
    {
        for info in subscriptions {
            info!(
                "📊 {} {}: {} live bars, latest {:?}",
                info.series, info.state, info.live_bars, info.latest_open_time
            );
        }
    }
}
