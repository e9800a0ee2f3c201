//! Dual logging: human-readable console plus rotating JSON files.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing_appender::non_blocking;
use tracing_subscriber::{
    fmt::{self, time::ChronoUtc},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub log_dir: String,
    /// Filter directive, e.g. "info,market_feeder=debug". `RUST_LOG` wins when set.
    pub level_filter: String,
    pub rotation: LogRotation,
    /// Log files are named `<file_prefix>.<date>`
    pub file_prefix: String,
    pub console: bool,
    pub file_json_format: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    Daily,
    Hourly,
    Never,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: "logs".to_string(),
            level_filter: "info,market_feeder=info".to_string(),
            rotation: LogRotation::Daily,
            file_prefix: "market_feeder.log".to_string(),
            console: true,
            file_json_format: true,
        }
    }
}

/// Install the console and file layers.
///
/// The returned guard owns the background writer thread; drop it only at shutdown.
pub fn init_dual_logging(
    config: &LoggingConfig,
) -> Result<tracing_appender::non_blocking::WorkerGuard, Box<dyn std::error::Error + Send + Sync>> {
    std::fs::create_dir_all(&config.log_dir)?;

    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level_filter));

    let file_appender = match config.rotation {
        LogRotation::Daily => tracing_appender::rolling::daily(&config.log_dir, &config.file_prefix),
        LogRotation::Hourly => tracing_appender::rolling::hourly(&config.log_dir, &config.file_prefix),
        LogRotation::Never => tracing_appender::rolling::never(&config.log_dir, &config.file_prefix),
    };
    let (file_writer, guard) = non_blocking(file_appender);

    let console_layer = config.console.then(|| {
        fmt::layer()
            .with_writer(std::io::stdout)
            .with_ansi(true)
            .with_target(true)
            .with_timer(ChronoUtc::new("%Y-%m-%d %H:%M:%S%.3f UTC".to_string()))
            .with_filter(filter())
    });

    let file_layer = if config.file_json_format {
        fmt::layer()
            .json()
            .with_writer(file_writer)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(true)
            .with_timer(ChronoUtc::new("%Y-%m-%dT%H:%M:%S%.3fZ".to_string()))
            .with_filter(filter())
            .boxed()
    } else {
        fmt::layer()
            .with_writer(file_writer)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(true)
            .with_timer(ChronoUtc::new("%Y-%m-%d %H:%M:%S%.3f UTC".to_string()))
            .with_filter(filter())
            .boxed()
    };

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    tracing::info!(
        log_dir = %config.log_dir,
        rotation = ?config.rotation,
        json_format = config.file_json_format,
        "📁 Dual logging initialized"
    );

    Ok(guard)
}

/// Log files in `log_dir` written under `file_prefix`, oldest first.
pub fn get_current_log_files(log_dir: &Path, file_prefix: &str) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(log_dir)
        .map(|entries| {
            entries
                .flatten()
                .map(|entry| entry.path())
                .filter(|path| {
                    path.is_file()
                        && path
                            .file_name()
                            .and_then(|name| name.to_str())
                            .map(|name| name.starts_with(file_prefix))
                            .unwrap_or(false)
                })
                .collect()
        })
        .unwrap_or_default();

    files.sort();
    files
}

/// Remove log files older than `keep_days`. Returns how many were deleted.
pub fn cleanup_old_logs(log_dir: &Path, file_prefix: &str, keep_days: u32) -> usize {
    let retention = std::time::Duration::from_secs(u64::from(keep_days) * 24 * 3600);
    let Some(cutoff) = std::time::SystemTime::now().checked_sub(retention) else {
        tracing::debug!("Log retention of {} days reaches past the clock origin, nothing to clean", keep_days);
        return 0;
    };

    let removed = get_current_log_files(log_dir, file_prefix)
        .into_iter()
        .filter(|path| {
            path.metadata()
                .and_then(|m| m.modified())
                .map(|modified| modified < cutoff)
                .unwrap_or(false)
        })
        .filter(|path| std::fs::remove_file(path).is_ok())
        .count();

    if removed > 0 {
        tracing::info!("🧹 Cleaned up {} old log files (older than {} days)", removed, keep_days);
    }
    removed
}
