//! `config.toml` loading. Every section and field has a default, so an empty
//! file is a valid configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::common::constants::*;
use crate::extraction::scheduler::ExtractionSettings;
use crate::extraction::search::{ArraySignature, SearchLimits};
use crate::historical::reconciler::ReconcilerConfig;
use crate::historical::structs::SeriesKey;
use crate::logging::{LogRotation, LoggingConfig};
use crate::websocket::topics::ChainRegistry;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApplicationSection {
    pub storage_path: PathBuf,
}

impl Default for ApplicationSection {
    fn default() -> Self {
        Self {
            storage_path: PathBuf::from("lmdb_data"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackfillSection {
    pub max_fetch_limit: u32,
    pub prune_high_water: usize,
    pub prune_low_water: usize,
    pub fetch_timeout_secs: u64,
    pub hydrate_gaps: bool,
    pub hydrate_target_count: usize,
}

impl Default for BackfillSection {
    fn default() -> Self {
        Self {
            max_fetch_limit: DEFAULT_MAX_FETCH_LIMIT,
            prune_high_water: DEFAULT_PRUNE_HIGH_WATER,
            prune_low_water: DEFAULT_PRUNE_LOW_WATER,
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT_SECONDS,
            hydrate_gaps: false,
            hydrate_target_count: DEFAULT_HYDRATE_TARGET_COUNT,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiSection {
    /// URL template with `{address}`, `{interval}`, `{limit}` and `{platform}`
    pub base_url: String,
    pub request_timeout_secs: u64,
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_KLINE_URL_TEMPLATE.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECONDS,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamSection {
    pub url: String,
    pub heartbeat_interval_secs: u64,
    pub reconnect_delay_secs: u64,
    /// Extra chain → series-id entries layered over the built-in table
    pub chains: std::collections::BTreeMap<String, u32>,
}

impl Default for StreamSection {
    fn default() -> Self {
        Self {
            url: DEFAULT_STREAM_URL.to_string(),
            heartbeat_interval_secs: DEFAULT_HEARTBEAT_INTERVAL_SECONDS,
            reconnect_delay_secs: DEFAULT_RECONNECT_DELAY_SECONDS,
            chains: Default::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExtractionSection {
    pub enabled: bool,
    pub tick_interval_ms: u64,
    pub node_budget_per_slice: usize,
    pub max_slices_per_pass: usize,
    pub max_depth: usize,
    pub max_ancestors: usize,
    pub state_slots: Vec<String>,
    pub min_array_len: usize,
    pub required_keys: Vec<String>,
    pub id_field: String,
    pub watched_fields: Vec<String>,
    /// JSON document polled as the host state
    pub state_file: Option<PathBuf>,
    /// JSON pointer to the root handle inside `state_file`
    pub root_pointer: String,
}

impl Default for ExtractionSection {
    fn default() -> Self {
        let owned = |items: &[&str]| -> Vec<String> { items.iter().map(|s| s.to_string()).collect() };
        Self {
            enabled: true,
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            node_budget_per_slice: DEFAULT_NODE_BUDGET_PER_SLICE,
            max_slices_per_pass: DEFAULT_MAX_SLICES_PER_PASS,
            max_depth: DEFAULT_MAX_SEARCH_DEPTH,
            max_ancestors: DEFAULT_MAX_ANCESTORS,
            state_slots: owned(&DEFAULT_STATE_SLOTS),
            min_array_len: DEFAULT_MIN_ARRAY_LEN,
            required_keys: owned(&DEFAULT_REQUIRED_KEYS),
            id_field: DEFAULT_ID_FIELD.to_string(),
            watched_fields: owned(&DEFAULT_WATCHED_FIELDS),
            state_file: None,
            root_pointer: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
    pub log_dir: String,
    pub rotation: LogRotation,
    pub file_prefix: String,
    pub console: bool,
    pub file_json_format: bool,
    pub cleanup_days: Option<u32>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        let defaults = LoggingConfig::default();
        Self {
            level: defaults.level_filter,
            log_dir: defaults.log_dir,
            rotation: defaults.rotation,
            file_prefix: defaults.file_prefix,
            console: defaults.console,
            file_json_format: defaults.file_json_format,
            cleanup_days: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionEntry {
    pub address: String,
    pub chain: String,
    pub interval: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub application: ApplicationSection,
    pub backfill: BackfillSection,
    pub api: ApiSection,
    pub stream: StreamSection,
    pub extraction: ExtractionSection,
    pub logging: LoggingSection,
    pub subscriptions: Vec<SubscriptionEntry>,
}

impl AppConfig {
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let backfill = &self.backfill;
        if backfill.prune_high_water <= backfill.prune_low_water {
            return Err(ConfigError::Invalid(format!(
                "prune_high_water ({}) must exceed prune_low_water ({})",
                backfill.prune_high_water, backfill.prune_low_water
            )));
        }
        if backfill.max_fetch_limit == 0 {
            return Err(ConfigError::Invalid("max_fetch_limit must be positive".to_string()));
        }
        if self.extraction.node_budget_per_slice == 0 {
            return Err(ConfigError::Invalid("node_budget_per_slice must be positive".to_string()));
        }
        if self.extraction.state_slots.is_empty() {
            return Err(ConfigError::Invalid("state_slots cannot be empty".to_string()));
        }
        self.series_keys()?;
        Ok(())
    }

    /// Configured initial subscriptions as validated series keys
    pub fn series_keys(&self) -> Result<Vec<SeriesKey>, ConfigError> {
        self.subscriptions
            .iter()
            .map(|entry| {
                SeriesKey::new(&entry.address, &entry.chain, &entry.interval)
                    .map_err(|e| ConfigError::Invalid(format!("subscription {}: {}", entry.address, e)))
            })
            .collect()
    }

    pub fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            max_fetch_limit: self.backfill.max_fetch_limit,
            prune_high_water: self.backfill.prune_high_water,
            prune_low_water: self.backfill.prune_low_water,
            fetch_timeout: Duration::from_secs(self.backfill.fetch_timeout_secs),
            hydrate_gaps: self.backfill.hydrate_gaps,
            // A hydrated window never outgrows what one fetch can refill
            hydrate_target_count: self
                .backfill
                .hydrate_target_count
                .min(self.backfill.max_fetch_limit as usize),
        }
    }

    pub fn chain_registry(&self) -> ChainRegistry {
        ChainRegistry::with_overrides(self.stream.chains.iter().map(|(chain, id)| (chain, *id)))
    }

    pub fn extraction_settings(&self) -> ExtractionSettings {
        let extraction = &self.extraction;
        ExtractionSettings {
            tick_interval: Duration::from_millis(extraction.tick_interval_ms),
            node_budget_per_slice: extraction.node_budget_per_slice,
            max_slices_per_pass: extraction.max_slices_per_pass,
            limits: SearchLimits {
                max_depth: extraction.max_depth,
                max_ancestors: extraction.max_ancestors,
                slots: extraction.state_slots.clone(),
            },
            signature: ArraySignature::new(extraction.min_array_len, extraction.required_keys.clone()),
            id_field: extraction.id_field.clone(),
            watched_fields: extraction.watched_fields.clone(),
        }
    }

    pub fn logging_config(&self) -> LoggingConfig {
        LoggingConfig {
            log_dir: self.logging.log_dir.clone(),
            level_filter: self.logging.level.clone(),
            rotation: self.logging.rotation,
            file_prefix: self.logging.file_prefix.clone(),
            console: self.logging.console,
            file_json_format: self.logging.file_json_format,
        }
    }
}
