/// Database and storage constants
// LMDB configuration
pub const LMDB_MAP_SIZE: usize = 1024 * 1024 * 1024; // 1GB shared by every series
pub const LMDB_MAX_DBS: u32 = 4;
pub const LMDB_MAX_READERS: u32 = 256;

// Database names
pub const CANDLES_DB_NAME: &str = "candles";
pub const SERIES_INDEX_DB_NAME: &str = "series_index";

// Separates the series prefix from the zero-padded bucket time in candle keys
pub const CANDLE_KEY_SEPARATOR: char = '|';
pub const CANDLE_KEY_TIME_WIDTH: usize = 15;

// Backfill defaults
pub const DEFAULT_MAX_FETCH_LIMIT: u32 = 500;
pub const DEFAULT_PRUNE_HIGH_WATER: usize = 1000;
pub const DEFAULT_PRUNE_LOW_WATER: usize = 500;
pub const DEFAULT_FETCH_TIMEOUT_SECONDS: u64 = 10;
pub const DEFAULT_HYDRATE_TARGET_COUNT: usize = 500;

// Historical endpoint
pub const DEFAULT_KLINE_URL_TEMPLATE: &str = "https://dquery.sintral.io/u-kline/v1/k-line/candles?address={address}&interval={interval}&limit={limit}&platform={platform}";
pub const DEFAULT_REQUEST_TIMEOUT_SECONDS: u64 = 15;

// Push stream
pub const DEFAULT_STREAM_URL: &str = "wss://nbstream.binance.com/w3w/wsa/stream";
pub const DEFAULT_HEARTBEAT_INTERVAL_SECONDS: u64 = 20;
pub const DEFAULT_RECONNECT_DELAY_SECONDS: u64 = 3;
pub const KLINE_TOPIC_PREFIX: &str = "kl";
pub const MAX_LIVE_BARS_IN_MEMORY: usize = 1000;

// Extraction defaults
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_NODE_BUDGET_PER_SLICE: usize = 2000;
pub const DEFAULT_MAX_SLICES_PER_PASS: usize = 50;
pub const DEFAULT_MAX_SEARCH_DEPTH: usize = 12;
pub const DEFAULT_MAX_ANCESTORS: usize = 15;
pub const DEFAULT_MIN_ARRAY_LEN: usize = 1;
pub const DEFAULT_ID_FIELD: &str = "contractAddress";
pub const DEFAULT_STATE_SLOTS: [&str; 2] = ["props", "state"];
pub const DEFAULT_REQUIRED_KEYS: [&str; 3] = ["contractAddress", "symbol", "price"];
pub const DEFAULT_WATCHED_FIELDS: [&str; 17] = [
    "icon",
    "symbol",
    "price",
    "marketCap",
    "chain",
    "chainId",
    "contractAddress",
    "volume1m",
    "volume5m",
    "volume1h",
    "volume4h",
    "volume24h",
    "priceChange1m",
    "priceChange5m",
    "priceChange1h",
    "priceChange4h",
    "priceChange24h",
];
