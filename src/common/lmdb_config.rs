/// Shared LMDB configuration so every opener uses identical environment options
use heed::{Env, EnvOpenOptions};
use std::path::Path;
use crate::common::constants::{LMDB_MAP_SIZE, LMDB_MAX_DBS, LMDB_MAX_READERS};
use crate::historical::errors::HistoricalDataError;
use crate::common::error_utils::ErrorContext;

/// Open the candle store environment, creating the directory if needed
pub fn open_lmdb_environment(path: &Path) -> Result<Env, HistoricalDataError> {
    std::fs::create_dir_all(path)
        .with_io_context(&format!("Failed to create LMDB directory {}", path.display()))?;

    // SAFETY: one environment per path per process; the store owns it for its lifetime.
    unsafe {
        EnvOpenOptions::new()
            .map_size(LMDB_MAP_SIZE)
            .max_dbs(LMDB_MAX_DBS)
            .max_readers(LMDB_MAX_READERS)
            .open(path)
            .with_db_context(&format!("Failed to open LMDB environment at: {}", path.display()))
    }
}
