pub mod constants;
pub mod error_utils;
pub mod lmdb_config;
