use thiserror::Error;

#[derive(Error, Debug)]
pub enum HistoricalDataError {
    #[error("Heed error: {0}")]
    Heed(#[from] heed::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid interval: {0}")]
    InvalidInterval(String),
    #[error("Unsupported chain: {0}")]
    UnsupportedChain(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Database initialization error: {0}")]
    DatabaseInitialization(String),
    #[error("Database error: {0}")]
    DatabaseError(String),
}
