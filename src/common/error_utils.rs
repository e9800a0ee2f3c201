use crate::historical::errors::HistoricalDataError;

/// Helper trait for attaching context while converting into HistoricalDataError
pub trait ErrorContext<T> {
    fn with_db_context(self, context: &str) -> Result<T, HistoricalDataError>;
    fn with_io_context(self, context: &str) -> Result<T, HistoricalDataError>;
}

impl<T> ErrorContext<T> for Result<T, heed::Error> {
    fn with_db_context(self, context: &str) -> Result<T, HistoricalDataError> {
        self.map_err(|e| HistoricalDataError::DatabaseError(format!("{}: {}", context, e)))
    }

    fn with_io_context(self, context: &str) -> Result<T, HistoricalDataError> {
        self.map_err(|e| HistoricalDataError::DatabaseInitialization(format!("{}: {}", context, e)))
    }
}

impl<T> ErrorContext<T> for Result<T, std::io::Error> {
    fn with_db_context(self, context: &str) -> Result<T, HistoricalDataError> {
        self.map_err(|e| HistoricalDataError::DatabaseInitialization(format!("{}: {}", context, e)))
    }

    fn with_io_context(self, context: &str) -> Result<T, HistoricalDataError> {
        self.map_err(|e| {
            HistoricalDataError::Io(std::io::Error::new(e.kind(), format!("{}: {}", context, e)))
        })
    }
}
