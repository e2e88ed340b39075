//! Error types for the bulletin report engine
//!
//! All errors use thiserror for structured error handling.
//! Per-id rejections and data-quality warnings are not errors: they are
//! collected into outcome objects. Only failures that stop an invocation
//! (store unreachable, bad input, broken settings) surface as `AppError`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    /// The record store could not be reached or rejected a query.
    #[error("Record store unavailable: {0}")]
    Store(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Bulletin record not found: {0}")]
    RecordNotFound(i64),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Report store error: {0}")]
    ReportStore(String),

    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// True when the underlying store error is a missing table or column,
    /// i.e. the schema lags behind what the query expects.
    pub fn is_missing_schema(&self) -> bool {
        match self {
            AppError::Store(sqlx::Error::Database(db)) => {
                let message = db.message();
                message.contains("no such table") || message.contains("no such column")
            }
            _ => false,
        }
    }
}

impl serde::Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializes_as_display_string() {
        let err = AppError::RecordNotFound(42);
        assert_eq!(
            serde_json::to_string(&err).unwrap(),
            "\"Bulletin record not found: 42\""
        );
    }

    #[test]
    fn test_closed_pool_is_not_missing_schema() {
        let err = AppError::Store(sqlx::Error::PoolClosed);
        assert!(!err.is_missing_schema());
    }
}
