//! Error types for Leara

use rusqlite::ErrorCode;
use thiserror::Error;

/// Result type alias for Leara operations
pub type Result<T> = std::result::Result<T, LearaError>;

/// Main error type for Leara
#[derive(Error, Debug)]
pub enum LearaError {
    /// Malformed input, rejected before the store is touched
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A uniqueness constraint or concurrent write could not be resolved; retry
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Pool exhaustion, connection failure or aborted transaction; retry with backoff
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Summary generation failed: {0}")]
    Generation(String),

    #[error("Database error: {0}")]
    Database(rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl LearaError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        LearaError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LearaError::Conflict(_) | LearaError::StoreUnavailable(_)
        )
    }

    /// Short machine-readable name of the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            LearaError::Validation(_) => "validation_error",
            LearaError::NotFound { .. } => "not_found",
            LearaError::Conflict(_) => "conflict",
            LearaError::StoreUnavailable(_) => "store_unavailable",
            LearaError::Generation(_) => "generation_error",
            _ => "internal_error",
        }
    }

    /// HTTP status code used by the API layer
    pub fn status_code(&self) -> u16 {
        match self {
            LearaError::Validation(_) => 400,
            LearaError::NotFound { .. } => 404,
            LearaError::Conflict(_) => 409,
            LearaError::Generation(_) => 502,
            LearaError::StoreUnavailable(_) => 503,
            _ => 500,
        }
    }
}

impl From<rusqlite::Error> for LearaError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(
                ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::CannotOpen
                | ErrorCode::SystemIoFailure
                | ErrorCode::DiskFull
                | ErrorCode::ReadOnly
                | ErrorCode::OperationInterrupted,
            ) => LearaError::StoreUnavailable(err.to_string()),
            Some(ErrorCode::ConstraintViolation) => LearaError::Conflict(err.to_string()),
            _ => LearaError::Database(err),
        }
    }
}
