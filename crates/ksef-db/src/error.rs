//! # Storage Errors
//!
//! Everything the repositories can fail with, mapped from sqlx.
//!
//! ```text
//!   sqlx::Error / MigrateError
//!        │  From
//!        ▼
//!   DbError ──► SyncError::Persistence (ksef-sync, retryable)
//!                 └──► TriggerReport.error_kind = "persistence"
//! ```

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    /// A lookup matched no row.
    #[error("no {entity} with id {id}")]
    NotFound { entity: String, id: String },

    /// Insert collided with an existing key, e.g. a reused sync run id.
    #[error("Duplicate {field}")]
    UniqueViolation { field: String },

    /// A stored value could not be decoded.
    ///
    /// Seen when a watermark is not RFC 3339 or a date column was edited
    /// by hand.
    #[error("Corrupt {column} value '{value}': {reason}")]
    CorruptValue {
        column: String,
        value: String,
        reason: String,
    },

    /// The database file could not be opened or created, or the pool is
    /// closed.
    #[error("cannot open database: {0}")]
    ConnectionFailed(String),

    #[error("schema migration failed: {0}")]
    MigrationFailed(String),

    /// SQLite rejected a statement.
    #[error("statement failed: {0}")]
    QueryFailed(String),

    /// Begin or commit of a write batch failed.
    #[error("write batch failed: {0}")]
    TransactionFailed(String),

    /// No pooled connection became free in time.
    #[error("no database connection available")]
    PoolExhausted,

    #[error("database error: {0}")]
    Internal(String),
}

impl DbError {
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    pub fn corrupt(
        column: impl Into<String>,
        value: impl Into<String>,
        reason: impl ToString,
    ) -> Self {
        DbError::CorruptValue {
            column: column.into(),
            value: value.into(),
            reason: reason.to_string(),
        }
    }
}

/// ```text
/// RowNotFound           → NotFound
/// Database (UNIQUE ...) → UniqueViolation, otherwise QueryFailed
/// PoolTimedOut          → PoolExhausted
/// PoolClosed            → ConnectionFailed
/// anything else         → Internal
/// ```
impl From<sqlx::Error> for DbError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => DbError::not_found("row", "?"),
            sqlx::Error::Database(cause) => {
                let message = cause.message();
                // "UNIQUE constraint failed: <table>.<column>"
                match message.strip_prefix("UNIQUE constraint failed: ") {
                    Some(field) => DbError::UniqueViolation {
                        field: field.to_string(),
                    },
                    None => DbError::QueryFailed(message.to_string()),
                }
            }
            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,
            sqlx::Error::PoolClosed => DbError::ConnectionFailed("pool closed".into()),
            other => DbError::Internal(other.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(e.to_string())
    }
}

pub type DbResult<T> = Result<T, DbError>;
