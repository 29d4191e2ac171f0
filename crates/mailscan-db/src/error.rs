//! Database error types.

use thiserror::Error;

/// Database-specific errors.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to open or create database connection.
    #[error("failed to open database: {0}")]
    Open(String),

    /// Migration execution failed.
    #[error("migration failed: {0}")]
    Migration(String),

    /// Requested record was not found.
    #[error("record not found")]
    NotFound,

    /// A uniqueness guard rejected the write (e.g. a second active scan).
    #[error("conflicting record already exists")]
    Conflict,

    /// A `scan_usage` debit would drive the balance negative.
    #[error("insufficient balance: need {required}, have {available}")]
    InsufficientBalance {
        /// Credits the debit requires.
        required: i64,
        /// Credits currently available.
        available: i64,
    },

    /// Failed to decode a stored value.
    #[error("decode error: {0}")]
    Decode(String),

    /// Underlying `SQLx` error.
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Map a `SQLx` error, turning unique-constraint violations into
    /// [`DatabaseError::Conflict`].
    #[must_use]
    pub fn from_sqlx(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                return Self::Conflict;
            }
        }
        Self::Sqlx(err)
    }
}

/// Result type alias for database operations.
pub type Result<T> = std::result::Result<T, DatabaseError>;
