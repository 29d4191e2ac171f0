//! Database connection management.
//!
//! Provides the `Database` wrapper around a `SQLx` SQLite pool with
//! embedded migrations.

use crate::error::{DatabaseError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;

/// SQLite-backed store for scan logs, checkpoints, the credit ledger, and
/// mail connections.
#[derive(Debug, Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    /// Open (or create) the database at `path`.
    ///
    /// # Errors
    /// Returns `DatabaseError::Open` if the file cannot be opened or the
    /// connection options are invalid.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path_str = path.as_ref().to_str().ok_or_else(|| {
            DatabaseError::Open("invalid database path: not valid UTF-8".to_string())
        })?;

        let options = SqliteConnectOptions::from_str(path_str)
            .map_err(|e| DatabaseError::Open(format!("invalid connection string: {e}")))?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal);

        // In-memory databases are per-connection; cap the pool at one so
        // every query sees the same schema.
        let max_connections = if path_str.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| DatabaseError::Open(format!("failed to connect: {e}")))?;

        tracing::info!("Database pool opened at {}", path_str);
        Ok(Self { pool })
    }

    /// Open an in-memory database for tests and tooling.
    ///
    /// # Errors
    /// Returns `DatabaseError` if the connection fails.
    pub async fn in_memory() -> Result<Self> {
        Self::open(":memory:").await
    }

    /// Run all pending migrations.
    ///
    /// Migrations are embedded at compile time and tracked in the
    /// `_sqlx_migrations` table, so repeated runs are idempotent.
    ///
    /// # Errors
    /// Returns `DatabaseError::Migration` if any migration fails.
    pub async fn run_migrations(&self) -> Result<()> {
        tracing::info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| DatabaseError::Migration(format!("migration execution failed: {e}")))?;

        tracing::info!("Database migrations completed");
        Ok(())
    }

    /// Get a reference to the underlying `SQLx` pool.
    #[must_use]
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Close the connection pool gracefully.
    pub async fn close(self) {
        self.pool.close().await;
        tracing::info!("Database pool closed");
    }
}
