//! Mail checkpoints: the last successfully scanned timestamp per
//! (user, provider).
//!
//! The store itself is a plain upsert; monotonicity (never writing an
//! earlier timestamp over a later one) is the orchestrator's contract.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

/// Checkpoint row for one (user, provider) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailCheckpoint {
    /// Owning user.
    pub user_id: String,
    /// Mail provider.
    pub provider: String,
    /// Newest mail timestamp fully committed, epoch milliseconds.
    pub last_success_at: Option<i64>,
}

/// Fetch the checkpoint, if one exists.
pub async fn get(pool: &SqlitePool, user_id: &str, provider: &str) -> Result<Option<MailCheckpoint>> {
    let row: Option<(String, String, Option<i64>)> = sqlx::query_as(
        "SELECT user_id, provider, last_success_at FROM mail_checkpoints \
         WHERE user_id = ? AND provider = ?",
    )
    .bind(user_id)
    .bind(provider)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|(user_id, provider, last_success_at)| MailCheckpoint {
        user_id,
        provider,
        last_success_at,
    }))
}

/// Upsert the checkpoint timestamp for (user, provider).
pub async fn upsert_last_success_at(
    pool: &SqlitePool,
    user_id: &str,
    provider: &str,
    last_success_at: i64,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO mail_checkpoints (user_id, provider, last_success_at, updated_at) \
         VALUES (?, ?, ?, datetime('now')) \
         ON CONFLICT(user_id, provider) DO UPDATE SET \
             last_success_at = excluded.last_success_at, \
             updated_at = datetime('now')",
    )
    .bind(user_id)
    .bind(provider)
    .bind(last_success_at)
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;

    const USER: &str = "550e8400-e29b-41d4-a716-446655440000";

    async fn setup() -> Database {
        let db = Database::in_memory().await.expect("create test database");
        db.run_migrations().await.expect("run migrations");
        db
    }

    #[tokio::test]
    async fn test_missing_checkpoint_is_none() {
        let db = setup().await;
        let cp = get(db.pool(), USER, "gmail").await.expect("get");
        assert!(cp.is_none());
    }

    #[tokio::test]
    async fn test_upsert_creates_then_updates() {
        let db = setup().await;

        upsert_last_success_at(db.pool(), USER, "gmail", 1_000)
            .await
            .expect("first upsert");
        let cp = get(db.pool(), USER, "gmail")
            .await
            .expect("get")
            .expect("exists");
        assert_eq!(cp.last_success_at, Some(1_000));

        upsert_last_success_at(db.pool(), USER, "gmail", 2_000)
            .await
            .expect("second upsert");
        let cp = get(db.pool(), USER, "gmail")
            .await
            .expect("get")
            .expect("exists");
        assert_eq!(cp.last_success_at, Some(2_000));
    }

    #[tokio::test]
    async fn test_checkpoints_keyed_per_provider() {
        let db = setup().await;

        upsert_last_success_at(db.pool(), USER, "gmail", 500)
            .await
            .expect("upsert");

        let missing = get(db.pool(), USER, "outlook").await.expect("get");
        assert!(missing.is_none());
    }
}
