//! Mail connection records: encrypted credentials per (user, provider).
//!
//! The refresh token arrives here already encrypted (`mailscan-vault`);
//! this module never sees plaintext credential material.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

/// Credential record for one (user, provider) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConnection {
    /// Owning user.
    pub user_id: String,
    /// Mail provider.
    pub provider: String,
    /// Mailbox address.
    pub email: String,
    /// Encrypted refresh token (vault ciphertext).
    pub refresh_token_enc: String,
    /// Whether the connection is currently usable.
    pub connected: bool,
}

/// Create or replace the connection record (OAuth callback, token rotation).
pub async fn upsert(pool: &SqlitePool, conn: &MailConnection) -> Result<()> {
    sqlx::query(
        "INSERT INTO mail_connections \
         (user_id, provider, email, refresh_token_enc, connected, updated_at) \
         VALUES (?, ?, ?, ?, ?, datetime('now')) \
         ON CONFLICT(user_id, provider) DO UPDATE SET \
             email = excluded.email, \
             refresh_token_enc = excluded.refresh_token_enc, \
             connected = excluded.connected, \
             updated_at = datetime('now')",
    )
    .bind(&conn.user_id)
    .bind(&conn.provider)
    .bind(&conn.email)
    .bind(&conn.refresh_token_enc)
    .bind(conn.connected)
    .execute(pool)
    .await?;

    Ok(())
}

/// Fetch the connection record, if one exists.
pub async fn get(pool: &SqlitePool, user_id: &str, provider: &str) -> Result<Option<MailConnection>> {
    let row: Option<(String, String, String, String, bool)> = sqlx::query_as(
        "SELECT user_id, provider, email, refresh_token_enc, connected \
         FROM mail_connections WHERE user_id = ? AND provider = ?",
    )
    .bind(user_id)
    .bind(provider)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(
        |(user_id, provider, email, refresh_token_enc, connected)| MailConnection {
            user_id,
            provider,
            email,
            refresh_token_enc,
            connected,
        },
    ))
}

/// Flag the connection as unusable after a failed refresh.
pub async fn set_disconnected(pool: &SqlitePool, user_id: &str, provider: &str) -> Result<()> {
    sqlx::query(
        "UPDATE mail_connections SET connected = 0, updated_at = datetime('now') \
         WHERE user_id = ? AND provider = ?",
    )
    .bind(user_id)
    .bind(provider)
    .execute(pool)
    .await?;

    Ok(())
}

/// Remove the connection record (explicit disconnect, account deletion).
pub async fn delete(pool: &SqlitePool, user_id: &str, provider: &str) -> Result<()> {
    sqlx::query("DELETE FROM mail_connections WHERE user_id = ? AND provider = ?")
        .bind(user_id)
        .bind(provider)
        .execute(pool)
        .await?;

    Ok(())
}
