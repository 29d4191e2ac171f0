//! Mailbox connection lifecycle and token brokering.
//!
//! Refresh tokens live encrypted in `mail_connections`; access tokens are
//! minted on demand through a [`TokenRefresher`] and held only in the
//! process-local [`TokenCache`].

use crate::access::{AccessBroker, MailAccess, TokenCache};
use crate::error::{MailError, Result};
use crate::oauth::TokenRefresher;
use async_trait::async_trait;
use mailscan_db::connections::{self, MailConnection};
use mailscan_db::Database;
use mailscan_core::Provider;
use mailscan_vault::TokenCipher;
use std::sync::Arc;
use tracing::{info, warn};

/// Manages mailbox connections and brokers access tokens for them.
pub struct ConnectionService {
    db: Database,
    cipher: TokenCipher,
    refresher: Arc<dyn TokenRefresher>,
    cache: TokenCache,
}

impl ConnectionService {
    /// Create a service over the given database and refresh client.
    #[must_use]
    pub fn new(db: Database, cipher: TokenCipher, refresher: Arc<dyn TokenRefresher>) -> Self {
        Self {
            db,
            cipher,
            refresher,
            cache: TokenCache::new(),
        }
    }

    /// Store a mailbox connection, encrypting the refresh token at rest.
    ///
    /// Replaces any existing connection for the same user and provider.
    ///
    /// # Errors
    /// Fails if encryption or the database write fails.
    pub async fn connect(
        &self,
        user_id: &str,
        provider: Provider,
        email: &str,
        refresh_token: &str,
    ) -> Result<()> {
        let refresh_token_enc = self.cipher.encrypt(refresh_token)?;

        connections::upsert(
            self.db.pool(),
            &MailConnection {
                user_id: user_id.to_string(),
                provider: provider.to_string(),
                email: email.to_string(),
                refresh_token_enc,
                connected: true,
            },
        )
        .await?;

        self.cache.invalidate(user_id);
        info!(user_id, %provider, "mail connection stored");
        Ok(())
    }

    /// Remove a mailbox connection and drop any cached token.
    ///
    /// # Errors
    /// Fails if the database write fails.
    pub async fn disconnect(&self, user_id: &str, provider: Provider) -> Result<()> {
        connections::delete(self.db.pool(), user_id, &provider.to_string()).await?;
        self.cache.invalidate(user_id);
        info!(user_id, %provider, "mail connection removed");
        Ok(())
    }

    /// Look up the stored connection for the user, if any.
    ///
    /// # Errors
    /// Fails if the database read fails.
    pub async fn get_connection(&self, user_id: &str) -> Result<Option<MailConnection>> {
        Ok(connections::get(self.db.pool(), user_id, &Provider::Gmail.to_string()).await?)
    }

    /// Load the connection row, decrypt its refresh token, and mint a
    /// fresh access token from it.
    async fn mint_access(&self, user_id: &str) -> Result<MailAccess> {
        let conn = connections::get(self.db.pool(), user_id, &Provider::Gmail.to_string())
            .await?
            .ok_or(MailError::ReauthRequired)?;
        if !conn.connected {
            return Err(MailError::ReauthRequired);
        }

        let provider: Provider = conn
            .provider
            .parse()
            .map_err(|_| MailError::Decode(format!("unknown provider {:?}", conn.provider)))?;
        let refresh_token = self.cipher.decrypt(&conn.refresh_token_enc)?;

        match self.refresher.refresh(provider, &refresh_token).await {
            Ok(access_token) => Ok(MailAccess {
                provider,
                email: conn.email,
                access_token,
            }),
            Err(MailError::Unauthorized(reason)) => {
                // The grant itself was revoked; keep the row but mark it
                // unusable so callers surface re-authorization.
                warn!(user_id, reason, "refresh grant rejected, disconnecting");
                connections::set_disconnected(self.db.pool(), user_id, &conn.provider).await?;
                self.cache.invalidate(user_id);
                Err(MailError::ReauthRequired)
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl AccessBroker for ConnectionService {
    async fn get_access_token(&self, user_id: &str) -> Result<MailAccess> {
        if let Some(access) = self.cache.get(user_id) {
            return Ok(access);
        }

        let access = self.mint_access(user_id).await?;
        self.cache.insert(user_id, access.clone());
        Ok(access)
    }

    async fn handle_unauthorized(&self, user_id: &str) -> Result<MailAccess> {
        self.cache.invalidate(user_id);

        let access = self.mint_access(user_id).await?;
        self.cache.insert(user_id, access.clone());
        Ok(access)
    }
}
