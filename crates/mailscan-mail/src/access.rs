//! Access brokering: token capability, process-local cache, and the
//! refresh-and-retry-once wrapper.
//!
//! Every outbound call that carries a mailbox bearer credential goes
//! through [`with_mail_access`]. The wrapper distinguishes "the credential
//! was stale" (refresh once, retry once) from "the call itself is broken"
//! (propagate unmodified) and never retries more than once.

use crate::error::{MailError, Result};
use async_trait::async_trait;
use mailscan_core::Provider;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;

/// A granted mailbox access: provider, address, and a bearer token.
#[derive(Debug, Clone)]
pub struct MailAccess {
    /// Provider the token is valid for.
    pub provider: Provider,
    /// Mailbox address.
    pub email: String,
    /// Short-lived bearer token.
    pub access_token: String,
}

/// Capability that produces mailbox access tokens for a user.
///
/// `handle_unauthorized` must invalidate any cached token and force a
/// refresh; it is called only after a provider rejected the credential.
#[async_trait]
pub trait AccessBroker: Send + Sync {
    /// Produce a usable access token, from cache or by refreshing.
    ///
    /// # Errors
    /// Returns `MailError::ReauthRequired` when no credential can be
    /// obtained at all.
    async fn get_access_token(&self, user_id: &str) -> Result<MailAccess>;

    /// Invalidate cached state and force one token refresh.
    ///
    /// # Errors
    /// Returns `MailError::ReauthRequired` when the refresh fails.
    async fn handle_unauthorized(&self, user_id: &str) -> Result<MailAccess>;
}

/// Process-local, best-effort access token cache keyed by user.
///
/// A miss just re-fetches; invalidation happens on 401 handling and on
/// disconnect. Nothing here is durable.
#[derive(Debug, Default)]
pub struct TokenCache {
    entries: Mutex<HashMap<String, MailAccess>>,
}

impl TokenCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a cached access for the user.
    #[must_use]
    pub fn get(&self, user_id: &str) -> Option<MailAccess> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(user_id)
            .cloned()
    }

    /// Store an access for the user.
    pub fn insert(&self, user_id: &str, access: MailAccess) {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(user_id.to_string(), access);
    }

    /// Drop any cached access for the user.
    pub fn invalidate(&self, user_id: &str) {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(user_id);
    }
}

/// Errors that can report whether they are a stale-credential signal.
///
/// Implemented by [`MailError`] and by higher-level error types that wrap
/// it, so the wrapper can be reused around composite units of work.
pub trait UnauthorizedSignal {
    /// True when the failure is an HTTP 401-equivalent.
    fn is_unauthorized(&self) -> bool;
}

impl UnauthorizedSignal for MailError {
    fn is_unauthorized(&self) -> bool {
        MailError::is_unauthorized(self)
    }
}

/// Run `op` with a mailbox access token, refreshing and retrying exactly
/// once on an unauthorized failure.
///
/// 1. Fetch a token (`REAUTH_REQUIRED` if unobtainable).
/// 2. Run `op`.
/// 3. On an unauthorized failure, refresh exactly once and retry once.
/// 4. Anything else, or a second unauthorized failure, propagates as-is.
///
/// # Errors
/// Propagates broker failures (converted via `From<MailError>`) and the
/// final failure of `op`.
pub async fn with_mail_access<T, E, F, Fut>(
    broker: &dyn AccessBroker,
    user_id: &str,
    op: F,
) -> std::result::Result<T, E>
where
    E: From<MailError> + UnauthorizedSignal,
    F: Fn(MailAccess) -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
{
    let access = broker.get_access_token(user_id).await?;

    match op(access).await {
        Ok(value) => Ok(value),
        Err(err) if err.is_unauthorized() => {
            tracing::debug!(user_id, "credential rejected, refreshing once");
            let refreshed = broker.handle_unauthorized(user_id).await?;
            op(refreshed).await
        }
        Err(err) => Err(err),
    }
}
