//! Mail access error types.

use thiserror::Error;

/// Errors from token brokering and provider calls.
#[derive(Debug, Error)]
pub enum MailError {
    /// No usable credential; the user must re-authorize the mailbox.
    #[error("mail re-authorization required")]
    ReauthRequired,

    /// The provider rejected the bearer credential (HTTP 401-equivalent).
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Provider API returned a non-success status other than 401.
    #[error("provider API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body or reason.
        message: String,
    },

    /// Transport-level failure (connect, timeout, TLS).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Failed to decode a provider response.
    #[error("decode error: {0}")]
    Decode(String),

    /// Credential decryption failed.
    #[error("vault error: {0}")]
    Vault(#[from] mailscan_vault::VaultError),

    /// Persistence failure while reading or mutating connection records.
    #[error("database error: {0}")]
    Database(#[from] mailscan_db::DatabaseError),
}

impl MailError {
    /// Whether this failure means the bearer credential was stale.
    ///
    /// Drives the access wrapper's single refresh-and-retry; everything
    /// else propagates unmodified.
    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        match self {
            Self::Unauthorized(_) => true,
            Self::Api { status, .. } => *status == 401,
            Self::Http(e) => e.status().is_some_and(|s| s.as_u16() == 401),
            _ => false,
        }
    }
}

/// Result type alias for mail operations.
pub type Result<T> = std::result::Result<T, MailError>;
