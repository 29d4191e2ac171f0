//! Classification error types.

use thiserror::Error;

/// Errors from the classification endpoint.
#[derive(Debug, Error)]
pub enum ClassifyError {
    /// The API rejected the request with a non-success status.
    #[error("classifier API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body or reason.
        message: String,
    },

    /// Transport-level failure (connect, timeout, TLS).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The response body could not be parsed into an analysis.
    #[error("parse error: {0}")]
    Parse(String),

    /// No API key was configured for the classifier.
    #[error("classifier API key not configured")]
    MissingApiKey,
}

impl ClassifyError {
    /// Whether this failure is an HTTP 401-equivalent.
    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        match self {
            Self::Api { status, .. } => *status == 401,
            Self::Http(e) => e.status().is_some_and(|s| s.as_u16() == 401),
            _ => false,
        }
    }
}

/// Result type alias for classification operations.
pub type Result<T> = std::result::Result<T, ClassifyError>;
