//! OAuth token refresh against the provider's token endpoint.

use crate::error::{MailError, Result};
use async_trait::async_trait;
use mailscan_core::Provider;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

/// Google OAuth2 token endpoint.
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Capability that exchanges a refresh token for a fresh access token.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// Exchange `refresh_token` for an access token.
    ///
    /// # Errors
    /// Returns `MailError::Unauthorized` when the grant was revoked and
    /// `MailError::Api`/`MailError::Http` for other endpoint failures.
    async fn refresh(&self, provider: Provider, refresh_token: &str) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Refresher for Google's token endpoint.
pub struct GoogleTokenRefresher {
    client_id: String,
    client_secret: String,
    http: Client,
    token_url: String,
}

impl GoogleTokenRefresher {
    /// Create a refresher with the given OAuth client credentials.
    ///
    /// # Errors
    /// Returns `MailError::Http` if the HTTP client cannot be built.
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        timeout_secs: u64,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            http,
            token_url: GOOGLE_TOKEN_URL.to_string(),
        })
    }

    /// Point the refresher at a different token endpoint (tests).
    #[must_use]
    pub fn with_token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = url.into();
        self
    }
}

#[async_trait]
impl TokenRefresher for GoogleTokenRefresher {
    async fn refresh(&self, provider: Provider, refresh_token: &str) -> Result<String> {
        debug_assert_eq!(provider, Provider::Gmail);

        let params = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];

        let response = self.http.post(&self.token_url).form(&params).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            // Revoked grants come back 400 invalid_grant or 401.
            if status.as_u16() == 401 || body.contains("invalid_grant") {
                return Err(MailError::Unauthorized(format!(
                    "refresh grant rejected: {body}"
                )));
            }
            return Err(MailError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| MailError::Decode(format!("token response: {e}")))?;

        Ok(token.access_token)
    }
}
