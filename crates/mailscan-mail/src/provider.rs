//! Provider-agnostic mailbox read interface.

use crate::access::MailAccess;
use crate::error::Result;
use async_trait::async_trait;
use mailscan_core::{MailMessage, ScanWindow};

/// Read-only mailbox operations needed by the scan pipeline.
///
/// Implementations must surface provider 401s as errors for which
/// `MailError::is_unauthorized` returns true so the access wrapper can
/// trigger a token refresh.
#[async_trait]
pub trait MailProviderClient: Send + Sync {
    /// List message ids in the window, newest first, up to `max`.
    ///
    /// # Errors
    /// Fails on provider API errors or transport failures.
    async fn list_message_ids(
        &self,
        access: &MailAccess,
        window: &ScanWindow,
        max: usize,
    ) -> Result<Vec<String>>;

    /// Fetch a single message by id.
    ///
    /// # Errors
    /// Fails on provider API errors, transport failures, or malformed payloads.
    async fn get_message(&self, access: &MailAccess, id: &str) -> Result<MailMessage>;
}
