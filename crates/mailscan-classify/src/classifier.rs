//! Classification interface.

use crate::error::Result;
use async_trait::async_trait;
use mailscan_core::{MailAnalysis, MailMessage, TokenUsage};

/// Output of a single classification call.
#[derive(Debug, Clone)]
pub struct ClassifyOutcome {
    /// The structured analysis of the message.
    pub analysis: MailAnalysis,
    /// Token usage billed for the call.
    pub usage: TokenUsage,
    /// Model that produced the analysis.
    pub model: String,
}

/// Classifies a mail message as job-related or not, extracting the
/// company, role, and application stage when present.
#[async_trait]
pub trait MailClassifier: Send + Sync {
    /// Classify one message.
    ///
    /// # Errors
    /// Fails on API errors, transport failures, or unparseable output.
    async fn classify(&self, message: &MailMessage) -> Result<ClassifyOutcome>;
}
