//! Shared types used across the mailscan pipeline.
//!
//! This module defines the common newtypes and enums that provide type
//! safety and clear domain modeling for scans, messages, and billing.

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Newtype for user identifiers with validation.
///
/// User IDs must be valid UUIDs (any version), matching the identity
/// provider's subject format.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    /// Create a new `UserId` from a string.
    ///
    /// # Errors
    /// Returns error if the ID is not a valid UUID.
    pub fn new(id: impl Into<String>) -> Result<Self, CoreError> {
        let id = id.into();
        uuid::Uuid::parse_str(&id).map_err(|_| {
            CoreError::Validation(format!("invalid user ID: must be a UUID, got '{id}'"))
        })?;
        Ok(Self(id))
    }

    /// Get the inner string value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Newtype for scan identifiers.
///
/// Scan IDs are opaque; new ones are generated as UUID v4.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScanId(String);

impl ScanId {
    /// Wrap an existing identifier (e.g. loaded from storage).
    #[must_use]
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Create a new random `ScanId` using UUID v4.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get the inner string value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Supported mail providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Google Gmail via the REST API.
    Gmail,
}

impl Provider {
    /// Stable string form used in storage and logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gmail => "gmail",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gmail" => Ok(Self::Gmail),
            other => Err(CoreError::Validation(format!(
                "unknown mail provider '{other}'"
            ))),
        }
    }
}

/// An inclusive time window over a mailbox, in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanWindow {
    /// Start of the window (inclusive).
    pub start_ts: i64,
    /// End of the window (inclusive).
    pub end_ts: i64,
}

impl ScanWindow {
    /// Create a window, validating that start does not exceed end.
    ///
    /// # Errors
    /// Returns error when `start_ts > end_ts` or either bound is negative.
    pub fn new(start_ts: i64, end_ts: i64) -> Result<Self, CoreError> {
        if start_ts < 0 || end_ts < 0 {
            return Err(CoreError::Validation(
                "scan window bounds must be non-negative timestamps".to_string(),
            ));
        }
        if start_ts > end_ts {
            return Err(CoreError::Validation(format!(
                "scan window start {start_ts} exceeds end {end_ts}"
            )));
        }
        Ok(Self { start_ts, end_ts })
    }

    /// Window span in whole days, rounded up.
    #[must_use]
    pub fn span_days(&self) -> i64 {
        const DAY_MS: i64 = 24 * 60 * 60 * 1000;
        let span = self.end_ts - self.start_ts;
        (span + DAY_MS - 1) / DAY_MS
    }
}

/// A fetched mail message, normalized across providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailMessage {
    /// Provider-assigned message identifier.
    pub id: String,
    /// Provider-assigned conversation/thread identifier; empty when the
    /// provider reports none.
    pub thread_id: String,
    /// Subject header; empty when absent.
    pub subject: String,
    /// From header; empty when absent.
    pub from: String,
    /// Plain-text body or snippet.
    pub body: String,
    /// Message timestamp in epoch milliseconds; 0 when unknown.
    pub date_ts: i64,
}

/// Token accounting reported by a classification call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens consumed by the prompt.
    pub prompt_tokens: u32,
    /// Tokens produced in the completion.
    pub completion_tokens: u32,
    /// Total tokens billed for the call.
    pub total_tokens: u32,
}

/// Lifecycle stage of a job-related message, as reported by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobMailStatus {
    /// Application submitted / acknowledged.
    Applied,
    /// Interview scheduling or follow-up.
    Interview,
    /// An offer was extended.
    Offer,
    /// Application rejected.
    Rejected,
    /// Job-related but stage could not be determined.
    Unknown,
}

/// Result of classifying one mail message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailAnalysis {
    /// Whether the message relates to a job application.
    pub is_job_email: bool,
    /// Company name, when identifiable.
    pub company: Option<String>,
    /// Role/position, when identifiable.
    pub role: Option<String>,
    /// Application lifecycle stage, when job-related.
    pub status: Option<JobMailStatus>,
}
