//! Scan orchestration error taxonomy.
//!
//! Every failure crossing the orchestrator boundary is normalized into
//! one of these variants; repository-level errors never leak untranslated.

use mailscan_classify::ClassifyError;
use mailscan_db::DatabaseError;
use mailscan_mail::{MailError, UnauthorizedSignal};
use thiserror::Error;

/// Errors surfaced by scan operations.
#[derive(Debug, Error)]
pub enum ScanError {
    /// The requested window spans more days than allowed.
    #[error("requested range spans {days} days, maximum is {max_days}")]
    RangeTooLarge {
        /// Days the window spans.
        days: i64,
        /// Configured ceiling.
        max_days: u32,
    },

    /// The window matched more candidate messages than allowed.
    #[error("range matched {count} messages, maximum is {max}")]
    TooManyMessages {
        /// Candidate count found.
        count: usize,
        /// Configured ceiling.
        max: u32,
    },

    /// Malformed window bounds.
    #[error("invalid range: {0}")]
    InvalidRange(String),

    /// The user already has a scan in `preparing` or `running`.
    #[error("a scan is already active for this user")]
    ScanAlreadyActive,

    /// No such scan, or the scan is already terminal.
    #[error("scan not found")]
    ScanNotFound,

    /// `stop` was called with no active scan to stop.
    #[error("no active scan")]
    NoActiveScan,

    /// A batch debit would overdraw the wallet.
    #[error("insufficient credits: required {required}, available {available}")]
    InsufficientCredits {
        /// Credits the batch needs.
        required: i64,
        /// Current wallet balance.
        available: i64,
    },

    /// The mailbox credential is unusable and cannot be refreshed.
    #[error("mail re-authorization required")]
    ReauthRequired,

    /// Mail provider failure other than the variants above.
    #[error(transparent)]
    Mail(MailError),

    /// Classification failure.
    #[error(transparent)]
    Classify(#[from] ClassifyError),

    /// Persistence failure other than the variants above.
    #[error(transparent)]
    Database(DatabaseError),
}

impl From<MailError> for ScanError {
    fn from(e: MailError) -> Self {
        match e {
            MailError::ReauthRequired => Self::ReauthRequired,
            other => Self::Mail(other),
        }
    }
}

impl From<DatabaseError> for ScanError {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::Conflict => Self::ScanAlreadyActive,
            DatabaseError::NotFound => Self::ScanNotFound,
            DatabaseError::InsufficientBalance {
                required,
                available,
            } => Self::InsufficientCredits {
                required,
                available,
            },
            other => Self::Database(other),
        }
    }
}

impl UnauthorizedSignal for ScanError {
    fn is_unauthorized(&self) -> bool {
        match self {
            Self::Mail(e) => e.is_unauthorized(),
            Self::Classify(e) => e.is_unauthorized(),
            _ => false,
        }
    }
}

impl ScanError {
    /// Whether retrying the same call inside a batch could help.
    ///
    /// Validation, authorization, and ledger failures are final; only
    /// transport-level and provider-side failures are worth another
    /// attempt.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Mail(e) => !e.is_unauthorized(),
            Self::Classify(e) => !e.is_unauthorized(),
            _ => false,
        }
    }
}

/// Result type alias for scan operations.
pub type Result<T> = std::result::Result<T, ScanError>;
