//! Scan log storage: lifecycle rows and the atomic batch commit.
//!
//! The scan log is exclusively owned by the orchestrator. The
//! single-active-scan invariant is enforced here by a partial unique index
//! rather than an application-level existence check, so two racing
//! prepares cannot both insert.

use crate::error::{DatabaseError, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::fmt;
use std::str::FromStr;

/// Status of a scan.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    /// Candidate messages are being selected.
    Preparing,
    /// Batches are being processed.
    Running,
    /// All selected messages were processed.
    Completed,
    /// Stopped cooperatively after an in-flight batch drained.
    Stopped,
    /// Escalated failure; committed progress is preserved.
    Error,
}

impl ScanStatus {
    /// Whether the scan still occupies the per-user active slot.
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Preparing | Self::Running)
    }

    /// Whether the status is terminal and immutable.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Preparing => "preparing",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Stopped => "stopped",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

impl FromStr for ScanStatus {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "preparing" => Ok(Self::Preparing),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "stopped" => Ok(Self::Stopped),
            "error" => Ok(Self::Error),
            other => Err(DatabaseError::Decode(format!(
                "invalid scan status '{other}'"
            ))),
        }
    }
}

/// One scan attempt over a bounded mailbox window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanLog {
    /// Unique scan identifier.
    pub id: String,
    /// Owning user.
    pub user_id: String,
    /// Mail provider the scan reads from.
    pub provider: String,
    /// Current lifecycle status.
    pub status: ScanStatus,
    /// Candidate count fixed at preparation time.
    pub total: u32,
    /// Messages processed so far (never exceeds `total`).
    pub processed: u32,
    /// Messages classified as job-related so far.
    pub job_emails: u32,
    /// Classification tokens consumed so far.
    pub token_count: u64,
    /// Credits debited so far (non-decreasing).
    pub credits_spent: i64,
    /// Cooperative cancellation flag.
    pub stop_requested: bool,
    /// Ordered candidate message IDs selected at preparation time.
    pub mail_ids: Vec<String>,
    /// Inclusive window start, epoch milliseconds.
    pub period_start_ts: i64,
    /// Inclusive window end, epoch milliseconds.
    pub period_end_ts: i64,
    /// Newest message timestamp committed so far.
    pub last_email_ts: Option<i64>,
    /// Failure detail when `status` is `error`.
    pub error_message: Option<String>,
    /// When the scan was created.
    pub started_at: String,
    /// Last mutation timestamp.
    pub last_update_at: String,
}

#[derive(sqlx::FromRow)]
struct ScanLogRow {
    id: String,
    user_id: String,
    provider: String,
    status: String,
    total: i64,
    processed: i64,
    job_emails: i64,
    token_count: i64,
    credits_spent: i64,
    stop_requested: bool,
    mail_ids: String,
    period_start_ts: i64,
    period_end_ts: i64,
    last_email_ts: Option<i64>,
    error_message: Option<String>,
    started_at: String,
    last_update_at: String,
}

impl TryFrom<ScanLogRow> for ScanLog {
    type Error = DatabaseError;

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn try_from(row: ScanLogRow) -> Result<Self> {
        let mail_ids: Vec<String> = serde_json::from_str(&row.mail_ids)
            .map_err(|e| DatabaseError::Decode(format!("invalid mail_ids payload: {e}")))?;

        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            provider: row.provider,
            status: row.status.parse()?,
            total: row.total as u32,
            processed: row.processed as u32,
            job_emails: row.job_emails as u32,
            token_count: row.token_count as u64,
            credits_spent: row.credits_spent,
            stop_requested: row.stop_requested,
            mail_ids,
            period_start_ts: row.period_start_ts,
            period_end_ts: row.period_end_ts,
            last_email_ts: row.last_email_ts,
            error_message: row.error_message,
            started_at: row.started_at,
            last_update_at: row.last_update_at,
        })
    }
}

const SELECT_COLUMNS: &str = "id, user_id, provider, status, total, processed, job_emails, \
     token_count, credits_spent, stop_requested, mail_ids, period_start_ts, period_end_ts, \
     last_email_ts, error_message, started_at, last_update_at";

/// Fields required to create a scan in `preparing`.
#[derive(Debug)]
pub struct NewScanLog<'a> {
    /// Owning user.
    pub user_id: &'a str,
    /// Mail provider.
    pub provider: &'a str,
    /// Ordered candidate message IDs.
    pub mail_ids: &'a [String],
    /// Inclusive window start, epoch milliseconds.
    pub period_start_ts: i64,
    /// Inclusive window end, epoch milliseconds.
    pub period_end_ts: i64,
}

/// Insert a new scan in `preparing`.
///
/// # Errors
/// Returns `DatabaseError::Conflict` when the user already has an active
/// scan (the partial unique index rejects the insert).
pub async fn insert_preparing(pool: &SqlitePool, new: NewScanLog<'_>) -> Result<ScanLog> {
    let id = uuid::Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    let mail_ids_json = serde_json::to_string(new.mail_ids)
        .map_err(|e| DatabaseError::Decode(format!("mail_ids serialization failed: {e}")))?;
    let total = i64::try_from(new.mail_ids.len())
        .map_err(|_| DatabaseError::Decode("mail_ids length overflow".to_string()))?;

    sqlx::query(
        "INSERT INTO scan_logs \
         (id, user_id, provider, status, total, mail_ids, period_start_ts, period_end_ts, \
          started_at, last_update_at) \
         VALUES (?, ?, ?, 'preparing', ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(new.user_id)
    .bind(new.provider)
    .bind(total)
    .bind(&mail_ids_json)
    .bind(new.period_start_ts)
    .bind(new.period_end_ts)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await
    .map_err(DatabaseError::from_sqlx)?;

    find_by_id(pool, &id).await?.ok_or(DatabaseError::NotFound)
}

/// Fetch a scan by id.
pub async fn find_by_id(pool: &SqlitePool, id: &str) -> Result<Option<ScanLog>> {
    let row: Option<ScanLogRow> =
        sqlx::query_as(&format!("SELECT {SELECT_COLUMNS} FROM scan_logs WHERE id = ?"))
            .bind(id)
            .fetch_optional(pool)
            .await?;

    row.map(ScanLog::try_from).transpose()
}

/// Fetch the user's active (`preparing` or `running`) scan, if any.
pub async fn find_active_by_user(pool: &SqlitePool, user_id: &str) -> Result<Option<ScanLog>> {
    let row: Option<ScanLogRow> = sqlx::query_as(&format!(
        "SELECT {SELECT_COLUMNS} FROM scan_logs \
         WHERE user_id = ? AND status IN ('preparing', 'running')"
    ))
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    row.map(ScanLog::try_from).transpose()
}

/// Fetch the user's most recent scan regardless of status.
pub async fn latest_for_user(pool: &SqlitePool, user_id: &str) -> Result<Option<ScanLog>> {
    let row: Option<ScanLogRow> = sqlx::query_as(&format!(
        "SELECT {SELECT_COLUMNS} FROM scan_logs \
         WHERE user_id = ? ORDER BY created_at DESC, started_at DESC LIMIT 1"
    ))
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    row.map(ScanLog::try_from).transpose()
}

/// Transition `preparing` -> `running`. Idempotent when already running.
///
/// # Errors
/// Returns `DatabaseError::NotFound` when the scan does not exist or is
/// already terminal.
pub async fn mark_running(pool: &SqlitePool, id: &str) -> Result<ScanLog> {
    sqlx::query(
        "UPDATE scan_logs SET status = 'running', last_update_at = ? \
         WHERE id = ? AND status IN ('preparing', 'running')",
    )
    .bind(Utc::now().to_rfc3339())
    .bind(id)
    .execute(pool)
    .await?;

    let scan = find_by_id(pool, id).await?.ok_or(DatabaseError::NotFound)?;
    if scan.status == ScanStatus::Running {
        Ok(scan)
    } else {
        Err(DatabaseError::NotFound)
    }
}

/// Set the durable stop flag while the scan is still active.
///
/// Returns `true` when the flag was applied (or was already set on an
/// active scan), `false` when the scan is terminal or missing.
pub async fn request_stop(pool: &SqlitePool, id: &str) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE scan_logs SET stop_requested = 1, last_update_at = ? \
         WHERE id = ? AND status IN ('preparing', 'running')",
    )
    .bind(Utc::now().to_rfc3339())
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Move an active scan to a terminal status.
///
/// Terminal rows are never rewritten: the guard clause makes a second
/// finish a no-op reported as `NotFound`.
pub async fn finish(
    pool: &SqlitePool,
    id: &str,
    status: ScanStatus,
    error_message: Option<&str>,
) -> Result<ScanLog> {
    debug_assert!(status.is_terminal());

    let result = sqlx::query(
        "UPDATE scan_logs SET status = ?, error_message = ?, last_update_at = ? \
         WHERE id = ? AND status IN ('preparing', 'running')",
    )
    .bind(status.to_string())
    .bind(error_message)
    .bind(Utc::now().to_rfc3339())
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DatabaseError::NotFound);
    }
    find_by_id(pool, id).await?.ok_or(DatabaseError::NotFound)
}

/// One batch's durable effect: progress counters plus the ledger debit.
#[derive(Debug)]
pub struct BatchCommit<'a> {
    /// Scan being advanced.
    pub scan_id: &'a str,
    /// Owning user (ledger side).
    pub user_id: &'a str,
    /// Progress counter the batch was sliced from. The commit applies
    /// only while the stored counter still matches.
    pub expected_processed: u32,
    /// Messages processed in this batch.
    pub processed_delta: u32,
    /// Job-related messages found in this batch.
    pub job_emails_delta: u32,
    /// Tokens consumed in this batch.
    pub token_delta: u64,
    /// Credits to debit for this batch (>= 0).
    pub credits: i64,
    /// Newest message timestamp observed in this batch.
    pub last_email_ts: Option<i64>,
}

/// Commit one batch atomically: progress counters and the `scan_usage`
/// debit succeed or fail together.
///
/// The balance precondition is re-checked inside the transaction, so a
/// concurrent debit cannot slip the wallet negative between the
/// orchestrator's check and this commit.
///
/// The update also carries an optimistic guard on `processed`: two turns
/// racing over the same batch slice cannot both land, so a message is
/// never classified and debited twice.
///
/// # Errors
/// - `DatabaseError::InsufficientBalance` when the debit would overdraw;
///   nothing is written.
/// - `DatabaseError::Conflict` when the scan is no longer `running` or
///   another turn already advanced `processed`; nothing is written.
pub async fn commit_batch(pool: &SqlitePool, commit: BatchCommit<'_>) -> Result<ScanLog> {
    let mut tx = pool.begin().await?;

    if commit.credits > 0 {
        let available: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount), 0) FROM credit_transactions WHERE user_id = ?",
        )
        .bind(commit.user_id)
        .fetch_one(&mut *tx)
        .await?;

        if available < commit.credits {
            return Err(DatabaseError::InsufficientBalance {
                required: commit.credits,
                available,
            });
        }

        sqlx::query(
            "INSERT INTO credit_transactions \
             (id, user_id, amount, kind, reference_id, description) \
             VALUES (?, ?, ?, 'scan_usage', ?, ?)",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(commit.user_id)
        .bind(-commit.credits)
        .bind(commit.scan_id)
        .bind(format!("scan batch debit ({} tokens)", commit.token_delta))
        .execute(&mut *tx)
        .await?;
    }

    let result = sqlx::query(
        "UPDATE scan_logs SET \
           processed = processed + ?1, \
           job_emails = job_emails + ?2, \
           token_count = token_count + ?3, \
           credits_spent = credits_spent + ?4, \
           last_email_ts = CASE \
             WHEN ?5 IS NULL THEN last_email_ts \
             ELSE max(COALESCE(last_email_ts, 0), ?5) END, \
           last_update_at = ?6 \
         WHERE id = ?7 AND status = 'running' AND processed = ?8",
    )
    .bind(i64::from(commit.processed_delta))
    .bind(i64::from(commit.job_emails_delta))
    .bind(i64::try_from(commit.token_delta).unwrap_or(i64::MAX))
    .bind(commit.credits)
    .bind(commit.last_email_ts)
    .bind(Utc::now().to_rfc3339())
    .bind(commit.scan_id)
    .bind(i64::from(commit.expected_processed))
    .execute(&mut *tx)
    .await?;

    if result.rows_affected() == 0 {
        // Lost the race: rolling back also discards the debit insert.
        return Err(DatabaseError::Conflict);
    }

    tx.commit().await?;

    find_by_id(pool, commit.scan_id)
        .await?
        .ok_or(DatabaseError::NotFound)
}
