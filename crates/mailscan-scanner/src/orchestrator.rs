//! Scan orchestration state machine.
//!
//! Owns the `scan_logs` lifecycle: `preparing` -> `running` -> one of
//! `completed`, `stopped`, `error`. Batches within a scan are strictly
//! sequential; each batch's progress counters and credit debit commit in
//! one transaction, and the mail checkpoint advances only after that
//! commit is durable.

use crate::error::{Result, ScanError};
use mailscan_classify::MailClassifier;
use mailscan_core::{credits_for_tokens, Provider, ScanConfig, ScanWindow};
use mailscan_db::{checkpoints, scan_logs, Database, DatabaseError, ScanLog, ScanStatus};
use mailscan_mail::{with_mail_access, AccessBroker, MailProviderClient};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// What a worker turn accomplished for one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStep {
    /// A batch committed; `remaining` messages are still unprocessed.
    BatchCommitted {
        /// Messages left after this batch.
        remaining: u32,
    },
    /// The scan reached `completed`.
    Completed,
    /// The scan honored a stop request and reached `stopped`.
    Stopped,
    /// The user has no scan in `preparing` or `running`.
    NoActiveScan,
    /// Another turn advanced the scan concurrently; this one wrote
    /// nothing.
    Superseded,
}

/// Accumulated effect of one batch before it is committed.
#[derive(Debug, Default)]
struct BatchTotals {
    processed: u32,
    job_emails: u32,
    tokens: u64,
    newest_ts: Option<i64>,
}

/// Coordinates scan preparation, batch execution, and terminal
/// transitions for all users.
pub struct ScanOrchestrator {
    db: Database,
    broker: Arc<dyn AccessBroker>,
    mail: Arc<dyn MailProviderClient>,
    classifier: Arc<dyn MailClassifier>,
    config: ScanConfig,
}

impl ScanOrchestrator {
    /// Create an orchestrator over the given collaborators.
    #[must_use]
    pub fn new(
        db: Database,
        broker: Arc<dyn AccessBroker>,
        mail: Arc<dyn MailProviderClient>,
        classifier: Arc<dyn MailClassifier>,
        config: ScanConfig,
    ) -> Self {
        Self {
            db,
            broker,
            mail,
            classifier,
            config,
        }
    }

    /// Scan configuration in effect.
    #[must_use]
    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Create a scan in `preparing` over the requested window.
    ///
    /// When `range` is omitted the window runs from the user's checkpoint
    /// (or the configured default lookback) up to now. The candidate
    /// message set is fixed here; `total` never changes afterwards.
    ///
    /// # Errors
    /// - `ScanError::InvalidRange` when the bounds are malformed
    /// - `ScanError::RangeTooLarge` when the window exceeds `max_days`
    /// - `ScanError::TooManyMessages` when the candidate count exceeds
    ///   `max_messages`
    /// - `ScanError::ScanAlreadyActive` when the user already has an
    ///   active scan; the persistence-level unique guard makes this hold
    ///   even for two racing calls
    pub async fn prepare(
        &self,
        user_id: &str,
        provider: Provider,
        range: Option<(i64, i64)>,
    ) -> Result<ScanLog> {
        if scan_logs::find_active_by_user(self.db.pool(), user_id)
            .await?
            .is_some()
        {
            return Err(ScanError::ScanAlreadyActive);
        }

        let window = match range {
            Some((start_ts, end_ts)) => ScanWindow::new(start_ts, end_ts)
                .map_err(|e| ScanError::InvalidRange(e.to_string()))?,
            None => self.default_window(user_id, provider).await?,
        };

        let days = window.span_days();
        if days > i64::from(self.config.max_days) {
            return Err(ScanError::RangeTooLarge {
                days,
                max_days: self.config.max_days,
            });
        }

        // Ask for one past the cap so an oversized window is detected
        // instead of silently truncated.
        let fetch_limit = self.config.max_messages as usize + 1;
        let mail = Arc::clone(&self.mail);
        let mail_ids: Vec<String> =
            with_mail_access(self.broker.as_ref(), user_id, |access| {
                let mail = Arc::clone(&mail);
                async move {
                    mail.list_message_ids(&access, &window, fetch_limit)
                        .await
                        .map_err(ScanError::from)
                }
            })
            .await?;

        if mail_ids.len() > self.config.max_messages as usize {
            return Err(ScanError::TooManyMessages {
                count: mail_ids.len(),
                max: self.config.max_messages,
            });
        }

        let scan = scan_logs::insert_preparing(
            self.db.pool(),
            scan_logs::NewScanLog {
                user_id,
                provider: provider.as_str(),
                mail_ids: &mail_ids,
                period_start_ts: window.start_ts,
                period_end_ts: window.end_ts,
            },
        )
        .await?;

        info!(
            user_id,
            scan_id = %scan.id,
            total = scan.total,
            span_days = days,
            "scan prepared"
        );
        Ok(scan)
    }

    /// Transition `preparing` -> `running`. Idempotent when already
    /// running.
    ///
    /// # Errors
    /// Returns `ScanError::ScanNotFound` for missing or terminal scans.
    pub async fn start(&self, scan_id: &str) -> Result<ScanLog> {
        let scan = scan_logs::mark_running(self.db.pool(), scan_id).await?;
        info!(scan_id, "scan running");
        Ok(scan)
    }

    /// Execute one batch turn for the user's active scan.
    ///
    /// Polls the durable stop flag between batch units, never inside a
    /// commit. A failing batch escalates the whole scan to `error` while
    /// preserving everything already committed.
    ///
    /// # Errors
    /// Propagates the failure that moved the scan to `error`.
    pub async fn run_next_batch(&self, user_id: &str) -> Result<WorkerStep> {
        let Some(scan) = scan_logs::find_active_by_user(self.db.pool(), user_id).await? else {
            return Ok(WorkerStep::NoActiveScan);
        };

        let scan = if scan.status == ScanStatus::Preparing {
            scan_logs::mark_running(self.db.pool(), &scan.id).await?
        } else {
            scan
        };

        if scan.stop_requested {
            return self.conclude(&scan.id, ScanStatus::Stopped, scan.processed).await;
        }

        if scan.processed >= scan.total {
            return self.conclude(&scan.id, ScanStatus::Completed, scan.processed).await;
        }

        let batch_start = scan.processed as usize;
        let batch_end = scan
            .total
            .min(scan.processed + self.config.batch_size) as usize;
        let batch_ids = &scan.mail_ids[batch_start..batch_end];

        let totals = match self.run_batch(user_id, batch_ids).await {
            Ok(totals) => totals,
            Err(e) => return self.escalate(&scan.id, e).await,
        };

        let credits = credits_for_tokens(totals.tokens);
        let commit = scan_logs::BatchCommit {
            scan_id: &scan.id,
            user_id,
            expected_processed: scan.processed,
            processed_delta: totals.processed,
            job_emails_delta: totals.job_emails,
            token_delta: totals.tokens,
            credits,
            last_email_ts: totals.newest_ts,
        };

        let updated = match scan_logs::commit_batch(self.db.pool(), commit).await {
            Ok(updated) => updated,
            Err(DatabaseError::Conflict) => {
                // Another turn landed its commit first; ours rolled back
                // and that turn carries the scan forward.
                warn!(scan_id = %scan.id, "batch commit superseded by a concurrent turn");
                return Ok(WorkerStep::Superseded);
            }
            Err(e) => return self.escalate(&scan.id, e.into()).await,
        };

        if let Some(batch_ts) = totals.newest_ts {
            if let Err(e) = self
                .advance_checkpoint(user_id, &updated.provider, batch_ts)
                .await
            {
                return self.escalate(&updated.id, e).await;
            }
        }

        if updated.processed >= updated.total {
            return self
                .conclude(&updated.id, ScanStatus::Completed, updated.processed)
                .await;
        }

        if updated.stop_requested {
            return self
                .conclude(&updated.id, ScanStatus::Stopped, updated.processed)
                .await;
        }

        Ok(WorkerStep::BatchCommitted {
            remaining: updated.total - updated.processed,
        })
    }

    /// Set the stop flag on a specific scan owned by the user.
    ///
    /// Idempotent while the scan is active.
    ///
    /// # Errors
    /// Returns `ScanError::ScanNotFound` when the scan does not exist,
    /// belongs to someone else, or is already terminal.
    pub async fn cancel(&self, user_id: &str, scan_id: &str) -> Result<()> {
        let scan = scan_logs::find_by_id(self.db.pool(), scan_id)
            .await?
            .filter(|s| s.user_id == user_id)
            .ok_or(ScanError::ScanNotFound)?;

        if !scan_logs::request_stop(self.db.pool(), &scan.id).await? {
            return Err(ScanError::ScanNotFound);
        }
        info!(scan_id, "stop requested");
        Ok(())
    }

    /// Set the stop flag on whatever scan the user has active.
    ///
    /// # Errors
    /// Returns `ScanError::NoActiveScan` when nothing is active.
    pub async fn stop(&self, user_id: &str) -> Result<ScanLog> {
        let scan = scan_logs::find_active_by_user(self.db.pool(), user_id)
            .await?
            .ok_or(ScanError::NoActiveScan)?;

        scan_logs::request_stop(self.db.pool(), &scan.id).await?;
        scan_logs::find_by_id(self.db.pool(), &scan.id)
            .await?
            .ok_or(ScanError::ScanNotFound)
    }

    /// Latest scan for the user, active or terminal.
    ///
    /// Always reflects durably committed state.
    ///
    /// # Errors
    /// Fails only on persistence errors.
    pub async fn get_status(&self, user_id: &str) -> Result<Option<ScanLog>> {
        Ok(scan_logs::latest_for_user(self.db.pool(), user_id).await?)
    }

    /// Window used when `prepare` is called without explicit bounds:
    /// from the checkpoint (or default lookback) to now.
    async fn default_window(&self, user_id: &str, provider: Provider) -> Result<ScanWindow> {
        let end_ts = chrono::Utc::now().timestamp_millis();
        let checkpoint = checkpoints::get(self.db.pool(), user_id, provider.as_str()).await?;
        let start_ts = checkpoint
            .and_then(|c| c.last_success_at)
            .unwrap_or(end_ts - i64::from(self.config.default_lookback_days) * DAY_MS);

        ScanWindow::new(start_ts.min(end_ts), end_ts)
            .map_err(|e| ScanError::InvalidRange(e.to_string()))
    }

    /// Fetch and classify every message in the batch, accumulating
    /// counters. Nothing here touches the database; the caller commits
    /// the totals atomically.
    async fn run_batch(&self, user_id: &str, batch_ids: &[String]) -> Result<BatchTotals> {
        let mut totals = BatchTotals::default();

        for message_id in batch_ids {
            let (is_job_email, usage_total, date_ts) =
                self.process_message(user_id, message_id).await?;

            totals.processed += 1;
            if is_job_email {
                totals.job_emails += 1;
            }
            totals.tokens += usage_total;
            if date_ts > 0 {
                totals.newest_ts = Some(totals.newest_ts.map_or(date_ts, |t| t.max(date_ts)));
            }
        }

        Ok(totals)
    }

    /// One message's unit of work: fetch plus classify, run through the
    /// access wrapper so a stale credential costs exactly one refresh,
    /// with bounded retries around transient failures.
    async fn process_message(
        &self,
        user_id: &str,
        message_id: &str,
    ) -> Result<(bool, u64, i64)> {
        let mut attempt = 1;
        loop {
            let mail = Arc::clone(&self.mail);
            let classifier = Arc::clone(&self.classifier);
            let result: Result<(bool, u64, i64)> =
                with_mail_access(self.broker.as_ref(), user_id, |access| {
                    let mail = Arc::clone(&mail);
                    let classifier = Arc::clone(&classifier);
                    async move {
                        let message = mail
                            .get_message(&access, message_id)
                            .await
                            .map_err(ScanError::from)?;
                        let outcome = classifier.classify(&message).await?;
                        Ok((
                            outcome.analysis.is_job_email,
                            u64::from(outcome.usage.total_tokens),
                            message.date_ts,
                        ))
                    }
                })
                .await;

            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.config.max_attempts => {
                    warn!(
                        user_id,
                        message_id,
                        attempt,
                        error = %e,
                        "transient failure, retrying"
                    );
                    attempt += 1;
                    tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Advance the mail checkpoint, never backwards. The store itself
    /// does not enforce monotonicity; the clamp here is the contract.
    async fn advance_checkpoint(&self, user_id: &str, provider: &str, batch_ts: i64) -> Result<()> {
        let stored = checkpoints::get(self.db.pool(), user_id, provider)
            .await?
            .and_then(|c| c.last_success_at)
            .unwrap_or(0);

        let next = stored.max(batch_ts);
        if next > stored || stored == 0 {
            checkpoints::upsert_last_success_at(self.db.pool(), user_id, provider, next).await?;
        }
        Ok(())
    }

    /// Record a terminal status reached through normal operation. A
    /// persistence failure here escalates like any batch failure so the
    /// scan is never stranded in `running` with no worker re-enqueueing
    /// it.
    async fn conclude(
        &self,
        scan_id: &str,
        status: ScanStatus,
        processed: u32,
    ) -> Result<WorkerStep> {
        if let Err(e) = scan_logs::finish(self.db.pool(), scan_id, status, None).await {
            return self.escalate(scan_id, e.into()).await;
        }
        info!(scan_id, processed, status = %status, "scan finished");
        Ok(match status {
            ScanStatus::Stopped => WorkerStep::Stopped,
            _ => WorkerStep::Completed,
        })
    }

    /// Move the scan to `error`, keeping every committed batch intact,
    /// and propagate the cause.
    async fn escalate(&self, scan_id: &str, cause: ScanError) -> Result<WorkerStep> {
        warn!(scan_id, error = %cause, "scan failed");
        let finish = scan_logs::finish(
            self.db.pool(),
            scan_id,
            ScanStatus::Error,
            Some(&cause.to_string()),
        )
        .await;
        if let Err(e) = finish {
            warn!(scan_id, error = %e, "could not record scan error state");
        }
        Err(cause)
    }
}
