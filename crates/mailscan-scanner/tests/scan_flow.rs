//! End-to-end scan lifecycle tests over in-memory persistence and
//! scripted mail/classifier collaborators.

use async_trait::async_trait;
use mailscan_classify::{ClassifyError, ClassifyOutcome, MailClassifier};
use mailscan_core::{MailAnalysis, MailMessage, Provider, ScanConfig, ScanWindow, TokenUsage};
use mailscan_db::{checkpoints, ledger, Database, ScanStatus};
use mailscan_mail::{AccessBroker, MailAccess, MailError, MailProviderClient};
use mailscan_scanner::{ScanError, ScanOrchestrator, WorkerStep};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

const USER: &str = "550e8400-e29b-41d4-a716-446655440000";
const DAY_MS: i64 = 24 * 60 * 60 * 1000;
const BASE_TS: i64 = 1_700_000_000_000;

struct FakeBroker {
    refreshes: AtomicU32,
}

impl FakeBroker {
    fn new() -> Self {
        Self {
            refreshes: AtomicU32::new(0),
        }
    }

    fn access(token: &str) -> MailAccess {
        MailAccess {
            provider: Provider::Gmail,
            email: "user@example.com".to_string(),
            access_token: token.to_string(),
        }
    }
}

#[async_trait]
impl AccessBroker for FakeBroker {
    async fn get_access_token(&self, _user_id: &str) -> Result<MailAccess, MailError> {
        Ok(Self::access("token-initial"))
    }

    async fn handle_unauthorized(&self, _user_id: &str) -> Result<MailAccess, MailError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(Self::access("token-refreshed"))
    }
}

/// Mailbox with `count` messages, one per minute starting at `BASE_TS`.
struct FakeMailbox {
    count: usize,
}

impl FakeMailbox {
    fn message_ts(index: usize) -> i64 {
        BASE_TS + (index as i64) * 60_000
    }
}

#[async_trait]
impl MailProviderClient for FakeMailbox {
    async fn list_message_ids(
        &self,
        _access: &MailAccess,
        _window: &ScanWindow,
        max: usize,
    ) -> Result<Vec<String>, MailError> {
        Ok((0..self.count.min(max)).map(|i| format!("msg-{i}")).collect())
    }

    async fn get_message(&self, _access: &MailAccess, id: &str) -> Result<MailMessage, MailError> {
        let index: usize = id
            .strip_prefix("msg-")
            .and_then(|s| s.parse().ok())
            .unwrap();
        Ok(MailMessage {
            id: id.to_string(),
            thread_id: format!("thread-{index}"),
            subject: format!("Message {index}"),
            from: "sender@example.com".to_string(),
            body: "hello".to_string(),
            date_ts: Self::message_ts(index),
        })
    }
}

/// Classifier charging `tokens_per_message` per call; optionally fails
/// the first `fail_401_first` calls with an unauthorized status, or
/// every call from `fail_500_from` onwards with a server error.
struct FakeClassifier {
    tokens_per_message: u32,
    job_email: bool,
    calls: AtomicU32,
    fail_401_first: u32,
    fail_500_from: Option<u32>,
}

impl FakeClassifier {
    fn new(tokens_per_message: u32, job_email: bool) -> Self {
        Self {
            tokens_per_message,
            job_email,
            calls: AtomicU32::new(0),
            fail_401_first: 0,
            fail_500_from: None,
        }
    }

    fn with_initial_401s(mut self, n: u32) -> Self {
        self.fail_401_first = n;
        self
    }

    fn with_500s_from_call(mut self, n: u32) -> Self {
        self.fail_500_from = Some(n);
        self
    }
}

#[async_trait]
impl MailClassifier for FakeClassifier {
    async fn classify(&self, _message: &MailMessage) -> Result<ClassifyOutcome, ClassifyError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_401_first {
            return Err(ClassifyError::Api {
                status: 401,
                message: "token expired".to_string(),
            });
        }
        if self.fail_500_from.is_some_and(|from| call >= from) {
            return Err(ClassifyError::Api {
                status: 500,
                message: "upstream unavailable".to_string(),
            });
        }
        Ok(ClassifyOutcome {
            analysis: MailAnalysis {
                is_job_email: self.job_email,
                company: self.job_email.then(|| "Acme".to_string()),
                role: None,
                status: None,
            },
            usage: TokenUsage {
                prompt_tokens: self.tokens_per_message,
                completion_tokens: 0,
                total_tokens: self.tokens_per_message,
            },
            model: "test-model".to_string(),
        })
    }
}

fn config() -> ScanConfig {
    ScanConfig {
        retry_delay_ms: 0,
        ..ScanConfig::default()
    }
}

async fn setup(
    mailbox_count: usize,
    classifier: FakeClassifier,
) -> (Database, Arc<FakeBroker>, ScanOrchestrator) {
    let db = Database::in_memory().await.expect("open database");
    db.run_migrations().await.expect("run migrations");

    let broker = Arc::new(FakeBroker::new());
    let orchestrator = ScanOrchestrator::new(
        db.clone(),
        broker.clone(),
        Arc::new(FakeMailbox {
            count: mailbox_count,
        }),
        Arc::new(classifier),
        config(),
    );
    (db, broker, orchestrator)
}

async fn grant_credits(db: &Database, amount: i64) {
    ledger::insert(
        db.pool(),
        ledger::NewTransaction {
            user_id: USER,
            amount,
            kind: ledger::TransactionKind::Purchase,
            reference_id: None,
            description: Some("test grant"),
        },
    )
    .await
    .expect("grant credits");
}

fn week_window() -> Option<(i64, i64)> {
    Some((BASE_TS - DAY_MS, BASE_TS + 7 * DAY_MS))
}

#[tokio::test]
async fn test_full_scan_completes_in_batches() {
    let (db, _, orchestrator) = setup(50, FakeClassifier::new(100, false)).await;
    grant_credits(&db, 100).await;

    let scan = orchestrator
        .prepare(USER, Provider::Gmail, week_window())
        .await
        .expect("prepare");
    assert_eq!(scan.total, 50);
    orchestrator.start(&scan.id).await.expect("start");

    let mut batches = 0;
    loop {
        match orchestrator.run_next_batch(USER).await.expect("batch") {
            WorkerStep::BatchCommitted { .. } => batches += 1,
            WorkerStep::Completed => break,
            other => panic!("unexpected step {other:?}"),
        }
    }
    // 5 batches of 10 run; the fifth exhausts the set and reports
    // Completed from the same turn.
    assert_eq!(batches, 4);

    let status = orchestrator
        .get_status(USER)
        .await
        .expect("status")
        .expect("scan row");
    assert_eq!(status.status, ScanStatus::Completed);
    assert_eq!(status.processed, 50);
    assert_eq!(status.job_emails, 0);
    assert_eq!(status.token_count, 5000);
    // 1000 tokens per batch of 10 -> 1 credit per batch.
    assert_eq!(status.credits_spent, 5);
    assert_eq!(ledger::balance(db.pool(), USER).await.expect("balance"), 95);

    let checkpoint = checkpoints::get(db.pool(), USER, "gmail")
        .await
        .expect("checkpoint")
        .expect("checkpoint row");
    assert_eq!(checkpoint.last_success_at, Some(FakeMailbox::message_ts(49)));
}

#[tokio::test]
async fn test_cancel_stops_after_inflight_batch() {
    let (db, _, orchestrator) = setup(50, FakeClassifier::new(100, false)).await;
    grant_credits(&db, 100).await;

    let scan = orchestrator
        .prepare(USER, Provider::Gmail, week_window())
        .await
        .expect("prepare");
    orchestrator.start(&scan.id).await.expect("start");

    for _ in 0..2 {
        assert!(matches!(
            orchestrator.run_next_batch(USER).await.expect("batch"),
            WorkerStep::BatchCommitted { .. }
        ));
    }

    orchestrator.cancel(USER, &scan.id).await.expect("cancel");
    // Idempotent while active.
    orchestrator.cancel(USER, &scan.id).await.expect("cancel again");

    assert_eq!(
        orchestrator.run_next_batch(USER).await.expect("turn"),
        WorkerStep::Stopped
    );

    let status = orchestrator
        .get_status(USER)
        .await
        .expect("status")
        .expect("scan row");
    assert_eq!(status.status, ScanStatus::Stopped);
    assert_eq!(status.processed, 20);
}

#[tokio::test]
async fn test_second_prepare_rejected_while_active() {
    let (db, _, orchestrator) = setup(10, FakeClassifier::new(100, false)).await;
    grant_credits(&db, 100).await;

    orchestrator
        .prepare(USER, Provider::Gmail, week_window())
        .await
        .expect("prepare");

    let second = orchestrator.prepare(USER, Provider::Gmail, week_window()).await;
    assert!(matches!(second, Err(ScanError::ScanAlreadyActive)));
}

#[tokio::test]
async fn test_oversized_window_rejected_without_scan_row() {
    let (_, _, orchestrator) = setup(10, FakeClassifier::new(100, false)).await;

    let out = orchestrator
        .prepare(
            USER,
            Provider::Gmail,
            Some((BASE_TS, BASE_TS + 120 * DAY_MS)),
        )
        .await;

    assert!(matches!(
        out,
        Err(ScanError::RangeTooLarge {
            days: 120,
            max_days: 90
        })
    ));
    assert!(orchestrator
        .get_status(USER)
        .await
        .expect("status")
        .is_none());
}

#[tokio::test]
async fn test_inverted_window_rejected() {
    let (_, _, orchestrator) = setup(10, FakeClassifier::new(100, false)).await;

    let out = orchestrator
        .prepare(USER, Provider::Gmail, Some((BASE_TS + DAY_MS, BASE_TS)))
        .await;

    assert!(matches!(out, Err(ScanError::InvalidRange(_))));
}

#[tokio::test]
async fn test_too_many_candidates_rejected() {
    let (_, _, orchestrator) = setup(2500, FakeClassifier::new(100, false)).await;

    let out = orchestrator
        .prepare(USER, Provider::Gmail, week_window())
        .await;

    match out {
        Err(ScanError::TooManyMessages { count, max }) => {
            assert!(count > 2000);
            assert_eq!(max, 2000);
        }
        other => panic!("expected TooManyMessages, got {other:?}"),
    }
}

#[tokio::test]
async fn test_insufficient_credits_errors_without_progress() {
    let (db, _, orchestrator) = setup(10, FakeClassifier::new(100, false)).await;
    // No credits granted; the first batch needs 1.

    let scan = orchestrator
        .prepare(USER, Provider::Gmail, week_window())
        .await
        .expect("prepare");
    orchestrator.start(&scan.id).await.expect("start");

    let out = orchestrator.run_next_batch(USER).await;
    assert!(matches!(out, Err(ScanError::InsufficientCredits { .. })));

    let status = orchestrator
        .get_status(USER)
        .await
        .expect("status")
        .expect("scan row");
    assert_eq!(status.status, ScanStatus::Error);
    assert_eq!(status.processed, 0);
    assert_eq!(status.credits_spent, 0);
    assert_eq!(ledger::balance(db.pool(), USER).await.expect("balance"), 0);
}

#[tokio::test]
async fn test_committed_batches_survive_later_failure() {
    let (db, _, orchestrator) = setup(20, FakeClassifier::new(100, false)).await;
    // Enough for exactly one batch.
    grant_credits(&db, 1).await;

    let scan = orchestrator
        .prepare(USER, Provider::Gmail, week_window())
        .await
        .expect("prepare");
    orchestrator.start(&scan.id).await.expect("start");

    assert!(matches!(
        orchestrator.run_next_batch(USER).await.expect("batch"),
        WorkerStep::BatchCommitted { remaining: 10 }
    ));

    let out = orchestrator.run_next_batch(USER).await;
    assert!(matches!(out, Err(ScanError::InsufficientCredits { .. })));

    let status = orchestrator
        .get_status(USER)
        .await
        .expect("status")
        .expect("scan row");
    assert_eq!(status.status, ScanStatus::Error);
    assert_eq!(status.processed, 10);
    assert_eq!(status.credits_spent, 1);
    assert_eq!(ledger::balance(db.pool(), USER).await.expect("balance"), 0);
}

#[tokio::test]
async fn test_retry_exhaustion_errors_keeping_committed_batches() {
    let db = Database::in_memory().await.expect("open database");
    db.run_migrations().await.expect("run migrations");

    // Every classification from the second batch onwards fails with a
    // server error, so retries can never succeed.
    let classifier = Arc::new(FakeClassifier::new(100, false).with_500s_from_call(10));
    let orchestrator = ScanOrchestrator::new(
        db.clone(),
        Arc::new(FakeBroker::new()),
        Arc::new(FakeMailbox { count: 20 }),
        Arc::clone(&classifier) as Arc<dyn MailClassifier>,
        config(),
    );
    grant_credits(&db, 5).await;

    let scan = orchestrator
        .prepare(USER, Provider::Gmail, week_window())
        .await
        .expect("prepare");
    orchestrator.start(&scan.id).await.expect("start");

    assert!(matches!(
        orchestrator.run_next_batch(USER).await.expect("batch"),
        WorkerStep::BatchCommitted { remaining: 10 }
    ));

    let out = orchestrator.run_next_batch(USER).await;
    assert!(matches!(out, Err(ScanError::Classify(_))));

    // The failing message was attempted exactly max_attempts times.
    let attempts = classifier.calls.load(Ordering::SeqCst) - 10;
    assert_eq!(attempts, config().max_attempts);

    let status = orchestrator
        .get_status(USER)
        .await
        .expect("status")
        .expect("scan row");
    assert_eq!(status.status, ScanStatus::Error);
    assert_eq!(status.processed, 10);
    assert_eq!(status.credits_spent, 1);
    assert_eq!(ledger::balance(db.pool(), USER).await.expect("balance"), 4);
}

#[tokio::test]
async fn test_checkpoint_write_failure_escalates_to_error() {
    let (db, _, orchestrator) = setup(20, FakeClassifier::new(100, false)).await;
    grant_credits(&db, 10).await;

    let scan = orchestrator
        .prepare(USER, Provider::Gmail, week_window())
        .await
        .expect("prepare");
    orchestrator.start(&scan.id).await.expect("start");

    assert!(matches!(
        orchestrator.run_next_batch(USER).await.expect("batch"),
        WorkerStep::BatchCommitted { remaining: 10 }
    ));

    // Break the checkpoint store underneath the running scan.
    sqlx::query("DROP TABLE mail_checkpoints")
        .execute(db.pool())
        .await
        .expect("drop checkpoints");

    // The batch commits, the checkpoint write fails, and the scan must
    // land in error rather than stay stranded in running.
    let out = orchestrator.run_next_batch(USER).await;
    assert!(matches!(out, Err(ScanError::Database(_))));

    let status = orchestrator
        .get_status(USER)
        .await
        .expect("status")
        .expect("scan row");
    assert_eq!(status.status, ScanStatus::Error);
    assert_eq!(status.processed, 20);
}

#[tokio::test]
async fn test_stale_token_refreshes_once_and_commits() {
    let (db, broker, orchestrator) =
        setup(10, FakeClassifier::new(100, false).with_initial_401s(1)).await;
    grant_credits(&db, 10).await;

    let scan = orchestrator
        .prepare(USER, Provider::Gmail, week_window())
        .await
        .expect("prepare");
    orchestrator.start(&scan.id).await.expect("start");

    assert_eq!(
        orchestrator.run_next_batch(USER).await.expect("batch"),
        WorkerStep::Completed
    );
    assert_eq!(broker.refreshes.load(Ordering::SeqCst), 1);

    let status = orchestrator
        .get_status(USER)
        .await
        .expect("status")
        .expect("scan row");
    assert_eq!(status.status, ScanStatus::Completed);
    assert_eq!(status.processed, 10);
}

#[tokio::test]
async fn test_job_emails_counted() {
    let (db, _, orchestrator) = setup(10, FakeClassifier::new(100, true)).await;
    grant_credits(&db, 10).await;

    let scan = orchestrator
        .prepare(USER, Provider::Gmail, week_window())
        .await
        .expect("prepare");
    orchestrator.start(&scan.id).await.expect("start");
    orchestrator.run_next_batch(USER).await.expect("batch");

    let status = orchestrator
        .get_status(USER)
        .await
        .expect("status")
        .expect("scan row");
    assert_eq!(status.job_emails, 10);
}

#[tokio::test]
async fn test_stop_without_active_scan() {
    let (_, _, orchestrator) = setup(10, FakeClassifier::new(100, false)).await;

    let out = orchestrator.stop(USER).await;
    assert!(matches!(out, Err(ScanError::NoActiveScan)));
}

#[tokio::test]
async fn test_cancel_unknown_scan() {
    let (_, _, orchestrator) = setup(10, FakeClassifier::new(100, false)).await;

    let out = orchestrator.cancel(USER, "no-such-scan").await;
    assert!(matches!(out, Err(ScanError::ScanNotFound)));
}

#[tokio::test]
async fn test_checkpoint_never_regresses() {
    let (db, _, orchestrator) = setup(10, FakeClassifier::new(100, false)).await;
    grant_credits(&db, 10).await;

    // Pre-existing checkpoint ahead of every message in the mailbox.
    let future_ts = FakeMailbox::message_ts(9) + DAY_MS;
    checkpoints::upsert_last_success_at(db.pool(), USER, "gmail", future_ts)
        .await
        .expect("seed checkpoint");

    let scan = orchestrator
        .prepare(USER, Provider::Gmail, week_window())
        .await
        .expect("prepare");
    orchestrator.start(&scan.id).await.expect("start");
    assert_eq!(
        orchestrator.run_next_batch(USER).await.expect("batch"),
        WorkerStep::Completed
    );

    let checkpoint = checkpoints::get(db.pool(), USER, "gmail")
        .await
        .expect("checkpoint")
        .expect("checkpoint row");
    assert_eq!(checkpoint.last_success_at, Some(future_ts));
}
