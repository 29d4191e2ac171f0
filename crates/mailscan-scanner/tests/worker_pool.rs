//! Worker pool drains an enqueued scan to completion.

use async_trait::async_trait;
use mailscan_classify::{ClassifyError, ClassifyOutcome, MailClassifier};
use mailscan_core::{MailAnalysis, MailMessage, Provider, ScanConfig, ScanWindow, TokenUsage};
use mailscan_db::{ledger, Database, ScanStatus};
use mailscan_mail::{AccessBroker, MailAccess, MailError, MailProviderClient};
use mailscan_scanner::{ScanOrchestrator, ScanScheduler};
use std::sync::Arc;
use std::time::Duration;

const USER: &str = "550e8400-e29b-41d4-a716-446655440000";
const BASE_TS: i64 = 1_700_000_000_000;

struct StaticBroker;

#[async_trait]
impl AccessBroker for StaticBroker {
    async fn get_access_token(&self, _user_id: &str) -> Result<MailAccess, MailError> {
        Ok(MailAccess {
            provider: Provider::Gmail,
            email: "user@example.com".to_string(),
            access_token: "token".to_string(),
        })
    }

    async fn handle_unauthorized(&self, user_id: &str) -> Result<MailAccess, MailError> {
        self.get_access_token(user_id).await
    }
}

struct StaticMailbox {
    count: usize,
}

#[async_trait]
impl MailProviderClient for StaticMailbox {
    async fn list_message_ids(
        &self,
        _access: &MailAccess,
        _window: &ScanWindow,
        max: usize,
    ) -> Result<Vec<String>, MailError> {
        Ok((0..self.count.min(max)).map(|i| format!("msg-{i}")).collect())
    }

    async fn get_message(&self, _access: &MailAccess, id: &str) -> Result<MailMessage, MailError> {
        Ok(MailMessage {
            id: id.to_string(),
            thread_id: id.to_string(),
            subject: "subject".to_string(),
            from: "sender@example.com".to_string(),
            body: "body".to_string(),
            date_ts: BASE_TS,
        })
    }
}

struct StaticClassifier;

#[async_trait]
impl MailClassifier for StaticClassifier {
    async fn classify(&self, _message: &MailMessage) -> Result<ClassifyOutcome, ClassifyError> {
        Ok(ClassifyOutcome {
            analysis: MailAnalysis {
                is_job_email: false,
                company: None,
                role: None,
                status: None,
            },
            usage: TokenUsage {
                prompt_tokens: 50,
                completion_tokens: 0,
                total_tokens: 50,
            },
            model: "test-model".to_string(),
        })
    }
}

#[tokio::test]
async fn test_shutdown_returns_with_no_work_queued() {
    let db = Database::in_memory().await.expect("open database");
    db.run_migrations().await.expect("run migrations");

    let orchestrator = Arc::new(ScanOrchestrator::new(
        db,
        Arc::new(StaticBroker),
        Arc::new(StaticMailbox { count: 0 }),
        Arc::new(StaticClassifier),
        ScanConfig {
            workers: 2,
            ..ScanConfig::default()
        },
    ));

    let scheduler = ScanScheduler::start(orchestrator);
    scheduler.enqueue(USER).await.expect("enqueue");

    // Closing the queue must terminate the pool even though every turn
    // re-enqueues through its own sender handle.
    tokio::time::timeout(Duration::from_secs(5), scheduler.shutdown())
        .await
        .expect("shutdown did not return");
}

#[tokio::test]
async fn test_scheduler_drains_scan_to_completion() {
    let db = Database::in_memory().await.expect("open database");
    db.run_migrations().await.expect("run migrations");
    ledger::insert(
        db.pool(),
        ledger::NewTransaction {
            user_id: USER,
            amount: 10,
            kind: ledger::TransactionKind::Purchase,
            reference_id: None,
            description: None,
        },
    )
    .await
    .expect("grant credits");

    let config = ScanConfig {
        workers: 2,
        retry_delay_ms: 0,
        ..ScanConfig::default()
    };
    let orchestrator = Arc::new(ScanOrchestrator::new(
        db.clone(),
        Arc::new(StaticBroker),
        Arc::new(StaticMailbox { count: 30 }),
        Arc::new(StaticClassifier),
        config,
    ));

    let window = Some((BASE_TS - 1000, BASE_TS + 1000));
    let scan = orchestrator
        .prepare(USER, Provider::Gmail, window)
        .await
        .expect("prepare");
    orchestrator.start(&scan.id).await.expect("start");

    let scheduler = ScanScheduler::start(Arc::clone(&orchestrator));
    scheduler.enqueue(USER).await.expect("enqueue");

    let mut completed = false;
    for _ in 0..200 {
        let status = orchestrator
            .get_status(USER)
            .await
            .expect("status")
            .expect("scan row");
        if status.status == ScanStatus::Completed {
            assert_eq!(status.processed, 30);
            completed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(completed, "scan did not complete in time");

    scheduler.shutdown().await;
}
