//! Batch worker pool.
//!
//! Scans are advanced by draining a queue of user ids: a dispatch task
//! owns the receiver and runs each dequeued id as one batch turn on its
//! own task, with a semaphore bounding how many turns run at once. An id
//! is re-enqueued only after that batch's commit is durable, so one scan
//! never has two batches in flight while different users' scans proceed
//! concurrently.

use crate::error::ScanError;
use crate::orchestrator::{ScanOrchestrator, WorkerStep};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Queue depth before `enqueue` applies backpressure.
const QUEUE_CAPACITY: usize = 256;

/// Handle for submitting scan work and shutting the pool down.
pub struct ScanScheduler {
    tx: mpsc::Sender<String>,
    dispatcher: JoinHandle<()>,
}

impl ScanScheduler {
    /// Spawn the dispatcher with `config.workers` turn permits.
    #[must_use]
    pub fn start(orchestrator: Arc<ScanOrchestrator>) -> Self {
        let (tx, rx) = mpsc::channel::<String>(QUEUE_CAPACITY);
        let workers = orchestrator.config().workers.max(1);

        // Turns re-enqueue through a weak handle so in-flight work never
        // keeps the queue open once the scheduler's sender is dropped.
        let requeue = tx.downgrade();
        let dispatcher = tokio::spawn(dispatch_loop(orchestrator, rx, requeue, workers));

        info!(workers, "scan worker pool started");
        Self { tx, dispatcher }
    }

    /// Queue the user's active scan for batch processing.
    ///
    /// # Errors
    /// Returns `ScanError::NoActiveScan` when the pool has shut down and
    /// the queue is closed.
    pub async fn enqueue(&self, user_id: &str) -> Result<(), ScanError> {
        self.tx
            .send(user_id.to_string())
            .await
            .map_err(|_| ScanError::NoActiveScan)
    }

    /// Close the queue and wait for in-flight batches to finish.
    pub async fn shutdown(self) {
        drop(self.tx);
        let _ = self.dispatcher.await;
        info!("scan worker pool stopped");
    }
}

async fn dispatch_loop(
    orchestrator: Arc<ScanOrchestrator>,
    mut rx: mpsc::Receiver<String>,
    requeue: mpsc::WeakSender<String>,
    workers: u32,
) {
    let permits = Arc::new(Semaphore::new(workers as usize));

    while let Some(user_id) = rx.recv().await {
        let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
            break;
        };
        let orchestrator = Arc::clone(&orchestrator);
        let requeue = requeue.clone();
        tokio::spawn(async move {
            run_turn(&orchestrator, &requeue, user_id).await;
            drop(permit);
        });
    }

    // Queue closed; reclaim every permit so in-flight turns have drained
    // before shutdown reports the pool stopped.
    let _ = permits.acquire_many_owned(workers).await;
}

async fn run_turn(
    orchestrator: &ScanOrchestrator,
    requeue: &mpsc::WeakSender<String>,
    user_id: String,
) {
    match orchestrator.run_next_batch(&user_id).await {
        Ok(WorkerStep::BatchCommitted { remaining }) => {
            debug!(user_id, remaining, "batch committed");
            match requeue.upgrade() {
                Some(tx) => {
                    if tx.send(user_id).await.is_err() {
                        debug!("queue closed, dropping follow-up turn");
                    }
                }
                None => debug!(user_id, "pool shutting down, dropping follow-up turn"),
            }
        }
        Ok(WorkerStep::Completed | WorkerStep::Stopped | WorkerStep::NoActiveScan) => {
            debug!(user_id, "scan drained");
        }
        Ok(WorkerStep::Superseded) => {
            debug!(user_id, "turn superseded, concurrent worker owns the scan");
        }
        Err(e) => {
            // The orchestrator already moved the scan to `error`.
            error!(user_id, error = %e, "batch failed");
        }
    }
}
