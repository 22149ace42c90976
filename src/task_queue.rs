use anyhow::{anyhow, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};

use crate::background_processor::{process_document, ProcessingContext};
use crate::logging::QUEUE_TASKS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessDocumentJob {
    pub document_id: i64,
    pub attempt: u32,
}

/// How often and how patiently a failed job is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self { max_retries, base_delay, max_delay: Duration::from_secs(300) }
    }

    /// Wait before the retry that follows a failed `attempt`, doubling per
    /// attempt up to `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// In-process job queue drained by a fixed pool of workers. Delivery is
/// at-least-once: a failed attempt is queued again after a growing delay
/// until `max_retries` is reached. Jobs for different documents carry no ordering guarantee.
#[derive(Clone)]
pub struct TaskQueue {
    tx: mpsc::UnboundedSender<ProcessDocumentJob>,
}

impl TaskQueue {
    pub fn start(ctx: Arc<ProcessingContext>, workers: usize, retry: RetryPolicy) -> Self {
        let (tx, rx) = mpsc::unbounded_channel::<ProcessDocumentJob>();
        let rx = Arc::new(Mutex::new(rx));

        for worker_id in 0..workers.max(1) {
            let rx = Arc::clone(&rx);
            let tx = tx.clone();
            let ctx = Arc::clone(&ctx);
            tokio::spawn(async move {
                loop {
                    let job = {
                        let mut rx = rx.lock().await;
                        rx.recv().await
                    };
                    let Some(job) = job else { break };
                    run_job(&ctx, &tx, job, retry, worker_id).await;
                }
            });
        }

        info!(
            target: QUEUE_TASKS,
            workers,
            max_retries = retry.max_retries,
            base_delay_ms = retry.base_delay.as_millis() as u64,
            "Task queue started"
        );
        Self { tx }
    }

    pub fn submit(&self, document_id: i64) -> Result<()> {
        self.tx
            .send(ProcessDocumentJob { document_id, attempt: 0 })
            .map_err(|_| anyhow!("Task queue is closed"))
    }
}

async fn run_job(
    ctx: &ProcessingContext,
    tx: &mpsc::UnboundedSender<ProcessDocumentJob>,
    job: ProcessDocumentJob,
    retry: RetryPolicy,
    worker_id: usize,
) {
    info!(target: QUEUE_TASKS, worker_id, document_id = job.document_id, attempt = job.attempt, "Job received");

    let Err(e) = process_document(ctx, job.document_id).await else {
        return;
    };

    if job.attempt < retry.max_retries {
        let delay = retry.delay_for(job.attempt);
        warn!(
            target: QUEUE_TASKS,
            document_id = job.document_id,
            attempt = job.attempt,
            delay_ms = delay.as_millis() as u64,
            "Job failed, queueing retry: {:#}",
            e
        );
        // The worker moves on; the retry re-enters the queue once the delay passes
        let next = ProcessDocumentJob { attempt: job.attempt + 1, ..job };
        let tx = tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if tx.send(next).is_err() {
                error!(target: QUEUE_TASKS, document_id = next.document_id, "Task queue closed, retry dropped");
            }
        });
    } else {
        error!(
            target: QUEUE_TASKS,
            document_id = job.document_id,
            attempt = job.attempt,
            "Job failed after {} retries: {:#}",
            retry.max_retries,
            e
        );
    }
}
