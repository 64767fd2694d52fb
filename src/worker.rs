use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::{
    cache::TimedCache,
    error_handling::{RouterError, StoreError},
    payment_processors::service::ProcessorId,
    queue::PaymentQueue,
    router::Router,
    structs::PaymentTask,
};

#[derive(Debug, Clone, Copy)]
pub struct WorkerConfig {
    pub batch_size: usize,
    /// Re-queue cycles allowed before a task is abandoned.
    pub retry_ceiling: u32,
    /// In-place repeats of a cycle that failed because of a timeout.
    pub timeout_retries: u32,
    pub timeout_retry_delay: Duration,
    pub idle_backoff: Duration,
    pub failure_backoff: Duration,
    /// How long a processor choice is reused; zero asks the router every time.
    pub selection_window: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            retry_ceiling: 5,
            timeout_retries: 3,
            timeout_retry_delay: Duration::from_millis(50),
            idle_backoff: Duration::from_millis(1),
            failure_backoff: Duration::from_millis(20),
            selection_window: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Delivered(ProcessorId),
    Requeued { retry_attempts: u32 },
    Dropped,
}

/// Drains the payment queue in batches and drives each task through the router.
pub struct QueueWorker {
    queue: PaymentQueue,
    router: Router,
    config: WorkerConfig,
    selection: Mutex<TimedCache<ProcessorId>>,
}

impl QueueWorker {
    pub fn new(queue: PaymentQueue, router: Router, config: WorkerConfig) -> Self {
        Self {
            queue,
            router,
            config,
            selection: Mutex::new(TimedCache::new(config.selection_window)),
        }
    }

    pub async fn run(&self) {
        info!(batch_size = self.config.batch_size, "queue worker started");
        loop {
            match self.run_once().await {
                Ok(0) => tokio::time::sleep(self.config.idle_backoff).await,
                Ok(_) => {}
                Err(err) => {
                    warn!(error = %err, "queue unavailable, backing off");
                    tokio::time::sleep(self.config.failure_backoff).await;
                }
            }
        }
    }

    /// Pops one batch and processes it concurrently. Returns how many tasks
    /// were taken off the queue.
    pub async fn run_once(&self) -> Result<usize, StoreError> {
        let batch = self.queue.pop_batch(self.config.batch_size).await?;
        let taken = batch.len();
        if taken > 0 {
            join_all(batch.into_iter().map(|task| self.process(task))).await;
        }
        Ok(taken)
    }

    pub async fn process(&self, task: PaymentTask) -> TaskOutcome {
        let err = match self.deliver_with_retry(&task).await {
            Ok(processor) => return TaskOutcome::Delivered(processor),
            Err(err) => err,
        };

        if task.retry_attempts >= self.config.retry_ceiling {
            error!(
                correlation_id = %task.correlation_id,
                retry_attempts = task.retry_attempts,
                error = %err,
                "payment permanently failed, dropping"
            );
            return TaskOutcome::Dropped;
        }

        let next = task.next_attempt();
        match self.queue.push(&next).await {
            Ok(()) => {
                debug!(
                    correlation_id = %next.correlation_id,
                    retry_attempts = next.retry_attempts,
                    error = %err,
                    "payment re-queued"
                );
                TaskOutcome::Requeued {
                    retry_attempts: next.retry_attempts,
                }
            }
            Err(store_err) => {
                error!(
                    correlation_id = %next.correlation_id,
                    error = %store_err,
                    "could not re-queue payment, dropping"
                );
                TaskOutcome::Dropped
            }
        }
    }

    async fn deliver_with_retry(&self, task: &PaymentTask) -> Result<ProcessorId, RouterError> {
        let mut repeats = 0;
        loop {
            let primary = self.select().await;
            match self.router.deliver_via(primary, task).await {
                Ok(processor) => {
                    if processor != primary {
                        self.selection.lock().invalidate();
                    }
                    return Ok(processor);
                }
                Err(err) => {
                    self.selection.lock().invalidate();
                    if !err.retryable() || repeats >= self.config.timeout_retries {
                        return Err(err);
                    }
                    repeats += 1;
                    debug!(correlation_id = %task.correlation_id, repeats, "timed out, retrying in place");
                    tokio::time::sleep(self.config.timeout_retry_delay).await;
                }
            }
        }
    }

    async fn select(&self) -> ProcessorId {
        let cached = self.selection.lock().get();
        if let Some(processor) = cached {
            return processor;
        }
        let processor = self.router.choose().await;
        self.selection.lock().set(processor);
        processor
    }
}
