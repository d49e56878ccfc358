//! Queue consumer
//!
//! Receives task batches and hands them to the keyed [`TaskRunner`].
//! Repeated receive failures open a circuit breaker that pauses polling.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use zenodo_common::{
    errors::AppError,
    queue::ReceivedTask,
    tasks::{RetryPolicy, TaskExecutor, TaskRunner},
    Services,
};

/// Consecutive receive failures before the breaker opens
const MAX_FAILURES: u32 = 5;
const CIRCUIT_BREAK_DURATION: Duration = Duration::from_secs(30);
const RECEIVE_ERROR_DELAY: Duration = Duration::from_secs(5);
/// Pause after an empty poll; the in-process queue never blocks
const IDLE_DELAY: Duration = Duration::from_secs(1);

/// Result of one receive-and-run cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOutcome {
    pub delivered: usize,
    pub succeeded: usize,
}

pub struct Worker {
    services: Services,
    runner: TaskRunner,
}

impl Worker {
    pub fn new(services: Services) -> Self {
        let policy = RetryPolicy::from_config(&services.config.tasks);
        let executor = Arc::new(TaskExecutor::new(services.clone()));
        Self {
            runner: TaskRunner::new(executor, policy),
            services,
        }
    }

    async fn run_batch(&self, batch: Vec<ReceivedTask>) -> PollOutcome {
        let delivered = batch.len();
        let succeeded = self.runner.run_batch(self.services.queue.as_ref(), batch).await;
        PollOutcome { delivered, succeeded }
    }

    /// Receive one batch and run it to completion
    pub async fn poll_once(&self) -> Result<PollOutcome, WorkerError> {
        let batch = self
            .services
            .queue
            .receive()
            .await
            .map_err(|e| WorkerError::Queue(e.to_string()))?;
        Ok(self.run_batch(batch).await)
    }

    /// Poll until shutdown; a batch already received always runs to completion
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut consecutive_failures = 0;

        while !*shutdown.borrow() {
            if consecutive_failures >= MAX_FAILURES {
                warn!(failures = consecutive_failures, "Circuit breaker open, pausing...");
                if pause(&mut shutdown, CIRCUIT_BREAK_DURATION).await {
                    break;
                }
                consecutive_failures = 0;
                info!("Circuit breaker reset, resuming...");
            }

            let received = tokio::select! {
                _ = shutdown.changed() => break,
                received = self.services.queue.receive() => received,
            };

            match received {
                Ok(batch) if batch.is_empty() => {
                    consecutive_failures = 0;
                    if pause(&mut shutdown, IDLE_DELAY).await {
                        break;
                    }
                }
                Ok(batch) => {
                    consecutive_failures = 0;
                    let outcome = self.run_batch(batch).await;
                    info!(
                        delivered = outcome.delivered,
                        succeeded = outcome.succeeded,
                        "Task batch processed"
                    );
                }
                Err(e) => {
                    consecutive_failures += 1;
                    error!(error = %e, failures = consecutive_failures, "Failed to receive tasks from queue");
                    if pause(&mut shutdown, RECEIVE_ERROR_DELAY).await {
                        break;
                    }
                }
            }
        }

        info!("Task consumer stopped");
    }
}

/// Sleep unless shutdown arrives first; true when shutting down
pub(crate) async fn pause(shutdown: &mut watch::Receiver<bool>, duration: Duration) -> bool {
    tokio::select! {
        _ = shutdown.changed() => true,
        _ = tokio::time::sleep(duration) => *shutdown.borrow(),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Job {job} failed: {message}")]
    Job { job: &'static str, message: String },

    #[error("Service error: {0}")]
    Service(String),
}

impl From<AppError> for WorkerError {
    fn from(e: AppError) -> Self {
        WorkerError::Service(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;
    use zenodo_common::queue::{MemoryTaskQueue, TaskQueue};
    use zenodo_common::tasks::Task;

    async fn services_with_queue() -> (Services, Arc<MemoryTaskQueue>) {
        let queue = Arc::new(MemoryTaskQueue::new());
        let services = Services::in_memory().await.unwrap().with_queue(queue.clone());
        (services, queue)
    }

    #[tokio::test]
    async fn test_poll_once_runs_and_acknowledges() {
        let (services, queue) = services_with_queue().await;
        queue
            .push(Task::IndexRecord {
                record_id: Uuid::new_v4(),
            })
            .await
            .unwrap();

        let worker = Worker::new(services);
        let outcome = tokio_test::assert_ok!(worker.poll_once().await);
        assert_eq!(outcome, PollOutcome { delivered: 1, succeeded: 1 });
        assert_eq!(queue.in_flight().await, 0);

        let outcome = worker.poll_once().await.unwrap();
        assert_eq!(outcome, PollOutcome { delivered: 0, succeeded: 0 });
    }

    #[tokio::test]
    async fn test_failed_task_is_still_acknowledged() {
        let (services, queue) = services_with_queue().await;
        queue
            .push(Task::VerifyFile {
                file_id: Uuid::new_v4(),
            })
            .await
            .unwrap();

        let outcome = Worker::new(services).poll_once().await.unwrap();
        assert_eq!(outcome.delivered, 1);
        assert_eq!(outcome.succeeded, 0);
        assert_eq!(queue.in_flight().await, 0);
        assert!(queue.pending().await.is_empty());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (services, queue) = services_with_queue().await;
        queue
            .push(Task::IndexRecord {
                record_id: Uuid::new_v4(),
            })
            .await
            .unwrap();

        let (tx, rx) = watch::channel(false);
        let worker = Worker::new(services);
        let handle = tokio::spawn(async move { worker.run(rx).await });

        tokio::time::sleep(Duration::from_millis(200)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("worker did not stop")
            .unwrap();

        assert!(queue.pending().await.is_empty());
        assert_eq!(queue.in_flight().await, 0);
    }

    #[test]
    fn test_error_conversion() {
        let err: WorkerError = AppError::not_found("record", "42").into();
        assert!(matches!(err, WorkerError::Service(_)));
    }
}
