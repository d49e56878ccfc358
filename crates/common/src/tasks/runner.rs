//! Keyed serial task execution with bounded retries

use super::{Task, TaskEnvelope};
use crate::config::TaskConfig;
use crate::errors::{AppError, Result};
use crate::metrics;
use crate::queue::{ReceivedTask, TaskQueue};
use async_trait::async_trait;
use backoff::{future::retry_notify, ExponentialBackoff};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info, warn};

/// Something that knows how to execute a task
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: &Task) -> Result<()>;
}

/// Bounded exponential backoff applied to retryable failures
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &TaskConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_delay: Duration::from_secs(config.initial_delay_secs),
            max_delay: Duration::from_secs(config.max_delay_secs),
        }
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.initial_delay,
            max_interval: self.max_delay,
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&TaskConfig::default())
    }
}

/// Runs tasks: same key strictly one at a time, different keys in parallel
pub struct TaskRunner {
    handler: Arc<dyn TaskHandler>,
    policy: RetryPolicy,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl TaskRunner {
    pub fn new(handler: Arc<dyn TaskHandler>, policy: RetryPolicy) -> Self {
        Self {
            handler,
            policy,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(key.to_string()).or_default().clone()
    }

    fn release(&self, key: &str) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        if locks.get(key).map(|l| Arc::strong_count(l) == 1).unwrap_or(false) {
            locks.remove(key);
        }
    }

    /// Execute one task with retries; returns the attempts used
    pub async fn run(&self, envelope: &TaskEnvelope) -> Result<u32> {
        let key = envelope.task.key();
        let lock = self.lock_for(&key);
        let result = {
            let _guard = lock.lock().await;
            self.run_with_retries(envelope).await
        };
        drop(lock);
        self.release(&key);
        result
    }

    async fn run_with_retries(&self, envelope: &TaskEnvelope) -> Result<u32> {
        let task = &envelope.task;
        let attempts = AtomicU32::new(envelope.attempt.saturating_sub(1));
        let max_attempts = self.policy.max_attempts;

        let counter = &attempts;
        let handler = &self.handler;

        let outcome = retry_notify(
            self.policy.backoff(),
            move || async move {
                let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
                match handler.handle(task).await {
                    Ok(()) => Ok(()),
                    Err(e) if e.is_retryable() && attempt < max_attempts => Err(backoff::Error::transient(e)),
                    Err(e) => Err(backoff::Error::permanent(e)),
                }
            },
            |e: AppError, delay: Duration| {
                warn!(
                    task = task.name(),
                    key = %task.key(),
                    error = %e,
                    retry_in_ms = delay.as_millis() as u64,
                    "Task failed, retrying"
                );
            },
        )
        .await;

        let used = attempts.load(Ordering::SeqCst);
        metrics::record_task(task.name(), outcome.is_ok(), used);
        outcome.map(|_| used)
    }

    /// Run a delivered batch and acknowledge every task.
    ///
    /// Failures are logged, not re-queued: retries already happened here.
    pub async fn run_batch(&self, queue: &dyn TaskQueue, batch: Vec<ReceivedTask>) -> usize {
        metrics::record_queue_depth(batch.len());

        let results = join_all(batch.iter().map(|received| async move {
            let envelope = &received.envelope;
            let outcome = self.run(envelope).await;
            match &outcome {
                Ok(attempts) => info!(
                    task = envelope.task.name(),
                    task_id = %envelope.id,
                    attempts,
                    "Task completed"
                ),
                Err(e) => error!(
                    task = envelope.task.name(),
                    task_id = %envelope.id,
                    error = %e,
                    "Task failed permanently"
                ),
            }
            if let Err(e) = queue.ack(&received.receipt).await {
                warn!(error = %e, task_id = %envelope.id, "Failed to acknowledge task");
            }
            outcome.is_ok()
        }))
        .await;

        results.into_iter().filter(|ok| *ok).count()
    }

    /// Receive and run until the queue has nothing ready; returns tasks run
    pub async fn drain(&self, queue: &dyn TaskQueue) -> Result<usize> {
        let mut total = 0;
        loop {
            let batch = queue.receive().await?;
            if batch.is_empty() {
                return Ok(total);
            }
            total += batch.len();
            self.run_batch(queue, batch).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::MemoryTaskQueue;
    use std::sync::atomic::AtomicUsize;
    use uuid::Uuid;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    /// Fails with a retryable error a fixed number of times
    struct Flaky {
        failures: AtomicU32,
        calls: AtomicU32,
        retryable: bool,
    }

    #[async_trait]
    impl TaskHandler for Flaky {
        async fn handle(&self, _task: &Task) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(if self.retryable {
                    AppError::Transient { message: "try again".into() }
                } else {
                    AppError::Integrity { message: "broken".into() }
                });
            }
            Ok(())
        }
    }

    fn flaky(failures: u32, retryable: bool) -> Arc<Flaky> {
        Arc::new(Flaky {
            failures: AtomicU32::new(failures),
            calls: AtomicU32::new(0),
            retryable,
        })
    }

    fn envelope() -> TaskEnvelope {
        TaskEnvelope::new(Task::RegisterDoi { recid: "1".into() })
    }

    #[tokio::test]
    async fn test_retries_transient_failures() {
        let handler = flaky(2, true);
        let runner = TaskRunner::new(handler.clone(), fast_policy(6));

        assert_eq!(runner.run(&envelope()).await.unwrap(), 3);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_attempts_are_bounded() {
        let handler = flaky(10, true);
        let runner = TaskRunner::new(handler.clone(), fast_policy(3));

        assert!(runner.run(&envelope()).await.is_err());
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_failures_are_not_retried() {
        let handler = flaky(1, false);
        let runner = TaskRunner::new(handler.clone(), fast_policy(6));

        assert!(matches!(runner.run(&envelope()).await, Err(AppError::Integrity { .. })));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    /// Records the maximum concurrency observed per key
    struct Probe {
        active: Mutex<HashMap<String, usize>>,
        max_same_key: AtomicUsize,
        max_total: AtomicUsize,
    }

    #[async_trait]
    impl TaskHandler for Probe {
        async fn handle(&self, task: &Task) -> Result<()> {
            let key = task.key();
            {
                let mut active = self.active.lock().unwrap();
                let n = active.entry(key.clone()).or_default();
                *n += 1;
                self.max_same_key.fetch_max(*n, Ordering::SeqCst);
                let total: usize = active.values().sum();
                self.max_total.fetch_max(total, Ordering::SeqCst);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            *self.active.lock().unwrap().get_mut(&key).unwrap() -= 1;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_same_key_serialized_distinct_keys_parallel() {
        let probe = Arc::new(Probe {
            active: Mutex::new(HashMap::new()),
            max_same_key: AtomicUsize::new(0),
            max_total: AtomicUsize::new(0),
        });
        let runner = TaskRunner::new(probe.clone(), fast_policy(1));
        let queue = MemoryTaskQueue::new();

        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        for record_id in [a, b] {
            queue.push(Task::OaiSetAdd { spec: "s1".into(), record_id }).await.unwrap();
            queue.push(Task::OaiSetAdd { spec: "s2".into(), record_id }).await.unwrap();
        }

        assert_eq!(runner.drain(&queue).await.unwrap(), 4);
        assert_eq!(probe.max_same_key.load(Ordering::SeqCst), 1);
        assert_eq!(probe.max_total.load(Ordering::SeqCst), 2);
        assert_eq!(queue.in_flight().await, 0);
    }
}
