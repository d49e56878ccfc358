//! Task queue integration
//!
//! Provides:
//! - The [`TaskQueue`] contract used by the pipeline and the worker
//! - SQS-backed queue with long polling, delayed send and visibility extension
//! - In-process queue for tests and single-node deployments

use crate::config::QueueConfig as AppQueueConfig;
use crate::errors::{AppError, Result};
use crate::tasks::{Task, TaskEnvelope};
use async_trait::async_trait;
use aws_sdk_sqs::types::Message;
use aws_sdk_sqs::Client as SqsClient;
use backoff::{future::retry, ExponentialBackoff};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

/// SQS caps message delays at 15 minutes
const MAX_SQS_DELAY_SECS: u64 = 900;

/// A delivered task awaiting acknowledgement
#[derive(Debug, Clone)]
pub struct ReceivedTask {
    pub envelope: TaskEnvelope,
    /// Opaque handle passed back to `ack`
    pub receipt: String,
}

/// At-least-once task delivery
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(&self, envelope: &TaskEnvelope) -> Result<()>;

    async fn enqueue_delayed(&self, envelope: &TaskEnvelope, delay: Duration) -> Result<()>;

    /// Receive a batch; may wait for the configured poll timeout
    async fn receive(&self) -> Result<Vec<ReceivedTask>>;

    /// Acknowledge a processed task
    async fn ack(&self, receipt: &str) -> Result<()>;

    /// Keep a long-running task invisible to other consumers
    async fn extend(&self, _receipt: &str, _duration: Duration) -> Result<()> {
        Ok(())
    }

    /// Wrap and enqueue a task
    async fn push(&self, task: Task) -> Result<Uuid> {
        let envelope = TaskEnvelope::new(task);
        self.enqueue(&envelope).await?;
        Ok(envelope.id)
    }
}

// ============================================================================
// SQS
// ============================================================================

/// SQS queue configuration
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Queue URL
    pub url: String,
    /// Dead letter queue URL (optional)
    pub dlq_url: Option<String>,
    /// Visibility timeout in seconds
    pub visibility_timeout: i32,
    /// Wait time for long polling (seconds)
    pub wait_time_seconds: i32,
    /// Maximum number of messages per poll
    pub max_messages: i32,
}

impl QueueConfig {
    /// Build from the application config; `None` when no queue URL is set
    pub fn from_app(config: &AppQueueConfig) -> Option<Self> {
        config.task_queue_url.as_ref().map(|url| Self {
            url: url.clone(),
            dlq_url: config.dlq_url.clone(),
            visibility_timeout: config.visibility_timeout_secs as i32,
            wait_time_seconds: config.poll_timeout_secs.min(20) as i32,
            max_messages: config.batch_size.clamp(1, 10) as i32,
        })
    }
}

/// SQS Queue client wrapper
pub struct Queue {
    client: SqsClient,
    config: QueueConfig,
}

impl Queue {
    /// Create a new queue client
    pub async fn new(config: QueueConfig) -> Result<Self> {
        let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let client = SqsClient::new(&aws_config);

        Ok(Self { client, config })
    }

    /// Create with existing AWS config
    pub fn with_client(client: SqsClient, config: QueueConfig) -> Self {
        Self { client, config }
    }

    async fn send(&self, envelope: &TaskEnvelope, delay_seconds: Option<i32>) -> Result<()> {
        let body = serde_json::to_string(envelope).map_err(|e| AppError::QueueError {
            message: format!("Failed to serialize task: {}", e),
        })?;

        let policy = ExponentialBackoff {
            max_elapsed_time: Some(Duration::from_secs(10)),
            ..Default::default()
        };

        let client = &self.client;
        let url = &self.config.url;
        let body = &body;

        let result = retry(policy, move || async move {
            let mut request = client.send_message().queue_url(url).message_body(body);
            if let Some(delay) = delay_seconds {
                request = request.delay_seconds(delay);
            }
            request.send().await.map_err(|e| {
                warn!(error = %e, "Failed to send task, retrying");
                backoff::Error::transient(e)
            })
        })
        .await
        .map_err(|e| AppError::QueueError {
            message: format!("Failed to send task: {}", e),
        })?;

        debug!(
            message_id = %result.message_id.unwrap_or_default(),
            task = envelope.task.name(),
            "Task sent to queue"
        );
        Ok(())
    }

    /// Parse message body as a task envelope
    pub fn parse_message(message: &Message) -> Result<TaskEnvelope> {
        let body = message.body.as_ref().ok_or_else(|| AppError::QueueError {
            message: "Message has no body".to_string(),
        })?;

        serde_json::from_str(body).map_err(|e| AppError::QueueError {
            message: format!("Failed to parse message: {}", e),
        })
    }

    async fn delete(&self, receipt_handle: &str) -> Result<()> {
        self.client
            .delete_message()
            .queue_url(&self.config.url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| AppError::QueueError {
                message: format!("Failed to delete message: {}", e),
            })?;

        debug!("Message deleted from queue");
        Ok(())
    }

    /// Park an unreadable message on the dead letter queue, if configured
    async fn dead_letter(&self, message: &Message) -> Result<()> {
        if let (Some(dlq), Some(body)) = (&self.config.dlq_url, &message.body) {
            self.client
                .send_message()
                .queue_url(dlq)
                .message_body(body)
                .send()
                .await
                .map_err(|e| AppError::QueueError {
                    message: format!("Failed to dead-letter message: {}", e),
                })?;
        }
        Ok(())
    }
}

#[async_trait]
impl TaskQueue for Queue {
    async fn enqueue(&self, envelope: &TaskEnvelope) -> Result<()> {
        self.send(envelope, None).await
    }

    async fn enqueue_delayed(&self, envelope: &TaskEnvelope, delay: Duration) -> Result<()> {
        let delay = delay.as_secs().min(MAX_SQS_DELAY_SECS) as i32;
        self.send(envelope, Some(delay)).await
    }

    async fn receive(&self) -> Result<Vec<ReceivedTask>> {
        let result = self
            .client
            .receive_message()
            .queue_url(&self.config.url)
            .max_number_of_messages(self.config.max_messages)
            .visibility_timeout(self.config.visibility_timeout)
            .wait_time_seconds(self.config.wait_time_seconds)
            .send()
            .await
            .map_err(|e| AppError::QueueError {
                message: format!("Failed to receive messages: {}", e),
            })?;

        let messages = result.messages.unwrap_or_default();
        debug!(count = messages.len(), "Received messages from queue");

        let mut tasks = Vec::with_capacity(messages.len());
        for message in messages {
            let Some(receipt) = message.receipt_handle.clone() else {
                continue;
            };
            match Self::parse_message(&message) {
                Ok(envelope) => tasks.push(ReceivedTask { envelope, receipt }),
                Err(e) => {
                    warn!(error = %e, "Dropping unreadable message");
                    self.dead_letter(&message).await?;
                    self.delete(&receipt).await?;
                }
            }
        }
        Ok(tasks)
    }

    async fn ack(&self, receipt: &str) -> Result<()> {
        self.delete(receipt).await
    }

    async fn extend(&self, receipt: &str, duration: Duration) -> Result<()> {
        self.client
            .change_message_visibility()
            .queue_url(&self.config.url)
            .receipt_handle(receipt)
            .visibility_timeout(duration.as_secs() as i32)
            .send()
            .await
            .map_err(|e| AppError::QueueError {
                message: format!("Failed to extend visibility: {}", e),
            })?;

        debug!(seconds = duration.as_secs(), "Extended message visibility");
        Ok(())
    }
}

// ============================================================================
// In-process
// ============================================================================

/// Queue kept in memory; delivered tasks stay in flight until acknowledged
#[derive(Default)]
pub struct MemoryTaskQueue {
    ready: Mutex<VecDeque<(Instant, TaskEnvelope)>>,
    in_flight: Mutex<HashMap<String, TaskEnvelope>>,
    batch_size: usize,
}

impl MemoryTaskQueue {
    pub fn new() -> Self {
        Self {
            batch_size: 10,
            ..Default::default()
        }
    }

    /// Tasks waiting for delivery (including delayed ones)
    pub async fn pending(&self) -> Vec<Task> {
        self.ready.lock().await.iter().map(|(_, e)| e.task.clone()).collect()
    }

    pub async fn in_flight(&self) -> usize {
        self.in_flight.lock().await.len()
    }

    /// Remove and return every pending task
    pub async fn drain(&self) -> Vec<Task> {
        self.ready.lock().await.drain(..).map(|(_, e)| e.task).collect()
    }
}

#[async_trait]
impl TaskQueue for MemoryTaskQueue {
    async fn enqueue(&self, envelope: &TaskEnvelope) -> Result<()> {
        self.ready.lock().await.push_back((Instant::now(), envelope.clone()));
        Ok(())
    }

    async fn enqueue_delayed(&self, envelope: &TaskEnvelope, delay: Duration) -> Result<()> {
        self.ready
            .lock()
            .await
            .push_back((Instant::now() + delay, envelope.clone()));
        Ok(())
    }

    async fn receive(&self) -> Result<Vec<ReceivedTask>> {
        let now = Instant::now();
        let mut ready = self.ready.lock().await;
        let mut in_flight = self.in_flight.lock().await;

        let mut delivered = Vec::new();
        let mut remaining = VecDeque::with_capacity(ready.len());
        for (due, envelope) in ready.drain(..) {
            if due <= now && delivered.len() < self.batch_size.max(1) {
                let receipt = Uuid::new_v4().to_string();
                in_flight.insert(receipt.clone(), envelope.clone());
                delivered.push(ReceivedTask { envelope, receipt });
            } else {
                remaining.push_back((due, envelope));
            }
        }
        *ready = remaining;

        Ok(delivered)
    }

    async fn ack(&self, receipt: &str) -> Result<()> {
        self.in_flight.lock().await.remove(receipt);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_queue_delivery_and_ack() {
        let queue = MemoryTaskQueue::new();
        let record_id = Uuid::new_v4();
        queue.push(Task::IndexRecord { record_id }).await.unwrap();
        queue
            .enqueue_delayed(
                &TaskEnvelope::new(Task::SyncRecordOai { record_id }),
                Duration::from_secs(60),
            )
            .await
            .unwrap();

        let batch = queue.receive().await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].envelope.task, Task::IndexRecord { record_id });
        assert_eq!(queue.in_flight().await, 1);
        assert_eq!(queue.pending().await.len(), 1);

        queue.ack(&batch[0].receipt).await.unwrap();
        assert_eq!(queue.in_flight().await, 0);
        assert!(queue.receive().await.unwrap().is_empty());
    }

    #[test]
    fn test_queue_config_from_app() {
        let mut app = AppQueueConfig::default();
        assert!(QueueConfig::from_app(&app).is_none());

        app.task_queue_url = Some("https://sqs.example/queue".into());
        app.batch_size = 50;
        let config = QueueConfig::from_app(&app).unwrap();
        assert_eq!(config.max_messages, 10);
    }
}
