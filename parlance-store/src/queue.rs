//! Typed work queues with visibility-timeout semantics.
//!
//! Delivery is at-least-once: a received message becomes invisible for the
//! visibility window and is re-delivered if not acked in time. Consumers
//! deduplicate by event fingerprint.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use uuid::Uuid;

use parlance_core::{QueueError, QueueName, Timestamp};

/// One received message. The receipt handle acks or nacks this delivery,
/// not the payload in general.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub receipt: Uuid,
    pub payload: String,
    pub enqueued_at: Timestamp,
    pub delivery_count: u32,
}

/// Message queue abstraction.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Enqueue a payload.
    async fn send(&self, queue: QueueName, payload: &str) -> Result<(), QueueError>;

    /// Receive up to `max` messages, making them invisible for `visibility`.
    async fn receive(
        &self,
        queue: QueueName,
        max: usize,
        visibility: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError>;

    /// Delete a received message.
    async fn ack(&self, queue: QueueName, receipt: Uuid) -> Result<(), QueueError>;

    /// Return a received message to the queue immediately.
    async fn nack(&self, queue: QueueName, receipt: Uuid) -> Result<(), QueueError>;

    /// Extend the visibility window of an in-flight message.
    async fn extend(
        &self,
        queue: QueueName,
        receipt: Uuid,
        extra: Duration,
    ) -> Result<(), QueueError>;
}

struct QueuedEntry {
    payload: String,
    enqueued_at: Timestamp,
    visible_at: Instant,
    delivery_count: u32,
    /// Receipt of the in-flight delivery, if any
    receipt: Option<Uuid>,
}

/// In-memory queue with visibility timeouts.
#[derive(Default)]
pub struct MemoryQueue {
    queues: Mutex<HashMap<QueueName, Vec<QueuedEntry>>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkQueue for MemoryQueue {
    async fn send(&self, queue: QueueName, payload: &str) -> Result<(), QueueError> {
        let mut queues = self.queues.lock().await;
        queues.entry(queue).or_default().push(QueuedEntry {
            payload: payload.to_string(),
            enqueued_at: Utc::now(),
            visible_at: Instant::now(),
            delivery_count: 0,
            receipt: None,
        });
        Ok(())
    }

    async fn receive(
        &self,
        queue: QueueName,
        max: usize,
        visibility: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        let now = Instant::now();
        let mut queues = self.queues.lock().await;
        let entries = queues.entry(queue).or_default();
        let mut received = Vec::new();
        for entry in entries.iter_mut() {
            if received.len() >= max {
                break;
            }
            if entry.visible_at > now {
                continue;
            }
            let receipt = Uuid::new_v4();
            entry.visible_at = now + visibility;
            entry.delivery_count += 1;
            entry.receipt = Some(receipt);
            received.push(QueueMessage {
                receipt,
                payload: entry.payload.clone(),
                enqueued_at: entry.enqueued_at,
                delivery_count: entry.delivery_count,
            });
        }
        Ok(received)
    }

    async fn ack(&self, queue: QueueName, receipt: Uuid) -> Result<(), QueueError> {
        let mut queues = self.queues.lock().await;
        let entries = queues.entry(queue).or_default();
        let before = entries.len();
        entries.retain(|entry| entry.receipt != Some(receipt));
        if entries.len() == before {
            return Err(QueueError::UnknownReceipt { queue });
        }
        Ok(())
    }

    async fn nack(&self, queue: QueueName, receipt: Uuid) -> Result<(), QueueError> {
        let mut queues = self.queues.lock().await;
        let entries = queues.entry(queue).or_default();
        let entry = entries
            .iter_mut()
            .find(|entry| entry.receipt == Some(receipt))
            .ok_or(QueueError::UnknownReceipt { queue })?;
        entry.visible_at = Instant::now();
        entry.receipt = None;
        Ok(())
    }

    async fn extend(
        &self,
        queue: QueueName,
        receipt: Uuid,
        extra: Duration,
    ) -> Result<(), QueueError> {
        let mut queues = self.queues.lock().await;
        let entries = queues.entry(queue).or_default();
        let entry = entries
            .iter_mut()
            .find(|entry| entry.receipt == Some(receipt))
            .ok_or(QueueError::UnknownReceipt { queue })?;
        entry.visible_at += extra;
        Ok(())
    }
}
