//! In-memory task queue for embedded deployments and tests.
//!
//! Mirrors the broker contract closely enough for the dispatcher and
//! worker to run against it unchanged: FIFO delivery, per-delivery
//! tags, explicit ack/nack, and a dead-letter store for messages
//! rejected without requeue. Routing keys are accepted but not used
//! for filtering since there is a single queue.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use router_core::{RouterError, RouterResult};
use router_domain::entities::TaskMessage;
use router_domain::messaging::{TaskDelivery, TaskQueue};

#[derive(Default)]
struct QueueState {
    pending: VecDeque<TaskMessage>,
    /// Delivered but not yet acked, keyed by delivery tag.
    unacked: HashMap<u64, TaskMessage>,
    dead: Vec<TaskMessage>,
    next_tag: u64,
}

/// Single-queue in-memory implementation of [`TaskQueue`].
#[derive(Default)]
pub struct InMemoryTaskQueue {
    state: Mutex<QueueState>,
}

impl InMemoryTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages rejected without requeue. Exposed for assertions and
    /// operational inspection; a broker would route these to a DLQ.
    pub async fn dead_letters(&self) -> Vec<TaskMessage> {
        self.state.lock().await.dead.clone()
    }

    /// Deliveries waiting on ack or nack.
    pub async fn unacked_count(&self) -> usize {
        self.state.lock().await.unacked.len()
    }
}

#[async_trait]
impl TaskQueue for InMemoryTaskQueue {
    async fn publish_task(&self, routing_key: &str, task: &TaskMessage) -> RouterResult<()> {
        let mut state = self.state.lock().await;
        state.pending.push_back(task.clone());
        debug!(
            "queued task {} (routing key {}), depth {}",
            task.task_id,
            routing_key,
            state.pending.len()
        );
        Ok(())
    }

    async fn fetch_task(&self) -> RouterResult<Option<TaskDelivery>> {
        let mut state = self.state.lock().await;
        let Some(task) = state.pending.pop_front() else {
            return Ok(None);
        };
        // Tags are assigned per delivery, so a requeued message gets a
        // fresh tag on its next fetch, matching broker behavior.
        state.next_tag += 1;
        let delivery_tag = state.next_tag;
        state.unacked.insert(delivery_tag, task.clone());
        Ok(Some(TaskDelivery { delivery_tag, task }))
    }

    async fn ack(&self, delivery_tag: u64) -> RouterResult<()> {
        let mut state = self.state.lock().await;
        state
            .unacked
            .remove(&delivery_tag)
            .map(|_| ())
            .ok_or_else(|| {
                RouterError::MessageQueue(format!("unknown delivery tag: {delivery_tag}"))
            })
    }

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> RouterResult<()> {
        let mut state = self.state.lock().await;
        let Some(task) = state.unacked.remove(&delivery_tag) else {
            return Err(RouterError::MessageQueue(format!(
                "unknown delivery tag: {delivery_tag}"
            )));
        };
        if requeue {
            // Redeliver ahead of newer messages, like a broker requeue.
            state.pending.push_front(task);
        } else {
            debug!("dead-lettered task {}", task.task_id);
            state.dead.push(task);
        }
        Ok(())
    }

    async fn queue_depth(&self) -> RouterResult<u32> {
        Ok(self.state.lock().await.pending.len() as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use router_domain::entities::TaskMetadata;

    fn task(task_id: &str) -> TaskMessage {
        TaskMessage {
            task_id: task_id.to_string(),
            analyze_uuid: "rec-1".to_string(),
            analysis_method_id: "fft".to_string(),
            config_id: "cfg-1".to_string(),
            target_instance: "primary".to_string(),
            created_at: Utc::now(),
            retry_count: 0,
            metadata: TaskMetadata {
                rule_id: "rule-1".to_string(),
                rule_name: "rule".to_string(),
                router_id: "R1".to_string(),
                config_name: "cfg".to_string(),
                sequence_order: None,
            },
        }
    }

    #[tokio::test]
    async fn test_fifo_delivery_and_ack() {
        let queue = InMemoryTaskQueue::new();
        queue.publish_task("analysis.fft", &task("t1")).await.unwrap();
        queue.publish_task("analysis.fft", &task("t2")).await.unwrap();
        assert_eq!(queue.queue_depth().await.unwrap(), 2);

        let first = queue.fetch_task().await.unwrap().unwrap();
        assert_eq!(first.task.task_id, "t1");
        assert_eq!(queue.queue_depth().await.unwrap(), 1);
        assert_eq!(queue.unacked_count().await, 1);

        queue.ack(first.delivery_tag).await.unwrap();
        assert_eq!(queue.unacked_count().await, 0);
    }

    #[tokio::test]
    async fn test_nack_requeue_redelivers_first_with_new_tag() {
        let queue = InMemoryTaskQueue::new();
        queue.publish_task("analysis.fft", &task("t1")).await.unwrap();
        queue.publish_task("analysis.fft", &task("t2")).await.unwrap();

        let first = queue.fetch_task().await.unwrap().unwrap();
        queue.nack(first.delivery_tag, true).await.unwrap();

        let redelivered = queue.fetch_task().await.unwrap().unwrap();
        assert_eq!(redelivered.task.task_id, "t1");
        assert_ne!(redelivered.delivery_tag, first.delivery_tag);
    }

    #[tokio::test]
    async fn test_nack_without_requeue_dead_letters() {
        let queue = InMemoryTaskQueue::new();
        queue.publish_task("analysis.fft", &task("t1")).await.unwrap();

        let delivery = queue.fetch_task().await.unwrap().unwrap();
        queue.nack(delivery.delivery_tag, false).await.unwrap();

        assert_eq!(queue.queue_depth().await.unwrap(), 0);
        let dead = queue.dead_letters().await;
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].task_id, "t1");
    }

    #[tokio::test]
    async fn test_unknown_delivery_tag_is_an_error() {
        let queue = InMemoryTaskQueue::new();
        assert!(queue.ack(99).await.is_err());
        assert!(queue.nack(99, true).await.is_err());
    }

    #[tokio::test]
    async fn test_empty_queue_fetch_returns_none() {
        let queue = InMemoryTaskQueue::new();
        assert!(queue.fetch_task().await.unwrap().is_none());
    }
}
