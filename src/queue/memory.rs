use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use super::{Delivery, EventQueue};
use crate::{error::AppResult, models::InteractEvent};

/// Process-local event queue
///
/// Deliveries stay unacked until [`EventQueue::ack`]; `purge` only drops
/// events that were not delivered yet.
#[derive(Default)]
pub struct InMemoryQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

#[derive(Default)]
struct QueueState {
    next_tag: u64,
    ready: VecDeque<Delivery>,
    unacked: HashMap<String, InteractEvent>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events waiting to be delivered
    pub async fn ready_len(&self) -> usize {
        self.state.lock().await.ready.len()
    }

    /// Events delivered but not acknowledged
    pub async fn unacked_len(&self) -> usize {
        self.state.lock().await.unacked.len()
    }
}

#[async_trait::async_trait]
impl EventQueue for InMemoryQueue {
    async fn publish(&self, event: &InteractEvent) -> AppResult<()> {
        let mut state = self.state.lock().await;
        state.next_tag += 1;
        let tag = state.next_tag.to_string();
        state.ready.push_back(Delivery {
            tag,
            event: event.clone(),
        });
        drop(state);

        self.notify.notify_one();
        Ok(())
    }

    async fn receive(&self, max: usize, wait: Duration) -> AppResult<Vec<Delivery>> {
        let deadline = Instant::now() + wait;

        loop {
            {
                let mut state = self.state.lock().await;
                if !state.ready.is_empty() {
                    let take = max.min(state.ready.len());
                    let batch: Vec<Delivery> = state.ready.drain(..take).collect();
                    for delivery in &batch {
                        state
                            .unacked
                            .insert(delivery.tag.clone(), delivery.event.clone());
                    }
                    return Ok(batch);
                }
            }

            if tokio::time::timeout_at(deadline, self.notify.notified())
                .await
                .is_err()
            {
                return Ok(Vec::new());
            }
        }
    }

    async fn ack(&self, tags: &[String]) -> AppResult<()> {
        let mut state = self.state.lock().await;
        for tag in tags {
            state.unacked.remove(tag);
        }
        Ok(())
    }

    async fn purge(&self) -> AppResult<()> {
        let mut state = self.state.lock().await;
        let dropped = state.ready.len();
        state.ready.clear();
        tracing::info!(dropped, "Purged in-memory queue");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "in-memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Action;
    use std::sync::Arc;

    fn event(user: &str) -> InteractEvent {
        InteractEvent {
            user_id: user.to_string(),
            item_ids: vec!["1".to_string()],
            actions: vec![Action::Like],
            timestamp: Some(1.0),
        }
    }

    #[tokio::test]
    async fn test_receive_respects_max() {
        let queue = InMemoryQueue::new();
        for user in ["a", "b", "c"] {
            queue.publish(&event(user)).await.unwrap();
        }

        let batch = queue.receive(2, Duration::from_millis(10)).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].event.user_id, "a");
        assert_eq!(batch[1].event.user_id, "b");
        assert_eq!(queue.ready_len().await, 1);
        assert_eq!(queue.unacked_len().await, 2);
    }

    #[tokio::test]
    async fn test_receive_times_out_empty() {
        let queue = InMemoryQueue::new();
        let batch = queue.receive(10, Duration::from_millis(20)).await.unwrap();
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn test_receive_wakes_on_publish() {
        let queue = Arc::new(InMemoryQueue::new());
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.receive(10, Duration::from_secs(5)).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.publish(&event("late")).await.unwrap();

        let batch = consumer.await.unwrap().unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].event.user_id, "late");
    }

    #[tokio::test]
    async fn test_ack_clears_unacked() {
        let queue = InMemoryQueue::new();
        queue.publish(&event("a")).await.unwrap();
        let batch = queue.receive(10, Duration::from_millis(10)).await.unwrap();

        let tags: Vec<String> = batch.into_iter().map(|d| d.tag).collect();
        queue.ack(&tags).await.unwrap();
        assert_eq!(queue.unacked_len().await, 0);
    }

    #[tokio::test]
    async fn test_purge_drops_ready_only() {
        let queue = InMemoryQueue::new();
        queue.publish(&event("a")).await.unwrap();
        queue.receive(1, Duration::from_millis(10)).await.unwrap();
        queue.publish(&event("b")).await.unwrap();

        queue.purge().await.unwrap();
        assert_eq!(queue.ready_len().await, 0);
        assert_eq!(queue.unacked_len().await, 1);
    }
}
