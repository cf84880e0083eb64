//! Interaction event transport
//!
//! The collector publishes [`InteractEvent`]s; the pipeline consumes them in
//! batches and acknowledges them once they are persisted to the interaction
//! log. Redis streams carry the events in deployment; the in-memory queue
//! backs tests and single-process runs.

use std::time::Duration;

use crate::{error::AppResult, models::InteractEvent};

pub mod memory;
pub mod redis_stream;

pub use memory::InMemoryQueue;
pub use redis_stream::RedisStreamQueue;

/// Content type attached to every published payload
pub const CONTENT_TYPE: &str = "text/json";

/// An event handed to a consumer, acknowledged later by `tag`
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub tag: String,
    pub event: InteractEvent,
}

/// Queue of interaction events bound to one routing key
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait EventQueue: Send + Sync {
    /// Publishes one event with the queue's routing key
    async fn publish(&self, event: &InteractEvent) -> AppResult<()>;

    /// Takes at most `max` deliveries, waiting up to `wait` for the first one
    ///
    /// Returns an empty vector when nothing arrived in time.
    async fn receive(&self, max: usize, wait: Duration) -> AppResult<Vec<Delivery>>;

    /// Acknowledges deliveries so they are not redelivered
    async fn ack(&self, tags: &[String]) -> AppResult<()>;

    /// Drops every event not yet delivered
    async fn purge(&self) -> AppResult<()>;

    /// Transport name for logging
    fn name(&self) -> &'static str;
}
