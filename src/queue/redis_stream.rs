//! Redis streams transport
//!
//! Layout:
//! - stream `{queue_name}`: one entry per event with fields
//!   `routing_key`, `content_type` and `payload` (JSON)
//! - consumer group `{exchange}/{routing_key}`: the queue binding; each
//!   pipeline process reads as one named consumer
//!
//! Entries stay in the group's pending list until acked, so a pipeline that
//! dies before persisting a batch gets it again on restart.

use std::time::Duration;

use redis::streams::{StreamId, StreamMaxlen, StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, Client};
use tokio::sync::Mutex;

use super::{Delivery, EventQueue, CONTENT_TYPE};
use crate::{
    error::{AppError, AppResult},
    models::InteractEvent,
};

pub struct RedisStreamQueue {
    client: Client,
    stream: String,
    group: String,
    consumer: String,
    routing_key: String,
    cursor: Mutex<ReadCursor>,
}

/// Where the next `XREADGROUP` starts
///
/// After a restart the consumer first walks its own pending list from `0`,
/// moving past every returned id, then switches to `>` for new entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadCursor {
    Pending(String),
    New,
}

impl ReadCursor {
    pub fn start() -> Self {
        ReadCursor::Pending("0".to_string())
    }

    pub fn start_id(&self) -> &str {
        match self {
            ReadCursor::Pending(id) => id,
            ReadCursor::New => ">",
        }
    }

    /// Moves past the ids a read returned
    pub fn advance(&mut self, ids: &[&str]) {
        if let ReadCursor::Pending(last) = self {
            match ids.last() {
                Some(id) => *last = id.to_string(),
                None => *self = ReadCursor::New,
            }
        }
    }
}

impl RedisStreamQueue {
    /// Connects and declares the stream with its consumer group
    pub async fn connect(
        client: Client,
        exchange: &str,
        queue_name: &str,
        routing_key: &str,
        consumer: &str,
    ) -> AppResult<Self> {
        let queue = Self {
            client,
            stream: queue_name.to_string(),
            group: format!("{}/{}", exchange, routing_key),
            consumer: consumer.to_string(),
            routing_key: routing_key.to_string(),
            cursor: Mutex::new(ReadCursor::start()),
        };
        queue.declare().await?;

        tracing::info!(
            stream = %queue.stream,
            group = %queue.group,
            consumer = %queue.consumer,
            "Declared interaction stream"
        );

        Ok(queue)
    }

    async fn declare(&self) -> AppResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let created: Result<(), redis::RedisError> = conn
            .xgroup_create_mkstream(&self.stream, &self.group, "0")
            .await;

        match created {
            Ok(()) => Ok(()),
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Decodes one stream entry; `None` for entries this binding must drop
    fn decode(&self, entry: &StreamId) -> Option<InteractEvent> {
        let routing_key: Option<String> = entry.get("routing_key");
        if routing_key.as_deref() != Some(self.routing_key.as_str()) {
            tracing::warn!(
                entry_id = %entry.id,
                routing_key = ?routing_key,
                "Dropping entry published with a foreign routing key"
            );
            return None;
        }

        let payload: Option<String> = entry.get("payload");
        match payload.map(|p| serde_json::from_str::<InteractEvent>(&p)) {
            Some(Ok(event)) => Some(event),
            Some(Err(e)) => {
                tracing::warn!(entry_id = %entry.id, error = %e, "Dropping undecodable payload");
                None
            }
            None => {
                tracing::warn!(entry_id = %entry.id, "Dropping entry without payload");
                None
            }
        }
    }

    /// Reads from `start_id`, recreating the group if the stream was deleted
    async fn read_group(&self, max: usize, start_id: &str, wait: Duration) -> AppResult<Vec<StreamId>> {
        match self.try_read_group(max, start_id, wait).await {
            Err(e) if e.code() == Some("NOGROUP") => {
                tracing::warn!(stream = %self.stream, group = %self.group, "Consumer group missing, declaring again");
                self.declare().await?;
                Ok(self.try_read_group(max, start_id, wait).await?)
            }
            result => Ok(result?),
        }
    }

    async fn try_read_group(
        &self,
        max: usize,
        start_id: &str,
        wait: Duration,
    ) -> redis::RedisResult<Vec<StreamId>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let mut opts = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .count(max);
        // BLOCK 0 waits forever, so a zero wait means "do not block"
        let block_ms = wait.as_millis() as usize;
        if start_id == ">" && block_ms > 0 {
            opts = opts.block(block_ms);
        }

        let reply: Option<StreamReadReply> = conn
            .xread_options(&[&self.stream], &[start_id], &opts)
            .await?;

        Ok(reply
            .map(|r| r.keys.into_iter().flat_map(|k| k.ids).collect())
            .unwrap_or_default())
    }
}

#[async_trait::async_trait]
impl EventQueue for RedisStreamQueue {
    async fn publish(&self, event: &InteractEvent) -> AppResult<()> {
        let payload = serde_json::to_string(event)?;
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let entry_id: String = conn
            .xadd(
                &self.stream,
                "*",
                &[
                    ("routing_key", self.routing_key.as_str()),
                    ("content_type", CONTENT_TYPE),
                    ("payload", payload.as_str()),
                ],
            )
            .await
            .map_err(|e| AppError::Queue(format!("publish to {} failed: {}", self.stream, e)))?;

        tracing::debug!(entry_id = %entry_id, user_id = %event.user_id, "Published interaction");
        Ok(())
    }

    async fn receive(&self, max: usize, wait: Duration) -> AppResult<Vec<Delivery>> {
        let mut cursor = self.cursor.lock().await;
        let mut entries = self.read_group(max, cursor.start_id(), wait).await?;

        if let ReadCursor::Pending(_) = *cursor {
            let ids: Vec<&str> = entries.iter().map(|e| e.id.as_str()).collect();
            cursor.advance(&ids);
            if entries.is_empty() {
                entries = self.read_group(max, cursor.start_id(), wait).await?;
            } else {
                tracing::info!(count = entries.len(), "Redelivering pending interactions");
            }
        }
        drop(cursor);

        let mut deliveries = Vec::with_capacity(entries.len());
        let mut dropped = Vec::new();
        for entry in entries {
            match self.decode(&entry) {
                Some(event) => deliveries.push(Delivery {
                    tag: entry.id,
                    event,
                }),
                None => dropped.push(entry.id),
            }
        }

        if !dropped.is_empty() {
            self.ack(&dropped).await?;
        }

        Ok(deliveries)
    }

    async fn ack(&self, tags: &[String]) -> AppResult<()> {
        if tags.is_empty() {
            return Ok(());
        }
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let acked: i64 = conn.xack(&self.stream, &self.group, tags).await?;
        tracing::debug!(acked, "Acknowledged interactions");
        Ok(())
    }

    async fn purge(&self) -> AppResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let trimmed: i64 = conn.xtrim(&self.stream, StreamMaxlen::Equals(0)).await?;
        tracing::info!(stream = %self.stream, trimmed, "Purged interaction stream");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "redis-stream"
    }
}
