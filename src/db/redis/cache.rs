use redis::AsyncCommands;
use redis::Client;
use std::collections::HashSet;
use std::fmt::Display;
use tokio::sync::mpsc;

use crate::db::store::RecsStore;
use crate::error::AppError;
use crate::error::AppResult;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    TopItems,
    UserRecs(String),
    Watched(String),
}

/// Patterns of the per-user keys, removed by [`RecsStore::flush`]
pub const USER_KEY_PATTERNS: [&str; 2] = ["recs:*", "watched:*"];

impl Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheKey::TopItems => write!(f, "top_items"),
            CacheKey::UserRecs(user_id) => write!(f, "recs:{}", user_id),
            CacheKey::Watched(user_id) => write!(f, "watched:{}", user_id),
        }
    }
}

/// Creates a Redis client for caching
///
/// The client is cheap to clone; each operation opens a multiplexed connection.
pub fn create_redis_client(redis_url: &str) -> anyhow::Result<Client> {
    let client = Client::open(redis_url)?;
    Ok(client)
}

/// Message for asynchronous cache writes
struct CacheWriteMessage {
    key: String,
    value: String,
}

/// Redis-backed [`RecsStore`]
#[derive(Clone)]
pub struct Cache {
    redis_client: Client,
    write_tx: mpsc::UnboundedSender<CacheWriteMessage>,
}

/// Handle for gracefully shutting down the cache writer
pub struct CacheWriterHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl CacheWriterHandle {
    /// Signals the writer task to flush pending writes and stop
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        tracing::info!("Cache writer shutdown signal sent");
    }
}

impl Cache {
    /// Creates a new Cache and spawns its background writer
    ///
    /// Per-user lists are written through the writer so that a retrain over
    /// many users does not wait on one round trip per user.
    pub async fn new(redis_client: Client) -> (Self, CacheWriterHandle) {
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let client = redis_client.clone();
        tokio::spawn(async move {
            Self::cache_writer_task(client, write_rx, shutdown_rx).await;
        });

        let cache = Self {
            redis_client,
            write_tx,
        };

        (cache, CacheWriterHandle { shutdown_tx })
    }

    async fn cache_writer_task(
        client: Client,
        mut write_rx: mpsc::UnboundedReceiver<CacheWriteMessage>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        tracing::info!("Cache writer task started");
        let mut written: u64 = 0;

        loop {
            tokio::select! {
                Some(msg) = write_rx.recv() => {
                    match Self::write_to_redis(&client, msg).await {
                        Ok(()) => written += 1,
                        Err(e) => tracing::error!(error = %e, "Failed to write to Redis cache"),
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!(written, "Cache writer shutting down, flushing remaining writes");

                    // Senders live in every Cache clone, so drain what is queued instead of
                    // waiting for the channel to close.
                    while let Ok(msg) = write_rx.try_recv() {
                        if let Err(e) = Self::write_to_redis(&client, msg).await {
                            tracing::error!(error = %e, "Failed to flush cache write during shutdown");
                        }
                    }

                    tracing::info!("Cache writer task stopped");
                    break;
                }
            }
        }
    }

    async fn write_to_redis(client: &Client, msg: CacheWriteMessage) -> AppResult<()> {
        let mut conn = client.get_multiplexed_async_connection().await?;
        let _: () = conn.set(msg.key, msg.value).await?;
        Ok(())
    }

    /// Reads a JSON value stored under `key`, `None` on a miss
    pub async fn get_from_cache<T: serde::de::DeserializeOwned>(
        &self,
        key: &CacheKey,
    ) -> AppResult<Option<T>> {
        let mut conn = self.redis_client.get_multiplexed_async_connection().await?;
        let cached: Option<String> = conn.get(key.to_string()).await?;

        match cached {
            Some(json) => {
                let data = serde_json::from_str(&json).map_err(|e| {
                    AppError::Internal(format!("Cache deserialization error: {}", e))
                })?;
                Ok(Some(data))
            }
            None => Ok(None),
        }
    }

    /// Writes a JSON value and waits for Redis to confirm
    pub async fn set_now<T: serde::Serialize + ?Sized>(
        &self,
        key: &CacheKey,
        value: &T,
    ) -> AppResult<()> {
        let json = serde_json::to_string(value)?;
        let mut conn = self.redis_client.get_multiplexed_async_connection().await?;
        let _: () = conn.set(key.to_string(), json).await?;
        Ok(())
    }

    /// Queues a JSON write for the background writer and returns immediately
    pub fn set_in_background<T: serde::Serialize + ?Sized>(
        &self,
        key: &CacheKey,
        value: &T,
    ) {
        let json = match serde_json::to_string(value) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(error = %e, "Cache serialization error");
                return;
            }
        };

        let msg = CacheWriteMessage {
            key: key.to_string(),
            value: json,
        };

        if let Err(e) = self.write_tx.send(msg) {
            tracing::error!(error = %e, "Failed to send cache write message");
        }
    }
}

#[async_trait::async_trait]
impl RecsStore for Cache {
    async fn top_items(&self) -> AppResult<Option<Vec<String>>> {
        self.get_from_cache(&CacheKey::TopItems).await
    }

    async fn set_top_items(&self, item_ids: &[String]) -> AppResult<()> {
        self.set_now(&CacheKey::TopItems, item_ids).await
    }

    async fn user_recs(&self, user_id: &str) -> AppResult<Option<Vec<String>>> {
        self.get_from_cache(&CacheKey::UserRecs(user_id.to_string()))
            .await
    }

    async fn set_user_recs(&self, user_id: &str, item_ids: &[String]) -> AppResult<()> {
        self.set_in_background(&CacheKey::UserRecs(user_id.to_string()), item_ids);
        Ok(())
    }

    async fn add_watched(&self, user_id: &str, item_ids: &[String]) -> AppResult<()> {
        if item_ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.redis_client.get_multiplexed_async_connection().await?;
        let _: () = conn
            .sadd(CacheKey::Watched(user_id.to_string()).to_string(), item_ids)
            .await?;
        Ok(())
    }

    async fn watched(&self, user_id: &str) -> AppResult<HashSet<String>> {
        let mut conn = self.redis_client.get_multiplexed_async_connection().await?;
        let members: HashSet<String> = conn
            .smembers(CacheKey::Watched(user_id.to_string()).to_string())
            .await?;
        Ok(members)
    }

    /// Deletes the store's own keys
    ///
    /// The interaction stream may share this database, so the database itself
    /// is never flushed.
    async fn flush(&self) -> AppResult<()> {
        let mut conn = self.redis_client.get_multiplexed_async_connection().await?;

        let mut keys = vec![CacheKey::TopItems.to_string()];
        for pattern in USER_KEY_PATTERNS {
            let mut iter: redis::AsyncIter<String> = conn.scan_match(pattern).await?;
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
        }

        let deleted: i64 = conn.del(&keys).await?;
        tracing::info!(deleted, "Flushed recommendation keys");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn redis_url() -> String {
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string())
    }

    #[test]
    fn test_cache_key_display_top_items() {
        assert_eq!(CacheKey::TopItems.to_string(), "top_items");
    }

    #[test]
    fn test_cache_key_display_user_recs() {
        let key = CacheKey::UserRecs("5f1c".to_string());
        assert_eq!(key.to_string(), "recs:5f1c");
    }

    #[test]
    fn test_cache_key_display_watched() {
        let key = CacheKey::Watched("5f1c".to_string());
        assert_eq!(key.to_string(), "watched:5f1c");
    }

    #[test]
    fn test_user_key_patterns_cover_user_keys() {
        let recs = CacheKey::UserRecs("u".to_string()).to_string();
        let watched = CacheKey::Watched("u".to_string()).to_string();
        for key in [recs, watched] {
            assert!(USER_KEY_PATTERNS
                .iter()
                .any(|p| key.starts_with(p.trim_end_matches('*'))));
        }
    }

    #[tokio::test]
    #[ignore = "requires a running Redis"]
    async fn test_flush_keeps_foreign_keys() {
        let client = create_redis_client(&redis_url()).unwrap();
        let (cache, _handle) = Cache::new(client.clone()).await;
        let mut conn = client.get_multiplexed_async_connection().await.unwrap();

        let _: () = conn.set("flush-test:other", "kept").await.unwrap();
        cache.set_top_items(&["1".to_string()]).await.unwrap();
        cache.add_watched("flush-user", &["1".to_string()]).await.unwrap();

        cache.flush().await.unwrap();

        assert_eq!(cache.top_items().await.unwrap(), None);
        assert!(cache.watched("flush-user").await.unwrap().is_empty());
        let other: Option<String> = conn.get("flush-test:other").await.unwrap();
        assert_eq!(other.as_deref(), Some("kept"));

        let _: () = conn.del("flush-test:other").await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires a running Redis"]
    async fn test_top_items_round_trip() {
        let client = create_redis_client(&redis_url()).unwrap();
        let (cache, _handle) = Cache::new(client.clone()).await;

        let items = vec!["1".to_string(), "2".to_string()];
        cache.set_top_items(&items).await.unwrap();
        assert_eq!(cache.top_items().await.unwrap(), Some(items));

        let mut conn = client.get_multiplexed_async_connection().await.unwrap();
        let _: () = conn.del(CacheKey::TopItems.to_string()).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires a running Redis"]
    async fn test_user_recs_flushed_on_shutdown() {
        let client = create_redis_client(&redis_url()).unwrap();
        let (cache, handle) = Cache::new(client.clone()).await;

        let items = vec!["42".to_string()];
        cache.set_user_recs("shutdown-user", &items).await.unwrap();

        handle.shutdown().await;
        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;

        assert_eq!(cache.user_recs("shutdown-user").await.unwrap(), Some(items));

        let mut conn = client.get_multiplexed_async_connection().await.unwrap();
        let key = CacheKey::UserRecs("shutdown-user".to_string()).to_string();
        let _: () = conn.del(key).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires a running Redis"]
    async fn test_watched_set() {
        let client = create_redis_client(&redis_url()).unwrap();
        let (cache, _handle) = Cache::new(client.clone()).await;

        let items = vec!["1".to_string(), "2".to_string()];
        cache.add_watched("watched-user", &items).await.unwrap();
        let watched = cache.watched("watched-user").await.unwrap();
        assert!(watched.contains("1") && watched.contains("2"));

        let mut conn = client.get_multiplexed_async_connection().await.unwrap();
        let key = CacheKey::Watched("watched-user".to_string()).to_string();
        let _: () = conn.del(key).await.unwrap();
    }
}
