use std::collections::{HashMap, HashSet};

use tokio::sync::RwLock;

use crate::error::AppResult;

/// Key-value storage for the lists served by `/recs`
///
/// The pipeline writes top items and personalized lists; the recommendations
/// service reads them. Watched sets are filled by the collector.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait RecsStore: Send + Sync {
    /// Most-liked items, `None` until the pipeline has written them
    async fn top_items(&self) -> AppResult<Option<Vec<String>>>;

    async fn set_top_items(&self, item_ids: &[String]) -> AppResult<()>;

    /// Personalized list for a user, `None` when the model has not seen them
    async fn user_recs(&self, user_id: &str) -> AppResult<Option<Vec<String>>>;

    async fn set_user_recs(&self, user_id: &str, item_ids: &[String]) -> AppResult<()>;

    /// Records items the user has already reacted to
    async fn add_watched(&self, user_id: &str, item_ids: &[String]) -> AppResult<()>;

    async fn watched(&self, user_id: &str) -> AppResult<HashSet<String>>;

    /// Drops every stored list and watched set
    async fn flush(&self) -> AppResult<()>;
}

/// Process-local store used by tests and single-process runs
#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<InMemoryStoreInner>,
}

#[derive(Default)]
struct InMemoryStoreInner {
    top_items: Option<Vec<String>>,
    user_recs: HashMap<String, Vec<String>>,
    watched: HashMap<String, HashSet<String>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl RecsStore for InMemoryStore {
    async fn top_items(&self) -> AppResult<Option<Vec<String>>> {
        Ok(self.inner.read().await.top_items.clone())
    }

    async fn set_top_items(&self, item_ids: &[String]) -> AppResult<()> {
        self.inner.write().await.top_items = Some(item_ids.to_vec());
        Ok(())
    }

    async fn user_recs(&self, user_id: &str) -> AppResult<Option<Vec<String>>> {
        Ok(self.inner.read().await.user_recs.get(user_id).cloned())
    }

    async fn set_user_recs(&self, user_id: &str, item_ids: &[String]) -> AppResult<()> {
        self.inner
            .write()
            .await
            .user_recs
            .insert(user_id.to_string(), item_ids.to_vec());
        Ok(())
    }

    async fn add_watched(&self, user_id: &str, item_ids: &[String]) -> AppResult<()> {
        self.inner
            .write()
            .await
            .watched
            .entry(user_id.to_string())
            .or_default()
            .extend(item_ids.iter().cloned());
        Ok(())
    }

    async fn watched(&self, user_id: &str) -> AppResult<HashSet<String>> {
        Ok(self
            .inner
            .read()
            .await
            .watched
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn flush(&self) -> AppResult<()> {
        *self.inner.write().await = InMemoryStoreInner::default();
        Ok(())
    }
}
