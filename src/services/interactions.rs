use std::sync::Arc;

use crate::{
    db::RecsStore,
    error::AppResult,
    models::{now_timestamp, InteractEvent},
    queue::EventQueue,
};

/// Accepts interaction events from the web front end
pub struct InteractionService {
    queue: Arc<dyn EventQueue>,
    store: Arc<dyn RecsStore>,
}

impl InteractionService {
    pub fn new(queue: Arc<dyn EventQueue>, store: Arc<dyn RecsStore>) -> Self {
        Self { queue, store }
    }

    /// Validates, timestamps and publishes one event
    ///
    /// The items are also added to the user's watched set; that write is
    /// best-effort and never fails the request.
    pub async fn interact(&self, mut event: InteractEvent) -> AppResult<()> {
        event.validate()?;
        event.timestamp = Some(now_timestamp());

        self.queue.publish(&event).await?;

        if let Err(e) = self.store.add_watched(&event.user_id, &event.item_ids).await {
            tracing::warn!(error = %e, user_id = %event.user_id, "Failed to record watched items");
        }

        tracing::info!(
            user_id = %event.user_id,
            items = event.item_ids.len(),
            "Published interaction"
        );
        Ok(())
    }
}
