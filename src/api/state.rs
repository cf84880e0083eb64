use std::sync::Arc;

use crate::{
    db::RecsStore,
    queue::EventQueue,
    services::{BlendSettings, InteractionService, RecommendationService},
};

/// Shared state of the event collector service
#[derive(Clone)]
pub struct CollectorState {
    pub interactions: Arc<InteractionService>,
}

impl CollectorState {
    pub fn new(queue: Arc<dyn EventQueue>, store: Arc<dyn RecsStore>) -> Self {
        Self {
            interactions: Arc::new(InteractionService::new(queue, store)),
        }
    }
}

/// Shared state of the recommendations service
#[derive(Clone)]
pub struct RecsState {
    pub recs: Arc<RecommendationService>,
    /// Purged by `/cleanup`
    pub queue: Arc<dyn EventQueue>,
}

impl RecsState {
    pub fn new(
        store: Arc<dyn RecsStore>,
        queue: Arc<dyn EventQueue>,
        settings: BlendSettings,
    ) -> Self {
        Self {
            recs: Arc::new(RecommendationService::new(store, settings)),
            queue,
        }
    }

    /// State with a fixed sampling seed, for reproducible answers
    pub fn with_seed(
        store: Arc<dyn RecsStore>,
        queue: Arc<dyn EventQueue>,
        settings: BlendSettings,
        seed: u64,
    ) -> Self {
        Self {
            recs: Arc::new(RecommendationService::with_seed(store, settings, seed)),
            queue,
        }
    }
}
