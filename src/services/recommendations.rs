use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tokio::sync::{Mutex, RwLock};

use crate::{db::RecsStore, error::AppResult, queue::EventQueue};

/// How `/recs` answers are assembled
#[derive(Debug, Clone, Copy)]
pub struct BlendSettings {
    /// Length of the answer
    pub size: usize,
    /// Probability of answering with a random sample only
    pub epsilon: f64,
}

/// Lists available for one user at request time
#[derive(Debug, Clone, Default)]
pub struct Sources {
    pub personal: Option<Vec<String>>,
    pub top: Option<Vec<String>>,
    pub watched: HashSet<String>,
}

/// Blends personalized, popular and random items
///
/// With probability `epsilon` the answer is a random sample of the catalog.
/// Otherwise personalized items come first, then top items, then random
/// catalog items fill the remaining slots. Duplicates and watched items are
/// skipped; a small catalog yields a shorter answer.
pub fn blend<R: Rng>(
    sources: Sources,
    catalog: &[String],
    settings: BlendSettings,
    rng: &mut R,
) -> Vec<String> {
    let mut random: Vec<&String> = catalog.iter().collect();
    random.shuffle(rng);

    let explore = rng.gen_bool(settings.epsilon.clamp(0.0, 1.0));
    let ranked: Vec<&String> = if explore {
        random
    } else {
        sources
            .personal
            .iter()
            .flatten()
            .chain(sources.top.iter().flatten())
            .chain(random)
            .collect()
    };

    let mut seen: HashSet<&str> = HashSet::new();
    ranked
        .into_iter()
        .filter(|&item| !sources.watched.contains(item.as_str()))
        .filter(|&item| seen.insert(item.as_str()))
        .take(settings.size)
        .cloned()
        .collect()
}

/// State and logic behind the recommendations service
pub struct RecommendationService {
    store: Arc<dyn RecsStore>,
    catalog: RwLock<BTreeSet<String>>,
    settings: BlendSettings,
    rng: Mutex<StdRng>,
}

impl RecommendationService {
    pub fn new(store: Arc<dyn RecsStore>, settings: BlendSettings) -> Self {
        Self::with_rng(store, settings, StdRng::from_entropy())
    }

    /// Creates a service with a fixed sampling seed
    pub fn with_seed(store: Arc<dyn RecsStore>, settings: BlendSettings, seed: u64) -> Self {
        Self::with_rng(store, settings, StdRng::seed_from_u64(seed))
    }

    fn with_rng(store: Arc<dyn RecsStore>, settings: BlendSettings, rng: StdRng) -> Self {
        Self {
            store,
            catalog: RwLock::new(BTreeSet::new()),
            settings,
            rng: Mutex::new(rng),
        }
    }

    /// Adds items to the catalog, returns how many were new
    pub async fn add_items(&self, item_ids: Vec<String>) -> usize {
        let mut catalog = self.catalog.write().await;
        let before = catalog.len();
        catalog.extend(item_ids);
        catalog.len() - before
    }

    pub async fn catalog_len(&self) -> usize {
        self.catalog.read().await.len()
    }

    /// Builds the answer for `/recs/{user_id}`
    ///
    /// Cache failures are treated as missing lists.
    pub async fn recommend(&self, user_id: &str) -> Vec<String> {
        let (personal, top, watched) = tokio::join!(
            self.store.user_recs(user_id),
            self.store.top_items(),
            self.store.watched(user_id),
        );

        let sources = Sources {
            personal: personal.unwrap_or_else(|e| {
                tracing::warn!(error = %e, user_id, "Personalized list unavailable");
                None
            }),
            top: top.unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Top items unavailable");
                None
            }),
            watched: watched.unwrap_or_else(|e| {
                tracing::warn!(error = %e, user_id, "Watched items unavailable");
                HashSet::new()
            }),
        };

        let personalized = sources.personal.as_ref().map_or(0, Vec::len);
        let catalog: Vec<String> = self.catalog.read().await.iter().cloned().collect();
        let mut rng = self.rng.lock().await;
        let items = blend(sources, &catalog, self.settings, &mut *rng);

        tracing::debug!(user_id, personalized, returned = items.len(), "Built recommendations");
        items
    }

    /// Forgets the catalog, flushes the cache and purges pending interactions
    pub async fn cleanup(&self, queue: &dyn EventQueue) -> AppResult<()> {
        self.catalog.write().await.clear();
        self.store.flush().await?;
        queue.purge().await?;
        tracing::info!("Cleaned up recommendation state");
        Ok(())
    }
}
