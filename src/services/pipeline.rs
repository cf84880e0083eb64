use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};

use crate::{
    config::Config,
    db::RecsStore,
    error::{AppError, AppResult},
    models::InteractionRow,
    queue::{Delivery, EventQueue},
};

use super::{
    interaction_log::InteractionLog,
    model::{personalize, Dataset, NextItemModel},
    top_items::top_items,
    tuning,
};

/// Longest single wait on the queue, bounds shutdown latency
const RECEIVE_WAIT: Duration = Duration::from_secs(1);
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Timing and sizing of the background pipeline
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub prefetch_count: usize,
    pub flush_interval: Duration,
    pub top_items_interval: Duration,
    pub top_items_limit: usize,
    pub retrain_interval: Duration,
    pub tuning_trials: usize,
    pub top_k: usize,
    pub seed: u64,
}

impl From<&Config> for PipelineSettings {
    fn from(config: &Config) -> Self {
        Self {
            prefetch_count: config.prefetch_count,
            flush_interval: config.flush_interval(),
            top_items_interval: config.top_items_interval(),
            top_items_limit: config.top_items_limit,
            retrain_interval: config.retrain_interval(),
            tuning_trials: config.tuning_trials,
            top_k: config.model_top_k,
            seed: config.random_seed,
        }
    }
}

/// Consumed interactions waiting to be written to the log
///
/// A delivery whose tag is already buffered is a redelivery and is skipped.
#[derive(Debug, Default)]
pub struct PendingBatch {
    rows: Vec<InteractionRow>,
    tags: Vec<String>,
    seen: HashSet<String>,
}

impl PendingBatch {
    /// Buffers a delivery, returns `false` for one already buffered
    pub fn push(&mut self, delivery: Delivery) -> bool {
        if !self.seen.insert(delivery.tag.clone()) {
            return false;
        }
        self.tags.push(delivery.tag);
        self.rows.extend(delivery.event.into_rows());
        true
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn rows(&self) -> &[InteractionRow] {
        &self.rows
    }
}

/// Result of one retrain
#[derive(Debug, Clone, PartialEq)]
pub struct RetrainSummary {
    pub users: usize,
    pub personalized: usize,
    pub recall: f64,
}

/// Background pipeline: queue collector, top-items refresher, model retrainer
///
/// The three loops share the interaction log and run until the shutdown
/// channel flips to `true` (or its sender is dropped).
pub struct Pipeline {
    queue: Arc<dyn EventQueue>,
    store: Arc<dyn RecsStore>,
    log: InteractionLog,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        queue: Arc<dyn EventQueue>,
        store: Arc<dyn RecsStore>,
        log: InteractionLog,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            queue,
            store,
            log,
            settings,
        }
    }

    /// Deletes the interaction log so the next run starts from nothing
    pub async fn reset_log(&self) -> AppResult<()> {
        let log = self.log.clone();
        tokio::task::spawn_blocking(move || log.clear())
            .await
            .map_err(|e| AppError::Internal(e.to_string()))??;
        tracing::info!(log = %self.log.path().display(), "Interaction log cleared");
        Ok(())
    }

    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        tracing::info!(
            queue = self.queue.name(),
            log = %self.log.path().display(),
            settings = ?self.settings,
            "Pipeline started"
        );

        tokio::join!(
            self.collect_loop(shutdown.clone()),
            self.top_items_loop(shutdown.clone()),
            self.retrain_loop(shutdown),
        );

        tracing::info!("Pipeline stopped");
    }

    /// Moves queued interactions into the log every flush interval
    ///
    /// Deliveries are acked only after their rows are on disk.
    async fn collect_loop(&self, shutdown: watch::Receiver<bool>) {
        let mut pending = PendingBatch::default();
        let mut next_flush = Instant::now() + self.settings.flush_interval;

        while !*shutdown.borrow() {
            let wait = next_flush
                .saturating_duration_since(Instant::now())
                .min(RECEIVE_WAIT);

            if let Err(e) = self.receive_into(&mut pending, wait).await {
                tracing::warn!(error = %e, "Failed to receive interactions");
                tokio::time::sleep(ERROR_BACKOFF).await;
            }
            // the other loops share this task
            tokio::task::yield_now().await;

            if Instant::now() >= next_flush {
                self.flush(&mut pending).await;
                next_flush = Instant::now() + self.settings.flush_interval;
            }
        }

        self.flush(&mut pending).await;
        tracing::info!("Interaction collector stopped");
    }

    /// Adds one batch of deliveries to `pending`, returns how many were new
    pub async fn receive_into(&self, pending: &mut PendingBatch, wait: Duration) -> AppResult<usize> {
        let deliveries = self
            .queue
            .receive(self.settings.prefetch_count, wait)
            .await?;

        let received = deliveries.len();
        let mut added = 0;
        for delivery in deliveries {
            if pending.push(delivery) {
                added += 1;
            }
        }
        if added < received {
            tracing::debug!(duplicates = received - added, "Skipped redelivered interactions");
        }
        Ok(added)
    }

    /// Appends pending rows to the log and acks their deliveries
    ///
    /// On a failed write the batch is kept for the next flush.
    pub async fn flush(&self, pending: &mut PendingBatch) {
        if pending.is_empty() {
            return;
        }

        let log = self.log.clone();
        let rows = pending.rows.clone();
        let written = tokio::task::spawn_blocking(move || log.append(&rows))
            .await
            .map_err(|e| AppError::Internal(e.to_string()))
            .and_then(|result| result);

        match written {
            Ok(written) => {
                tracing::info!(
                    rows = written,
                    events = pending.tags.len(),
                    "Saved interactions to log"
                );
                if let Err(e) = self.queue.ack(&pending.tags).await {
                    // rows are persisted; a redelivery only duplicates them
                    tracing::warn!(error = %e, "Failed to ack saved interactions");
                }
                *pending = PendingBatch::default();
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    events = pending.tags.len(),
                    "Failed to save interactions, keeping batch"
                );
            }
        }
    }

    async fn top_items_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.settings.top_items_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.refresh_top_items().await {
                        tracing::warn!(error = %e, "Failed to refresh top items");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    /// Recomputes top items from the log and stores them
    ///
    /// Returns `None` while the log does not exist yet.
    pub async fn refresh_top_items(&self) -> AppResult<Option<usize>> {
        if !self.log.exists() {
            return Ok(None);
        }

        let log = self.log.clone();
        let limit = self.settings.top_items_limit;
        let items = tokio::task::spawn_blocking(move || {
            log.read_all().map(|rows| top_items(&rows, limit))
        })
        .await
        .map_err(|e| AppError::Internal(e.to_string()))??;

        self.store.set_top_items(&items).await?;
        tracing::info!(count = items.len(), "Calculated top recommendations");
        Ok(Some(items.len()))
    }

    async fn retrain_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.settings.retrain_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the log is usually empty at startup
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.retrain().await {
                        tracing::error!(error = %e, "Model retrain failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    /// Tunes and fits the personalization model, then stores per-user lists
    ///
    /// Returns `None` while the log does not exist yet.
    pub async fn retrain(&self) -> AppResult<Option<RetrainSummary>> {
        if !self.log.exists() {
            return Ok(None);
        }

        let log = self.log.clone();
        let settings = self.settings.clone();
        let (summary, lists) = tokio::task::spawn_blocking(move || {
            let rows = log.read_all()?;
            let dataset = Dataset::from_rows(&rows);
            tracing::info!(users = dataset.users.len(), "Created dataset for model");

            let outcome = tuning::search(&dataset, settings.tuning_trials, settings.top_k, settings.seed);
            let model = NextItemModel::fit(&dataset.full_sequences(), outcome.params);
            let lists = personalize(&model, &dataset, settings.top_k);

            let summary = RetrainSummary {
                users: dataset.users.len(),
                personalized: lists.len(),
                recall: outcome.evaluation.recall,
            };
            Ok::<_, AppError>((summary, lists))
        })
        .await
        .map_err(|e| AppError::Internal(e.to_string()))??;

        for (user_id, items) in &lists {
            self.store.set_user_recs(user_id, items).await?;
        }

        tracing::info!(
            users = summary.users,
            personalized = summary.personalized,
            recall = summary.recall,
            "Personalized recommendations updated"
        );
        Ok(Some(summary))
    }
}
