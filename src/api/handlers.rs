use axum::{
    extract::{Path, State},
    Extension, Json,
};

use crate::{
    error::AppResult,
    middleware::RequestId,
    models::{InteractEvent, NewItemsEvent, RecommendationsResponse},
};

use super::{CollectorState, RecsState};

// Event collector

/// Health check of the event collector
pub async fn collector_healthcheck() -> Json<bool> {
    Json(true)
}

/// Publishes a like/dislike event to the interaction queue
pub async fn interact(
    State(state): State<CollectorState>,
    Extension(request_id): Extension<RequestId>,
    Json(event): Json<InteractEvent>,
) -> AppResult<Json<u16>> {
    tracing::debug!(
        request_id = %request_id,
        user_id = %event.user_id,
        "Received interaction"
    );

    state.interactions.interact(event).await?;
    Ok(Json(200))
}

// Recommendations

/// Health check of the recommendations service
pub async fn recs_healthcheck() -> Json<u16> {
    tracing::info!("/healthcheck");
    Json(200)
}

/// Adds items to the catalog random recommendations are drawn from
pub async fn add_items(
    State(state): State<RecsState>,
    Json(request): Json<NewItemsEvent>,
) -> Json<u16> {
    let requested = request.item_ids.len();
    let added = state.recs.add_items(request.item_ids).await;
    tracing::info!(requested, added, "/add_items");
    Json(200)
}

/// Recommendations for one user
pub async fn get_recs(
    State(state): State<RecsState>,
    Path(user_id): Path<String>,
) -> Json<RecommendationsResponse> {
    tracing::info!(user_id = %user_id, "/recs");
    let item_ids = state.recs.recommend(&user_id).await;
    Json(RecommendationsResponse { item_ids })
}

/// Resets catalog, cache and interaction queue
pub async fn cleanup(State(state): State<RecsState>) -> AppResult<Json<u16>> {
    tracing::info!("/cleanup");
    state.recs.cleanup(state.queue.as_ref()).await?;
    Ok(Json(200))
}
