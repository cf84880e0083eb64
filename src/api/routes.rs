use axum::{
    http::{header, HeaderValue, Method},
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    error::{AppError, AppResult},
    middleware::{make_span_with_request_id, request_id_middleware},
};

use super::handlers;
use super::{CollectorState, RecsState};

/// Router of the event collector service
///
/// Browsers post interactions directly, so the front end's origin is allowed
/// with credentials.
pub fn create_collector_router(state: CollectorState, cors_origin: &str) -> AppResult<Router> {
    let origin = cors_origin
        .parse::<HeaderValue>()
        .map_err(|e| AppError::InvalidInput(format!("invalid CORS origin {}: {}", cors_origin, e)))?;

    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::OPTIONS,
            Method::DELETE,
            Method::PATCH,
            Method::PUT,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::SET_COOKIE,
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            header::AUTHORIZATION,
        ]);

    let router = Router::new()
        .route("/healthcheck", get(handlers::collector_healthcheck))
        .route("/interact", post(handlers::interact))
        .with_state(state)
        .layer(cors);

    Ok(with_request_tracing(router))
}

/// Router of the recommendations service
pub fn create_recs_router(state: RecsState) -> Router {
    let router = Router::new()
        .route("/healthcheck", get(handlers::recs_healthcheck))
        .route("/add_items", post(handlers::add_items))
        .route("/recs/:user_id", get(handlers::get_recs))
        .route("/cleanup", post(handlers::cleanup))
        .with_state(state);

    with_request_tracing(router)
}

/// Request IDs outermost, so the trace span can read them
fn with_request_tracing(router: Router) -> Router {
    router
        .layer(TraceLayer::new_for_http().make_span_with(make_span_with_request_id))
        .layer(middleware::from_fn(request_id_middleware))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    use super::*;
    use crate::{
        db::{InMemoryStore, RecsStore},
        middleware::request_id::REQUEST_ID_HEADER,
        queue::{InMemoryQueue, MockEventQueue},
        services::BlendSettings,
    };

    fn recs_router() -> Router {
        let settings = BlendSettings {
            size: 20,
            epsilon: 0.0,
        };
        let state = RecsState::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(InMemoryQueue::new()),
            settings,
        );
        create_recs_router(state)
    }

    #[tokio::test]
    async fn test_responses_carry_request_id() {
        let response = recs_router()
            .oneshot(
                Request::builder()
                    .uri("/healthcheck")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(REQUEST_ID_HEADER));
    }

    #[tokio::test]
    async fn test_unknown_route_is_not_found() {
        let response = recs_router()
            .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_rejects_invalid_cors_origin() {
        let state = CollectorState::new(
            Arc::new(InMemoryQueue::new()),
            Arc::new(InMemoryStore::new()),
        );
        assert!(create_collector_router(state, "bad\norigin").is_err());
    }

    #[tokio::test]
    async fn test_interact_queue_failure_is_bad_gateway() {
        let mut queue = MockEventQueue::new();
        queue
            .expect_publish()
            .returning(|_| Err(AppError::Queue("stream unavailable".to_string())));
        let store = Arc::new(InMemoryStore::new());
        let state = CollectorState::new(Arc::new(queue), store.clone());
        let app = create_collector_router(state, "http://localhost:8000").unwrap();

        let body = r#"{"user_id":"u1","item_ids":["318"],"actions":["like"]}"#;
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/interact")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert!(store.watched("u1").await.unwrap().is_empty());
    }
}
