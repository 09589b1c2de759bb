//! HTTP API route definitions.

use axum::{routing::get, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::handlers::{bins, book, fill, health, heaviest, metrics, ready, AppState};

/// Create the API router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health endpoints
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/metrics", get(metrics))
        // Book endpoints
        .route("/api/v1/book", get(book))
        .route("/api/v1/book/:side/bins", get(bins))
        .route("/api/v1/book/:side/heaviest", get(heaviest))
        .route("/api/v1/book/:side/fill", get(fill))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
