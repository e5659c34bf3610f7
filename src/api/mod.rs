//! HTTP surface: detection, sender patterns, feedback.

mod error;
mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;

pub use error::ApiError;

use crate::auth::Authenticator;
use crate::detection::BoundaryDetector;
use crate::store::Database;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub detector: Arc<BoundaryDetector>,
    pub db: Arc<dyn Database>,
    pub auth: Arc<dyn Authenticator>,
}

/// Build the service router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/api/boundary/detect", post(routes::detect))
        .route("/api/senders/patterns", post(routes::sender_patterns))
        .route("/api/feedback", post(routes::submit_feedback))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
