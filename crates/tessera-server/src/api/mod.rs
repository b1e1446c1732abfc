pub mod dto;
pub mod handlers;

use axum::{
    routing::{get, post},
    Router,
};

use crate::AppState;

pub fn create_router() -> Router<AppState> {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Entity resolution
        .route("/api/v1/resolve", post(handlers::resolve))
        // Cross-domain views
        .route("/api/v1/aggregate/wallet", post(handlers::aggregate_wallet))
        .route("/api/v1/aggregate/positions", post(handlers::aggregate_positions))
        .route("/api/v1/aggregate/token", post(handlers::aggregate_token))
        // Cache introspection
        .route("/api/v1/cache/stats", get(handlers::cache_stats))
}
