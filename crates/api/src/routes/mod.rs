//! API routes

pub mod health;

use axum::{routing::get, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::{state::AppState, websocket::ws_handler};

/// Create all API routes
pub fn create_router(state: AppState) -> Router {
    // Health check routes (at root level for infrastructure monitoring)
    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness));

    // Chat connections; the widget is embedded on third-party sites
    let websocket_routes = Router::new()
        .route("/ws/chat/:agent_id/:end_user_id", get(ws_handler));

    Router::new()
        .merge(health_routes)
        .merge(websocket_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
