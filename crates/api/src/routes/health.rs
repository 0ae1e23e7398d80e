//! Health check endpoints

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub database: String,
    pub ai_backend: String,
}

fn label(healthy: bool) -> String {
    let label = if healthy { "healthy" } else { "unhealthy" };
    label.to_string()
}

/// Health check endpoint
///
/// The AI backend is reported but does not fail the check: sessions keep
/// serving (with apology replies) while the provider is down.
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let (database, ai_backend) = tokio::join!(
        sqlx::query("SELECT 1").execute(&state.pool),
        state.inference.test_connection(),
    );

    let db_healthy = database.is_ok();
    if let Err(e) = &ai_backend {
        tracing::warn!(error = %e, "AI backend health probe failed");
    }

    let overall_status = if db_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        overall_status,
        Json(HealthResponse {
            status: label(db_healthy),
            version: env!("CARGO_PKG_VERSION").to_string(),
            database: label(db_healthy),
            ai_backend: label(ai_backend.is_ok()),
        }),
    )
}

/// Liveness probe (just returns 200 if the server is running)
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

/// Readiness probe (checks if the service is ready to accept traffic)
pub async fn readiness(State(state): State<AppState>) -> StatusCode {
    match sqlx::query("SELECT 1").execute(&state.pool).await {
        Ok(_) => StatusCode::OK,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}
