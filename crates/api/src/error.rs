//! API error types and handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chatdesk_shared::StoreError;
use serde_json::json;

use crate::websocket::SessionError;

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    // Validation errors
    #[error("Invalid request: {0}")]
    BadRequest(String),

    // Access errors
    #[error("{0}")]
    Forbidden(String),

    // Resource errors
    #[error("{0}")]
    NotFound(String),
    #[error("Resource already exists")]
    Conflict(String),

    // Internal errors
    #[error("Database error: {0}")]
    Database(String),
    #[error("Internal server error")]
    Internal,
    #[error("Service unavailable")]
    ServiceUnavailable,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Database(_) | ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let (code, message) = match &self {
            ApiError::BadRequest(msg) => ("BAD_REQUEST", msg.clone()),
            ApiError::Forbidden(msg) => ("FORBIDDEN", msg.clone()),
            ApiError::NotFound(msg) => ("NOT_FOUND", msg.clone()),
            ApiError::Conflict(msg) => ("CONFLICT", msg.clone()),
            ApiError::Database(_) => ("DATABASE_ERROR", "Database error".to_string()),
            ApiError::Internal => ("INTERNAL_ERROR", self.to_string()),
            ApiError::ServiceUnavailable => ("SERVICE_UNAVAILABLE", self.to_string()),
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!("Database error: {:?}", err);
        ApiError::from(StoreError::from(err))
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => ApiError::NotFound("Resource not found".to_string()),
            StoreError::Conflict(_) => ApiError::Conflict("Resource already exists".to_string()),
            StoreError::Unavailable(_) => ApiError::ServiceUnavailable,
            StoreError::Database(msg) => ApiError::Database(msg),
        }
    }
}

/// Refusals of a chat connection before the upgrade
impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::InvalidAgentId => ApiError::BadRequest("Invalid agent id".to_string()),
            SessionError::InvalidEndUser => {
                ApiError::BadRequest("Invalid end-user id".to_string())
            }
            SessionError::AgentNotFound(_) => ApiError::NotFound("Agent not found".to_string()),
            SessionError::AgentUnavailable(_) => {
                ApiError::Forbidden("Agent is not available for chat".to_string())
            }
            SessionError::Store(e) => ApiError::from(e),
            SessionError::Broadcast(e) => {
                tracing::error!(error = %e, "Broadcast error");
                ApiError::Internal
            }
        }
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_connection_refusal_statuses() {
        let status = |e: SessionError| ApiError::from(e).status_code();

        assert_eq!(status(SessionError::InvalidAgentId), StatusCode::BAD_REQUEST);
        assert_eq!(status(SessionError::InvalidEndUser), StatusCode::BAD_REQUEST);
        assert_eq!(status(SessionError::AgentNotFound(Uuid::nil())), StatusCode::NOT_FOUND);
        assert_eq!(status(SessionError::AgentUnavailable(Uuid::nil())), StatusCode::FORBIDDEN);
        assert_eq!(
            status(SessionError::Store(StoreError::Unavailable("down".into()))),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_database_detail_not_exposed() {
        let response = ApiError::Database("relation \"messages\" does not exist".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
