use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::error;

use pact_types::error::EngineError;

/// Wraps the engine taxonomy for axum handlers: every exceptional path maps
/// to a status code and a structured body, and nothing panics the server.
pub struct ApiError(pub EngineError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            EngineError::Unauthorized => StatusCode::UNAUTHORIZED,
            EngineError::InvalidPod => StatusCode::FORBIDDEN,
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::DuplicateCheckIn => StatusCode::CONFLICT,
            EngineError::QuotaExceeded => StatusCode::TOO_MANY_REQUESTS,
            // Recovered locally before reaching a response in every flow;
            // reaching here is a bug worth logging loudly.
            EngineError::UpstreamUnavailable => StatusCode::INTERNAL_SERVER_ERROR,
            EngineError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("internal error: {}", self.0);
        }

        let body = serde_json::json!({
            "error": self.0.code(),
            "message": self.0.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        Self(e)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        Self(EngineError::Storage(e))
    }
}
