// =============================================================================
// Structured error types for the risk engine
// =============================================================================

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Errors surfaced across the engine's internal API. Kept distinct from
/// `anyhow::Error`, which is used for adapter-boundary failures (config I/O,
/// outbound notifications) that never need to map to a specific HTTP status.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("client not found: {0}")]
    ClientNotFound(String),

    #[error("review item not found: {0}")]
    ReviewItemNotFound(String),

    #[error("review item already resolved: {0}")]
    ReviewItemAlreadyResolved(String),

    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("invalid cursor")]
    InvalidCursor,

    #[error("unauthorized")]
    Unauthorized,

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl EngineError {
    fn status(&self) -> StatusCode {
        match self {
            Self::ClientNotFound(_) | Self::ReviewItemNotFound(_) => StatusCode::NOT_FOUND,
            Self::ReviewItemAlreadyResolved(_) | Self::InvalidTransaction(_) | Self::InvalidCursor => {
                StatusCode::BAD_REQUEST
            }
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = self.status();
        if matches!(self, Self::Internal(_)) {
            tracing::error!(error = %self, "internal error");
        }
        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_not_found_maps_to_404() {
        let err = EngineError::ClientNotFound("C1".into());
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn internal_maps_to_500() {
        let err = EngineError::Internal(anyhow::anyhow!("boom"));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
