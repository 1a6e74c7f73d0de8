use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::error;

use flare_core::CoreError;

/// Error taxonomy for the HTTP surface. Validation is rejected before
/// any mutation; NotFound/Forbidden short-circuit with no partial
/// effect; Internal is logged server-side and surfaced as a generic
/// failure without leaking internals.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{message}")]
    Validation {
        field: &'static str,
        message: String,
    },

    #[error("{0}")]
    Unauthorized(&'static str),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NotFound(what) => ApiError::NotFound(what),
            CoreError::Forbidden(msg) => ApiError::Forbidden(msg.to_string()),
            CoreError::Store(e) => ApiError::Internal(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ApiError::Validation { field, .. } => (
                StatusCode::BAD_REQUEST,
                serde_json::json!({ "error": self.to_string(), "field": field }),
            ),
            ApiError::Unauthorized(_) => (
                StatusCode::UNAUTHORIZED,
                serde_json::json!({ "error": self.to_string() }),
            ),
            ApiError::Forbidden(_) => (
                StatusCode::FORBIDDEN,
                serde_json::json!({ "error": self.to_string() }),
            ),
            ApiError::NotFound(_) => (
                StatusCode::NOT_FOUND,
                serde_json::json!({ "error": self.to_string() }),
            ),
            ApiError::Conflict(_) => (
                StatusCode::CONFLICT,
                serde_json::json!({ "error": self.to_string() }),
            ),
            ApiError::Internal(e) => {
                error!("Internal error: {:#}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    serde_json::json!({ "error": "Internal server error" }),
                )
            }
        };

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_errors_map_onto_the_http_taxonomy() {
        let e: ApiError = CoreError::NotFound("post").into();
        assert!(matches!(e, ApiError::NotFound("post")));

        let e: ApiError = CoreError::Forbidden("nope").into();
        assert!(matches!(e, ApiError::Forbidden(_)));
    }

    #[test]
    fn validation_message_carries_the_field() {
        let e = ApiError::Validation {
            field: "title",
            message: "title must be between 1 and 100 characters".into(),
        };
        assert_eq!(e.to_string(), "title must be between 1 and 100 characters");
    }
}
