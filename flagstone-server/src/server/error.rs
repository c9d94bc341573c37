//! Transport error type and the JSON error envelope.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use flagstone::ValidationError;

use super::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Missing or invalid bearer token.
    #[error("unauthorized")]
    Unauthorized,

    /// Valid token but the wrong audience.
    #[error("forbidden")]
    Forbidden,

    /// Flag or segment absent on a targeted operation.
    #[error("not found: {0}")]
    NotFound(String),

    /// Schema violation on a definition write or an evaluation body.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A definition write references a segment that does not exist.
    #[error("invalid reference: {0}")]
    InvalidReference(String),

    /// Shed at the transport under load.
    #[error("rate limited")]
    RateLimited,

    /// Anything else; details are logged, not leaked.
    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            Self::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized", self.to_string()),
            Self::Forbidden => (StatusCode::FORBIDDEN, "forbidden", self.to_string()),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone()),
            Self::InvalidInput(msg) => (StatusCode::BAD_REQUEST, "invalid_input", msg.clone()),
            Self::InvalidReference(msg) => {
                (StatusCode::BAD_REQUEST, "invalid_reference", msg.clone())
            }
            Self::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                self.to_string(),
            ),
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "an internal error occurred".to_string(),
                )
            }
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
                details: None,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::FlagNotFound(id) => Self::NotFound(format!("flag not found: {id}")),
            StoreError::SegmentNotFound(id) => {
                Self::NotFound(format!("segment not found: {id}"))
            }
            StoreError::InvalidDefinition(ValidationError::UnknownSegment(id)) => {
                Self::InvalidReference(format!("flag references unknown segment '{id}'"))
            }
            StoreError::InvalidDefinition(e) => Self::InvalidInput(e.to_string()),
            StoreError::InvalidPatch(msg) => Self::InvalidInput(msg),
            StoreError::SameEnvironment => {
                Self::InvalidInput("source and target environments are identical".into())
            }
            StoreError::Backend(msg) | StoreError::Serialization(msg) => Self::Internal(msg),
        }
    }
}
