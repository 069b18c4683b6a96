//! Service error taxonomy
//!
//! Retryable upstream signals (rate limit, login wall, permission) never
//! appear here — they are resolved inside the relay by cookie rotation.
//! Everything below is caller-visible and carries a stable machine-readable
//! code alongside the human-readable message.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::openai::ErrorResponse;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("model `{0}` not found")]
    ModelNotFound(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("no session cookies configured")]
    PoolEmpty,

    #[error("all session cookies are temporarily unavailable")]
    PoolExhausted,

    #[error("upstream served a bot challenge; the request cannot proceed")]
    ChallengeDetected,

    #[error("upstream transport error: {0}")]
    UpstreamTransport(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::ModelNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::PoolEmpty => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::PoolExhausted => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::ChallengeDetected => StatusCode::BAD_GATEWAY,
            ApiError::UpstreamTransport(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Stable machine-readable code for the error envelope and metrics.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::ModelNotFound(_) => "model_not_found",
            ApiError::InvalidRequest(_) => "invalid_request",
            ApiError::PoolEmpty => "pool_empty",
            ApiError::PoolExhausted => "pool_exhausted",
            ApiError::ChallengeDetected => "challenge_detected",
            ApiError::UpstreamTransport(_) => "upstream_error",
        }
    }

    /// OpenAI envelope `type` field: client errors vs server errors.
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::ModelNotFound(_) | ApiError::InvalidRequest(_) => "invalid_request_error",
            _ => "api_error",
        }
    }

    pub fn envelope(&self) -> ErrorResponse {
        ErrorResponse::new(self.to_string(), self.kind(), self.code())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), axum::Json(self.envelope())).into_response()
    }
}

/// Result alias for request handling.
pub type Result<T> = std::result::Result<T, ApiError>;
