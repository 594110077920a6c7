/// Error taxonomy for the tracking core and the HTTP surface
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Failures talking to the upstream quake feed
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("feed request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("feed responded with status {0}")]
    Status(u16),
    #[error("feed payload could not be decoded: {0}")]
    Decode(String),
    #[error("event {0} not present in feed")]
    NotFound(String),
}

/// Errors raised by the computation and tracking core
#[derive(Debug, Error)]
pub enum QuakeError {
    /// Contract violation by the caller of a pure function
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Malformed raw feed data; the cycle is skipped
    #[error("invalid event: {0}")]
    InvalidEvent(String),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("tracking cancelled")]
    Cancelled,
    /// A session gave up, e.g. after repeated fetch failures
    #[error("tracking failed: {0}")]
    SessionFailed(String),
}

pub type QuakeResult<T> = Result<T, QuakeError>;

/// Unified error response format
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub ok: bool,
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Upstream(#[from] FetchError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<QuakeError> for ApiError {
    fn from(err: QuakeError) -> Self {
        match err {
            QuakeError::Fetch(e) => ApiError::Upstream(e),
            QuakeError::InvalidArgument(msg) | QuakeError::InvalidEvent(msg) => {
                ApiError::InvalidInput(msg)
            }
            other @ (QuakeError::Cancelled | QuakeError::SessionFailed(_)) => {
                ApiError::Internal(other.to_string())
            }
        }
    }
}

impl ApiError {
    fn code(&self) -> &'static str {
        match self {
            ApiError::Upstream(FetchError::Status(status)) => match status {
                403 => "UPSTREAM_403",
                404 => "UPSTREAM_404",
                429 => "UPSTREAM_429",
                500..=599 => "UPSTREAM_5XX",
                _ => "UPSTREAM_ERROR",
            },
            ApiError::Upstream(FetchError::NotFound(_)) => "UPSTREAM_404",
            ApiError::Upstream(_) => "UPSTREAM_ERROR",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::InvalidInput(_) => "INVALID_INPUT",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let error_response = ErrorResponse {
            ok: false,
            error: ErrorDetail {
                code: self.code().to_string(),
                message: self.to_string(),
            },
        };

        // Errors travel in the envelope; the transport status stays 200
        (StatusCode::OK, Json(error_response)).into_response()
    }
}

/// Type alias for API results
pub type ApiResult<T> = Result<T, ApiError>;
