use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Message returned to clients for any request body that fails to decode.
///
/// Decode details are logged, never echoed back.
pub const INVALID_REQUEST_MESSAGE: &str = "invalid request";

/// Error type shared by the request path and the upstream adapter.
#[derive(Debug, thiserror::Error)]
pub enum ShimError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Upstream error: status={status}, message={message}")]
    Upstream { status: u16, message: String },
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Upstream deadline exceeded after {0}s")]
    Timeout(u64),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ShimError {
    #[must_use]
    pub fn status(&self) -> http::StatusCode {
        match self {
            ShimError::InvalidRequest(_) => http::StatusCode::BAD_REQUEST,
            ShimError::Config(_)
            | ShimError::Upstream { .. }
            | ShimError::Transport(_)
            | ShimError::Timeout(_)
            | ShimError::Internal(_) => http::StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// JSON body sent to the client: `{"error": "..."}`.
    #[must_use]
    pub fn body(&self) -> serde_json::Value {
        match self {
            ShimError::InvalidRequest(_) => json!({ "error": INVALID_REQUEST_MESSAGE }),
            other => json!({ "error": other.to_string() }),
        }
    }
}

impl From<reqwest::Error> for ShimError {
    fn from(err: reqwest::Error) -> Self {
        ShimError::Transport(err.to_string())
    }
}

impl IntoResponse for ShimError {
    fn into_response(self) -> Response {
        (self.status(), axum::Json(self.body())).into_response()
    }
}
