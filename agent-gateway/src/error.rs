//! Error taxonomy for the gateway.
//!
//! Backend failures during conversation resolution abort the request and
//! surface as a generic server error; stream failures are logged and closed
//! gracefully by the translator instead of reaching the caller.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced while serving a chat completion.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Transport failure, timeout, non-2xx status or malformed payload from the Agent API.
    #[error("Agent API unavailable: {0}")]
    BackendUnavailable(String),

    /// The Agent API answered the create call without a usable conversation handle.
    #[error("Conversation creation failed: {0}")]
    SessionCreationFailed(String),

    /// The Agent API sent an explicit `message_failed` event.
    #[error("Agent stream terminated with error: {0}")]
    StreamTerminatedWithError(String),

    /// A stream line that could not be parsed. Always skipped.
    #[error("Malformed backend frame: {0}")]
    MalformedBackendFrame(String),

    /// The caller's request was rejected before reaching the backend.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Missing or wrong bearer token.
    #[error("Unauthorized")]
    Unauthorized,
}

impl GatewayError {
    /// HTTP status used when this error reaches the caller.
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::FORBIDDEN,
            Self::BackendUnavailable(_)
            | Self::SessionCreationFailed(_)
            | Self::StreamTerminatedWithError(_)
            | Self::MalformedBackendFrame(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable error code.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::BackendUnavailable(_) => "BACKEND_UNAVAILABLE",
            Self::SessionCreationFailed(_) => "SESSION_CREATION_FAILED",
            Self::StreamTerminatedWithError(_) => "STREAM_FAILED",
            Self::MalformedBackendFrame(_) => "MALFORMED_FRAME",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::Unauthorized => "AUTH_FORBIDDEN",
        }
    }
}

/// Error response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Backend details stay in the logs; callers get a generic message.
        let message = if status.is_server_error() {
            tracing::error!(error = %self, code = self.code(), "Request failed");
            "Agent API call failed".to_string()
        } else {
            tracing::debug!(error = %self, code = self.code(), "Request rejected");
            self.to_string()
        };

        (
            status,
            Json(ErrorResponse {
                error: message,
                code: self.code().to_string(),
            }),
        )
            .into_response()
    }
}
