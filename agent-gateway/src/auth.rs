//! Bearer key authentication for the OpenAI-compatible routes.

use crate::error::GatewayError;
use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

/// Authentication state shared across requests.
#[derive(Clone, Default)]
pub struct AuthState {
    /// Expected bearer key. `None` disables authentication.
    pub api_key: Option<Arc<String>>,
}

impl AuthState {
    pub fn new(api_key: Option<&str>) -> Self {
        Self {
            api_key: api_key.map(|k| Arc::new(k.to_string())),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.api_key.is_some()
    }

    /// Check an `Authorization` header value against the configured key.
    pub fn verify(&self, authorization: Option<&str>) -> bool {
        let Some(expected) = self.api_key.as_deref() else {
            return true;
        };

        authorization
            .and_then(|h| h.strip_prefix("Bearer "))
            .is_some_and(|token| token.trim() == expected.as_str())
    }
}

/// Authentication middleware.
pub async fn auth_middleware(
    State(auth_state): State<AuthState>,
    request: Request,
    next: Next,
) -> Result<Response, GatewayError> {
    let authorization = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    if !auth_state.verify(authorization) {
        tracing::warn!(path = %request.uri().path(), "Rejected request with missing or invalid API key");
        return Err(GatewayError::Unauthorized);
    }

    Ok(next.run(request).await)
}
