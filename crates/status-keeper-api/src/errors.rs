//! Error types for the HTTP service.
//!
//! Maps the domain error taxonomy onto HTTP status codes:
//!
//! - `401 Unauthorized`: authentication failures (signature or basic auth);
//!   terminal, never retried
//! - `400 Bad Request`: malformed or logically-inconsistent events; permanent,
//!   do not retry
//! - `500 Internal Server Error`: state errors, which indicate an ordering bug
//!   upstream
//! - `502 Bad Gateway`: provider failures and transient notification
//!   failures; the webhook sender's retry policy re-drives the event

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use status_keeper_core::orchestrator::OrchestratorError;
use status_keeper_core::webhook::WebhookError;
use status_keeper_core::AuthError;
use tracing::{error, warn};

/// Request-level failure of any handler.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Webhook(#[from] WebhookError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("invalid request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Auth(_) | Self::Webhook(WebhookError::Auth(_)) => StatusCode::UNAUTHORIZED,
            Self::Webhook(WebhookError::InvalidJson(_)) | Self::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Orchestrator(err) => match err {
                OrchestratorError::MalformedEvent { .. } | OrchestratorError::Validation(_) => {
                    StatusCode::BAD_REQUEST
                }
                OrchestratorError::State(_) => StatusCode::INTERNAL_SERVER_ERROR,
                OrchestratorError::Provider(_) => StatusCode::BAD_GATEWAY,
                OrchestratorError::Notification(e) if e.is_transient() => StatusCode::BAD_GATEWAY,
                OrchestratorError::Notification(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, %status, "request failed");
        } else {
            warn!(error = %self, %status, "request rejected");
        }

        // Authentication rejections deliberately carry no detail.
        let body = if status == StatusCode::UNAUTHORIZED {
            "unauthorized".to_string()
        } else {
            self.to_string()
        };
        (status, body).into_response()
    }
}

#[cfg(test)]
#[path = "errors_tests.rs"]
mod errors_tests;
