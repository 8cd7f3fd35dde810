//! API error type for route handlers.
//!
//! Maps domain errors from `biasscore-core` onto the closed HTTP status/code
//! vocabulary of spec.md §7, wrapped in the shared
//! `{success:false, error:{code, message, details?}}` envelope.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use biasscore_core::error::{ErrorCode, ScoreManagerError, StoreError, TransportError};
use serde_json::{json, Value};

/// API error type for route handlers.
pub enum ApiError {
    /// The request was malformed.
    Validation(String),
    /// The requested resource does not exist.
    NotFound(String),
    /// A domain error produced by the score manager / ensemble.
    ScoreManager(ScoreManagerError),
    /// An unclassified internal failure.
    Internal(String),
}

impl From<ScoreManagerError> for ApiError {
    fn from(err: ScoreManagerError) -> Self {
        Self::ScoreManager(err)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(msg) => Self::NotFound(msg),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl ApiError {
    fn code_and_status(&self) -> (ErrorCode, StatusCode) {
        match self {
            Self::Validation(_) => (ErrorCode::Validation, StatusCode::BAD_REQUEST),
            Self::NotFound(_) => (ErrorCode::NotFound, StatusCode::NOT_FOUND),
            Self::Internal(_) => (ErrorCode::Internal, StatusCode::INTERNAL_SERVER_ERROR),
            Self::ScoreManager(err) => (err.code(), score_manager_status(err)),
        }
    }

    fn message(&self) -> String {
        match self {
            Self::Validation(msg) | Self::NotFound(msg) | Self::Internal(msg) => msg.clone(),
            Self::ScoreManager(err) => err.to_string(),
        }
    }

    fn details(&self) -> Option<Value> {
        match self {
            Self::ScoreManager(ScoreManagerError::Transport(TransportError::RateLimited {
                retry_after_secs,
            })) => Some(json!({
                "retry_after": retry_after_secs,
                "recommended_action": "retry after the indicated delay, or add a secondary credential",
            })),
            Self::ScoreManager(ScoreManagerError::Transport(err)) => Some(json!({
                "recommended_action": recommended_action(err),
            })),
            Self::ScoreManager(ScoreManagerError::AllPerspectivesInvalid) => Some(json!({
                "kind": "all_perspectives_invalid",
            })),
            _ => None,
        }
    }
}

fn score_manager_status(err: &ScoreManagerError) -> StatusCode {
    match err {
        ScoreManagerError::NotFound(_) => StatusCode::NOT_FOUND,
        ScoreManagerError::AllPerspectivesInvalid => StatusCode::UNPROCESSABLE_ENTITY,
        ScoreManagerError::Timeout => StatusCode::SERVICE_UNAVAILABLE,
        ScoreManagerError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        ScoreManagerError::Transport(t) => match t {
            TransportError::AuthFailed => StatusCode::UNAUTHORIZED,
            TransportError::PaymentRequired => StatusCode::PAYMENT_REQUIRED,
            TransportError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            TransportError::Unavailable { .. } | TransportError::StreamingError(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            TransportError::Malformed(_) | TransportError::Request(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        },
    }
}

fn recommended_action(err: &TransportError) -> &'static str {
    match err {
        TransportError::AuthFailed => "check the configured LLM credential",
        TransportError::PaymentRequired => "verify billing status with the LLM provider",
        TransportError::RateLimited { .. } => "retry after the indicated delay",
        TransportError::Unavailable { .. } => "retry later; the LLM endpoint is unreachable",
        TransportError::Malformed(_) => "inspect the raw reply; the response envelope did not parse",
        TransportError::StreamingError(_) => "retry; the response stream closed prematurely",
        TransportError::Request(_) => "retry later; the transport request failed",
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (code, status) = self.code_and_status();
        let message = self.message();
        let details = self.details();

        if status.is_server_error() {
            tracing::error!(%message, "internal error");
        }

        let body = Json(json!({
            "success": false,
            "error": {
                "code": code,
                "message": message,
                "details": details,
            }
        }));

        (status, body).into_response()
    }
}

/// Wrap a successful payload in the shared `{success, data}` envelope.
pub fn ok<T: serde::Serialize>(data: T) -> Json<Value> {
    Json(json!({ "success": true, "data": data }))
}
