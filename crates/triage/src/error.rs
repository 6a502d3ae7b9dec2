//! Error type for HTTP handlers.
//!
//! Handlers return [`ApiResult`] and use `?`; the conversion to a status code
//! and JSON body happens once, in `IntoResponse`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::gate::GateError;
use crate::provider::ProviderError;

/// API error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Debug, Error)]
pub enum ApiError {
    /// Invalid request data
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// JSON parsing error
    #[error("Invalid JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Notification batch failed validation
    #[error("Rejected notification: {0}")]
    Rejected(#[from] GateError),

    #[error("Unauthorized")]
    Unauthorized,

    /// Mail provider call failed
    #[error("Upstream error: {0}")]
    Upstream(#[from] ProviderError),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message, details) = match &self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone(), None),
            ApiError::JsonParse(e) => {
                tracing::warn!("JSON parse error: {:?}", e);
                (
                    StatusCode::BAD_REQUEST,
                    "Invalid JSON format".to_string(),
                    Some(e.to_string()),
                )
            }
            ApiError::Rejected(e) => {
                tracing::warn!("Rejected notification batch: {}", e);
                (
                    StatusCode::BAD_REQUEST,
                    "Invalid notification".to_string(),
                    Some(e.to_string()),
                )
            }
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string(), None),
            ApiError::Upstream(e) => {
                tracing::error!("Provider error: {}", e);
                (
                    StatusCode::BAD_GATEWAY,
                    "Mail provider request failed".to_string(),
                    Some(e.to_string()),
                )
            }
        };

        let body = Json(ErrorResponse {
            error: error_message,
            details,
        });

        (status, body).into_response()
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        let cases = [
            (ApiError::bad_request("x"), StatusCode::BAD_REQUEST),
            (ApiError::Unauthorized, StatusCode::UNAUTHORIZED),
            (
                ApiError::Upstream(ProviderError::Transient("503".to_string())),
                StatusCode::BAD_GATEWAY,
            ),
        ];
        for (error, expected) in cases {
            assert_eq!(error.into_response().status(), expected);
        }
    }
}
