//! Error types for the audiodrop server.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::gateway::GatewayError;
use crate::pipeline::ConversionError;

/// Application error type.
///
/// Every variant renders as `{"error": "<message>"}`. 500-class variants log
/// their detail and send a fixed message.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conversion failed: {0}")]
    ConversionFailed(String),

    #[error("Transcoder unavailable: {0}")]
    ToolUnavailable(String),

    #[error("Conversion timed out")]
    TimedOut,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ConversionError> for AppError {
    fn from(err: ConversionError) -> Self {
        match err {
            ConversionError::InvalidInput(msg) => AppError::BadRequest(msg),
            ConversionError::ConversionFailed(detail) => AppError::ConversionFailed(detail),
            ConversionError::ToolUnavailable(tool) => AppError::ToolUnavailable(tool),
            ConversionError::TimedOut => AppError::TimedOut,
            ConversionError::Internal(msg) => AppError::Internal(msg),
        }
    }
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::MalformedIdentifier => {
                AppError::BadRequest("Invalid file identifier".to_string())
            }
            GatewayError::NotFound => AppError::NotFound("File not found or expired".to_string()),
            GatewayError::TooLarge { .. } => {
                AppError::PayloadTooLarge("File too large".to_string())
            }
            GatewayError::Storage(msg) => AppError::Internal(msg),
        }
    }
}

fn json_error(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::BadRequest(msg) => json_error(StatusCode::BAD_REQUEST, &msg),
            AppError::PayloadTooLarge(msg) => json_error(StatusCode::PAYLOAD_TOO_LARGE, &msg),
            AppError::NotFound(msg) => json_error(StatusCode::NOT_FOUND, &msg),
            AppError::ConversionFailed(detail) => {
                tracing::error!("Conversion failed: {}", detail);
                json_error(StatusCode::INTERNAL_SERVER_ERROR, "Conversion failed")
            }
            AppError::ToolUnavailable(tool) => {
                tracing::error!("Transcoder unavailable: {}", tool);
                json_error(StatusCode::INTERNAL_SERVER_ERROR, "Transcoder not installed")
            }
            AppError::TimedOut => {
                tracing::error!("Conversion timed out");
                json_error(StatusCode::INTERNAL_SERVER_ERROR, "Conversion timed out")
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                json_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        }
    }
}
