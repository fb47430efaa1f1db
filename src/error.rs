//! Error handling for the camstream server

use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No camera matched the selector (or none attached at all)
    #[error("no camera device found")]
    NoDeviceFound,

    /// Device rejected session start during open
    #[error("device session start failed: {0}")]
    DeviceStartFailed(String),

    /// Device refused to resume after a resolution change; engine is closed
    #[error("device restart failed: {0}")]
    DeviceRestartFailed(String),

    /// Resolution index outside the device's mode table
    #[error("invalid resolution index {index} (device has {available} modes)")]
    InvalidResolutionIndex { index: usize, available: usize },

    /// Operation conflicts with current engine/coordinator state
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Still capture did not resolve within the deadline
    #[error("still capture timed out after {waited:?}")]
    CaptureTimeout { waited: Duration },

    /// Generic pull/push failure surfaced from the device
    #[error("device I/O error: {0}")]
    DeviceIo(String),

    /// Operation attempted while no camera session is open
    #[error("camera not connected")]
    NotConnected,

    /// Image codec error
    #[error("codec error: {0}")]
    Codec(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_code) = match &self {
            Error::NoDeviceFound => (StatusCode::NOT_FOUND, "NO_DEVICE_FOUND"),
            Error::DeviceStartFailed(_) => (StatusCode::BAD_GATEWAY, "DEVICE_START_FAILED"),
            Error::DeviceRestartFailed(_) => (StatusCode::BAD_GATEWAY, "DEVICE_RESTART_FAILED"),
            Error::InvalidResolutionIndex { .. } => {
                (StatusCode::BAD_REQUEST, "INVALID_RESOLUTION_INDEX")
            }
            Error::InvalidState(_) => (StatusCode::CONFLICT, "INVALID_STATE"),
            Error::CaptureTimeout { .. } => (StatusCode::GATEWAY_TIMEOUT, "CAPTURE_TIMEOUT"),
            Error::DeviceIo(_) => (StatusCode::BAD_GATEWAY, "DEVICE_IO_ERROR"),
            Error::NotConnected => (StatusCode::SERVICE_UNAVAILABLE, "NOT_CONNECTED"),
            Error::Codec(_) => (StatusCode::INTERNAL_SERVER_ERROR, "CODEC_ERROR"),
            Error::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR"),
            Error::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };

        let message = self.to_string();

        tracing::error!(
            status = %status,
            error_code = %error_code,
            message = %message,
            "Request error"
        );

        let body = Json(json!({
            "error_code": error_code,
            "message": message
        }));

        (status, body).into_response()
    }
}
