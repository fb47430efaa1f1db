//! Shared API models
//!
//! Request/response types for the web layer.

use serde::{Deserialize, Serialize};

/// Standard API response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_sec: u64,
    pub camera_connected: bool,
}

/// Manual exposure time in microseconds
#[derive(Debug, Clone, Deserialize)]
pub struct ExposureSettings {
    pub time_us: u32,
}

/// Manual gain in percent
#[derive(Debug, Clone, Deserialize)]
pub struct GainSettings {
    pub percent: u16,
}

/// Preview resolution selection
#[derive(Debug, Clone, Deserialize)]
pub struct ResolutionSettings {
    pub index: usize,
}

/// Still-capture resolution selection
#[derive(Debug, Clone, Deserialize)]
pub struct CaptureResolutionSettings {
    pub index: usize,
}

/// White balance adjustment; unspecified components are left unchanged
#[derive(Debug, Clone, Deserialize)]
pub struct WhiteBalanceSettings {
    pub temp: Option<i32>,
    pub tint: Option<i32>,
}

/// Auto exposure toggle
#[derive(Debug, Clone, Deserialize)]
pub struct AutoExposureSettings {
    pub enabled: bool,
}

/// Device selection for open
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OpenRequest {
    pub device_id: Option<String>,
}

/// Still capture request
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CaptureRequest {
    /// Still resolution index; the currently selected one when omitted
    pub resolution_index: Option<usize>,
    /// Output filename inside the capture directory; generated when omitted
    pub filename: Option<String>,
}

/// Still capture response
#[derive(Debug, Clone, Serialize)]
pub struct CaptureResponse {
    pub success: bool,
    pub filename: String,
    pub message: String,
    pub width: u32,
    pub height: u32,
}
