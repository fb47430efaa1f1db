//! API Routes

use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;

use crate::engine::EngineStatus;
use crate::error::Result;
use crate::models::{
    ApiResponse, AutoExposureSettings, CaptureRequest, CaptureResolutionSettings, CaptureResponse,
    ExposureSettings, GainSettings, OpenRequest, ResolutionSettings, WhiteBalanceSettings,
};
use crate::state::AppState;

/// Boundary marker for the MJPEG multipart stream
const MJPEG_BOUNDARY: &str = "frame";

/// Keepalive window while waiting for the next stream frame
const STREAM_FRAME_TIMEOUT: Duration = Duration::from_secs(5);

/// Create API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health & status
        .route("/healthz", get(super::health_check))
        .route("/api/camera/info", get(camera_info))
        // Frames
        .route("/api/camera/frame", get(current_frame))
        .route("/api/camera/stream", get(mjpeg_stream))
        // Capture
        .route("/api/camera/capture", post(capture_still))
        // Lifecycle
        .route("/api/camera/open", post(open_camera))
        .route("/api/camera/close", post(close_camera))
        // Settings
        .route("/api/camera/resolution", post(set_resolution))
        .route("/api/camera/capture-resolution", post(set_capture_resolution))
        .route("/api/camera/exposure", post(set_exposure))
        .route("/api/camera/gain", post(set_gain))
        .route("/api/camera/auto-exposure", post(set_auto_exposure))
        .route("/api/camera/white-balance", post(set_white_balance))
        .route("/api/camera/white-balance/auto", post(auto_white_balance))
        .with_state(state)
}

// ========================================
// Status
// ========================================

async fn camera_info(State(state): State<AppState>) -> Json<EngineStatus> {
    Json(state.engine.status())
}

// ========================================
// Frames
// ========================================

/// Latest preview frame as a single JPEG
async fn current_frame(State(state): State<AppState>) -> Response {
    match state.engine.latest_frame() {
        Some(frame) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "image/jpeg")],
            frame.data,
        )
            .into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiResponse::<()>::error("no frame available")),
        )
            .into_response(),
    }
}

/// Continuous MJPEG preview stream (multipart/x-mixed-replace)
async fn mjpeg_stream(State(state): State<AppState>) -> Response {
    let engine = state.engine.clone();
    let mut follower = engine.frame_follower();

    let stream = async_stream::stream! {
        loop {
            match follower.next_frame(STREAM_FRAME_TIMEOUT).await {
                Some(frame) => {
                    let header = format!(
                        "--{MJPEG_BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
                        frame.data.len()
                    );
                    let mut part = Vec::with_capacity(header.len() + frame.data.len() + 2);
                    part.extend_from_slice(header.as_bytes());
                    part.extend_from_slice(&frame.data);
                    part.extend_from_slice(b"\r\n");
                    yield Ok::<_, std::convert::Infallible>(bytes::Bytes::from(part));
                }
                None => {
                    // No frame inside the keepalive window; end the stream
                    // once the camera is gone, otherwise keep waiting.
                    if !engine.is_open() {
                        break;
                    }
                }
            }
        }
    };

    (
        StatusCode::OK,
        [
            (
                header::CONTENT_TYPE,
                format!("multipart/x-mixed-replace; boundary={MJPEG_BOUNDARY}"),
            ),
            (header::CACHE_CONTROL, "no-cache".to_string()),
        ],
        Body::from_stream(stream),
    )
        .into_response()
}

// ========================================
// Capture
// ========================================

async fn capture_still(
    State(state): State<AppState>,
    body: Option<Json<CaptureRequest>>,
) -> Result<Json<CaptureResponse>> {
    let request = body.map(|Json(r)| r).unwrap_or_default();

    let filename = request.filename.unwrap_or_else(|| {
        format!("capture_{}.jpg", Utc::now().format("%Y%m%d_%H%M%S"))
    });
    tokio::fs::create_dir_all(&state.config.capture_dir).await?;
    let destination = state.config.capture_dir.join(&filename);

    let still = state
        .engine
        .capture_still(request.resolution_index, Some(destination.clone()))
        .await?;

    Ok(Json(CaptureResponse {
        success: true,
        filename: destination.display().to_string(),
        message: "capture complete".to_string(),
        width: still.width,
        height: still.height,
    }))
}

// ========================================
// Lifecycle
// ========================================

async fn open_camera(
    State(state): State<AppState>,
    body: Option<Json<OpenRequest>>,
) -> Result<Json<ApiResponse<EngineStatus>>> {
    let device_id = body.and_then(|Json(r)| r.device_id);
    state.engine.open(device_id.as_deref()).await?;
    Ok(Json(ApiResponse::success(state.engine.status())))
}

async fn close_camera(State(state): State<AppState>) -> Json<ApiResponse<EngineStatus>> {
    state.engine.close().await;
    Json(ApiResponse::success(state.engine.status()))
}

// ========================================
// Settings
// ========================================

async fn set_resolution(
    State(state): State<AppState>,
    Json(settings): Json<ResolutionSettings>,
) -> Result<Json<ApiResponse<EngineStatus>>> {
    state.engine.set_preview_resolution(settings.index).await?;
    Ok(Json(ApiResponse::success(state.engine.status())))
}

async fn set_capture_resolution(
    State(state): State<AppState>,
    Json(settings): Json<CaptureResolutionSettings>,
) -> Result<Json<ApiResponse<EngineStatus>>> {
    state.engine.set_still_resolution(settings.index)?;
    Ok(Json(ApiResponse::success(state.engine.status())))
}

async fn set_exposure(
    State(state): State<AppState>,
    Json(settings): Json<ExposureSettings>,
) -> Result<Json<ApiResponse<EngineStatus>>> {
    state.engine.set_exposure_time(settings.time_us)?;
    Ok(Json(ApiResponse::success(state.engine.status())))
}

async fn set_gain(
    State(state): State<AppState>,
    Json(settings): Json<GainSettings>,
) -> Result<Json<ApiResponse<EngineStatus>>> {
    state.engine.set_gain(settings.percent)?;
    Ok(Json(ApiResponse::success(state.engine.status())))
}

async fn set_auto_exposure(
    State(state): State<AppState>,
    Json(settings): Json<AutoExposureSettings>,
) -> Result<Json<ApiResponse<EngineStatus>>> {
    state.engine.set_auto_exposure(settings.enabled)?;
    Ok(Json(ApiResponse::success(state.engine.status())))
}

async fn set_white_balance(
    State(state): State<AppState>,
    Json(settings): Json<WhiteBalanceSettings>,
) -> Result<Json<ApiResponse<EngineStatus>>> {
    state
        .engine
        .set_white_balance(settings.temp, settings.tint)?;
    Ok(Json(ApiResponse::success(state.engine.status())))
}

async fn auto_white_balance(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<EngineStatus>>> {
    state.engine.auto_white_balance_once()?;
    Ok(Json(ApiResponse::success(state.engine.status())))
}
