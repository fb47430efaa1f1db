//! Application state
//!
//! Holds the shared engine and server configuration.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use crate::engine::AcquisitionEngine;

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Directory for captured still images
    pub capture_dir: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            capture_dir: std::env::var("CAPTURE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("captures")),
        }
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Acquisition engine
    pub engine: Arc<AcquisitionEngine>,
    /// Application config
    pub config: AppConfig,
    /// Server start time, for uptime reporting
    pub started_at: Instant,
}

impl AppState {
    pub fn new(engine: Arc<AcquisitionEngine>, config: AppConfig) -> Self {
        Self {
            engine,
            config,
            started_at: Instant::now(),
        }
    }
}
