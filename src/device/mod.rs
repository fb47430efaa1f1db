//! Device capability interface
//!
//! ## Responsibilities
//!
//! - Abstract the vendor camera SDK behind object-safe traits
//! - Enumeration, session lifecycle, bounded-wait frame pulls
//! - Still-capture trigger and non-blocking still-queue pulls
//! - Exposure / gain / auto-exposure / white-balance accessors
//!
//! The traits are synchronous on purpose: camera SDKs of this class are
//! blocking C APIs, and the acquisition loop runs on a dedicated blocking
//! task that is the session's single writer.

mod virtual_cam;

pub use virtual_cam::{VirtualCameraSpec, VirtualProvider};

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Default white balance color temperature (Kelvin)
pub const DEFAULT_WB_TEMP: i32 = 6503;
/// Default white balance tint
pub const DEFAULT_WB_TINT: i32 = 1000;

/// One width x height entry from a device resolution table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Pixel count, used to rank modes (lowest preview / highest still)
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// Identity of an attached camera
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub id: String,
    pub name: String,
}

/// Static capability table, queried once when the session opens
#[derive(Debug, Clone)]
pub struct DeviceCapabilities {
    /// Preview (streaming) resolution table
    pub preview_modes: Vec<Resolution>,
    /// Dedicated still-capture resolution table; may be empty
    pub still_modes: Vec<Resolution>,
    /// Monochrome sensor flag
    pub monochrome: bool,
}

/// Pixel byte order emitted by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Rgb,
    Bgr,
}

/// Range plus current reading for a scalar device control
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ControlRange {
    pub min: i64,
    pub max: i64,
    pub default: i64,
    pub current: i64,
}

/// White balance reading
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WhiteBalance {
    pub temp: i32,
    pub tint: i32,
}

impl Default for WhiteBalance {
    fn default() -> Self {
        Self {
            temp: DEFAULT_WB_TEMP,
            tint: DEFAULT_WB_TINT,
        }
    }
}

/// Outcome of a bounded-wait preview pull
///
/// "Timed out, no frame" is an expected polling condition, distinct from a
/// real device error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewPull {
    /// A frame was written into the caller's buffer
    Frame,
    /// No frame arrived within the bound
    TimedOut,
}

/// Raw still frame pulled from the device queue
///
/// Rows are padded to `pixel::row_stride(width)` exactly as the preview
/// buffer is.
#[derive(Debug, Clone)]
pub struct RawStillFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// An opened camera session
///
/// Owned exclusively by the acquisition engine; all methods take `&mut self`
/// because the underlying SDK handles are single-threaded.
pub trait CameraDevice: Send {
    /// Capability table queried at open
    fn capabilities(&self) -> &DeviceCapabilities;

    /// Configure the pixel byte order before the session starts
    fn set_byte_order(&mut self, order: ByteOrder) -> Result<()>;

    /// Select the active preview mode; only valid while the stream is stopped
    fn set_preview_mode(&mut self, index: usize) -> Result<()>;

    /// Start the pull-mode session
    fn start_stream(&mut self) -> Result<()>;

    /// Stop the pull-mode session
    fn stop_stream(&mut self) -> Result<()>;

    /// Pull the next preview frame into `buf` (padded rows), waiting at most
    /// `timeout`
    fn pull_preview(&mut self, buf: &mut [u8], timeout: Duration) -> Result<PreviewPull>;

    /// Issue the one-shot hardware snapshot trigger
    fn trigger_still(&mut self, index: usize) -> Result<()>;

    /// Non-blocking peek-then-pull of the still queue; `None` means no still
    /// frame is ready yet
    fn try_pull_still(&mut self) -> Result<Option<RawStillFrame>>;

    fn exposure_range(&self) -> Result<ControlRange>;
    fn set_exposure_time(&mut self, micros: u32) -> Result<()>;
    fn auto_exposure(&self) -> Result<bool>;
    fn set_auto_exposure(&mut self, enabled: bool) -> Result<()>;

    fn gain_range(&self) -> Result<ControlRange>;
    fn set_gain(&mut self, percent: u16) -> Result<()>;

    fn white_balance(&self) -> Result<WhiteBalance>;
    fn set_white_balance(&mut self, wb: WhiteBalance) -> Result<()>;
    /// One-shot auto white balance
    fn auto_white_balance_once(&mut self) -> Result<()>;

    /// Release the underlying handle; further calls are invalid
    fn close(&mut self);
}

/// Device enumeration and session construction
pub trait DeviceProvider: Send + Sync {
    /// List attached cameras
    fn enumerate(&self) -> Vec<DeviceDescriptor>;

    /// Open a session on the camera with the given id
    fn open(&self, id: &str) -> Result<Box<dyn CameraDevice>>;
}
