//! AcquisitionEngine - device session lifecycle and the background loop
//!
//! ## Responsibilities
//!
//! - Own the camera session: enumerate/open/start/stop/close
//! - Background loop: bounded-wait preview pulls, de-pad, encode, publish
//! - Poll-driven still capture on behalf of the coordinator
//! - Stop-drain-restart protocol for preview resolution changes
//! - Counters, fps estimate, and the aggregate status snapshot
//!
//! The loop runs on a dedicated blocking task and is the session's single
//! writer during normal operation; lifecycle and configuration operations
//! serialize on a control mutex and use bounded joins.

mod fps;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::codec::{ImageCodec, PREVIEW_JPEG_QUALITY, STILL_JPEG_QUALITY};
use crate::device::{
    ByteOrder, CameraDevice, ControlRange, DeviceDescriptor, DeviceProvider, PreviewPull,
    Resolution, WhiteBalance,
};
use crate::error::{Error, Result};
use crate::frame_cache::{EncodedFrame, FrameCache, FrameFollower};
use crate::pixel::PixelBuffer;
use crate::still_capture::{StillCapture, StillCaptureCoordinator, STILL_CAPTURE_TIMEOUT};

use fps::FpsEstimator;

/// Back-off after a real (non-timeout) pull error
const PULL_ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// Gain range reported when the device cannot answer
const GAIN_RANGE_FALLBACK: ControlRange = ControlRange {
    min: 0,
    max: 500,
    default: 100,
    current: 100,
};

/// Engine tunables
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Bounded wait for one preview pull; keeps the loop responsive to stop
    /// requests and pending still work even under total signal loss
    pub pull_timeout: Duration,
    /// Deadline for a still capture to resolve
    pub still_timeout: Duration,
    /// Bounded join for the loop on stop; teardown proceeds best-effort
    /// beyond this
    pub loop_join_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pull_timeout: Duration::from_millis(50),
            still_timeout: STILL_CAPTURE_TIMEOUT,
            loop_join_timeout: Duration::from_secs(2),
        }
    }
}

/// An opened device session plus everything sized to its active preview mode
struct Session {
    device: Box<dyn CameraDevice>,
    descriptor: DeviceDescriptor,
    preview_index: usize,
    still_index: usize,
    buffer: PixelBuffer,
    /// Most recent de-padded preview frame; feeds the capture fallback when
    /// the device has no dedicated still modes
    packed: Vec<u8>,
}

/// State shared between the engine surface and the acquisition loop
struct Shared {
    session: Mutex<Option<Session>>,
    frame_cache: FrameCache,
    stills: StillCaptureCoordinator,
    codec: Arc<dyn ImageCodec>,
    running: AtomicBool,
    frame_count: AtomicU64,
    capture_count: AtomicU64,
    fps: RwLock<f64>,
    config: EngineConfig,
}

struct LoopControl {
    handle: Option<JoinHandle<()>>,
}

/// Acquisition and synchronization engine for one camera device
pub struct AcquisitionEngine {
    provider: Arc<dyn DeviceProvider>,
    shared: Arc<Shared>,
    control: tokio::sync::Mutex<LoopControl>,
}

impl AcquisitionEngine {
    pub fn new(provider: Arc<dyn DeviceProvider>, codec: Arc<dyn ImageCodec>) -> Self {
        Self::with_config(provider, codec, EngineConfig::default())
    }

    pub fn with_config(
        provider: Arc<dyn DeviceProvider>,
        codec: Arc<dyn ImageCodec>,
        config: EngineConfig,
    ) -> Self {
        Self {
            provider,
            shared: Arc::new(Shared {
                session: Mutex::new(None),
                frame_cache: FrameCache::new(),
                stills: StillCaptureCoordinator::new(codec.clone()),
                codec,
                running: AtomicBool::new(false),
                frame_count: AtomicU64::new(0),
                capture_count: AtomicU64::new(0),
                fps: RwLock::new(0.0),
                config,
            }),
            control: tokio::sync::Mutex::new(LoopControl { handle: None }),
        }
    }

    /// True while a device session is open
    pub fn is_open(&self) -> bool {
        self.shared.session.lock().is_some()
    }

    /// Enumerate, open and start streaming from a camera.
    ///
    /// `selector` picks a device by id; `None` takes the first one found.
    /// The initial preview mode is the lowest-resolution one (responsiveness
    /// over detail); the initial still mode is the highest-resolution one.
    /// An engine that is already open is closed first.
    pub async fn open(&self, selector: Option<&str>) -> Result<()> {
        let mut control = self.control.lock().await;

        if self.shared.session.lock().is_some() {
            tracing::info!("Engine already open; closing current session first");
            self.shutdown(&mut control).await;
        }

        let mut devices = self.provider.enumerate();
        if devices.is_empty() {
            return Err(Error::NoDeviceFound);
        }
        let descriptor = match selector {
            Some(id) => {
                let pos = devices
                    .iter()
                    .position(|d| d.id == id)
                    .ok_or(Error::NoDeviceFound)?;
                devices.swap_remove(pos)
            }
            None => devices.swap_remove(0),
        };

        tracing::info!(device_id = %descriptor.id, name = %descriptor.name, "Opening camera");
        let mut device = self.provider.open(&descriptor.id)?;

        let caps = device.capabilities().clone();
        if caps.preview_modes.is_empty() {
            device.close();
            return Err(Error::DeviceStartFailed(
                "device reports no preview modes".to_string(),
            ));
        }

        let preview_index = lowest_area_index(&caps.preview_modes);
        let still_index = if caps.still_modes.is_empty() {
            0
        } else {
            highest_area_index(&caps.still_modes)
        };
        let mode = caps.preview_modes[preview_index];

        let setup = device
            .set_byte_order(ByteOrder::Rgb)
            .and_then(|_| device.set_preview_mode(preview_index))
            .and_then(|_| device.start_stream())
            .and_then(|_| device.set_auto_exposure(true));
        if let Err(e) = setup {
            // Full unwind: no orphaned open handle.
            device.close();
            return Err(Error::DeviceStartFailed(e.to_string()));
        }

        {
            let mut slot = self.shared.session.lock();
            *slot = Some(Session {
                device,
                descriptor: descriptor.clone(),
                preview_index,
                still_index,
                buffer: PixelBuffer::new(mode.width, mode.height),
                packed: Vec::new(),
            });
        }

        self.start_loop(&mut control);
        tracing::info!(
            device_id = %descriptor.id,
            width = mode.width,
            height = mode.height,
            preview_index,
            still_modes = caps.still_modes.len(),
            "Camera streaming started"
        );
        Ok(())
    }

    /// Stop the loop and close the device session.
    ///
    /// Idempotent: closing a closed (or never-opened) engine is a no-op.
    pub async fn close(&self) {
        let mut control = self.control.lock().await;
        self.shutdown(&mut control).await;
    }

    /// Change the active preview resolution.
    ///
    /// Stops the loop, drains the device stream, reallocates the pixel
    /// buffer, reconfigures the device and restarts. Rejected with
    /// `InvalidState` while a still capture is pending. If the device
    /// refuses to resume the engine unwinds to closed and reports
    /// `DeviceRestartFailed`.
    pub async fn set_preview_resolution(&self, index: usize) -> Result<()> {
        let mut control = self.control.lock().await;

        let mode = {
            let slot = self.shared.session.lock();
            let session = slot.as_ref().ok_or(Error::NotConnected)?;
            let modes = &session.device.capabilities().preview_modes;
            *modes.get(index).ok_or(Error::InvalidResolutionIndex {
                index,
                available: modes.len(),
            })?
        };
        if !self.shared.stills.is_idle() {
            return Err(Error::InvalidState(
                "still capture in progress".to_string(),
            ));
        }

        let was_running = self.shared.running.load(Ordering::Acquire);
        self.stop_loop(&mut control).await;

        // Frames for the retiring resolution must not be delivered.
        self.shared.frame_cache.clear();

        let outcome = {
            let mut slot = self.shared.session.lock();
            let Some(session) = slot.as_mut() else {
                return Err(Error::NotConnected);
            };

            let result = session
                .device
                .stop_stream()
                .and_then(|_| session.device.set_preview_mode(index))
                .and_then(|_| session.device.start_stream());
            match result {
                Ok(()) => {
                    session.preview_index = index;
                    session.buffer = PixelBuffer::new(mode.width, mode.height);
                    session.packed.clear();
                    Ok(())
                }
                Err(e) => {
                    // The device never adopted the new mode; unwind to closed
                    // so status reports the truth.
                    if let Some(mut dead) = slot.take() {
                        dead.device.close();
                    }
                    Err(Error::DeviceRestartFailed(e.to_string()))
                }
            }
        };

        match &outcome {
            Ok(()) => {
                if was_running {
                    self.start_loop(&mut control);
                }
                tracing::info!(
                    index,
                    width = mode.width,
                    height = mode.height,
                    "Preview resolution changed"
                );
            }
            Err(e) => {
                self.shared.frame_cache.clear();
                self.shared.stills.abort(Error::NotConnected);
                tracing::error!(index, error = %e, "Preview resolution change failed; engine closed");
            }
        }
        outcome
    }

    /// Select the still-capture resolution. Metadata only: no device I/O,
    /// no loop disruption. Validated against the still table, or the
    /// preview table when the device has no dedicated still modes.
    pub fn set_still_resolution(&self, index: usize) -> Result<()> {
        let mut slot = self.shared.session.lock();
        let session = slot.as_mut().ok_or(Error::NotConnected)?;
        let caps = session.device.capabilities();
        let available = if caps.still_modes.is_empty() {
            caps.preview_modes.len()
        } else {
            caps.still_modes.len()
        };
        if index >= available {
            return Err(Error::InvalidResolutionIndex { index, available });
        }
        session.still_index = index;
        tracing::debug!(index, "Still resolution selected");
        Ok(())
    }

    /// Capture a high-resolution still image, blocking until it resolves or
    /// the deadline passes.
    ///
    /// With no dedicated still modes the capture degrades to re-encoding the
    /// current preview frame at still quality, bypassing the hardware
    /// trigger entirely.
    pub async fn capture_still(
        &self,
        resolution_index: Option<usize>,
        destination: Option<PathBuf>,
    ) -> Result<StillCapture> {
        let hardware_index = {
            let slot = self.shared.session.lock();
            let session = slot.as_ref().ok_or(Error::NotConnected)?;
            let caps = session.device.capabilities();
            if caps.still_modes.is_empty() {
                None
            } else {
                let index = resolution_index.unwrap_or(session.still_index);
                if index >= caps.still_modes.len() {
                    return Err(Error::InvalidResolutionIndex {
                        index,
                        available: caps.still_modes.len(),
                    });
                }
                Some(index)
            }
        };

        let Some(index) = hardware_index else {
            return self.capture_from_preview(destination).await;
        };

        // The loop polls the coordinator, issues the hardware trigger, and
        // feeds the pulled frame back through `deliver`.
        let handle = self.shared.stills.request(index, destination)?;
        let result = self
            .shared
            .stills
            .await_result(handle, self.shared.config.still_timeout)
            .await;
        if result.is_ok() {
            self.shared.capture_count.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    /// Fallback capture path for devices without still-capture hardware
    async fn capture_from_preview(&self, destination: Option<PathBuf>) -> Result<StillCapture> {
        let (data, width, height) = {
            let slot = self.shared.session.lock();
            let session = slot.as_ref().ok_or(Error::NotConnected)?;
            if !session.packed.is_empty() {
                let width = session.buffer.width();
                let height = session.buffer.height();
                let encoded = self.shared.codec.encode_rgb(
                    &session.packed,
                    width,
                    height,
                    STILL_JPEG_QUALITY,
                )?;
                (Bytes::from(encoded), width, height)
            } else if let Some(frame) = self.shared.frame_cache.peek() {
                (frame.data, frame.width, frame.height)
            } else {
                return Err(Error::DeviceIo(
                    "no preview frame available yet".to_string(),
                ));
            }
        };

        if let Some(path) = &destination {
            tokio::fs::write(path, &data).await?;
            tracing::info!(path = %path.display(), "Still image saved");
        }

        self.shared.capture_count.fetch_add(1, Ordering::Relaxed);
        tracing::info!(width, height, "Still captured from preview frame");
        Ok(StillCapture {
            width,
            height,
            data,
            destination,
        })
    }

    /// Set a manual exposure time in microseconds (disables auto exposure)
    pub fn set_exposure_time(&self, micros: u32) -> Result<()> {
        let mut slot = self.shared.session.lock();
        let session = slot.as_mut().ok_or(Error::NotConnected)?;
        session.device.set_auto_exposure(false)?;
        session.device.set_exposure_time(micros)
    }

    /// Set a manual gain percentage (disables auto exposure)
    pub fn set_gain(&self, percent: u16) -> Result<()> {
        let mut slot = self.shared.session.lock();
        let session = slot.as_mut().ok_or(Error::NotConnected)?;
        session.device.set_auto_exposure(false)?;
        session.device.set_gain(percent)
    }

    pub fn set_auto_exposure(&self, enabled: bool) -> Result<()> {
        let mut slot = self.shared.session.lock();
        let session = slot.as_mut().ok_or(Error::NotConnected)?;
        session.device.set_auto_exposure(enabled)
    }

    /// Set white balance; unspecified components keep their current value
    pub fn set_white_balance(&self, temp: Option<i32>, tint: Option<i32>) -> Result<()> {
        let mut slot = self.shared.session.lock();
        let session = slot.as_mut().ok_or(Error::NotConnected)?;
        let current = session.device.white_balance().unwrap_or_default();
        let wb = WhiteBalance {
            temp: temp.unwrap_or(current.temp),
            tint: tint.unwrap_or(current.tint),
        };
        session.device.set_white_balance(wb)
    }

    /// One-shot auto white balance
    pub fn auto_white_balance_once(&self) -> Result<()> {
        let mut slot = self.shared.session.lock();
        let session = slot.as_mut().ok_or(Error::NotConnected)?;
        session.device.auto_white_balance_once()
    }

    /// Latest encoded preview frame, without blocking
    pub fn latest_frame(&self) -> Option<EncodedFrame> {
        self.shared.frame_cache.peek()
    }

    /// Per-reader cursor for driving a push-style stream
    pub fn frame_follower(&self) -> FrameFollower {
        self.shared.frame_cache.follower()
    }

    /// One coherent status snapshot. Never errors: a closed engine answers
    /// with the disconnected shape.
    pub fn status(&self) -> EngineStatus {
        let frame_count = self.shared.frame_count.load(Ordering::Relaxed);
        let capture_count = self.shared.capture_count.load(Ordering::Relaxed);

        let slot = self.shared.session.lock();
        let Some(session) = slot.as_ref() else {
            return EngineStatus {
                connected: false,
                name: None,
                id: None,
                resolution: None,
                capture_resolution: None,
                frame_count,
                capture_count,
                fps: 0.0,
                exposure: None,
                gain: None,
                auto_exposure: None,
                white_balance: None,
                resolutions: Vec::new(),
                still_resolutions: Vec::new(),
                monochrome: None,
            };
        };

        let caps = session.device.capabilities();
        let resolutions = resolution_entries(&caps.preview_modes, session.preview_index);
        let still_table = if caps.still_modes.is_empty() {
            &caps.preview_modes
        } else {
            &caps.still_modes
        };
        let still_resolutions = resolution_entries(still_table, session.still_index);

        EngineStatus {
            connected: true,
            name: Some(session.descriptor.name.clone()),
            id: Some(session.descriptor.id.clone()),
            resolution: Some(ActiveResolution {
                index: session.preview_index,
                width: session.buffer.width(),
                height: session.buffer.height(),
            }),
            capture_resolution: Some(CaptureSelection {
                index: session.still_index,
                still_count: caps.still_modes.len(),
            }),
            frame_count,
            capture_count,
            fps: *self.shared.fps.read(),
            exposure: session.device.exposure_range().ok(),
            gain: Some(session.device.gain_range().unwrap_or(GAIN_RANGE_FALLBACK)),
            auto_exposure: session.device.auto_exposure().ok(),
            white_balance: Some(session.device.white_balance().unwrap_or_default()),
            resolutions,
            still_resolutions,
            monochrome: Some(caps.monochrome),
        }
    }

    fn start_loop(&self, control: &mut LoopControl) {
        self.shared.running.store(true, Ordering::Release);
        let shared = self.shared.clone();
        control.handle = Some(tokio::task::spawn_blocking(move || {
            acquisition_loop(shared)
        }));
    }

    async fn stop_loop(&self, control: &mut LoopControl) {
        self.shared.running.store(false, Ordering::Release);
        if let Some(handle) = control.handle.take() {
            match tokio::time::timeout(self.shared.config.loop_join_timeout, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!(error = %e, "Acquisition loop panicked"),
                Err(_) => tracing::warn!(
                    "Acquisition loop did not stop within the join bound; proceeding with teardown"
                ),
            }
        }
    }

    async fn shutdown(&self, control: &mut LoopControl) {
        self.stop_loop(control).await;

        let session = self.shared.session.lock().take();
        if let Some(mut s) = session {
            if let Err(e) = s.device.stop_stream() {
                tracing::debug!(error = %e, "Stream stop on close failed");
            }
            s.device.close();
            tracing::info!(device_id = %s.descriptor.id, "Camera closed");
        }

        self.shared.frame_cache.clear();
        self.shared.stills.abort(Error::NotConnected);
        *self.shared.fps.write() = 0.0;
    }
}

impl Drop for AcquisitionEngine {
    fn drop(&mut self) {
        // The blocking loop holds its own Arc<Shared>; make sure it winds
        // down even when the engine is dropped without an explicit close.
        self.shared.running.store(false, Ordering::Release);
    }
}

/// The background loop: one preview pull (required) and one still-queue
/// poll (optional) per iteration, until told to stop.
fn acquisition_loop(shared: Arc<Shared>) {
    tracing::info!("Acquisition loop started");
    let mut fps = FpsEstimator::new(Instant::now());
    let pull_timeout = shared.config.pull_timeout;

    while shared.running.load(Ordering::Acquire) {
        let mut slot = shared.session.lock();
        let Some(session) = slot.as_mut() else {
            break;
        };

        match session
            .device
            .pull_preview(session.buffer.as_mut_slice(), pull_timeout)
        {
            Ok(PreviewPull::Frame) => {
                let width = session.buffer.width();
                let height = session.buffer.height();
                session.buffer.pack_into(&mut session.packed);

                match shared
                    .codec
                    .encode_rgb(&session.packed, width, height, PREVIEW_JPEG_QUALITY)
                {
                    Ok(encoded) => {
                        let sequence = shared.frame_count.fetch_add(1, Ordering::Relaxed) + 1;
                        shared.frame_cache.publish(EncodedFrame {
                            sequence,
                            width,
                            height,
                            data: Bytes::from(encoded),
                        });
                        if let Some(estimate) = fps.record(Instant::now()) {
                            *shared.fps.write() = estimate;
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "Preview encode failed"),
                }
            }
            Ok(PreviewPull::TimedOut) => {
                // Expected under normal polling; retry next iteration.
            }
            Err(e) => {
                tracing::debug!(error = %e, "Preview pull error");
                thread::sleep(PULL_ERROR_BACKOFF);
            }
        }

        // Still path, independent of preview pull success.
        if let Some(trigger) = shared.stills.pending_trigger() {
            // A frame left over from a timed-out request must not satisfy
            // this one: drain the queue before arming the trigger.
            loop {
                match session.device.try_pull_still() {
                    Ok(Some(stale)) => tracing::debug!(
                        width = stale.width,
                        height = stale.height,
                        "Discarded stale still frame"
                    ),
                    Ok(None) => break,
                    Err(e) => {
                        tracing::debug!(error = %e, "Still queue drain failed");
                        break;
                    }
                }
            }

            match session.device.trigger_still(trigger.resolution_index) {
                Ok(()) => tracing::debug!(
                    ticket = trigger.ticket,
                    resolution_index = trigger.resolution_index,
                    "Still trigger issued"
                ),
                Err(e) => {
                    shared.stills.fail(trigger.ticket, e);
                }
            }
        }

        if let Some(ticket) = shared.stills.awaiting_ticket() {
            match session.device.try_pull_still() {
                Ok(Some(frame)) => {
                    shared.stills.deliver(ticket, frame);
                }
                Ok(None) => {
                    // Not ready yet; poll again next iteration.
                }
                Err(e) => tracing::debug!(error = %e, "Still pull failed"),
            }
        }
    }

    tracing::info!("Acquisition loop stopped");
}

fn lowest_area_index(modes: &[Resolution]) -> usize {
    modes
        .iter()
        .enumerate()
        .min_by_key(|(_, m)| m.area())
        .map(|(i, _)| i)
        .unwrap_or(0)
}

fn highest_area_index(modes: &[Resolution]) -> usize {
    modes
        .iter()
        .enumerate()
        .max_by_key(|(_, m)| m.area())
        .map(|(i, _)| i)
        .unwrap_or(0)
}

fn resolution_entries(modes: &[Resolution], current: usize) -> Vec<ResolutionEntry> {
    modes
        .iter()
        .enumerate()
        .map(|(index, m)| ResolutionEntry {
            index,
            width: m.width,
            height: m.height,
            current: index == current,
        })
        .collect()
}

/// Aggregate engine status snapshot
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<ActiveResolution>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capture_resolution: Option<CaptureSelection>,
    pub frame_count: u64,
    pub capture_count: u64,
    pub fps: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exposure: Option<ControlRange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gain: Option<ControlRange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_exposure: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub white_balance: Option<WhiteBalance>,
    pub resolutions: Vec<ResolutionEntry>,
    pub still_resolutions: Vec<ResolutionEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub monochrome: Option<bool>,
}

/// Active preview mode
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ActiveResolution {
    pub index: usize,
    pub width: u32,
    pub height: u32,
}

/// Still-capture selection
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CaptureSelection {
    pub index: usize,
    /// Dedicated still modes on the device; 0 means captures fall back to
    /// the preview frame
    pub still_count: usize,
}

/// One row of a resolution table
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ResolutionEntry {
    pub index: usize,
    pub width: u32,
    pub height: u32,
    pub current: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_ranking() {
        let modes = vec![
            Resolution::new(1920, 1080),
            Resolution::new(640, 480),
            Resolution::new(1280, 720),
        ];
        assert_eq!(lowest_area_index(&modes), 1);
        assert_eq!(highest_area_index(&modes), 0);
    }

    #[test]
    fn test_resolution_entries_mark_current() {
        let modes = vec![Resolution::new(4000, 3000), Resolution::new(2000, 1500)];
        let entries = resolution_entries(&modes, 1);
        assert!(!entries[0].current);
        assert!(entries[1].current);
        assert_eq!(entries[0].width, 4000);
    }
}
