//! Virtual camera backend emitting patterned frames
//!
//! Stands in for real hardware so the server runs in development and the
//! acquisition engine is testable: counter-derived pixel patterns, a
//! configurable mode table, simulated still latency, and failure injection.

use std::thread;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::pixel;

use super::{
    ByteOrder, CameraDevice, ControlRange, DeviceCapabilities, DeviceDescriptor, DeviceProvider,
    PreviewPull, RawStillFrame, Resolution, WhiteBalance,
};

const EXPOSURE_MIN_US: i64 = 100;
const EXPOSURE_MAX_US: i64 = 2_000_000;
const EXPOSURE_DEFAULT_US: i64 = 10_000;

const GAIN_MIN: i64 = 100;
const GAIN_MAX: i64 = 500;
const GAIN_DEFAULT: i64 = 100;

/// Configuration for one virtual camera
#[derive(Debug, Clone)]
pub struct VirtualCameraSpec {
    pub id: String,
    pub name: String,
    pub preview_modes: Vec<Resolution>,
    pub still_modes: Vec<Resolution>,
    pub monochrome: bool,
    /// Simulated inter-frame interval of the sensor
    pub frame_interval: Duration,
    /// Delay between the snapshot trigger and the still frame appearing in
    /// the queue; `None` means the still never arrives
    pub still_latency: Option<Duration>,
    /// Reject `start_stream`
    pub fail_start: bool,
    /// Reject `start_stream` on every call after the first successful one
    pub fail_restart: bool,
    /// Reject `trigger_still`
    pub fail_trigger: bool,
    /// Produce no preview frames at all; every pull times out
    pub silent: bool,
}

impl Default for VirtualCameraSpec {
    fn default() -> Self {
        Self {
            id: "virtual-0".to_string(),
            name: "Virtual Camera".to_string(),
            preview_modes: vec![
                Resolution::new(1920, 1080),
                Resolution::new(1280, 720),
                Resolution::new(640, 480),
            ],
            still_modes: vec![Resolution::new(4000, 3000), Resolution::new(2000, 1500)],
            monochrome: false,
            frame_interval: Duration::from_millis(15),
            still_latency: Some(Duration::from_millis(30)),
            fail_start: false,
            fail_restart: false,
            fail_trigger: false,
            silent: false,
        }
    }
}

impl VirtualCameraSpec {
    fn descriptor(&self) -> DeviceDescriptor {
        DeviceDescriptor {
            id: self.id.clone(),
            name: self.name.clone(),
        }
    }
}

/// Provider over a fixed set of virtual cameras
pub struct VirtualProvider {
    specs: Vec<VirtualCameraSpec>,
}

impl VirtualProvider {
    pub fn new(specs: Vec<VirtualCameraSpec>) -> Self {
        Self { specs }
    }

    pub fn single(spec: VirtualCameraSpec) -> Self {
        Self { specs: vec![spec] }
    }

    /// Provider with no cameras attached
    pub fn empty() -> Self {
        Self { specs: Vec::new() }
    }
}

impl Default for VirtualProvider {
    fn default() -> Self {
        Self::single(VirtualCameraSpec::default())
    }
}

impl DeviceProvider for VirtualProvider {
    fn enumerate(&self) -> Vec<DeviceDescriptor> {
        self.specs.iter().map(|s| s.descriptor()).collect()
    }

    fn open(&self, id: &str) -> Result<Box<dyn CameraDevice>> {
        let spec = self
            .specs
            .iter()
            .find(|s| s.id == id)
            .ok_or(Error::NoDeviceFound)?;
        Ok(Box::new(VirtualCamera::new(spec.clone())))
    }
}

struct PendingStill {
    ready_at: Option<Instant>,
    resolution: Resolution,
}

/// A single opened virtual camera session
struct VirtualCamera {
    spec: VirtualCameraSpec,
    caps: DeviceCapabilities,
    preview_index: usize,
    started: bool,
    start_count: u32,
    counter: u64,
    pending_still: Option<PendingStill>,
    exposure_us: i64,
    auto_exposure: bool,
    gain: i64,
    wb: WhiteBalance,
}

impl VirtualCamera {
    fn new(spec: VirtualCameraSpec) -> Self {
        let caps = DeviceCapabilities {
            preview_modes: spec.preview_modes.clone(),
            still_modes: spec.still_modes.clone(),
            monochrome: spec.monochrome,
        };
        Self {
            spec,
            caps,
            preview_index: 0,
            started: false,
            start_count: 0,
            counter: 0,
            pending_still: None,
            exposure_us: EXPOSURE_DEFAULT_US,
            auto_exposure: true,
            gain: GAIN_DEFAULT,
            wb: WhiteBalance::default(),
        }
    }

    fn fill_pattern(buf: &mut [u8], res: Resolution, seed: u64) {
        let stride = pixel::row_stride(res.width);
        let row = res.width as usize * pixel::BYTES_PER_PIXEL;
        for y in 0..res.height as usize {
            let base = y * stride;
            for x in 0..row {
                buf[base + x] = (seed as usize + y + x) as u8;
            }
        }
    }
}

impl CameraDevice for VirtualCamera {
    fn capabilities(&self) -> &DeviceCapabilities {
        &self.caps
    }

    fn set_byte_order(&mut self, _order: ByteOrder) -> Result<()> {
        Ok(())
    }

    fn set_preview_mode(&mut self, index: usize) -> Result<()> {
        if self.started {
            return Err(Error::DeviceIo(
                "preview mode cannot change while streaming".to_string(),
            ));
        }
        if index >= self.caps.preview_modes.len() {
            return Err(Error::DeviceIo(format!("no preview mode {index}")));
        }
        self.preview_index = index;
        Ok(())
    }

    fn start_stream(&mut self) -> Result<()> {
        if self.spec.fail_start {
            return Err(Error::DeviceIo("simulated start failure".to_string()));
        }
        if self.spec.fail_restart && self.start_count > 0 {
            return Err(Error::DeviceIo("simulated restart failure".to_string()));
        }
        self.started = true;
        self.start_count += 1;
        Ok(())
    }

    fn stop_stream(&mut self) -> Result<()> {
        self.started = false;
        Ok(())
    }

    fn pull_preview(&mut self, buf: &mut [u8], timeout: Duration) -> Result<PreviewPull> {
        if !self.started {
            return Err(Error::DeviceIo("pull on stopped stream".to_string()));
        }
        if self.spec.silent {
            thread::sleep(timeout);
            return Ok(PreviewPull::TimedOut);
        }

        thread::sleep(self.spec.frame_interval.min(timeout));

        let res = self.caps.preview_modes[self.preview_index];
        let needed = pixel::row_stride(res.width) * res.height as usize;
        if buf.len() < needed {
            return Err(Error::DeviceIo(format!(
                "frame buffer too small: {} < {}",
                buf.len(),
                needed
            )));
        }

        self.counter = self.counter.wrapping_add(1);
        Self::fill_pattern(&mut buf[..needed], res, self.counter);
        Ok(PreviewPull::Frame)
    }

    fn trigger_still(&mut self, index: usize) -> Result<()> {
        if self.spec.fail_trigger {
            return Err(Error::DeviceIo("simulated snap failure".to_string()));
        }
        let resolution = *self
            .caps
            .still_modes
            .get(index)
            .ok_or_else(|| Error::DeviceIo(format!("no still mode {index}")))?;
        self.pending_still = Some(PendingStill {
            ready_at: self.spec.still_latency.map(|d| Instant::now() + d),
            resolution,
        });
        Ok(())
    }

    fn try_pull_still(&mut self) -> Result<Option<RawStillFrame>> {
        let ready = self
            .pending_still
            .as_ref()
            .is_some_and(|p| matches!(p.ready_at, Some(t) if Instant::now() >= t));
        if !ready {
            return Ok(None);
        }
        let Some(pending) = self.pending_still.take() else {
            return Ok(None);
        };
        let res = pending.resolution;
        let mut data = vec![0u8; pixel::row_stride(res.width) * res.height as usize];
        self.counter = self.counter.wrapping_add(1);
        Self::fill_pattern(&mut data, res, self.counter);
        Ok(Some(RawStillFrame {
            width: res.width,
            height: res.height,
            data,
        }))
    }

    fn exposure_range(&self) -> Result<ControlRange> {
        Ok(ControlRange {
            min: EXPOSURE_MIN_US,
            max: EXPOSURE_MAX_US,
            default: EXPOSURE_DEFAULT_US,
            current: self.exposure_us,
        })
    }

    fn set_exposure_time(&mut self, micros: u32) -> Result<()> {
        let micros = micros as i64;
        if !(EXPOSURE_MIN_US..=EXPOSURE_MAX_US).contains(&micros) {
            return Err(Error::DeviceIo(format!(
                "exposure {micros}us out of range"
            )));
        }
        self.exposure_us = micros;
        Ok(())
    }

    fn auto_exposure(&self) -> Result<bool> {
        Ok(self.auto_exposure)
    }

    fn set_auto_exposure(&mut self, enabled: bool) -> Result<()> {
        self.auto_exposure = enabled;
        Ok(())
    }

    fn gain_range(&self) -> Result<ControlRange> {
        Ok(ControlRange {
            min: GAIN_MIN,
            max: GAIN_MAX,
            default: GAIN_DEFAULT,
            current: self.gain,
        })
    }

    fn set_gain(&mut self, percent: u16) -> Result<()> {
        let percent = percent as i64;
        if !(GAIN_MIN..=GAIN_MAX).contains(&percent) {
            return Err(Error::DeviceIo(format!("gain {percent}% out of range")));
        }
        self.gain = percent;
        Ok(())
    }

    fn white_balance(&self) -> Result<WhiteBalance> {
        Ok(self.wb)
    }

    fn set_white_balance(&mut self, wb: WhiteBalance) -> Result<()> {
        self.wb = wb;
        Ok(())
    }

    fn auto_white_balance_once(&mut self) -> Result<()> {
        self.wb = WhiteBalance::default();
        Ok(())
    }

    fn close(&mut self) {
        self.started = false;
        self.pending_still = None;
    }
}
