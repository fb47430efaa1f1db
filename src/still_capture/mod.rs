//! StillCaptureCoordinator - one-at-a-time snapshot request/response
//!
//! ## Responsibilities
//!
//! - Single-slot still request state machine: Idle -> Requested -> resolved
//! - Hand-off between capture callers and the acquisition loop
//! - Repack, encode and optionally persist delivered still frames
//! - Timeout fencing: each request carries a ticket, so a still frame that
//!   arrives after its request timed out can never resolve a newer request
//!
//! The acquisition loop polls `pending_trigger` to learn that a hardware
//! snapshot trigger must be issued, then feeds the pulled frame back through
//! `deliver`. Callers block in `await_result` with a bounded deadline.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::codec::{ImageCodec, STILL_JPEG_QUALITY};
use crate::device::RawStillFrame;
use crate::error::{Error, Result};
use crate::pixel;

/// Default deadline for a still capture to resolve, matching the hardware's
/// own snapshot turnaround budget
pub const STILL_CAPTURE_TIMEOUT: Duration = Duration::from_secs(10);

/// Transient still capture request
#[derive(Debug, Clone)]
pub struct StillRequest {
    pub resolution_index: usize,
    pub destination: Option<PathBuf>,
    pub requested_at: DateTime<Utc>,
}

/// A resolved still capture
#[derive(Debug, Clone)]
pub struct StillCapture {
    pub width: u32,
    pub height: u32,
    pub data: Bytes,
    pub destination: Option<PathBuf>,
}

/// Trigger work the acquisition loop must perform for the live request
#[derive(Debug, Clone, Copy)]
pub struct PendingTrigger {
    pub ticket: u64,
    pub resolution_index: usize,
}

/// Caller-side handle for one request; pass to `await_result`
pub struct CaptureHandle {
    ticket: u64,
    rx: oneshot::Receiver<Result<StillCapture>>,
}

enum Phase {
    /// The loop has not yet issued the hardware trigger
    TriggerPending,
    /// Trigger issued; the loop is polling the still queue
    AwaitingFrame,
}

struct Pending {
    ticket: u64,
    request: StillRequest,
    phase: Phase,
    tx: oneshot::Sender<Result<StillCapture>>,
}

#[derive(Default)]
struct Inner {
    next_ticket: u64,
    pending: Option<Pending>,
}

/// One-at-a-time still capture state machine
pub struct StillCaptureCoordinator {
    codec: Arc<dyn ImageCodec>,
    inner: Mutex<Inner>,
}

impl StillCaptureCoordinator {
    pub fn new(codec: Arc<dyn ImageCodec>) -> Self {
        Self {
            codec,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// True when no request is outstanding
    pub fn is_idle(&self) -> bool {
        self.inner.lock().pending.is_none()
    }

    /// Register a still capture request.
    ///
    /// Fails with `InvalidState` if one is already outstanding; a hardware
    /// device has exactly one in-flight snapshot capability, so concurrent
    /// requests are rejected, never queued or superseded.
    pub fn request(
        &self,
        resolution_index: usize,
        destination: Option<PathBuf>,
    ) -> Result<CaptureHandle> {
        let mut inner = self.inner.lock();
        if inner.pending.is_some() {
            return Err(Error::InvalidState(
                "still capture already in progress".to_string(),
            ));
        }

        inner.next_ticket += 1;
        let ticket = inner.next_ticket;
        let (tx, rx) = oneshot::channel();
        inner.pending = Some(Pending {
            ticket,
            request: StillRequest {
                resolution_index,
                destination,
                requested_at: Utc::now(),
            },
            phase: Phase::TriggerPending,
            tx,
        });

        tracing::debug!(ticket, resolution_index, "Still capture requested");
        Ok(CaptureHandle { ticket, rx })
    }

    /// Acquisition-loop poll: trigger work for the live request, if any.
    /// Yields each request exactly once.
    pub fn pending_trigger(&self) -> Option<PendingTrigger> {
        let mut inner = self.inner.lock();
        let pending = inner.pending.as_mut()?;
        if !matches!(pending.phase, Phase::TriggerPending) {
            return None;
        }
        pending.phase = Phase::AwaitingFrame;
        Some(PendingTrigger {
            ticket: pending.ticket,
            resolution_index: pending.request.resolution_index,
        })
    }

    /// Ticket of the request whose still frame the loop should poll for
    pub fn awaiting_ticket(&self) -> Option<u64> {
        match &self.inner.lock().pending {
            Some(Pending {
                phase: Phase::AwaitingFrame,
                ticket,
                ..
            }) => Some(*ticket),
            _ => None,
        }
    }

    /// Feed a pulled still frame to the live request.
    ///
    /// A frame whose ticket no longer matches (request timed out or was
    /// aborted) is discarded. Returns true when the capture resolved
    /// successfully.
    pub fn deliver(&self, ticket: u64, frame: RawStillFrame) -> bool {
        let pending = {
            let mut inner = self.inner.lock();
            if !inner.pending.as_ref().is_some_and(|p| p.ticket == ticket) {
                tracing::debug!(ticket, "Discarding still frame with no live request");
                return false;
            }
            let Some(pending) = inner.pending.take() else {
                return false;
            };
            pending
        };

        // Repack, encode and persist outside the lock; new requests may be
        // accepted meanwhile, their trigger runs on the next loop iteration.
        let destination = pending.request.destination.clone();
        let outcome = self.finish_frame(frame, destination);

        let resolved = outcome.is_ok();
        match &outcome {
            Ok(still) => tracing::info!(
                ticket,
                width = still.width,
                height = still.height,
                size = still.data.len(),
                "Still capture resolved"
            ),
            Err(e) => tracing::warn!(ticket, error = %e, "Still capture delivery failed"),
        }

        let _ = pending.tx.send(outcome);
        resolved
    }

    fn finish_frame(
        &self,
        frame: RawStillFrame,
        destination: Option<PathBuf>,
    ) -> Result<StillCapture> {
        let needed = pixel::row_stride(frame.width) * frame.height as usize;
        if frame.data.len() < needed {
            return Err(Error::DeviceIo(format!(
                "still frame truncated: {} < {}",
                frame.data.len(),
                needed
            )));
        }

        let packed = pixel::pack_rows(&frame.data, frame.width, frame.height);
        let encoded =
            self.codec
                .encode_rgb(&packed, frame.width, frame.height, STILL_JPEG_QUALITY)?;

        if let Some(path) = &destination {
            std::fs::write(path, &encoded)?;
            tracing::info!(path = %path.display(), "Still image saved");
        }

        Ok(StillCapture {
            width: frame.width,
            height: frame.height,
            data: Bytes::from(encoded),
            destination,
        })
    }

    /// Fail the live request (trigger rejected, device lost). Ignored when
    /// the ticket no longer matches.
    pub fn fail(&self, ticket: u64, error: Error) -> bool {
        let pending = {
            let mut inner = self.inner.lock();
            if !inner.pending.as_ref().is_some_and(|p| p.ticket == ticket) {
                return false;
            }
            let Some(pending) = inner.pending.take() else {
                return false;
            };
            pending
        };
        tracing::warn!(ticket, error = %error, "Still capture failed");
        let _ = pending.tx.send(Err(error));
        true
    }

    /// Fail whatever is pending (close path)
    pub fn abort(&self, error: Error) {
        let pending = self.inner.lock().pending.take();
        if let Some(p) = pending {
            tracing::debug!(ticket = p.ticket, "Aborting pending still capture");
            let _ = p.tx.send(Err(error));
        }
    }

    /// Block until the request resolves or `timeout` elapses.
    ///
    /// On expiry the request slot is forced back to Idle, invalidating the
    /// ticket: a still frame the hardware delivers later is discarded rather
    /// than attributed to a subsequent request.
    pub async fn await_result(
        &self,
        handle: CaptureHandle,
        timeout: Duration,
    ) -> Result<StillCapture> {
        match tokio::time::timeout(timeout, handle.rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(Error::Internal("still capture abandoned".to_string())),
            Err(_) => {
                {
                    let mut inner = self.inner.lock();
                    if matches!(&inner.pending, Some(p) if p.ticket == handle.ticket) {
                        inner.pending = None;
                    }
                }
                tracing::warn!(ticket = handle.ticket, ?timeout, "Still capture timed out");
                Err(Error::CaptureTimeout { waited: timeout })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JpegCodec;

    fn coordinator() -> StillCaptureCoordinator {
        StillCaptureCoordinator::new(Arc::new(JpegCodec))
    }

    fn raw_frame(width: u32, height: u32) -> RawStillFrame {
        RawStillFrame {
            width,
            height,
            data: vec![64u8; pixel::row_stride(width) * height as usize],
        }
    }

    #[tokio::test]
    async fn test_request_and_deliver_roundtrip() {
        let coord = coordinator();
        let handle = coord.request(0, None).unwrap();

        let trigger = coord.pending_trigger().expect("trigger pending");
        assert_eq!(trigger.resolution_index, 0);
        // Trigger is handed out exactly once.
        assert!(coord.pending_trigger().is_none());
        assert_eq!(coord.awaiting_ticket(), Some(trigger.ticket));

        assert!(coord.deliver(trigger.ticket, raw_frame(64, 48)));

        let still = coord
            .await_result(handle, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!((still.width, still.height), (64, 48));
        assert!(still.data.starts_with(&[0xFF, 0xD8]));
        assert!(coord.is_idle());
    }

    #[tokio::test]
    async fn test_second_request_rejected_first_unaffected() {
        let coord = coordinator();
        let handle = coord.request(0, None).unwrap();

        assert!(matches!(
            coord.request(1, None),
            Err(Error::InvalidState(_))
        ));

        let trigger = coord.pending_trigger().unwrap();
        assert!(coord.deliver(trigger.ticket, raw_frame(32, 32)));
        let still = coord
            .await_result(handle, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(still.width, 32);
    }

    #[tokio::test]
    async fn test_timeout_resets_to_idle_and_fences_late_delivery() {
        let coord = coordinator();
        let handle = coord.request(0, None).unwrap();
        let trigger = coord.pending_trigger().unwrap();

        let err = coord
            .await_result(handle, Duration::from_millis(30))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CaptureTimeout { .. }));
        assert!(coord.is_idle());

        // A fresh request is accepted after the timeout.
        let handle2 = coord.request(1, None).unwrap();
        let trigger2 = coord.pending_trigger().unwrap();

        // The frame for the dead ticket is discarded, not attributed to the
        // new request.
        assert!(!coord.deliver(trigger.ticket, raw_frame(64, 48)));

        assert!(coord.deliver(trigger2.ticket, raw_frame(16, 16)));
        let still = coord
            .await_result(handle2, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(still.width, 16);
    }

    #[tokio::test]
    async fn test_fail_releases_caller() {
        let coord = coordinator();
        let handle = coord.request(0, None).unwrap();
        let trigger = coord.pending_trigger().unwrap();

        assert!(coord.fail(trigger.ticket, Error::DeviceIo("snap rejected".to_string())));

        let err = coord
            .await_result(handle, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DeviceIo(_)));
        assert!(coord.is_idle());
    }

    #[tokio::test]
    async fn test_abort_releases_caller() {
        let coord = coordinator();
        let handle = coord.request(0, None).unwrap();

        coord.abort(Error::NotConnected);

        let err = coord
            .await_result(handle, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotConnected));
    }

    #[tokio::test]
    async fn test_deliver_persists_to_destination() {
        let coord = coordinator();
        let path = std::env::temp_dir().join(format!(
            "camstream-test-{}-{}.jpg",
            std::process::id(),
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));

        let handle = coord.request(0, Some(path.clone())).unwrap();
        let trigger = coord.pending_trigger().unwrap();
        assert!(coord.deliver(trigger.ticket, raw_frame(16, 16)));

        let still = coord
            .await_result(handle, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(still.destination.as_deref(), Some(path.as_path()));

        let on_disk = std::fs::read(&path).unwrap();
        assert_eq!(on_disk, still.data.to_vec());
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_truncated_frame_fails_delivery() {
        let coord = coordinator();
        let handle = coord.request(0, None).unwrap();
        let trigger = coord.pending_trigger().unwrap();

        let short = RawStillFrame {
            width: 64,
            height: 48,
            data: vec![0u8; 10],
        };
        assert!(!coord.deliver(trigger.ticket, short));

        let err = coord
            .await_result(handle, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DeviceIo(_)));
    }
}
