//! FrameCache - single-slot latest-frame hand-off
//!
//! ## Responsibilities
//!
//! - Hold the most recent encoded preview frame
//! - Replace it atomically; readers never observe a torn frame
//! - Wake stream readers when a new frame lands
//!
//! This is a "latest wins" cache, not a queue: a fast producer may overwrite
//! a frame before a slow reader drains it (coalescing). A follower never
//! observes frames out of order and never permanently misses a publish that
//! happens while it waits.

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::watch;
use tokio::time::{timeout_at, Instant};

/// Immutable encoded preview frame
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    /// Monotonic frame number assigned by the acquisition loop
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    /// Compressed image bytes, shared across readers without copying
    pub data: Bytes,
}

/// Single-slot overwrite-on-write frame cache
pub struct FrameCache {
    tx: watch::Sender<Option<EncodedFrame>>,
}

impl FrameCache {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Replace the held frame unconditionally and wake all waiters
    pub fn publish(&self, frame: EncodedFrame) {
        self.tx.send_replace(Some(frame));
    }

    /// Drop the held frame (resolution change / close). Waiters are woken
    /// but keep waiting for a real frame.
    pub fn clear(&self) {
        self.tx.send_replace(None);
    }

    /// Currently held frame, without blocking
    pub fn peek(&self) -> Option<EncodedFrame> {
        self.tx.borrow().clone()
    }

    /// New per-reader cursor. The currently held frame (if any) is delivered
    /// on the follower's first `next_frame` call.
    pub fn follower(&self) -> FrameFollower {
        let mut rx = self.tx.subscribe();
        rx.mark_changed();
        FrameFollower { rx }
    }
}

impl Default for FrameCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-reader cursor over the cache
///
/// Each follower tracks the last frame it observed independently; any number
/// of followers may wait concurrently.
pub struct FrameFollower {
    rx: watch::Receiver<Option<EncodedFrame>>,
}

impl FrameFollower {
    /// Block until a frame newer than the last one this follower observed is
    /// available, or `timeout` elapses (`None`).
    pub async fn next_frame(&mut self, timeout: Duration) -> Option<EncodedFrame> {
        let deadline = Instant::now() + timeout;
        loop {
            match timeout_at(deadline, self.rx.changed()).await {
                Ok(Ok(())) => {
                    if let Some(frame) = self.rx.borrow_and_update().clone() {
                        return Some(frame);
                    }
                    // Slot was cleared; wait for the next real frame.
                }
                // Cache dropped, or deadline hit
                Ok(Err(_)) | Err(_) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn frame(sequence: u64) -> EncodedFrame {
        EncodedFrame {
            sequence,
            width: 640,
            height: 480,
            data: Bytes::from_static(b"jpeg"),
        }
    }

    #[tokio::test]
    async fn test_peek_empty_then_published() {
        let cache = FrameCache::new();
        assert!(cache.peek().is_none());

        cache.publish(frame(1));
        assert_eq!(cache.peek().unwrap().sequence, 1);
    }

    #[tokio::test]
    async fn test_follower_gets_current_frame_immediately() {
        let cache = FrameCache::new();
        cache.publish(frame(7));

        let mut follower = cache.follower();
        let got = follower.next_frame(Duration::from_millis(100)).await;
        assert_eq!(got.unwrap().sequence, 7);
    }

    #[tokio::test]
    async fn test_waiter_woken_by_publish() {
        let cache = Arc::new(FrameCache::new());
        let mut follower = cache.follower();

        let publisher = cache.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            publisher.publish(frame(1));
        });

        let got = follower.next_frame(Duration::from_secs(2)).await;
        assert_eq!(got.unwrap().sequence, 1);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_next_frame_times_out() {
        let cache = FrameCache::new();
        let mut follower = cache.follower();
        let got = follower.next_frame(Duration::from_millis(30)).await;
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn test_coalescing_latest_wins() {
        let cache = FrameCache::new();
        let mut follower = cache.follower();

        for seq in 1..=5 {
            cache.publish(frame(seq));
        }

        // The intermediate frames were coalesced away; only the latest shows.
        let got = follower.next_frame(Duration::from_millis(100)).await;
        assert_eq!(got.unwrap().sequence, 5);
    }

    #[tokio::test]
    async fn test_sequences_non_decreasing_per_follower() {
        let cache = Arc::new(FrameCache::new());
        let mut follower = cache.follower();

        let publisher = cache.clone();
        let task = tokio::spawn(async move {
            for seq in 1..=50 {
                publisher.publish(frame(seq));
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        });

        let mut last = 0u64;
        while let Some(f) = follower.next_frame(Duration::from_millis(200)).await {
            assert!(f.sequence > last, "sequence went backwards");
            last = f.sequence;
            if last == 50 {
                break;
            }
        }
        assert_eq!(last, 50);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_clear_wakes_but_skips_empty_slot() {
        let cache = Arc::new(FrameCache::new());
        cache.publish(frame(1));

        let mut follower = cache.follower();
        // Consume the current frame.
        follower.next_frame(Duration::from_millis(50)).await.unwrap();

        let publisher = cache.clone();
        let task = tokio::spawn(async move {
            publisher.clear();
            tokio::time::sleep(Duration::from_millis(10)).await;
            publisher.publish(frame(2));
        });

        // The clear must not surface as a frame.
        let got = follower.next_frame(Duration::from_secs(2)).await;
        assert_eq!(got.unwrap().sequence, 2);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_multiple_followers_each_observe_publishes() {
        let cache = Arc::new(FrameCache::new());
        let mut a = cache.follower();
        let mut b = cache.follower();

        cache.publish(frame(1));

        assert_eq!(a.next_frame(Duration::from_millis(100)).await.unwrap().sequence, 1);
        assert_eq!(b.next_frame(Duration::from_millis(100)).await.unwrap().sequence, 1);

        cache.publish(frame(2));

        assert_eq!(a.next_frame(Duration::from_millis(100)).await.unwrap().sequence, 2);
        assert_eq!(b.next_frame(Duration::from_millis(100)).await.unwrap().sequence, 2);
    }
}
