//! Windowed frames-per-second estimate

use std::time::{Duration, Instant};

/// Rolling fps window, recomputed once the window duration has elapsed
pub(crate) struct FpsEstimator {
    window: Duration,
    window_start: Instant,
    frames: u32,
}

impl FpsEstimator {
    pub fn new(now: Instant) -> Self {
        Self::with_window(now, Duration::from_secs(1))
    }

    pub fn with_window(now: Instant, window: Duration) -> Self {
        Self {
            window,
            window_start: now,
            frames: 0,
        }
    }

    /// Record one produced frame; yields the recomputed estimate when the
    /// window closes, `None` otherwise.
    pub fn record(&mut self, now: Instant) -> Option<f64> {
        self.frames += 1;
        let elapsed = now.duration_since(self.window_start);
        if elapsed < self.window {
            return None;
        }

        let estimate = self.frames as f64 / elapsed.as_secs_f64();
        self.frames = 0;
        self.window_start = now;
        Some(estimate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_is_frames_over_window() {
        let base = Instant::now();
        let mut fps = FpsEstimator::new(base);

        // 29 frames inside the window produce no estimate yet.
        for i in 1..30u64 {
            let at = base + Duration::from_millis(i * 33);
            assert!(fps.record(at).is_none());
        }

        // The 30th frame lands exactly at the window boundary.
        let estimate = fps.record(base + Duration::from_secs(1)).unwrap();
        assert!((estimate - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_window_resets_after_estimate() {
        let base = Instant::now();
        let mut fps = FpsEstimator::with_window(base, Duration::from_secs(1));

        for i in 1..=10u64 {
            fps.record(base + Duration::from_millis(i * 100));
        }

        // Next window: 4 frames over exactly one second.
        let later = base + Duration::from_secs(1);
        for i in 1..4u64 {
            assert!(fps.record(later + Duration::from_millis(i * 200)).is_none());
        }
        let estimate = fps.record(later + Duration::from_secs(1)).unwrap();
        assert!((estimate - 4.0).abs() < 1e-9);
    }
}
