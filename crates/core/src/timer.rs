//! Frame timing for the main loop.

use std::time::{Duration, Instant};

/// Counts frames and reports the average rate once per reporting interval.
#[derive(Debug)]
pub struct FrameTimer {
    start: Instant,
    window_start: Instant,
    frames_in_window: u32,
    total_frames: u64,
    interval: Duration,
}

impl FrameTimer {
    /// Create a timer that reports once per second.
    pub fn new() -> Self {
        Self::with_interval(Duration::from_secs(1))
    }

    pub fn with_interval(interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            start: now,
            window_start: now,
            frames_in_window: 0,
            total_frames: 0,
            interval,
        }
    }

    /// Time since the timer was created.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Number of frames recorded since creation.
    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    /// Record one presented frame.
    ///
    /// Returns the frames-per-second of the window that just closed, if the
    /// reporting interval has elapsed.
    pub fn frame(&mut self) -> Option<f32> {
        self.frame_at(Instant::now())
    }

    fn frame_at(&mut self, now: Instant) -> Option<f32> {
        self.frames_in_window += 1;
        self.total_frames += 1;

        let window = now.saturating_duration_since(self.window_start);
        if window < self.interval {
            return None;
        }

        let fps = self.frames_in_window as f32 / window.as_secs_f32();
        self.window_start = now;
        self.frames_in_window = 0;
        Some(fps)
    }
}

impl Default for FrameTimer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_report_before_interval() {
        let mut timer = FrameTimer::with_interval(Duration::from_secs(3600));
        assert!(timer.frame().is_none());
        assert!(timer.frame().is_none());
        assert_eq!(timer.total_frames(), 2);
    }

    #[test]
    fn test_report_after_interval() {
        let mut timer = FrameTimer::with_interval(Duration::from_millis(500));
        let base = timer.window_start;

        assert!(timer.frame_at(base + Duration::from_millis(100)).is_none());
        let fps = timer
            .frame_at(base + Duration::from_secs(1))
            .expect("interval elapsed");
        assert!((fps - 2.0).abs() < 1e-3);

        // Window restarts after a report
        assert!(timer.frame_at(base + Duration::from_millis(1100)).is_none());
        assert_eq!(timer.total_frames(), 3);
    }
}
