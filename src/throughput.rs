//! Frame-count windowed throughput accounting.
//!
//! Counts frames and payload bytes until a fixed number of frames has been
//! seen, then reports frames per second and mean payload size for that
//! window and starts over. The window boundary is a frame count rather than
//! a wall-clock tick, so reports come faster when the camera runs faster.
//!
//! Only a counter, a byte total and the window start instant are kept per
//! window. A completed window whose report has not been collected yet is
//! queued, so every window is reported exactly once however late the
//! caller polls.

use std::collections::VecDeque;
use std::fmt;
use std::num::NonZeroU32;
use std::time::{Duration, Instant};

/// Frames per window used by the capture loop unless configured otherwise.
pub const DEFAULT_WINDOW: NonZeroU32 = match NonZeroU32::new(300) {
    Some(n) => n,
    None => unreachable!(),
};

/// Statistics for one completed window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThroughputReport {
    /// Achieved frames per second over the window
    pub fps: f64,
    /// Mean payload size in bytes
    pub mean_bytes: f64,
    /// Frames in the window
    pub frames: u32,
    /// Wall-clock time covered by the window
    pub elapsed: Duration,
}

impl fmt::Display for ThroughputReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fps: {:.1}, mean data read size: {:.1}", self.fps, self.mean_bytes)
    }
}

/// Rolling frame-count window.
///
/// The byte total, frame count and window start are always reset together.
#[derive(Debug, Clone)]
pub struct ThroughputSampler {
    window: NonZeroU32,
    frames: u32,
    bytes: u64,
    window_start: Instant,
    completed_at: Option<Instant>,
    /// Closed windows not yet handed out, oldest first
    pending: VecDeque<ThroughputReport>,
}

impl ThroughputSampler {
    /// Create a sampler whose first window starts now.
    pub fn new(window: NonZeroU32) -> Self {
        Self::starting_at(window, Instant::now())
    }

    /// Create a sampler whose first window starts at `start` (useful for testing).
    pub fn starting_at(window: NonZeroU32, start: Instant) -> Self {
        Self {
            window,
            frames: 0,
            bytes: 0,
            window_start: start,
            completed_at: None,
            pending: VecDeque::new(),
        }
    }

    /// Window size in frames.
    pub fn window(&self) -> u32 {
        self.window.get()
    }

    /// Frames accumulated in the current window.
    pub fn frames_in_window(&self) -> u32 {
        self.frames
    }

    /// Bytes accumulated in the current window.
    pub fn bytes_in_window(&self) -> u64 {
        self.bytes
    }

    /// Record one frame received now.
    ///
    /// Returns `true` exactly when this frame completes the window.
    pub fn on_frame(&mut self, byte_size: usize) -> bool {
        self.on_frame_at(Instant::now(), byte_size)
    }

    /// Record one frame with an explicit timestamp.
    pub fn on_frame_at(&mut self, when: Instant, byte_size: usize) -> bool {
        if let Some(completed_at) = self.completed_at {
            // frames past the boundary belong to the next window
            let report = self.close_window(completed_at);
            self.pending.push_back(report);
        }

        self.frames += 1;
        self.bytes += byte_size as u64;

        if self.frames >= self.window.get() {
            self.completed_at = Some(when);
            true
        } else {
            false
        }
    }

    /// Return the report for the oldest completed window not yet collected,
    /// starting the next window at the completion instant. Returns `None`
    /// mid-window.
    pub fn report_if_complete(&mut self) -> Option<ThroughputReport> {
        if let Some(report) = self.pending.pop_front() {
            return Some(report);
        }
        let completed_at = self.completed_at?;
        Some(self.close_window(completed_at))
    }

    /// Completed windows waiting to be collected.
    pub fn pending_reports(&self) -> usize {
        self.pending.len() + usize::from(self.completed_at.is_some())
    }

    fn close_window(&mut self, completed_at: Instant) -> ThroughputReport {
        let mut elapsed = completed_at.saturating_duration_since(self.window_start);
        if elapsed.is_zero() {
            elapsed = Duration::from_micros(1);
        }

        let frames = self.frames;
        let report = ThroughputReport {
            fps: frames as f64 / elapsed.as_secs_f64(),
            mean_bytes: self.bytes as f64 / frames as f64,
            frames,
            elapsed,
        };

        self.start_window(completed_at);
        report
    }

    /// Discard the partial window without reporting.
    ///
    /// Windows that already completed are still reported.
    pub fn reset(&mut self) {
        self.reset_at(Instant::now());
    }

    /// Discard the partial window; the next window starts at `start`.
    pub fn reset_at(&mut self, start: Instant) {
        if let Some(completed_at) = self.completed_at {
            let report = self.close_window(completed_at);
            self.pending.push_back(report);
        }
        self.start_window(start);
    }

    fn start_window(&mut self, start: Instant) {
        self.frames = 0;
        self.bytes = 0;
        self.window_start = start;
        self.completed_at = None;
    }
}

impl Default for ThroughputSampler {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn window(n: u32) -> NonZeroU32 {
        NonZeroU32::new(n).unwrap()
    }

    #[test]
    fn thirty_fps_window() {
        let t0 = Instant::now();
        let mut sampler = ThroughputSampler::starting_at(window(300), t0);
        let dt = Duration::from_secs_f64(1.0 / 30.0);

        for i in 1..300u32 {
            assert!(!sampler.on_frame_at(t0 + dt * i, 10_000));
            assert!(sampler.report_if_complete().is_none());
        }
        assert!(sampler.on_frame_at(t0 + dt * 300, 10_000));

        let report = sampler.report_if_complete().expect("window should be complete");
        assert!((report.fps - 30.0).abs() < 1e-6, "fps = {}", report.fps);
        assert_eq!(report.mean_bytes, 10_000.0);
        assert_eq!(report.frames, 300);
        assert_eq!(report.to_string(), "fps: 30.0, mean data read size: 10000.0");

        assert_eq!(sampler.frames_in_window(), 0);
        assert_eq!(sampler.bytes_in_window(), 0);
        assert!(sampler.report_if_complete().is_none(), "report is emitted once");
    }

    #[test]
    fn next_window_starts_at_completion() {
        let t0 = Instant::now();
        let mut sampler = ThroughputSampler::starting_at(window(2), t0);
        sampler.on_frame_at(t0 + Duration::from_secs(1), 1);
        sampler.on_frame_at(t0 + Duration::from_secs(2), 1);
        sampler.report_if_complete().unwrap();

        sampler.on_frame_at(t0 + Duration::from_secs(3), 1);
        sampler.on_frame_at(t0 + Duration::from_secs(6), 1);
        let report = sampler.report_if_complete().unwrap();
        assert_eq!(report.elapsed, Duration::from_secs(4));
        assert!((report.fps - 0.5).abs() < 1e-9);
    }

    #[test]
    fn reset_discards_partial_window() {
        let t0 = Instant::now();
        let mut sampler = ThroughputSampler::starting_at(window(4), t0);
        sampler.on_frame_at(t0 + Duration::from_secs(1), 999_999);
        sampler.on_frame_at(t0 + Duration::from_secs(2), 999_999);

        let t_reset = t0 + Duration::from_secs(100);
        sampler.reset_at(t_reset);
        assert_eq!(sampler.frames_in_window(), 0);
        assert!(sampler.report_if_complete().is_none());

        for i in 1..=4u32 {
            sampler.on_frame_at(t_reset + Duration::from_millis(250) * i, 100);
        }
        let report = sampler.report_if_complete().unwrap();
        assert_eq!(report.mean_bytes, 100.0);
        assert!((report.fps - 4.0).abs() < 1e-9);
    }

    #[test]
    fn late_poll_still_reports_every_window() {
        let t0 = Instant::now();
        let mut sampler = ThroughputSampler::starting_at(window(2), t0);
        sampler.on_frame_at(t0 + Duration::from_secs(1), 800);
        assert!(sampler.on_frame_at(t0 + Duration::from_secs(2), 1000));
        // not collected before the next frame arrives
        assert!(!sampler.on_frame_at(t0 + Duration::from_secs(3), 10));
        assert_eq!(sampler.pending_reports(), 1);

        let first = sampler.report_if_complete().expect("first window");
        assert_eq!(first.mean_bytes, 900.0);
        assert!((first.fps - 1.0).abs() < 1e-9);
        assert_eq!(sampler.frames_in_window(), 1);

        assert!(sampler.on_frame_at(t0 + Duration::from_secs(4), 30));
        let second = sampler.report_if_complete().expect("second window");
        assert_eq!(second.mean_bytes, 20.0);
        assert_eq!(second.elapsed, Duration::from_secs(2));
        assert!(sampler.report_if_complete().is_none());
    }

    #[test]
    fn reset_keeps_a_completed_window() {
        let t0 = Instant::now();
        let mut sampler = ThroughputSampler::starting_at(window(2), t0);
        sampler.on_frame_at(t0 + Duration::from_secs(1), 100);
        sampler.on_frame_at(t0 + Duration::from_secs(2), 300);

        sampler.reset_at(t0 + Duration::from_secs(5));
        assert_eq!(sampler.frames_in_window(), 0);
        assert_eq!(sampler.pending_reports(), 1);

        let report = sampler.report_if_complete().unwrap();
        assert_eq!(report.frames, 2);
        assert_eq!(report.mean_bytes, 200.0);
        assert_eq!(report.elapsed, Duration::from_secs(2));
        assert!(sampler.report_if_complete().is_none());
    }

    #[test]
    fn uncollected_windows_queue_in_order() {
        let t0 = Instant::now();
        let mut sampler = ThroughputSampler::starting_at(window(1), t0);
        for (i, size) in [10usize, 20, 30].into_iter().enumerate() {
            assert!(sampler.on_frame_at(t0 + Duration::from_secs(i as u64 + 1), size));
        }
        assert_eq!(sampler.pending_reports(), 3);

        let means: Vec<f64> =
            std::iter::from_fn(|| sampler.report_if_complete()).map(|r| r.mean_bytes).collect();
        assert_eq!(means, vec![10.0, 20.0, 30.0]);
        assert_eq!(sampler.pending_reports(), 0);
    }

    #[test]
    fn zero_elapsed_does_not_divide_by_zero() {
        let t0 = Instant::now();
        let mut sampler = ThroughputSampler::starting_at(window(1), t0);
        sampler.on_frame_at(t0, 5);
        let report = sampler.report_if_complete().unwrap();
        assert!(report.fps.is_finite());
    }

    proptest! {
        #[test]
        fn uniform_spacing_gives_inverse_interval(
            window_size in 1u32..500,
            dt_ms in 1u64..200,
            sizes in prop::collection::vec(0usize..2_000_000, 500),
        ) {
            let t0 = Instant::now();
            let dt = Duration::from_millis(dt_ms);
            let mut sampler = ThroughputSampler::starting_at(window(window_size), t0);

            let fed = &sizes[..window_size as usize];
            for (i, size) in fed.iter().enumerate() {
                let complete = sampler.on_frame_at(t0 + dt * (i as u32 + 1), *size);
                prop_assert_eq!(complete, i as u32 + 1 == window_size);
            }

            let report = sampler.report_if_complete().unwrap();
            let expected_fps = 1000.0 / dt_ms as f64;
            prop_assert!((report.fps - expected_fps).abs() < 1e-6 * expected_fps);

            let mean = fed.iter().map(|s| *s as f64).sum::<f64>() / window_size as f64;
            prop_assert!((report.mean_bytes - mean).abs() < 1e-6 * mean.max(1.0));
        }

        #[test]
        fn stats_after_reset_ignore_earlier_frames(
            before in prop::collection::vec(0usize..1_000_000, 0..20),
            after in 1usize..100,
        ) {
            let t0 = Instant::now();
            let mut sampler = ThroughputSampler::starting_at(window(20), t0);
            for (i, size) in before.iter().take(19).enumerate() {
                sampler.on_frame_at(t0 + Duration::from_millis(i as u64 + 1), *size);
            }
            let t_reset = t0 + Duration::from_secs(60);
            sampler.reset_at(t_reset);
            for i in 1..=20u32 {
                sampler.on_frame_at(t_reset + Duration::from_millis(100) * i, after);
            }
            let report = sampler.report_if_complete().unwrap();
            prop_assert_eq!(report.mean_bytes, after as f64);
            prop_assert!((report.fps - 10.0).abs() < 1e-9);
        }
    }
}
