//! Adaptive encode-quality control.
//!
//! Each side of a session owns its own [`QualityState`]: the host
//! adapts to measured frame times against the target interval, the
//! viewer to its observed decode rate. The two loops are deliberately
//! uncoordinated; the wire protocol carries no quality feedback.

use std::time::{Duration, Instant};

/// Default JPEG quality floor.
pub const MIN_QUALITY: u8 = 20;
/// Default JPEG quality ceiling.
pub const MAX_QUALITY: u8 = 95;
/// Fixed adjustment step.
const QUALITY_STEP: u8 = 5;
/// Frames between adjustment evaluations.
const ADJUST_EVERY_FRAMES: u64 = 30;
/// Minimum window before measurements are trusted.
const WINDOW: Duration = Duration::from_secs(3);

// ── QualityState ─────────────────────────────────────────────────

/// Current encode quality with its bounds and pacing target.
///
/// Single-writer: owned by the pipeline that reads its own
/// throughput. Quality never leaves `[min, max]` regardless of the
/// measurement history.
#[derive(Debug, Clone)]
pub struct QualityState {
    quality: u8,
    min: u8,
    max: u8,
    target_interval: Duration,
}

impl QualityState {
    pub fn new(initial: u8, min: u8, max: u8, target_fps: u32) -> Self {
        let target_fps = target_fps.max(1);
        Self {
            quality: initial.clamp(min, max),
            min,
            max,
            target_interval: Duration::from_secs_f64(1.0 / target_fps as f64),
        }
    }

    /// Conventional defaults: quality 70 in [20, 95] at 20 fps.
    pub fn with_target_fps(target_fps: u32) -> Self {
        Self::new(70, MIN_QUALITY, MAX_QUALITY, target_fps)
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Interval the capture loop paces itself to.
    pub fn target_interval(&self) -> Duration {
        self.target_interval
    }

    /// Host-side adjustment from a measured mean frame time.
    ///
    /// Reduce one step when frames take longer than 80% of the target
    /// interval; increase one step when comfortably under half of it.
    pub fn apply_frame_time(&mut self, mean_frame_time: Duration) {
        let budget = self.target_interval.mul_f64(0.8);
        if mean_frame_time > budget {
            self.quality = self.quality.saturating_sub(QUALITY_STEP).max(self.min);
        } else if mean_frame_time < self.target_interval.mul_f64(0.5) {
            self.quality = self.quality.saturating_add(QUALITY_STEP).min(self.max);
        }
    }

    /// Viewer-side adjustment from observed frames-per-second against
    /// a target rate.
    pub fn apply_fps(&mut self, fps: f64, target_fps: f64) {
        if fps < target_fps * 0.8 {
            self.quality = self.quality.saturating_sub(QUALITY_STEP).max(self.min);
        } else if fps > target_fps * 1.2 {
            self.quality = self.quality.saturating_add(QUALITY_STEP).min(self.max);
        }
    }
}

// ── QualityController ────────────────────────────────────────────

/// Windowed measurement wrapper around [`QualityState`] for the
/// capture loop: accumulates frame times and sent bytes, evaluates
/// every 30 frames once at least a 3-second window has elapsed.
#[derive(Debug)]
pub struct QualityController {
    state: QualityState,
    frame_count: u64,
    window_start: Instant,
    window_frames: u64,
    window_bytes: u64,
    window_frame_time: Duration,
}

/// Telemetry emitted when an adjustment window closes.
#[derive(Debug, Clone, Copy)]
pub struct WindowStats {
    pub fps: f64,
    pub bandwidth_bytes_per_sec: f64,
    pub quality: u8,
}

impl QualityController {
    pub fn new(state: QualityState) -> Self {
        Self {
            state,
            frame_count: 0,
            window_start: Instant::now(),
            window_frames: 0,
            window_bytes: 0,
            window_frame_time: Duration::ZERO,
        }
    }

    pub fn quality(&self) -> u8 {
        self.state.quality()
    }

    pub fn target_interval(&self) -> Duration {
        self.state.target_interval()
    }

    /// Record one transmitted frame. Returns window telemetry when an
    /// adjustment was evaluated.
    pub fn record_frame(&mut self, frame_time: Duration, sent_bytes: usize) -> Option<WindowStats> {
        self.frame_count += 1;
        self.window_frames += 1;
        self.window_bytes += sent_bytes as u64;
        self.window_frame_time += frame_time;

        if self.frame_count % ADJUST_EVERY_FRAMES != 0 {
            return None;
        }
        let elapsed = self.window_start.elapsed();
        if elapsed < WINDOW {
            return None;
        }

        let mean = self.window_frame_time / self.window_frames.max(1) as u32;
        self.state.apply_frame_time(mean);

        let stats = WindowStats {
            fps: self.window_frames as f64 / elapsed.as_secs_f64(),
            bandwidth_bytes_per_sec: self.window_bytes as f64 / elapsed.as_secs_f64(),
            quality: self.state.quality(),
        };

        self.window_start = Instant::now();
        self.window_frames = 0;
        self.window_bytes = 0;
        self.window_frame_time = Duration::ZERO;

        Some(stats)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slow_frames_reduce_quality() {
        let mut q = QualityState::with_target_fps(20); // 50 ms interval
        let before = q.quality();
        q.apply_frame_time(Duration::from_millis(45)); // > 80% of 50 ms
        assert_eq!(q.quality(), before - 5);
    }

    #[test]
    fn fast_frames_raise_quality() {
        let mut q = QualityState::new(50, 20, 95, 20);
        q.apply_frame_time(Duration::from_millis(10)); // < half interval
        assert_eq!(q.quality(), 55);
    }

    #[test]
    fn middling_frames_hold_quality() {
        let mut q = QualityState::with_target_fps(20);
        let before = q.quality();
        q.apply_frame_time(Duration::from_millis(30)); // between 50% and 80%
        assert_eq!(q.quality(), before);
    }

    #[test]
    fn quality_stays_within_bounds_under_arbitrary_history() {
        let mut q = QualityState::new(70, 20, 95, 20);

        // Hammer downward far past the floor.
        for _ in 0..100 {
            q.apply_frame_time(Duration::from_millis(500));
        }
        assert_eq!(q.quality(), 20);

        // Hammer upward far past the ceiling.
        for _ in 0..100 {
            q.apply_frame_time(Duration::from_millis(1));
        }
        assert_eq!(q.quality(), 95);

        // Mixed arbitrary sequence never escapes the bounds.
        for i in 0..1000u64 {
            let ms = (i * 7919) % 200;
            q.apply_frame_time(Duration::from_millis(ms));
            assert!((20..=95).contains(&q.quality()));
        }
    }

    #[test]
    fn fps_adjustment_is_symmetric() {
        let mut q = QualityState::new(50, 20, 95, 20);
        q.apply_fps(10.0, 20.0); // well below target
        assert_eq!(q.quality(), 45);
        q.apply_fps(30.0, 20.0); // well above target
        assert_eq!(q.quality(), 50);
        q.apply_fps(20.0, 20.0); // on target: hold
        assert_eq!(q.quality(), 50);
    }

    #[test]
    fn controller_waits_for_full_window() {
        let mut ctrl = QualityController::new(QualityState::with_target_fps(20));
        // 30 frames arrive instantly: window too short, no adjustment.
        for _ in 0..30 {
            assert!(ctrl.record_frame(Duration::from_millis(5), 1000).is_none());
        }
    }
}
