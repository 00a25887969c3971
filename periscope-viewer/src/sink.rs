//! Default frame sink.
//!
//! A windowing toolkit plugs in through `periscope_core::FrameSink`;
//! the shipped sink just accounts for what arrives so the full
//! receive path can be exercised headless.

use std::time::Instant;

use periscope_core::viewer::DisplayFrame;
use periscope_core::{FrameSink, PeriscopeError};

/// Counts rendered frames and logs a line once a second.
pub struct AccountingSink {
    surface: (u32, u32),
    frames: u64,
    last_report: Instant,
    window_frames: u32,
}

impl AccountingSink {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            surface: (width, height),
            frames: 0,
            last_report: Instant::now(),
            window_frames: 0,
        }
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }
}

impl FrameSink for AccountingSink {
    fn surface_size(&self) -> (u32, u32) {
        self.surface
    }

    fn render(&mut self, frame: DisplayFrame) -> Result<(), PeriscopeError> {
        self.frames += 1;
        self.window_frames += 1;
        let elapsed = self.last_report.elapsed();
        if elapsed.as_secs() >= 1 {
            tracing::info!(
                total = self.frames,
                fps = format_args!("{:.1}", f64::from(self.window_frames) / elapsed.as_secs_f64()),
                source = format_args!("{}x{}", frame.source_width, frame.source_height),
                display = format_args!("{}x{}", frame.image.width(), frame.image.height()),
                "rendering"
            );
            self.last_report = Instant::now();
            self.window_frames = 0;
        }
        Ok(())
    }
}
