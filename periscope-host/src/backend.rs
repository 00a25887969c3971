//! Default host collaborators.
//!
//! Real platform capture and injection are external collaborators
//! wired in by the embedder. The binary ships a moving test-pattern
//! capturer and a log-only injection backend so the full wire path
//! can be exercised without OS integration.

use periscope_core::{InputBackend, PeriscopeError, ScreenCapturer, ScreenImage};

const PATTERN_WIDTH: u32 = 1280;
const PATTERN_HEIGHT: u32 = 720;

/// Diagonal gradient that drifts one step per frame, so every frame
/// registers as a significant change and the adaptive-quality path
/// stays busy.
pub struct TestPatternCapturer {
    tick: u32,
}

impl TestPatternCapturer {
    pub fn new() -> Self {
        Self { tick: 0 }
    }
}

impl Default for TestPatternCapturer {
    fn default() -> Self {
        Self::new()
    }
}

impl ScreenCapturer for TestPatternCapturer {
    fn capture(&mut self) -> Result<ScreenImage, PeriscopeError> {
        self.tick = self.tick.wrapping_add(4);
        let mut data = Vec::with_capacity((PATTERN_WIDTH * PATTERN_HEIGHT * 3) as usize);
        for y in 0..PATTERN_HEIGHT {
            for x in 0..PATTERN_WIDTH {
                let shade = ((x + y + self.tick) % 256) as u8;
                data.extend_from_slice(&[shade, shade / 2, 255 - shade]);
            }
        }
        Ok(ScreenImage {
            width: PATTERN_WIDTH,
            height: PATTERN_HEIGHT,
            data,
        })
    }
}

/// Injection backend that records events to the log instead of the
/// OS input stream.
pub struct LoggingBackend {
    width: u32,
    height: u32,
}

impl LoggingBackend {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for LoggingBackend {
    fn default() -> Self {
        Self::new(PATTERN_WIDTH, PATTERN_HEIGHT)
    }
}

impl InputBackend for LoggingBackend {
    fn screen_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
    fn mouse_move(&mut self, x: i32, y: i32) -> Result<(), PeriscopeError> {
        tracing::info!(x, y, "inject mouse move");
        Ok(())
    }
    fn mouse_button(&mut self, button: i32, pressed: bool) -> Result<(), PeriscopeError> {
        tracing::info!(button, pressed, "inject mouse button");
        Ok(())
    }
    fn mouse_wheel(&mut self, delta: i32) -> Result<(), PeriscopeError> {
        tracing::info!(delta, "inject mouse wheel");
        Ok(())
    }
    fn key(&mut self, name: &str, pressed: bool) -> Result<(), PeriscopeError> {
        tracing::info!(key = %name, pressed, "inject key");
        Ok(())
    }
}
