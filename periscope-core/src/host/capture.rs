//! Screen capture collaborator seam.
//!
//! The protocol core never talks to a display subsystem directly; it
//! captures through the [`ScreenCapturer`] trait injected into the
//! pipeline. [`FallbackCapturer`] layers a secondary capturer and a
//! fixed placeholder underneath so the capture loop never stalls
//! indefinitely on a broken capture path.

use crate::error::PeriscopeError;

/// Placeholder dimensions when every capture path has failed.
const PLACEHOLDER_WIDTH: u32 = 800;
const PLACEHOLDER_HEIGHT: u32 = 600;

/// Consecutive primary failures before switching to the secondary
/// capturer for the rest of the session.
const PRIMARY_FAILURE_LIMIT: u32 = 3;

// ── ScreenImage ──────────────────────────────────────────────────

/// One uncompressed captured screen image, tightly packed RGB8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenImage {
    pub width: u32,
    pub height: u32,
    /// `width * height * 3` bytes, row-major RGB.
    pub data: Vec<u8>,
}

impl ScreenImage {
    /// Solid-color image, mostly useful for placeholders and tests.
    pub fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let mut data = Vec::with_capacity((width * height * 3) as usize);
        for _ in 0..width * height {
            data.extend_from_slice(&rgb);
        }
        Self {
            width,
            height,
            data,
        }
    }

    /// Fixed black image substituted when capture is entirely broken.
    pub fn placeholder() -> Self {
        Self::solid(PLACEHOLDER_WIDTH, PLACEHOLDER_HEIGHT, [0, 0, 0])
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

// ── ScreenCapturer ───────────────────────────────────────────────

/// Host screen capture collaborator.
///
/// Implementations are synchronous local I/O bounded by platform
/// latency, not network latency.
pub trait ScreenCapturer: Send {
    fn capture(&mut self) -> Result<ScreenImage, PeriscopeError>;
}

impl<F> ScreenCapturer for F
where
    F: FnMut() -> Result<ScreenImage, PeriscopeError> + Send,
{
    fn capture(&mut self) -> Result<ScreenImage, PeriscopeError> {
        self()
    }
}

// ── FallbackCapturer ─────────────────────────────────────────────

/// Primary capturer with a secondary fallback and a placeholder of
/// last resort.
///
/// Repeated primary failure switches to the secondary permanently for
/// this session; if the active path fails on a given frame the
/// placeholder image is substituted so the loop keeps pacing.
pub struct FallbackCapturer {
    primary: Box<dyn ScreenCapturer>,
    secondary: Option<Box<dyn ScreenCapturer>>,
    primary_failures: u32,
    on_secondary: bool,
}

impl FallbackCapturer {
    pub fn new(primary: Box<dyn ScreenCapturer>, secondary: Option<Box<dyn ScreenCapturer>>) -> Self {
        Self {
            primary,
            secondary,
            primary_failures: 0,
            on_secondary: false,
        }
    }

    /// Capture one frame. Never fails: errors degrade to the
    /// secondary capturer, then to the placeholder.
    pub fn capture(&mut self) -> ScreenImage {
        if !self.on_secondary {
            match self.primary.capture() {
                Ok(image) => {
                    self.primary_failures = 0;
                    return image;
                }
                Err(e) => {
                    self.primary_failures += 1;
                    tracing::error!(
                        failures = self.primary_failures,
                        "primary capture failed: {e}"
                    );
                    if self.primary_failures >= PRIMARY_FAILURE_LIMIT && self.secondary.is_some() {
                        tracing::warn!("switching to secondary capture path");
                        self.on_secondary = true;
                    }
                }
            }
        }

        if self.on_secondary
            && let Some(secondary) = self.secondary.as_mut()
        {
            match secondary.capture() {
                Ok(image) => return image,
                Err(e) => tracing::error!("secondary capture failed: {e}"),
            }
        }

        ScreenImage::placeholder()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_capturer(rgb: [u8; 3]) -> Box<dyn ScreenCapturer> {
        Box::new(move || Ok(ScreenImage::solid(4, 4, rgb)))
    }

    fn broken_capturer() -> Box<dyn ScreenCapturer> {
        Box::new(|| Err(PeriscopeError::Capture("no display".into())))
    }

    #[test]
    fn healthy_primary_is_used() {
        let mut cap = FallbackCapturer::new(ok_capturer([1, 2, 3]), Some(ok_capturer([9, 9, 9])));
        let img = cap.capture();
        assert_eq!(&img.data[..3], &[1, 2, 3]);
    }

    #[test]
    fn repeated_primary_failure_switches_to_secondary() {
        let mut cap = FallbackCapturer::new(broken_capturer(), Some(ok_capturer([7, 7, 7])));

        // First failures fall back to the placeholder for that frame.
        let img = cap.capture();
        assert_eq!((img.width, img.height), (800, 600));

        // After the failure limit the secondary takes over.
        cap.capture();
        let img = cap.capture();
        assert_eq!(&img.data[..3], &[7, 7, 7]);
    }

    #[test]
    fn both_paths_broken_yields_placeholder() {
        let mut cap = FallbackCapturer::new(broken_capturer(), Some(broken_capturer()));
        for _ in 0..5 {
            let img = cap.capture();
            assert_eq!((img.width, img.height), (800, 600));
            assert!(img.data.iter().all(|&b| b == 0));
        }
    }

    #[test]
    fn no_secondary_yields_placeholder() {
        let mut cap = FallbackCapturer::new(broken_capturer(), None);
        let img = cap.capture();
        assert_eq!((img.width, img.height), (800, 600));
    }
}
