//! Frame change detection and JPEG encoding.
//!
//! Frames are independently compressed images, not motion-compensated
//! video: each transmitted frame is a complete JPEG at the current
//! quality setting. Change detection decides whether a capture is
//! worth sending at all.

use image::codecs::jpeg::JpegEncoder;

use crate::error::PeriscopeError;
use crate::host::capture::ScreenImage;

/// A pixel counts as changed when any channel differs by more than this.
const CHANNEL_DELTA: u8 = 30;

// ── Encoding ─────────────────────────────────────────────────────

/// Compress an image as JPEG at the given quality (1..=100).
pub fn encode_jpeg(image: &ScreenImage, quality: u8) -> Result<Vec<u8>, PeriscopeError> {
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100)).encode(
        &image.data,
        image.width,
        image.height,
        image::ExtendedColorType::Rgb8,
    )?;
    Ok(out)
}

// ── ChangeDetector ───────────────────────────────────────────────

/// Coarse pixel-difference change detection against the previously
/// transmitted frame.
///
/// A frame is transmitted only when the fraction of pixels with any
/// channel differing by more than [`CHANNEL_DELTA`] reaches the
/// configured threshold; otherwise it is skipped entirely and the
/// previous frame remains valid on the remote side.
pub struct ChangeDetector {
    last: Option<ScreenImage>,
    /// Fraction of changed pixels (0.0..=1.0) needed to transmit.
    threshold: f64,
}

impl ChangeDetector {
    pub fn new(threshold: f64) -> Self {
        Self {
            last: None,
            threshold: threshold.clamp(0.0, 1.0),
        }
    }

    /// Whether `current` differs enough from the last transmitted
    /// frame to warrant sending. Updates the reference frame only when
    /// the answer is yes.
    pub fn significant_change(&mut self, current: &ScreenImage) -> bool {
        let Some(last) = &self.last else {
            self.last = Some(current.clone());
            return true;
        };

        // Dimension changes are always a full change.
        if last.width != current.width || last.height != current.height {
            self.last = Some(current.clone());
            return true;
        }

        let mut changed = 0usize;
        for (cur, prev) in current.data.chunks_exact(3).zip(last.data.chunks_exact(3)) {
            let differs = cur
                .iter()
                .zip(prev.iter())
                .any(|(a, b)| a.abs_diff(*b) > CHANNEL_DELTA);
            if differs {
                changed += 1;
            }
        }

        let fraction = changed as f64 / current.pixel_count().max(1) as f64;
        if fraction >= self.threshold {
            self.last = Some(current.clone());
            true
        } else {
            false
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_frame_always_transmits() {
        let mut det = ChangeDetector::new(0.05);
        assert!(det.significant_change(&ScreenImage::solid(8, 8, [0, 0, 0])));
    }

    #[test]
    fn identical_frame_is_skipped() {
        let mut det = ChangeDetector::new(0.05);
        let frame = ScreenImage::solid(8, 8, [10, 20, 30]);
        assert!(det.significant_change(&frame));
        assert!(!det.significant_change(&frame));
    }

    #[test]
    fn sub_threshold_noise_is_skipped() {
        let mut det = ChangeDetector::new(0.05);
        let frame = ScreenImage::solid(10, 10, [100, 100, 100]);
        assert!(det.significant_change(&frame));

        // Change 2 of 100 pixels hard: 2% < 5% threshold.
        let mut noisy = frame.clone();
        noisy.data[0] = 255;
        noisy.data[3] = 255;
        assert!(!det.significant_change(&noisy));

        // Small per-channel jitter below the delta never counts.
        let mut jitter = frame.clone();
        for b in jitter.data.iter_mut() {
            *b += 20; // within CHANNEL_DELTA
        }
        assert!(!det.significant_change(&jitter));
    }

    #[test]
    fn large_change_transmits_and_rebases() {
        let mut det = ChangeDetector::new(0.05);
        assert!(det.significant_change(&ScreenImage::solid(8, 8, [0, 0, 0])));
        let white = ScreenImage::solid(8, 8, [255, 255, 255]);
        assert!(det.significant_change(&white));
        // The reference moved to white, so white is now quiet.
        assert!(!det.significant_change(&white));
    }

    #[test]
    fn dimension_change_always_transmits() {
        let mut det = ChangeDetector::new(0.05);
        assert!(det.significant_change(&ScreenImage::solid(8, 8, [0, 0, 0])));
        assert!(det.significant_change(&ScreenImage::solid(16, 8, [0, 0, 0])));
    }

    #[test]
    fn jpeg_encode_produces_decodable_payload() {
        let frame = ScreenImage::solid(32, 16, [200, 40, 10]);
        let jpeg = encode_jpeg(&frame, 70).unwrap();
        assert!(!jpeg.is_empty());

        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!(decoded.width(), 32);
        assert_eq!(decoded.height(), 16);
    }

    #[test]
    fn lower_quality_is_not_larger() {
        // Use a noisy image so quality actually matters.
        let mut frame = ScreenImage::solid(64, 64, [0, 0, 0]);
        for (i, b) in frame.data.iter_mut().enumerate() {
            *b = ((i * 2654435761) % 251) as u8;
        }
        let high = encode_jpeg(&frame, 95).unwrap();
        let low = encode_jpeg(&frame, 20).unwrap();
        assert!(low.len() <= high.len());
    }
}
