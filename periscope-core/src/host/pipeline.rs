//! Host-side capture → encode → transmit loop.
//!
//! Runs once per session on its own Tokio task: capture the screen
//! (with fallback), skip quiet frames, JPEG-encode at the adaptive
//! quality, frame per the screen-channel wire format, and pace to the
//! target interval. A send failure terminates the pipeline for that
//! session; it never retries mid-stream.

use std::time::Instant;

use bytes::Bytes;
use futures::SinkExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use crate::error::PeriscopeError;
use crate::host::capture::FallbackCapturer;
use crate::host::encode::{ChangeDetector, encode_jpeg};
use crate::quality::{QualityController, QualityState};
use crate::wire::FrameCodec;

// ── CaptureConfig ────────────────────────────────────────────────

/// Tunables for the capture pipeline.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Target frames per second the loop paces itself to.
    pub target_fps: u32,
    /// Fraction of changed pixels required to transmit (0.0..=1.0).
    pub change_threshold: f64,
    /// Initial JPEG quality.
    pub initial_quality: u8,
    /// Quality floor.
    pub min_quality: u8,
    /// Quality ceiling.
    pub max_quality: u8,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            target_fps: 20,
            change_threshold: 0.05,
            initial_quality: 70,
            min_quality: crate::quality::MIN_QUALITY,
            max_quality: crate::quality::MAX_QUALITY,
        }
    }
}

// ── CapturePipeline ──────────────────────────────────────────────

/// Per-session screen streaming pipeline.
///
/// Owns its capturer, change detector, quality controller, and the
/// screen-channel connection; nothing here is shared across sessions.
pub struct CapturePipeline<S> {
    channel: Framed<S, FrameCodec>,
    capturer: FallbackCapturer,
    detector: ChangeDetector,
    controller: QualityController,
    cancel: CancellationToken,
}

impl<S> CapturePipeline<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(
        stream: S,
        capturer: FallbackCapturer,
        config: CaptureConfig,
        cancel: CancellationToken,
    ) -> Self {
        let state = QualityState::new(
            config.initial_quality,
            config.min_quality,
            config.max_quality,
            config.target_fps,
        );
        Self {
            channel: Framed::new(stream, FrameCodec),
            capturer,
            detector: ChangeDetector::new(config.change_threshold),
            controller: QualityController::new(state),
            cancel,
        }
    }

    /// Current encode quality (exposed for diagnostics).
    pub fn quality(&self) -> u8 {
        self.controller.quality()
    }

    /// Signal the pipeline to stop. Idempotent.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Run the capture loop until cancelled or the connection breaks.
    pub async fn run(&mut self) -> Result<(), PeriscopeError> {
        tracing::debug!("capture pipeline started");

        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            let started = Instant::now();

            let image = self.capturer.capture();

            if self.detector.significant_change(&image) {
                match encode_jpeg(&image, self.controller.quality()) {
                    Ok(jpeg) => {
                        let sent = jpeg.len();
                        let send = self.channel.send(Bytes::from(jpeg));
                        tokio::select! {
                            _ = self.cancel.cancelled() => break,
                            result = send => result?,
                        }

                        if let Some(stats) = self.controller.record_frame(started.elapsed(), sent)
                        {
                            tracing::info!(
                                fps = format_args!("{:.1}", stats.fps),
                                kbps = format_args!(
                                    "{:.1}",
                                    stats.bandwidth_bytes_per_sec / 1024.0
                                ),
                                quality = stats.quality,
                                "capture throughput"
                            );
                        }
                    }
                    // A single bad frame is dropped; the loop continues.
                    Err(e) => tracing::error!("frame encode failed: {e}"),
                }
            }

            // Pace to the target interval; never sleep negative time.
            let elapsed = started.elapsed();
            let interval = self.controller.target_interval();
            if elapsed < interval {
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval - elapsed) => {}
                }
            } else {
                // Give the scheduler a chance even when overrunning.
                tokio::task::yield_now().await;
            }
        }

        tracing::debug!("capture pipeline stopped");
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────
