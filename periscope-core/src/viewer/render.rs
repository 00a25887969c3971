//! Viewer-side frame receive and render pipeline.
//!
//! Pulls length-prefixed JPEG frames off the screen channel, decodes
//! and scales them for the sink surface, and smooths delivery through
//! a small jitter buffer. A stalled or broken connection is retried a
//! bounded number of times before the session is marked failed.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use futures::StreamExt;
use image::DynamicImage;
use image::imageops::FilterType;
use tokio::io::AsyncRead;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;

use crate::error::PeriscopeError;
use crate::quality::QualityState;
use crate::wire::FrameCodec;

/// No frame for this long marks the connection stalled.
pub const STALL_THRESHOLD: Duration = Duration::from_secs(5);

/// Reconnection attempts after a stall or transport loss.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Fixed backoff between reconnection attempts.
pub const RECONNECT_BACKOFF: Duration = Duration::from_secs(2);

/// Telemetry window for received FPS and latency.
const STATS_WINDOW: Duration = Duration::from_secs(3);

/// Largest jitter buffer the pipeline will hold.
const MAX_JITTER_DEPTH: usize = 10;

// ── FrameSink ────────────────────────────────────────────────────

/// A decoded frame ready for presentation.
#[derive(Debug, Clone)]
pub struct DisplayFrame {
    pub image: DynamicImage,
    /// Dimensions as transmitted, before surface scaling.
    pub source_width: u32,
    pub source_height: u32,
}

/// Presentation collaborator. The core hands over decoded, scaled
/// frames; what "render" means (blit, write, discard) is the sink's
/// business.
pub trait FrameSink: Send {
    /// Current surface dimensions frames should be scaled to.
    fn surface_size(&self) -> (u32, u32);
    fn render(&mut self, frame: DisplayFrame) -> Result<(), PeriscopeError>;
}

/// Scale a decoded frame to fit the surface, preserving aspect ratio.
///
/// Shrinking uses Lanczos3. Growing only happens when the surface is
/// materially larger and the source is small enough that upscaling
/// beats letterboxing; CatmullRom keeps that path cheap.
pub fn scale_to_fit(image: &DynamicImage, surface: (u32, u32)) -> DynamicImage {
    let (sw, sh) = surface;
    let (w, h) = (image.width(), image.height());
    if w == 0 || h == 0 || sw == 0 || sh == 0 {
        return image.clone();
    }
    let ratio = (sw as f64 / w as f64).min(sh as f64 / h as f64);
    let target = |r: f64| {
        (
            ((w as f64 * r) as u32).max(1),
            ((h as f64 * r) as u32).max(1),
        )
    };
    if ratio < 1.0 {
        let (tw, th) = target(ratio);
        image.resize_exact(tw, th, FilterType::Lanczos3)
    } else if ratio > 1.1 && w.max(h) < 800 {
        let (tw, th) = target(ratio);
        image.resize_exact(tw, th, FilterType::CatmullRom)
    } else {
        image.clone()
    }
}

// ── JitterBuffer ─────────────────────────────────────────────────

/// Bounded frame queue that trades latency for smoothness.
///
/// Depth 0 or 1 passes frames straight through. Deeper buffers hold
/// frames back until full, then release the oldest per push.
pub struct JitterBuffer {
    frames: VecDeque<DisplayFrame>,
    depth: usize,
}

impl JitterBuffer {
    pub fn new(depth: usize) -> Self {
        Self {
            frames: VecDeque::new(),
            depth: depth.min(MAX_JITTER_DEPTH),
        }
    }

    /// Insert a frame; returns the frame to display now, if any.
    pub fn push(&mut self, frame: DisplayFrame) -> Option<DisplayFrame> {
        if self.depth <= 1 {
            return Some(frame);
        }
        self.frames.push_back(frame);
        if self.frames.len() >= self.depth {
            self.frames.pop_front()
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

// ── RenderPipeline ───────────────────────────────────────────────

/// Receive-side telemetry published each stats window.
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderStats {
    pub fps: f64,
    /// Mean time to receive a full frame, averaged over the window.
    pub frame_latency: Duration,
    /// Display-side quality hint. Local only, never transmitted.
    pub quality_hint: u8,
}

/// How a single streaming attempt ended.
#[derive(Debug, PartialEq, Eq)]
pub enum StreamEnd {
    Cancelled,
    Closed,
    Stalled,
    /// The transport dropped the connection mid-stream.
    Lost,
}

/// Per-window receive accounting: frame count plus the summed time it
/// took to receive each full frame.
struct ReceiveWindow {
    start: Instant,
    frames: u32,
    receive_time: Duration,
}

impl ReceiveWindow {
    fn new() -> Self {
        Self {
            start: Instant::now(),
            frames: 0,
            receive_time: Duration::ZERO,
        }
    }

    fn record(&mut self, receive_time: Duration) {
        self.frames += 1;
        self.receive_time += receive_time;
    }

    /// Close the window once it has run long enough, yielding the
    /// observed fps and the mean per-frame receive time.
    fn close_if_due(&mut self, window: Duration) -> Option<(f64, Duration)> {
        let elapsed = self.start.elapsed();
        if elapsed < window || self.frames == 0 {
            return None;
        }
        let fps = self.frames as f64 / elapsed.as_secs_f64();
        let latency = self.receive_time / self.frames;
        *self = Self::new();
        Some((fps, latency))
    }
}

pub struct RenderPipeline<K> {
    sink: K,
    jitter: JitterBuffer,
    quality: QualityState,
    target_fps: u32,
    stats_tx: watch::Sender<RenderStats>,
    cancel: CancellationToken,
}

impl<K: FrameSink> RenderPipeline<K> {
    pub fn new(
        sink: K,
        jitter_depth: usize,
        target_fps: u32,
        cancel: CancellationToken,
    ) -> (Self, watch::Receiver<RenderStats>) {
        let (stats_tx, stats_rx) = watch::channel(RenderStats::default());
        (
            Self {
                sink,
                jitter: JitterBuffer::new(jitter_depth),
                quality: QualityState::with_target_fps(target_fps),
                target_fps,
                stats_tx,
                cancel,
            },
            stats_rx,
        )
    }

    /// Signal the pipeline to stop. Idempotent.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Stream from an established screen connection, reconnecting to
    /// `addr` on stall or loss until the attempt budget runs out.
    pub async fn run(
        &mut self,
        initial: TcpStream,
        addr: SocketAddr,
    ) -> Result<(), PeriscopeError> {
        let mut stream = Some(initial);
        let mut attempts = 0u32;
        loop {
            let conn = match stream.take() {
                Some(conn) => conn,
                None => match TcpStream::connect(addr).await {
                    Ok(conn) => {
                        tracing::info!(%addr, "screen channel reconnected");
                        conn
                    }
                    Err(e) => {
                        tracing::warn!(%addr, "reconnect failed: {e}");
                        attempts += 1;
                        if attempts > MAX_RECONNECT_ATTEMPTS {
                            return Err(PeriscopeError::ChannelClosed);
                        }
                        tokio::time::sleep(RECONNECT_BACKOFF).await;
                        continue;
                    }
                },
            };

            match self.stream_frames(conn).await? {
                StreamEnd::Cancelled => return Ok(()),
                end @ (StreamEnd::Closed | StreamEnd::Stalled | StreamEnd::Lost) => {
                    attempts += 1;
                    if attempts > MAX_RECONNECT_ATTEMPTS {
                        tracing::error!(?end, "reconnect attempts exhausted, session failed");
                        return Err(PeriscopeError::ChannelClosed);
                    }
                    tracing::warn!(
                        ?end,
                        attempt = attempts,
                        max = MAX_RECONNECT_ATTEMPTS,
                        "screen stream interrupted, retrying"
                    );
                    tokio::time::sleep(RECONNECT_BACKOFF).await;
                }
            }
        }
    }

    /// Drain one connection until it stalls, closes, is cancelled, or
    /// the transport drops. Sink errors are fatal; corrupt frames are
    /// skipped.
    pub async fn stream_frames<S>(&mut self, stream: S) -> Result<StreamEnd, PeriscopeError>
    where
        S: AsyncRead + Unpin,
    {
        let mut frames = FramedRead::new(stream, FrameCodec);
        let mut window = ReceiveWindow::new();

        loop {
            let read_start = Instant::now();
            let frame = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(StreamEnd::Cancelled),
                read = tokio::time::timeout(STALL_THRESHOLD, frames.next()) => match read {
                    Err(_) => {
                        tracing::warn!(threshold = ?STALL_THRESHOLD, "no frames, connection stalled");
                        return Ok(StreamEnd::Stalled);
                    }
                    Ok(None) => return Ok(StreamEnd::Closed),
                    Ok(Some(Err(e))) => {
                        tracing::warn!("screen stream transport error: {e}");
                        return Ok(StreamEnd::Lost);
                    }
                    Ok(Some(Ok(frame))) => frame,
                },
            };
            let receive_time = read_start.elapsed();

            let image = match image::load_from_memory(&frame) {
                Ok(image) => image,
                // One corrupt frame is skipped, the stream stays up.
                Err(e) => {
                    tracing::warn!(len = frame.len(), "undecodable frame skipped: {e}");
                    continue;
                }
            };

            let (source_width, source_height) = (image.width(), image.height());
            let scaled = scale_to_fit(&image, self.sink.surface_size());
            if let Some(display) = self.jitter.push(DisplayFrame {
                image: scaled,
                source_width,
                source_height,
            }) {
                self.sink.render(display)?;
            }

            window.record(receive_time);
            if let Some((fps, frame_latency)) = window.close_if_due(STATS_WINDOW) {
                self.quality.apply_fps(fps, self.target_fps as f64);
                let stats = RenderStats {
                    fps,
                    frame_latency,
                    quality_hint: self.quality.quality(),
                };
                tracing::debug!(
                    fps = format_args!("{:.1}", stats.fps),
                    latency_ms = stats.frame_latency.as_millis() as u64,
                    hint = stats.quality_hint,
                    "render window"
                );
                let _ = self.stats_tx.send(stats);
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{ScreenImage, encode_jpeg};
    use bytes::{BufMut, Bytes, BytesMut};
    use futures::SinkExt;
    use std::sync::{Arc, Mutex};
    use tokio_util::codec::FramedWrite;

    struct RecordingSink {
        surface: (u32, u32),
        rendered: Arc<Mutex<Vec<(u32, u32)>>>,
    }

    impl FrameSink for RecordingSink {
        fn surface_size(&self) -> (u32, u32) {
            self.surface
        }
        fn render(&mut self, frame: DisplayFrame) -> Result<(), PeriscopeError> {
            self.rendered
                .lock()
                .unwrap()
                .push((frame.image.width(), frame.image.height()));
            Ok(())
        }
    }

    fn test_jpeg(width: u32, height: u32) -> Bytes {
        Bytes::from(encode_jpeg(&ScreenImage::solid(width, height, [10, 20, 30]), 80).unwrap())
    }

    #[test]
    fn scale_shrinks_to_surface() {
        let image = DynamicImage::new_rgb8(1600, 1200);
        let scaled = scale_to_fit(&image, (800, 800));
        assert_eq!((scaled.width(), scaled.height()), (800, 600));
    }

    #[test]
    fn scale_grows_small_images_only() {
        let small = DynamicImage::new_rgb8(400, 300);
        let grown = scale_to_fit(&small, (1200, 900));
        assert_eq!((grown.width(), grown.height()), (1200, 900));

        // Near-fit and large sources are left alone.
        let near = DynamicImage::new_rgb8(780, 580);
        let kept = scale_to_fit(&near, (800, 600));
        assert_eq!((kept.width(), kept.height()), (780, 580));
    }

    #[test]
    fn jitter_depth_one_is_passthrough() {
        let mut buffer = JitterBuffer::new(1);
        let frame = DisplayFrame {
            image: DynamicImage::new_rgb8(4, 4),
            source_width: 4,
            source_height: 4,
        };
        assert!(buffer.push(frame).is_some());
        assert!(buffer.is_empty());
    }

    #[test]
    fn jitter_holds_until_full_then_releases_oldest() {
        let mut buffer = JitterBuffer::new(3);
        let frame = |n: u32| DisplayFrame {
            image: DynamicImage::new_rgb8(n, 1),
            source_width: n,
            source_height: 1,
        };
        assert!(buffer.push(frame(1)).is_none());
        assert!(buffer.push(frame(2)).is_none());
        let released = buffer.push(frame(3)).unwrap();
        assert_eq!(released.image.width(), 1);
        assert_eq!(buffer.len(), 2);
    }

    #[tokio::test]
    async fn renders_received_frames_scaled() {
        let (host_io, viewer_io) = tokio::io::duplex(1 << 20);
        let rendered = Arc::new(Mutex::new(Vec::new()));
        let cancel = CancellationToken::new();
        let (mut pipeline, _stats) = RenderPipeline::new(
            RecordingSink {
                surface: (320, 240),
                rendered: rendered.clone(),
            },
            0,
            20,
            cancel.clone(),
        );

        let mut writer = FramedWrite::new(host_io, FrameCodec);
        writer.send(test_jpeg(640, 480)).await.unwrap();
        writer.send(test_jpeg(640, 480)).await.unwrap();
        drop(writer);

        let end = pipeline.stream_frames(viewer_io).await.unwrap();
        assert_eq!(end, StreamEnd::Closed);
        assert_eq!(rendered.lock().unwrap().as_slice(), &[(320, 240), (320, 240)]);
    }

    #[tokio::test]
    async fn corrupt_frame_skipped_stream_continues() {
        let (host_io, viewer_io) = tokio::io::duplex(1 << 20);
        let rendered = Arc::new(Mutex::new(Vec::new()));
        let (mut pipeline, _stats) = RenderPipeline::new(
            RecordingSink {
                surface: (64, 64),
                rendered: rendered.clone(),
            },
            0,
            20,
            CancellationToken::new(),
        );

        let mut writer = FramedWrite::new(host_io, FrameCodec);
        writer.send(Bytes::from_static(b"not a jpeg")).await.unwrap();
        writer.send(test_jpeg(64, 64)).await.unwrap();
        drop(writer);

        let end = pipeline.stream_frames(viewer_io).await.unwrap();
        assert_eq!(end, StreamEnd::Closed);
        assert_eq!(rendered.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn silence_reports_stall() {
        let (host_io, viewer_io) = tokio::io::duplex(1 << 16);
        let (mut pipeline, _stats) = RenderPipeline::new(
            RecordingSink {
                surface: (64, 64),
                rendered: Arc::new(Mutex::new(Vec::new())),
            },
            0,
            20,
            CancellationToken::new(),
        );
        let end = pipeline.stream_frames(viewer_io).await.unwrap();
        assert_eq!(end, StreamEnd::Stalled);
        drop(host_io);
    }

    #[tokio::test]
    async fn truncated_frame_ends_stream_as_lost() {
        let (mut host_io, viewer_io) = tokio::io::duplex(1 << 16);
        let (mut pipeline, _stats) = RenderPipeline::new(
            RecordingSink {
                surface: (64, 64),
                rendered: Arc::new(Mutex::new(Vec::new())),
            },
            0,
            20,
            CancellationToken::new(),
        );

        use tokio::io::AsyncWriteExt;
        // Header promises 100 bytes, the peer hangs up after 10.
        let mut raw = BytesMut::new();
        raw.put_u32(100);
        raw.extend_from_slice(&[7u8; 10]);
        host_io.write_all(&raw).await.unwrap();
        drop(host_io);

        let end = pipeline.stream_frames(viewer_io).await.unwrap();
        assert_eq!(end, StreamEnd::Lost);
    }

    #[tokio::test]
    async fn transport_loss_redials_within_budget() {
        use tokio::io::AsyncWriteExt;
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let rendered = Arc::new(Mutex::new(Vec::new()));
        let cancel = CancellationToken::new();
        let (mut pipeline, _stats) = RenderPipeline::new(
            RecordingSink {
                surface: (64, 64),
                rendered: rendered.clone(),
            },
            0,
            20,
            cancel.clone(),
        );

        let stopper = cancel.clone();
        let host = tokio::spawn(async move {
            // First connection dies mid-frame.
            let (mut first, _) = listener.accept().await.unwrap();
            first.write_all(&[0, 0, 0, 100]).await.unwrap();
            first.write_all(&[7u8; 10]).await.unwrap();
            drop(first);

            // The pipeline must dial back in; serve one good frame
            // and end the session.
            let (second, _) = listener.accept().await.unwrap();
            let mut writer = FramedWrite::new(second, FrameCodec);
            writer.send(test_jpeg(64, 64)).await.unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
            stopper.cancel();
        });

        let initial = TcpStream::connect(addr).await.unwrap();
        pipeline.run(initial, addr).await.unwrap();
        host.await.unwrap();
        assert_eq!(rendered.lock().unwrap().len(), 1);
    }

    #[test]
    fn latency_averages_receive_time_not_window_gap() {
        let mut window = ReceiveWindow {
            start: Instant::now() - Duration::from_secs(4),
            frames: 0,
            receive_time: Duration::ZERO,
        };
        window.record(Duration::from_millis(10));
        window.record(Duration::from_millis(20));
        window.record(Duration::from_millis(30));

        let (fps, latency) = window.close_if_due(Duration::from_secs(3)).unwrap();
        assert_eq!(latency, Duration::from_millis(20));
        // 3 frames over ~4 s, nowhere near the summed receive time.
        assert!(fps < 1.0);
        assert_eq!(window.frames, 0);
    }

    #[test]
    fn stats_window_stays_open_until_due() {
        let mut window = ReceiveWindow::new();
        window.record(Duration::from_millis(5));
        assert!(window.close_if_due(Duration::from_secs(3)).is_none());
    }

    #[tokio::test]
    async fn oversized_header_is_skipped_by_codec() {
        // The framing layer drops bad headers without surfacing an
        // error to the render loop.
        let (mut host_io, viewer_io) = tokio::io::duplex(1 << 20);
        let rendered = Arc::new(Mutex::new(Vec::new()));
        let (mut pipeline, _stats) = RenderPipeline::new(
            RecordingSink {
                surface: (64, 64),
                rendered: rendered.clone(),
            },
            0,
            20,
            CancellationToken::new(),
        );

        use tokio::io::AsyncWriteExt;
        let mut raw = BytesMut::new();
        raw.put_u32(0); // zero-length header, skipped
        host_io.write_all(&raw).await.unwrap();
        let mut writer = FramedWrite::new(host_io, FrameCodec);
        writer.send(test_jpeg(64, 64)).await.unwrap();
        drop(writer);

        let end = pipeline.stream_frames(viewer_io).await.unwrap();
        assert_eq!(end, StreamEnd::Closed);
        assert_eq!(rendered.lock().unwrap().len(), 1);
    }
}
