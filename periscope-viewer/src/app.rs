//! Viewer application wiring.
//!
//! Connects to the host, authenticates, brings up both data channels,
//! and runs the render pipeline alongside the input delivery task
//! until the session ends or fails.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::BufStream;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use periscope_core::viewer::RenderPipeline;
use periscope_core::{EventQueue, InputCapture, PeriscopeError, client_handshake, deliver_events};

use crate::config::ViewerConfig;
use crate::sink::AccountingSink;

/// A fully established session, ready to run.
pub struct ViewerApp {
    config: ViewerConfig,
    cancel: CancellationToken,
    queue: Arc<EventQueue>,
}

impl ViewerApp {
    pub fn new(config: ViewerConfig) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
            queue: Arc::new(EventQueue::new()),
        }
    }

    pub fn shutdown_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Capture handle a UI layer feeds pointer and key events into.
    /// The shipped binary is headless and never calls it.
    pub fn input_capture(&self) -> InputCapture {
        InputCapture::new(Arc::clone(&self.queue))
    }

    /// Connect, authenticate, and run the session to completion.
    pub async fn run(&self, password: &str) -> Result<(), PeriscopeError> {
        let host = self.config.connection.host.as_str();
        let control_port = self.config.connection.port;

        info!("connecting to {host}:{control_port}");
        let control = TcpStream::connect((host, control_port)).await?;
        let host_ip = control.peer_addr()?.ip();
        let mut control = BufStream::new(control);

        let (screen_port, input_port) = client_handshake(&mut control, password).await?;
        info!(screen_port, input_port, "authenticated, session ports received");

        let screen_addr = SocketAddr::new(host_ip, screen_port);
        let input_addr = SocketAddr::new(host_ip, input_port);
        let screen = TcpStream::connect(screen_addr).await?;
        let input = TcpStream::connect(input_addr).await?;

        // Input capture side: the queue is shared with UI callbacks
        // through `InputCapture`; the delivery task drains it.
        let delivery = tokio::spawn(deliver_events(
            input,
            Arc::clone(&self.queue),
            self.cancel.clone(),
        ));

        let sink = AccountingSink::new(
            self.config.display.surface_width,
            self.config.display.surface_height,
        );
        let (mut render, mut stats) = RenderPipeline::new(
            sink,
            self.config.display.jitter_depth,
            self.config.display.target_fps,
            self.cancel.clone(),
        );

        let stats_task = tokio::spawn(async move {
            while stats.changed().await.is_ok() {
                let s = *stats.borrow();
                info!(
                    fps = format_args!("{:.1}", s.fps),
                    latency_ms = s.frame_latency.as_millis() as u64,
                    hint = s.quality_hint,
                    "receive window"
                );
            }
        });

        let result = render.run(screen, screen_addr).await;
        self.cancel.cancel();
        stats_task.abort();

        match delivery.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("input delivery ended: {e}"),
            Err(e) => warn!("input delivery task failed: {e}"),
        }

        result
    }
}
