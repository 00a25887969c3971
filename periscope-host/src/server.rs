//! Host service core logic.
//!
//! Binds the control listener, evaluates access control per
//! connection, and runs an independent handler per client: handshake,
//! data channel allocation, rendezvous, then the capture and
//! injection pipelines until the session ends. Failures stay scoped
//! to their session; only the initial bind is process-fatal.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncWriteExt, BufStream};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use periscope_core::{
    AccessController, AccessDecision, CapturePipeline, FallbackCapturer, HandshakeOutcome,
    InjectionPipeline, PeriscopeError, SessionRegistry, allocate, auth, password_digest,
    serve_handshake,
};

use crate::backend::{LoggingBackend, TestPatternCapturer};
use crate::config::HostConfig;

// ── HostServer ───────────────────────────────────────────────────

/// The top-level host service.
pub struct HostServer {
    config: HostConfig,
    access: Arc<AccessController>,
    registry: Arc<SessionRegistry>,
    digest: [u8; 32],
    shutdown: CancellationToken,
}

impl HostServer {
    pub fn new(config: HostConfig) -> Self {
        let access = Arc::new(AccessController::new(config.access_policy()));
        let digest = password_digest(&config.security.password);
        Self {
            config,
            access,
            registry: Arc::new(SessionRegistry::new()),
            digest,
            shutdown: CancellationToken::new(),
        }
    }

    /// Handle used by signal handlers to stop the accept loop and
    /// tear down every live session.
    pub fn shutdown_handle(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.registry)
    }

    /// Run the service until shut down. Only the control bind error
    /// propagates; everything later is per-session.
    pub async fn run(&self) -> Result<(), PeriscopeError> {
        let bind_addr: SocketAddr = ([0, 0, 0, 0], self.config.network.port).into();
        let listener = TcpListener::bind(bind_addr).await?;
        info!("host listening on {bind_addr}");

        loop {
            let accept = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accept = listener.accept() => accept,
            };
            let (control, peer) = match accept {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("accept error: {e}");
                    continue;
                }
            };

            match self.access.check(peer.ip()) {
                AccessDecision::Allowed => {}
                decision => {
                    // Rejected before any prompt is written.
                    warn!(%peer, ?decision, "connection refused");
                    continue;
                }
            }

            let ctx = SessionContext {
                config: self.config.clone(),
                access: Arc::clone(&self.access),
                registry: Arc::clone(&self.registry),
                digest: self.digest,
                shutdown: self.shutdown.clone(),
            };
            tokio::spawn(async move {
                if let Err(e) = ctx.handle_client(control, peer).await {
                    warn!(%peer, "session ended with error: {e}");
                }
            });
        }

        info!("shutting down, disconnecting all sessions");
        self.registry.disconnect_all();
        Ok(())
    }
}

// ── Per-session handling ─────────────────────────────────────────

struct SessionContext {
    config: HostConfig,
    access: Arc<AccessController>,
    registry: Arc<SessionRegistry>,
    digest: [u8; 32],
    shutdown: CancellationToken,
}

impl SessionContext {
    async fn handle_client(
        &self,
        control: TcpStream,
        peer: SocketAddr,
    ) -> Result<(), PeriscopeError> {
        let mut control = BufStream::new(control);

        if self.registry.len() >= self.config.security.max_sessions {
            control.write_all(auth::CAPACITY_NOTICE.as_bytes()).await?;
            control.write_all(b"\n").await?;
            control.flush().await?;
            info!(%peer, "refused: at session capacity");
            return Ok(());
        }

        match serve_handshake(&mut control, &self.digest).await {
            Ok(HandshakeOutcome::Granted) => {
                self.access.record_success(peer.ip());
            }
            Ok(HandshakeOutcome::Denied) => {
                self.access.record_failure(peer.ip());
                info!(%peer, "authentication failed");
                return Ok(());
            }
            // A stalled or vanished client is a liveness failure, not
            // a password attempt.
            Err(e) => {
                info!(%peer, "handshake aborted: {e}");
                return Ok(());
            }
        }

        let channels = allocate(self.config.network.port).await?;
        let (screen_port, input_port) = (channels.screen_port(), channels.input_port());
        auth::send_ports(&mut control, screen_port, input_port).await?;
        info!(%peer, screen_port, input_port, "session channels allocated");

        let (screen, input) = channels.rendezvous().await?;

        let id = self.registry.next_id();
        let cancel = self.registry.insert(id, peer);
        info!(%peer, %id, "session active");

        // Host-wide shutdown also cancels this session.
        let shutdown = self.shutdown.clone();
        let watcher_cancel = cancel.clone();
        let watcher = tokio::spawn(async move {
            shutdown.cancelled().await;
            watcher_cancel.cancel();
        });

        let mut capture = CapturePipeline::new(
            screen,
            FallbackCapturer::new(Box::new(TestPatternCapturer::new()), None),
            self.config.capture_config(),
            cancel.clone(),
        );
        let mut inject = InjectionPipeline::new(input, LoggingBackend::default(), cancel.clone());

        let mut capture_task = tokio::spawn(async move { capture.run().await });
        let mut inject_task = tokio::spawn(async move { inject.run().await });

        // The first pipeline to finish ends the session for both.
        let (first, capture_finished_first) = tokio::select! {
            end = &mut capture_task => (end, true),
            end = &mut inject_task => (end, false),
        };
        cancel.cancel();
        let second = if capture_finished_first {
            inject_task.await
        } else {
            capture_task.await
        };
        watcher.abort();

        for end in [first, second] {
            match end {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(%peer, %id, "pipeline ended with error: {e}"),
                Err(e) => error!(%peer, %id, "pipeline task failed: {e}"),
            }
        }

        self.registry.remove(id);
        info!(%peer, %id, "session closed");
        Ok(())
    }
}
