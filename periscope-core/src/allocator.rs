//! Per-session data-channel allocation and rendezvous.
//!
//! After a successful handshake the server stands up two listening
//! endpoints scoped to the session: a screen endpoint probed upward
//! from `base + 1` in steps of 2 (the interleaved odd ports are
//! reserved for input endpoints), and an input endpoint at
//! `screen_port + 1`. Both ports are disclosed to the client, which
//! then makes exactly one follow-up connection to each.

use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};

use crate::error::PeriscopeError;

/// Probe window above the control port before giving up.
const PROBE_RANGE: u16 = 1000;

/// Bound on waiting for the client's two follow-up connections.
pub const RENDEZVOUS_TIMEOUT: Duration = Duration::from_secs(10);

// ── DataChannels ─────────────────────────────────────────────────

/// The two freshly bound listening endpoints for one session.
#[derive(Debug)]
pub struct DataChannels {
    screen: TcpListener,
    input: TcpListener,
    screen_port: u16,
    input_port: u16,
}

impl DataChannels {
    /// Port the screen endpoint is bound to.
    pub fn screen_port(&self) -> u16 {
        self.screen_port
    }

    /// Port the input endpoint is bound to.
    pub fn input_port(&self) -> u16 {
        self.input_port
    }

    /// Accept exactly one inbound connection on each endpoint within
    /// [`RENDEZVOUS_TIMEOUT`].
    ///
    /// Consumes the listeners: on timeout or accept failure both
    /// endpoints are released and the session must be aborted.
    pub async fn rendezvous(self) -> Result<(TcpStream, TcpStream), PeriscopeError> {
        let accept_both = async {
            let (screen_stream, screen_peer) = self.screen.accept().await?;
            tracing::debug!(%screen_peer, "screen channel connected");
            let (input_stream, input_peer) = self.input.accept().await?;
            tracing::debug!(%input_peer, "input channel connected");
            Ok::<_, PeriscopeError>((screen_stream, input_stream))
        };

        match tokio::time::timeout(RENDEZVOUS_TIMEOUT, accept_both).await {
            Ok(result) => result,
            Err(_) => Err(PeriscopeError::ChannelEstablishment(format!(
                "client did not connect data channels within {RENDEZVOUS_TIMEOUT:?}"
            ))),
        }
    }
}

// ── Allocation ───────────────────────────────────────────────────

/// Bind the screen and input endpoints for a new session.
///
/// Screen: starts at `base_port + 1` and probes upward by 2 on bind
/// conflicts, bounded by `base_port + 1000`. Input: bound once at
/// `screen_port + 1`; failure releases the screen endpoint and aborts.
pub async fn allocate(base_port: u16) -> Result<DataChannels, PeriscopeError> {
    let limit = base_port as u32 + PROBE_RANGE as u32;
    let mut candidate = base_port as u32 + 1;

    let (screen, screen_port) = loop {
        if candidate > limit || candidate > u16::MAX as u32 {
            return Err(PeriscopeError::ChannelEstablishment(format!(
                "no free screen port in {}..={}",
                base_port as u32 + 1,
                limit
            )));
        }
        let port = candidate as u16;
        match TcpListener::bind(("0.0.0.0", port)).await {
            Ok(listener) => break (listener, port),
            Err(_) => candidate += 2,
        }
    };

    let input_port = screen_port
        .checked_add(1)
        .ok_or_else(|| PeriscopeError::ChannelEstablishment("input port overflow".into()))?;
    let input = TcpListener::bind(("0.0.0.0", input_port))
        .await
        .map_err(|e| {
            PeriscopeError::ChannelEstablishment(format!(
                "could not bind input endpoint on {input_port}: {e}"
            ))
        })?;

    tracing::debug!(screen_port, input_port, "data channels allocated");

    Ok(DataChannels {
        screen,
        input,
        screen_port,
        input_port,
    })
}

// ── Tests ────────────────────────────────────────────────────────
