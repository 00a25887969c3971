//! Challenge/response authentication over the control channel.
//!
//! The control channel speaks newline-delimited ASCII so separate
//! logical messages can never coalesce into one read:
//!
//! 1. Server → client: prompt line.
//! 2. Client → server: plaintext password line.
//! 3. Server → client: marker line. Clients match by **substring**
//!    (`successful` / `failed`), preserving back-compatible
//!    "contains" semantics.
//! 4. On success only: server → client `<screenPort>,<eventsPort>`.
//!
//! The protocol sends credentials in clear text; this is a documented
//! security gap of the wire format, not something this layer papers
//! over.

use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::PeriscopeError;

/// Prompt sent by the server before reading the password.
pub const PROMPT: &str = "Password required:";
/// Marker line sent on success. Matched by substring.
pub const SUCCESS_MARKER: &str = "Authentication successful";
/// Marker line sent on digest mismatch. Matched by substring.
pub const FAILURE_MARKER: &str = "Authentication failed";
/// Notice sent instead of a prompt when the session limit is reached.
pub const CAPACITY_NOTICE: &str = "Server at capacity, try again later.";

/// Bound on the whole handshake exchange. Exceeding it is a liveness
/// failure, not a credential failure; no attempt is recorded.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Domain-separation key for the password digest. Both ends derive the
/// same keyed digest; the key prevents reuse of generic blake3 hashes
/// of the password from other contexts.
const DIGEST_KEY: &[u8; 32] = b"periscope-control-handshake-v01\0";

// ── Digest ───────────────────────────────────────────────────────

/// Keyed digest of a password as compared during the handshake.
pub fn password_digest(password: &str) -> [u8; 32] {
    *blake3::keyed_hash(DIGEST_KEY, password.as_bytes()).as_bytes()
}

/// Constant-time equality: iterates all bytes and ORs the XOR
/// differences, never short-circuiting on the first mismatch. Time is
/// independent of the position of the first differing byte.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}

// ── Server side ──────────────────────────────────────────────────

/// Result of a completed (non-timed-out) handshake exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeOutcome {
    /// Digest matched; the caller should allocate data channels.
    Granted,
    /// Digest mismatch; the caller records the attempt and closes.
    Denied,
}

/// Run the server half of the handshake on an accepted control stream.
///
/// Returns [`PeriscopeError::Timeout`] if the client stalls past
/// [`HANDSHAKE_TIMEOUT`]; the caller must treat that as a liveness
/// failure and not record a password attempt.
pub async fn serve_handshake<S>(
    control: &mut S,
    stored_digest: &[u8; 32],
) -> Result<HandshakeOutcome, PeriscopeError>
where
    S: AsyncBufRead + AsyncWrite + Unpin,
{
    let exchange = async {
        control.write_all(PROMPT.as_bytes()).await?;
        control.write_all(b"\n").await?;
        control.flush().await?;

        let mut line = String::new();
        let n = control.read_line(&mut line).await?;
        if n == 0 {
            return Err(PeriscopeError::Framing(
                "control connection closed during handshake",
            ));
        }
        let password = line.trim_end_matches(['\r', '\n']);

        let received = password_digest(password);
        if constant_time_eq(&received, stored_digest) {
            control.write_all(SUCCESS_MARKER.as_bytes()).await?;
            control.write_all(b"\n").await?;
            control.flush().await?;
            Ok(HandshakeOutcome::Granted)
        } else {
            control.write_all(FAILURE_MARKER.as_bytes()).await?;
            control.write_all(b"\n").await?;
            control.flush().await?;
            Ok(HandshakeOutcome::Denied)
        }
    };

    match tokio::time::timeout(HANDSHAKE_TIMEOUT, exchange).await {
        Ok(result) => result,
        Err(_) => Err(PeriscopeError::Timeout(HANDSHAKE_TIMEOUT)),
    }
}

/// Disclose the freshly allocated data-channel ports to the client.
pub async fn send_ports<S>(
    control: &mut S,
    screen_port: u16,
    events_port: u16,
) -> Result<(), PeriscopeError>
where
    S: AsyncWrite + Unpin,
{
    control
        .write_all(format!("{screen_port},{events_port}\n").as_bytes())
        .await?;
    control.flush().await?;
    Ok(())
}

// ── Client side ──────────────────────────────────────────────────

/// Run the client half of the handshake: read the prompt, send the
/// password, and parse the marker + port disclosure.
///
/// Returns the `(screen_port, events_port)` pair on success.
pub async fn client_handshake<S>(
    control: &mut S,
    password: &str,
) -> Result<(u16, u16), PeriscopeError>
where
    S: AsyncBufRead + AsyncWrite + Unpin,
{
    let mut line = String::new();
    if control.read_line(&mut line).await? == 0 {
        return Err(PeriscopeError::Framing("server closed before prompt"));
    }

    // A full server answers with the capacity notice instead of a prompt.
    if line.contains("capacity") {
        return Err(PeriscopeError::AccessDenied("server at capacity"));
    }

    control.write_all(password.as_bytes()).await?;
    control.write_all(b"\n").await?;
    control.flush().await?;

    line.clear();
    if control.read_line(&mut line).await? == 0 {
        return Err(PeriscopeError::Framing("server closed before auth marker"));
    }

    // Substring match, not exact-string match.
    if !line.contains("successful") {
        return Err(PeriscopeError::AuthenticationFailed);
    }

    line.clear();
    if control.read_line(&mut line).await? == 0 {
        return Err(PeriscopeError::Framing("server closed before port disclosure"));
    }

    parse_ports(line.trim_end_matches(['\r', '\n']))
}

/// Parse the `<screen>,<events>` port disclosure line.
fn parse_ports(line: &str) -> Result<(u16, u16), PeriscopeError> {
    let (screen, events) = line
        .split_once(',')
        .ok_or(PeriscopeError::Framing("malformed port disclosure"))?;
    let screen: u16 = screen
        .trim()
        .parse()
        .map_err(|_| PeriscopeError::Framing("malformed screen port"))?;
    let events: u16 = events
        .trim()
        .parse()
        .map_err(|_| PeriscopeError::Framing("malformed events port"))?;
    if screen == 0 || events == 0 {
        return Err(PeriscopeError::Framing("port disclosure contained zero port"));
    }
    Ok((screen, events))
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufStream;

    #[test]
    fn digest_is_stable_and_keyed() {
        let a = password_digest("correct123");
        let b = password_digest("correct123");
        let c = password_digest("correct124");
        assert_eq!(a, b);
        assert_ne!(a, c);
        // Keyed digest differs from a plain blake3 hash.
        assert_ne!(a, *blake3::hash(b"correct123").as_bytes());
    }

    #[test]
    fn constant_time_eq_semantics() {
        assert!(constant_time_eq(b"abcdef", b"abcdef"));
        // Differing first byte and differing last byte both compare
        // false through the same full-length loop.
        assert!(!constant_time_eq(b"Xbcdef", b"abcdef"));
        assert!(!constant_time_eq(b"abcdeX", b"abcdef"));
        assert!(!constant_time_eq(b"short", b"longer"));
        assert!(constant_time_eq(b"", b""));
    }

    #[test]
    fn parse_ports_accepts_valid_rejects_invalid() {
        assert_eq!(parse_ports("5001,5002").unwrap(), (5001, 5002));
        assert!(parse_ports("5001").is_err());
        assert!(parse_ports("0,5002").is_err());
        assert!(parse_ports("x,y").is_err());
    }

    #[tokio::test]
    async fn handshake_success_roundtrip() {
        let (client_io, server_io) = tokio::io::duplex(4096);
        let stored = password_digest("correct123");

        let server = tokio::spawn(async move {
            let mut control = BufStream::new(server_io);
            let outcome = serve_handshake(&mut control, &stored).await.unwrap();
            assert_eq!(outcome, HandshakeOutcome::Granted);
            send_ports(&mut control, 5001, 5002).await.unwrap();
        });

        let mut control = BufStream::new(client_io);
        let (screen, events) = client_handshake(&mut control, "correct123")
            .await
            .unwrap();
        assert_eq!((screen, events), (5001, 5002));
        assert_ne!(screen, events);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn handshake_wrong_password() {
        let (client_io, server_io) = tokio::io::duplex(4096);
        let stored = password_digest("correct123");

        let server = tokio::spawn(async move {
            let mut control = BufStream::new(server_io);
            let outcome = serve_handshake(&mut control, &stored).await.unwrap();
            assert_eq!(outcome, HandshakeOutcome::Denied);
        });

        let mut control = BufStream::new(client_io);
        let err = client_handshake(&mut control, "wrong").await.unwrap_err();
        assert!(matches!(err, PeriscopeError::AuthenticationFailed));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn capacity_notice_surfaces_as_access_denied() {
        let (client_io, mut server_io) = tokio::io::duplex(4096);
        use tokio::io::AsyncWriteExt;
        server_io
            .write_all(format!("{CAPACITY_NOTICE}\n").as_bytes())
            .await
            .unwrap();

        let mut control = BufStream::new(client_io);
        let err = client_handshake(&mut control, "pw").await.unwrap_err();
        assert!(matches!(err, PeriscopeError::AccessDenied(_)));
    }
}
