//! Domain-specific error types for the Periscope protocol.
//!
//! All fallible operations return `Result<T, PeriscopeError>`.
//! No panics on invalid input: every error is typed and recoverable.

use std::time::Duration;
use thiserror::Error;

/// The canonical error type for the Periscope protocol.
#[derive(Debug, Error)]
pub enum PeriscopeError {
    // ── Protocol framing ─────────────────────────────────────────
    /// A stream ended mid-message or carried a malformed header.
    #[error("framing error: {0}")]
    Framing(&'static str),

    /// A length prefix exceeded the hard frame cap.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// An event-type tag did not map to any known variant.
    #[error("unknown event tag: {0}")]
    UnknownEventTag(u32),

    // ── Authentication / policy ──────────────────────────────────
    /// Password digest mismatch. Recorded against the source address.
    #[error("authentication failed")]
    AuthenticationFailed,

    /// The connection was rejected by policy before a handshake began.
    #[error("access denied: {0}")]
    AccessDenied(&'static str),

    // ── Session / channel lifecycle ──────────────────────────────
    /// Port exhaustion or rendezvous timeout while standing up the
    /// per-session data channels.
    #[error("channel establishment failed: {0}")]
    ChannelEstablishment(String),

    // ── Transport ────────────────────────────────────────────────
    /// The TCP/IO layer reported an error.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// A session channel closed and could not be recovered.
    #[error("channel closed")]
    ChannelClosed,

    // ── Host subsystem ───────────────────────────────────────────
    /// Screen capture failed; the pipeline substitutes a fallback.
    #[error("capture error: {0}")]
    Capture(String),

    /// Input injection failed; the single event is dropped.
    #[error("injection error: {0}")]
    Injection(String),

    // ── Codec ────────────────────────────────────────────────────
    /// Image encode or decode failed.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for PeriscopeError {
    fn from(s: String) -> Self {
        PeriscopeError::Other(s)
    }
}

impl From<&str> for PeriscopeError {
    fn from(s: &str) -> Self {
        PeriscopeError::Other(s.to_string())
    }
}

impl From<image::ImageError> for PeriscopeError {
    fn from(e: image::ImageError) -> Self {
        PeriscopeError::Encoding(e.to_string())
    }
}
