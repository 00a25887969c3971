//! # periscope-core
//!
//! Core protocol and pipeline library for the Periscope remote
//! desktop system.
//!
//! This crate contains:
//! - **Wire**: `FrameCodec` (length-prefixed JPEG frames) and
//!   `EventCodec` (tagged input events) for framed TCP I/O via
//!   `tokio_util`
//! - **Auth**: control-channel handshake with keyed digests and
//!   constant-time comparison
//! - **Access**: per-address allow/ban policy with failed-attempt
//!   lockout
//! - **Allocator**: per-session data channel allocation and
//!   rendezvous
//! - **Session**: session registry with cancellation-token teardown
//! - **Quality**: adaptive JPEG quality shared by both ends
//! - **Host**: capture/encode streaming and input injection pipelines
//! - **Viewer**: frame render pipeline and input capture/delivery
//! - **Error**: `PeriscopeError` — typed, `thiserror`-based hierarchy

pub mod access;
pub mod allocator;
pub mod auth;
pub mod error;
pub mod host;
pub mod quality;
pub mod session;
pub mod viewer;
pub mod wire;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use access::{AccessController, AccessDecision, AccessPolicy};
pub use allocator::{DataChannels, allocate};
pub use auth::{HandshakeOutcome, client_handshake, password_digest, serve_handshake};
pub use error::PeriscopeError;
pub use host::{
    CaptureConfig, CapturePipeline, FallbackCapturer, InjectionPipeline, InputBackend,
    ScreenCapturer, ScreenImage,
};
pub use quality::{QualityController, QualityState};
pub use session::{Session, SessionId, SessionInfo, SessionRegistry, SessionState};
pub use viewer::{EventQueue, FrameSink, InputCapture, RenderPipeline, deliver_events};
pub use wire::{EventCodec, FrameCodec, InputEvent, MAX_FRAME_SIZE};
