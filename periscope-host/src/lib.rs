//! # periscope-host — Remote Desktop Host Service
//!
//! Foreground service that accepts viewer connections on a control
//! port, authenticates them, hands each session a private pair of
//! screen/input channels, streams JPEG frames, and replays received
//! input events.
//!
//! The shipped capture and injection collaborators are a moving test
//! pattern and a log-only backend; real platform integrations plug in
//! through `periscope_core::ScreenCapturer` and
//! `periscope_core::InputBackend`.

pub mod backend;
pub mod config;
pub mod server;
