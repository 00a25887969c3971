//! # periscope-viewer — Remote Desktop Client
//!
//! Connects to a periscope host, authenticates over the control
//! channel, and runs the frame receive/render pipeline plus the input
//! delivery task. The shipped frame sink and the absence of a UI keep
//! the binary headless; toolkit integrations plug in through
//! `periscope_core::FrameSink` and [`app::ViewerApp::input_capture`].

pub mod app;
pub mod config;
pub mod sink;
