//! Viewer-side pipelines: frame receive/render and input capture.
//!
//! The render pipeline owns the screen channel and its reconnection
//! budget; input capture and delivery share a bounded [`EventQueue`].

pub mod input;
pub mod render;

pub use input::{EventQueue, InputCapture, InputThrottle, PressedState, deliver_events};
pub use render::{
    DisplayFrame, FrameSink, JitterBuffer, RenderPipeline, RenderStats, StreamEnd, scale_to_fit,
};
