//! Host-side pipelines: screen capture/encode and input injection.
//!
//! Both run per session as independent Tokio tasks owned by the
//! connection handler, and observe the session's cancellation token.

pub mod capture;
pub mod encode;
pub mod inject;
pub mod keymap;
pub mod pipeline;

pub use capture::{FallbackCapturer, ScreenCapturer, ScreenImage};
pub use encode::{ChangeDetector, encode_jpeg};
pub use inject::{InjectionPipeline, InputBackend};
pub use pipeline::{CaptureConfig, CapturePipeline};
