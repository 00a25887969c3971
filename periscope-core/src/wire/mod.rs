//! Wire framing primitives shared by every channel.
//!
//! Two framings exist:
//!
//! - **Screen channel**: 4-byte big-endian length prefix + payload
//!   ([`FrameCodec`]).
//! - **Input channel**: 4-byte big-endian event-type tag + fixed-size
//!   body ([`EventCodec`], [`InputEvent`]).
//!
//! Both are `tokio_util` codecs so the pipelines can drive them through
//! `Framed` with `SinkExt`/`StreamExt`.

pub mod event;
pub mod framing;

pub use event::{EventCodec, InputEvent};
pub use framing::{FrameCodec, MAX_FRAME_SIZE};
