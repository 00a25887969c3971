//! Length-prefixed framing for the screen channel.
//!
//! Every payload is sent as a 4-byte big-endian length followed by
//! exactly that many bytes. Readers buffer until the full frame has
//! arrived; a partial frame followed by EOF is a hard failure (the
//! `Framed` machinery surfaces it via `decode_eof`), while a corrupt
//! length header is skipped without tearing down the connection.

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::PeriscopeError;

/// Hard cap on a single frame payload: 50 MB.
pub const MAX_FRAME_SIZE: usize = 50_000_000;

/// Codec for 4-byte big-endian length-prefixed frames.
#[derive(Debug, Default)]
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = PeriscopeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            if src.len() < 4 {
                return Ok(None);
            }

            let len = u32::from_be_bytes(src[..4].try_into().expect("4-byte slice")) as usize;

            // A zero or absurd length is a corrupt header. Discard it and
            // rescan rather than killing the connection over one bad frame.
            if len == 0 || len > MAX_FRAME_SIZE {
                tracing::warn!(size = len, "discarding frame with invalid size header");
                src.advance(4);
                continue;
            }

            if src.len() < 4 + len {
                src.reserve(4 + len - src.len());
                return Ok(None);
            }

            src.advance(4);
            return Ok(Some(src.split_to(len).freeze()));
        }
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = PeriscopeError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.is_empty() || item.len() > MAX_FRAME_SIZE {
            return Err(PeriscopeError::FrameTooLarge {
                size: item.len(),
                max: MAX_FRAME_SIZE,
            });
        }
        dst.reserve(4 + item.len());
        dst.extend_from_slice(&(item.len() as u32).to_be_bytes());
        dst.extend_from_slice(&item);
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────
