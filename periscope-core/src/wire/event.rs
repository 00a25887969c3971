//! Typed input-event encoding for the input channel.
//!
//! Each message is a 4-byte big-endian event-type tag followed by a
//! fixed-size body. The layout is fixed per tag so a receiver can
//! always resynchronize by knowing the tag before reading the body.
//!
//! | Tag | Event            | Body                      |
//! |-----|------------------|---------------------------|
//! | 1   | MouseMove        | x: i32, y: i32 (8 bytes)  |
//! | 2   | MouseButtonDown  | id: i32 (4 bytes)         |
//! | 3   | MouseButtonUp    | id: i32 (4 bytes)         |
//! | 4   | KeyDown          | code: i32, sym: i32 (8 B) |
//! | 5   | KeyUp            | code: i32, sym: i32 (8 B) |
//! | 6   | MouseWheel       | delta: i32 (4 bytes)      |

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::PeriscopeError;

const TAG_MOUSE_MOVE: u32 = 1;
const TAG_MOUSE_DOWN: u32 = 2;
const TAG_MOUSE_UP: u32 = 3;
const TAG_KEY_DOWN: u32 = 4;
const TAG_KEY_UP: u32 = 5;
const TAG_MOUSE_WHEEL: u32 = 6;

// ── InputEvent ───────────────────────────────────────────────────

/// One pointer/keyboard action captured, transmitted, and injected
/// as a unit. A closed sum type, so decode and injection sites match
/// exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    /// Pointer moved to absolute host coordinates.
    MouseMove { x: i32, y: i32 },
    /// Mouse button state change (1 = left, 2 = middle, 3 = right).
    MouseButton { button: i32, pressed: bool },
    /// Wheel scrolled; positive is up.
    MouseWheel { delta: i32 },
    /// Key state change. `sym` is a best-effort symbol hash carried
    /// alongside the numeric code for cross-platform diagnostics.
    Key { code: i32, sym: i32, pressed: bool },
}

impl InputEvent {
    /// Wire tag for this event.
    pub fn tag(&self) -> u32 {
        match self {
            InputEvent::MouseMove { .. } => TAG_MOUSE_MOVE,
            InputEvent::MouseButton { pressed: true, .. } => TAG_MOUSE_DOWN,
            InputEvent::MouseButton { pressed: false, .. } => TAG_MOUSE_UP,
            InputEvent::Key { pressed: true, .. } => TAG_KEY_DOWN,
            InputEvent::Key { pressed: false, .. } => TAG_KEY_UP,
            InputEvent::MouseWheel { .. } => TAG_MOUSE_WHEEL,
        }
    }

    /// Fixed body size in bytes for a given tag, or `None` for an
    /// unknown tag.
    pub fn body_len(tag: u32) -> Option<usize> {
        match tag {
            TAG_MOUSE_MOVE | TAG_KEY_DOWN | TAG_KEY_UP => Some(8),
            TAG_MOUSE_DOWN | TAG_MOUSE_UP | TAG_MOUSE_WHEEL => Some(4),
            _ => None,
        }
    }

    /// Pointer-move events are the lowest-priority, most re-derivable
    /// signal in the stream; queue policies treat them specially.
    pub fn is_move(&self) -> bool {
        matches!(self, InputEvent::MouseMove { .. })
    }

    /// Serialize tag + body into `dst`.
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.extend_from_slice(&self.tag().to_be_bytes());
        match *self {
            InputEvent::MouseMove { x, y } => {
                dst.extend_from_slice(&x.to_be_bytes());
                dst.extend_from_slice(&y.to_be_bytes());
            }
            InputEvent::MouseButton { button, .. } => {
                dst.extend_from_slice(&button.to_be_bytes());
            }
            InputEvent::MouseWheel { delta } => {
                dst.extend_from_slice(&delta.to_be_bytes());
            }
            InputEvent::Key { code, sym, .. } => {
                dst.extend_from_slice(&code.to_be_bytes());
                dst.extend_from_slice(&sym.to_be_bytes());
            }
        }
    }

    /// Deserialize a body for `tag`. `body` must be exactly
    /// `body_len(tag)` bytes.
    pub fn decode(tag: u32, body: &[u8]) -> Result<Self, PeriscopeError> {
        let i32_at = |off: usize| -> i32 {
            i32::from_be_bytes(body[off..off + 4].try_into().expect("4-byte slice"))
        };

        match (tag, body.len()) {
            (TAG_MOUSE_MOVE, 8) => Ok(InputEvent::MouseMove {
                x: i32_at(0),
                y: i32_at(4),
            }),
            (TAG_MOUSE_DOWN, 4) => Ok(InputEvent::MouseButton {
                button: i32_at(0),
                pressed: true,
            }),
            (TAG_MOUSE_UP, 4) => Ok(InputEvent::MouseButton {
                button: i32_at(0),
                pressed: false,
            }),
            (TAG_KEY_DOWN, 8) => Ok(InputEvent::Key {
                code: i32_at(0),
                sym: i32_at(4),
                pressed: true,
            }),
            (TAG_KEY_UP, 8) => Ok(InputEvent::Key {
                code: i32_at(0),
                sym: i32_at(4),
                pressed: false,
            }),
            (TAG_MOUSE_WHEEL, 4) => Ok(InputEvent::MouseWheel { delta: i32_at(0) }),
            (t, _) if Self::body_len(t).is_none() => Err(PeriscopeError::UnknownEventTag(t)),
            _ => Err(PeriscopeError::Framing("event body length mismatch")),
        }
    }
}

// ── EventCodec ───────────────────────────────────────────────────

/// Codec for the tag + fixed-body input channel framing.
///
/// Rate-limited events on the injection side are still fully decoded
/// through this codec before being discarded, so the stream framing
/// stays synchronized by construction.
#[derive(Debug, Default)]
pub struct EventCodec;

impl Decoder for EventCodec {
    type Item = InputEvent;
    type Error = PeriscopeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < 4 {
            return Ok(None);
        }

        let tag = u32::from_be_bytes(src[..4].try_into().expect("4-byte slice"));
        let body_len =
            InputEvent::body_len(tag).ok_or(PeriscopeError::UnknownEventTag(tag))?;

        if src.len() < 4 + body_len {
            return Ok(None);
        }

        src.advance(4);
        let body = src.split_to(body_len);
        InputEvent::decode(tag, &body).map(Some)
    }
}

impl Encoder<InputEvent> for EventCodec {
    type Error = PeriscopeError;

    fn encode(&mut self, item: InputEvent, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.encode(dst);
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────
