//! Host-side input replay.
//!
//! Decodes the viewer's event stream and replays it against an
//! [`InputBackend`], with flood guarding, bounds validation, and a
//! denylist of key combinations that would disrupt the host itself.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use crate::error::PeriscopeError;
use crate::host::keymap::key_name;
use crate::wire::{EventCodec, InputEvent};

/// Minimum spacing between injected events. Faster arrivals are
/// decoded (framing stays in sync) but not replayed.
const MIN_EVENT_SPACING: Duration = Duration::from_millis(1);

/// Steady-state read timeout on the input socket.
const READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Key combinations never replayed on the host.
const DENIED_COMBOS: &[&[&str]] = &[
    &["ctrl", "alt", "delete"],
    &["win", "r"],
    &["ctrl", "shift", "esc"],
    &["alt", "f4"],
];

// ── InputBackend ─────────────────────────────────────────────────

/// Platform input injection collaborator.
pub trait InputBackend: Send {
    /// Host screen dimensions, used to validate pointer coordinates.
    fn screen_size(&self) -> (u32, u32);
    fn mouse_move(&mut self, x: i32, y: i32) -> Result<(), PeriscopeError>;
    fn mouse_button(&mut self, button: i32, pressed: bool) -> Result<(), PeriscopeError>;
    fn mouse_wheel(&mut self, delta: i32) -> Result<(), PeriscopeError>;
    fn key(&mut self, name: &str, pressed: bool) -> Result<(), PeriscopeError>;
}

// ── InjectionPipeline ────────────────────────────────────────────

/// Per-session event replay loop.
pub struct InjectionPipeline<S, B> {
    channel: Framed<S, EventCodec>,
    backend: B,
    held_keys: HashSet<String>,
    held_buttons: HashSet<i32>,
    last_injected: Option<Instant>,
    cancel: CancellationToken,
}

impl<S, B> InjectionPipeline<S, B>
where
    S: AsyncRead + AsyncWrite + Unpin,
    B: InputBackend,
{
    pub fn new(stream: S, backend: B, cancel: CancellationToken) -> Self {
        Self {
            channel: Framed::new(stream, EventCodec),
            backend,
            held_keys: HashSet::new(),
            held_buttons: HashSet::new(),
            last_injected: None,
            cancel,
        }
    }

    /// Signal the pipeline to stop. Idempotent.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Run until cancelled, the peer closes, or the transport fails.
    /// Every tracked key and button is released before returning.
    pub async fn run(&mut self) -> Result<(), PeriscopeError> {
        tracing::debug!("injection pipeline started");
        let result = self.read_loop().await;
        self.release_all();
        tracing::debug!("injection pipeline stopped");
        result
    }

    async fn read_loop(&mut self) -> Result<(), PeriscopeError> {
        loop {
            let next = tokio::time::timeout(READ_TIMEOUT, self.channel.next());
            let event = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                read = next => match read {
                    Err(_) => return Err(PeriscopeError::Timeout(READ_TIMEOUT)),
                    Ok(None) => return Ok(()),
                    Ok(Some(event)) => event?,
                },
            };

            // Flood guard: the event is already consumed from the
            // wire, so dropping it cannot desynchronize framing.
            if let Some(last) = self.last_injected
                && last.elapsed() < MIN_EVENT_SPACING
            {
                tracing::trace!(?event, "rate limited, event dropped");
                continue;
            }

            self.apply(event);
            self.last_injected = Some(Instant::now());
        }
    }

    fn apply(&mut self, event: InputEvent) {
        let outcome = match event {
            InputEvent::MouseMove { x, y } => self.apply_move(x, y),
            InputEvent::MouseButton { button, pressed } => {
                if pressed {
                    self.held_buttons.insert(button);
                } else {
                    self.held_buttons.remove(&button);
                }
                self.backend.mouse_button(button, pressed)
            }
            InputEvent::MouseWheel { delta } => self.backend.mouse_wheel(delta),
            InputEvent::Key { code, pressed, .. } => self.apply_key(code, pressed),
        };
        // A single failed injection is dropped, not fatal.
        if let Err(e) = outcome {
            tracing::error!("injection failed: {e}");
        }
    }

    fn apply_move(&mut self, x: i32, y: i32) -> Result<(), PeriscopeError> {
        let (width, height) = self.backend.screen_size();
        if x < 0 || y < 0 || x as u32 >= width || y as u32 >= height {
            tracing::warn!(x, y, width, height, "pointer out of bounds, dropped");
            return Ok(());
        }
        self.backend.mouse_move(x, y)
    }

    fn apply_key(&mut self, code: i32, pressed: bool) -> Result<(), PeriscopeError> {
        let Some(name) = key_name(code) else {
            tracing::debug!(code, "unmappable key code, dropped");
            return Ok(());
        };

        if pressed {
            self.held_keys.insert(name.clone());
            // The key stays tracked even when suppressed, so the
            // matching release keeps the held set consistent.
            if let Some(combo) = self.denied_combo() {
                tracing::warn!(key = %name, ?combo, "denied key combination suppressed");
                return Ok(());
            }
        } else {
            self.held_keys.remove(&name);
        }
        self.backend.key(&name, pressed)
    }

    fn denied_combo(&self) -> Option<&'static [&'static str]> {
        DENIED_COMBOS
            .iter()
            .copied()
            .find(|combo| combo.iter().all(|k| self.held_keys.contains(*k)))
    }

    fn release_all(&mut self) {
        for key in std::mem::take(&mut self.held_keys) {
            if let Err(e) = self.backend.key(&key, false) {
                tracing::error!(key = %key, "release failed: {e}");
            }
        }
        for button in std::mem::take(&mut self.held_buttons) {
            if let Err(e) = self.backend.mouse_button(button, false) {
                tracing::error!(button, "release failed: {e}");
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
