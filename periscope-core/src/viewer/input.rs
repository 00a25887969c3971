//! Viewer-side input capture, queueing, and delivery.
//!
//! UI callbacks feed an [`InputCapture`]; a delivery task drains the
//! shared [`EventQueue`] onto the input channel. Mouse movement is
//! throttled and deduplicated so a busy pointer cannot starve clicks
//! and keystrokes.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::SinkExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Notify;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use crate::error::PeriscopeError;
use crate::wire::{EventCodec, InputEvent};

/// Minimum gap between queued mouse moves.
const THROTTLE_INTERVAL: Duration = Duration::from_millis(10);

/// Minimum Euclidean travel (px) between queued mouse moves.
const THROTTLE_DISTANCE: f64 = 2.0;

/// Bounded queue capacity.
const QUEUE_CAPACITY: usize = 100;

/// Recent events checked for exact duplicates.
const DEDUP_WINDOW: usize = 10;

/// Modifier key codes tracked for focus-loss release.
const MODIFIER_CODES: &[i32] = &[16, 17, 18, 91];

// ── InputThrottle ────────────────────────────────────────────────

/// Admission control for mouse movement.
#[derive(Debug, Default)]
pub struct InputThrottle {
    last: Option<(Instant, i32, i32)>,
}

impl InputThrottle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a move to (x, y) should be queued now.
    pub fn admit(&mut self, x: i32, y: i32) -> bool {
        self.admit_at(x, y, Instant::now())
    }

    fn admit_at(&mut self, x: i32, y: i32, now: Instant) -> bool {
        if let Some((when, lx, ly)) = self.last {
            let travelled = (((x - lx) as f64).powi(2) + ((y - ly) as f64).powi(2)).sqrt();
            if now.duration_since(when) < THROTTLE_INTERVAL || travelled < THROTTLE_DISTANCE {
                return false;
            }
        }
        self.last = Some((now, x, y));
        true
    }
}

// ── EventQueue ───────────────────────────────────────────────────

/// Bounded FIFO shared between capture callbacks and the delivery
/// task. When full, a non-move arrival evicts the oldest queued move;
/// an arriving move is simply dropped. That eviction is the only
/// permitted reordering.
pub struct EventQueue {
    inner: Mutex<VecDeque<InputEvent>>,
    notify: Notify,
}

impl EventQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(QUEUE_CAPACITY)),
            notify: Notify::new(),
        }
    }

    /// Queue an event. Returns false when it was dropped (duplicate,
    /// or capacity pressure).
    pub fn push(&self, event: InputEvent) -> bool {
        let mut queue = self.inner.lock().unwrap();

        if queue.iter().rev().take(DEDUP_WINDOW).any(|e| *e == event) {
            return false;
        }

        if queue.len() >= QUEUE_CAPACITY {
            if event.is_move() {
                return false;
            }
            match queue.iter().position(InputEvent::is_move) {
                Some(idx) => {
                    queue.remove(idx);
                }
                None => {
                    tracing::warn!(?event, "queue full of non-moves, event dropped");
                    return false;
                }
            }
        }

        queue.push_back(event);
        drop(queue);
        self.notify.notify_one();
        true
    }

    /// Put a failed event back at the head so FIFO order holds on
    /// redelivery.
    pub fn push_front(&self, event: InputEvent) {
        self.inner.lock().unwrap().push_front(event);
        self.notify.notify_one();
    }

    /// Drop every queued move. Stale positions are worthless once the
    /// connection is gone; clicks and keys still matter.
    pub fn purge_moves(&self) -> usize {
        let mut queue = self.inner.lock().unwrap();
        let before = queue.len();
        queue.retain(|event| !event.is_move());
        before - queue.len()
    }

    /// Wait for and remove the oldest event.
    pub async fn pop(&self) -> InputEvent {
        loop {
            if let Some(event) = self.inner.lock().unwrap().pop_front() {
                return event;
            }
            self.notify.notified().await;
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

// ── PressedState ─────────────────────────────────────────────────

/// Buttons and modifier keys currently held, so that losing window
/// focus can synthesize the releases the host would otherwise never
/// see.
#[derive(Debug, Default)]
pub struct PressedState {
    buttons: HashSet<i32>,
    modifiers: HashSet<i32>,
}

impl PressedState {
    pub fn observe(&mut self, event: &InputEvent) {
        match *event {
            InputEvent::MouseButton { button, pressed } => {
                if pressed {
                    self.buttons.insert(button);
                } else {
                    self.buttons.remove(&button);
                }
            }
            InputEvent::Key { code, pressed, .. } if MODIFIER_CODES.contains(&code) => {
                if pressed {
                    self.modifiers.insert(code);
                } else {
                    self.modifiers.remove(&code);
                }
            }
            _ => {}
        }
    }

    /// Synthesize release events for everything held.
    pub fn drain_releases(&mut self) -> Vec<InputEvent> {
        let mut releases = Vec::new();
        for button in std::mem::take(&mut self.buttons) {
            releases.push(InputEvent::MouseButton {
                button,
                pressed: false,
            });
        }
        for code in std::mem::take(&mut self.modifiers) {
            releases.push(InputEvent::Key {
                code,
                sym: 0,
                pressed: false,
            });
        }
        releases
    }
}

// ── InputCapture ─────────────────────────────────────────────────

/// Capture-side facade the UI layer calls into.
pub struct InputCapture {
    queue: Arc<EventQueue>,
    throttle: Mutex<InputThrottle>,
    pressed: Mutex<PressedState>,
}

impl InputCapture {
    pub fn new(queue: Arc<EventQueue>) -> Self {
        Self {
            queue,
            throttle: Mutex::new(InputThrottle::new()),
            pressed: Mutex::new(PressedState::default()),
        }
    }

    /// Pointer moved over the remote surface.
    pub fn mouse_moved(&self, x: i32, y: i32) {
        if self.throttle.lock().unwrap().admit(x, y) {
            self.queue.push(InputEvent::MouseMove { x, y });
        }
    }

    /// Any non-movement event from the UI.
    pub fn event(&self, event: InputEvent) {
        self.pressed.lock().unwrap().observe(&event);
        self.queue.push(event);
    }

    /// Window lost focus: queue releases for everything held.
    pub fn focus_lost(&self) {
        for release in self.pressed.lock().unwrap().drain_releases() {
            tracing::debug!(?release, "focus lost, synthesizing release");
            self.queue.push(release);
        }
    }
}

// ── Delivery ─────────────────────────────────────────────────────

/// Drains the queue onto the input channel until cancelled or the
/// transport fails. On a send failure a non-move event goes back to
/// the queue head for the next connection; the failed move and any
/// moves still queued are discarded.
pub async fn deliver_events<S>(
    stream: S,
    queue: Arc<EventQueue>,
    cancel: CancellationToken,
) -> Result<(), PeriscopeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut channel = Framed::new(stream, EventCodec);
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            event = queue.pop() => event,
        };
        if let Err(e) = channel.send(event.clone()).await {
            if event.is_move() {
                tracing::debug!("send failed, move discarded: {e}");
            } else {
                tracing::warn!("send failed, event requeued: {e}");
                queue.push_front(event);
            }
            let purged = queue.purge_moves();
            if purged > 0 {
                tracing::debug!(purged, "stale queued moves dropped on disconnect");
            }
            return Err(e);
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tokio_util::codec::FramedRead;

    fn key(code: i32, pressed: bool) -> InputEvent {
        InputEvent::Key {
            code,
            sym: 0,
            pressed,
        }
    }

    #[test]
    fn throttle_requires_time_and_distance() {
        let mut throttle = InputThrottle::new();
        let t0 = Instant::now();
        assert!(throttle.admit_at(0, 0, t0));
        // Too soon even though far enough.
        assert!(!throttle.admit_at(100, 100, t0 + Duration::from_millis(5)));
        // Late enough but too close.
        assert!(!throttle.admit_at(1, 1, t0 + Duration::from_millis(20)));
        // Both conditions met.
        assert!(throttle.admit_at(10, 10, t0 + Duration::from_millis(20)));
    }

    #[test]
    fn duplicate_events_in_window_dropped() {
        let queue = EventQueue::new();
        assert!(queue.push(key(65, true)));
        assert!(!queue.push(key(65, true)));
        assert!(queue.push(key(65, false)));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn full_queue_non_move_evicts_oldest_move() {
        let queue = EventQueue::new();
        queue.push(InputEvent::MouseMove { x: 1, y: 1 });
        for n in 0..(QUEUE_CAPACITY as i32 - 1) {
            queue.push(InputEvent::MouseWheel { delta: n });
        }
        assert_eq!(queue.len(), QUEUE_CAPACITY);

        // A move at capacity is dropped outright.
        assert!(!queue.push(InputEvent::MouseMove { x: 9, y: 9 }));

        // A non-move gets in by evicting the queued move.
        assert!(queue.push(key(13, true)));
        assert_eq!(queue.len(), QUEUE_CAPACITY);
        assert!(!queue.inner.lock().unwrap().iter().any(InputEvent::is_move));
    }

    #[test]
    fn focus_loss_releases_held_inputs() {
        let queue = Arc::new(EventQueue::new());
        let capture = InputCapture::new(queue.clone());
        capture.event(InputEvent::MouseButton {
            button: 1,
            pressed: true,
        });
        capture.event(key(17, true));
        capture.focus_lost();

        let mut releases = Vec::new();
        while let Some(event) = queue.inner.lock().unwrap().pop_front() {
            releases.push(event);
        }
        assert!(releases.contains(&InputEvent::MouseButton {
            button: 1,
            pressed: false,
        }));
        assert!(releases.contains(&key(17, false)));
    }

    #[tokio::test]
    async fn delivery_preserves_fifo_order() {
        let queue = Arc::new(EventQueue::new());
        queue.push(key(65, true));
        queue.push(key(65, false));
        queue.push(InputEvent::MouseWheel { delta: 3 });

        let (viewer_io, host_io) = tokio::io::duplex(1 << 16);
        let cancel = CancellationToken::new();
        let task = {
            let queue = queue.clone();
            let cancel = cancel.clone();
            tokio::spawn(deliver_events(viewer_io, queue, cancel))
        };

        let mut reader = FramedRead::new(host_io, EventCodec);
        assert_eq!(reader.next().await.unwrap().unwrap(), key(65, true));
        assert_eq!(reader.next().await.unwrap().unwrap(), key(65, false));
        assert_eq!(
            reader.next().await.unwrap().unwrap(),
            InputEvent::MouseWheel { delta: 3 }
        );

        cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn send_failure_requeues_non_move() {
        let queue = Arc::new(EventQueue::new());
        let (viewer_io, host_io) = tokio::io::duplex(16);
        drop(host_io);

        queue.push(key(13, true));
        let err = deliver_events(viewer_io, queue.clone(), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PeriscopeError::Connection(_)));
        // The failed key press is back at the head for redelivery.
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pop().await, key(13, true));
    }

    #[tokio::test]
    async fn send_failure_discards_move() {
        let queue = Arc::new(EventQueue::new());
        let (viewer_io, host_io) = tokio::io::duplex(16);
        drop(host_io);

        queue.push(InputEvent::MouseMove { x: 5, y: 5 });
        let err = deliver_events(viewer_io, queue.clone(), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PeriscopeError::Connection(_)));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn send_failure_purges_queued_moves() {
        let queue = Arc::new(EventQueue::new());
        let (viewer_io, host_io) = tokio::io::duplex(16);
        drop(host_io);

        queue.push(InputEvent::MouseMove { x: 5, y: 5 });
        queue.push(key(13, true));
        queue.push(InputEvent::MouseMove { x: 6, y: 6 });
        let err = deliver_events(viewer_io, queue.clone(), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PeriscopeError::Connection(_)));
        // The failed move and the queued one are gone, the key press
        // survives for the next connection.
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pop().await, key(13, true));
    }
}
