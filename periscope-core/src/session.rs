//! Session lifecycle tracking and administrative control.
//!
//! A session is one authenticated remote-control relationship: one
//! control connection plus, once rendezvous completes, one screen and
//! one input connection. The three are a unit; the registry never
//! exposes a partially-wired session to the pipelines; handlers insert
//! only after all channels are established.
//!
//! The registry is the sole cross-session shared mutable state besides
//! the failure log. It is passed explicitly; there is no ambient
//! global.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use tokio_util::sync::CancellationToken;

// ── SessionId ────────────────────────────────────────────────────

/// Process-unique session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

// ── SessionState ─────────────────────────────────────────────────

/// Lifecycle phase of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Control connection accepted, handshake in progress.
    Authenticating,
    /// Handshake passed; waiting for data-channel rendezvous.
    ChannelsPending,
    /// All three connections established; pipelines running.
    Active,
    /// Teardown requested; pipelines draining.
    Closing,
    /// Fully torn down.
    Closed,
}

// ── Session ──────────────────────────────────────────────────────

/// Registry entry for one active session.
#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    pub peer: SocketAddr,
    pub state: SessionState,
    pub created_at: SystemTime,
    /// Cancelling this token stops both of the session's pipelines.
    pub cancel: CancellationToken,
}

/// Read-only snapshot row for administrative listings.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub id: SessionId,
    pub peer: SocketAddr,
    pub state: SessionState,
    pub created_at: SystemTime,
}

// ── SessionRegistry ──────────────────────────────────────────────

/// Tracks all active sessions; sole owner of per-session resources.
///
/// All read-modify-write goes through one mutex acquisition. Handlers
/// insert on activation and remove on teardown; the operator surface
/// (disconnect, ban) cancels session tokens through it.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionId, Session>>,
    next_id: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a fresh session id.
    pub fn next_id(&self) -> SessionId {
        SessionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Register a fully-wired session. Returns its cancellation token.
    pub fn insert(&self, id: SessionId, peer: SocketAddr) -> CancellationToken {
        let cancel = CancellationToken::new();
        let session = Session {
            id,
            peer,
            state: SessionState::Active,
            created_at: SystemTime::now(),
            cancel: cancel.clone(),
        };
        self.sessions
            .lock()
            .expect("session registry poisoned")
            .insert(id, session);
        tracing::info!(%id, %peer, "session active");
        cancel
    }

    /// Remove a session at teardown. Idempotent; cancels the token so
    /// stragglers observe shutdown even if remove races disconnect.
    pub fn remove(&self, id: SessionId) {
        let removed = self
            .sessions
            .lock()
            .expect("session registry poisoned")
            .remove(&id);
        if let Some(session) = removed {
            session.cancel.cancel();
            tracing::info!(%id, peer = %session.peer, "session closed");
        }
    }

    /// Number of currently active sessions.
    pub fn len(&self) -> usize {
        self.sessions.lock().expect("session registry poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Administrative listing (ip, connected-at, state).
    pub fn snapshot(&self) -> Vec<SessionInfo> {
        let guard = self.sessions.lock().expect("session registry poisoned");
        let mut infos: Vec<SessionInfo> = guard
            .values()
            .map(|s| SessionInfo {
                id: s.id,
                peer: s.peer,
                state: s.state,
                created_at: s.created_at,
            })
            .collect();
        infos.sort_by_key(|s| s.id);
        infos
    }

    /// Request disconnection of one session. Safe to call repeatedly.
    pub fn disconnect(&self, id: SessionId) {
        let mut guard = self.sessions.lock().expect("session registry poisoned");
        if let Some(session) = guard.get_mut(&id) {
            session.state = SessionState::Closing;
            session.cancel.cancel();
        }
    }

    /// Disconnect every session originating from `ip` (ban path).
    pub fn disconnect_addr(&self, ip: std::net::IpAddr) {
        let mut guard = self.sessions.lock().expect("session registry poisoned");
        for session in guard.values_mut() {
            if session.peer.ip() == ip {
                session.state = SessionState::Closing;
                session.cancel.cancel();
            }
        }
    }

    /// Cancel every session (server shutdown).
    pub fn disconnect_all(&self) {
        let mut guard = self.sessions.lock().expect("session registry poisoned");
        for session in guard.values_mut() {
            session.state = SessionState::Closing;
            session.cancel.cancel();
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
