//! Connection admission policy and brute-force lockout.
//!
//! Evaluated before the handshake begins. The [`AccessPolicy`] is an
//! immutable snapshot for the lifetime of a running server instance;
//! the only mutable state is the sliding-window [`FailedAttemptLog`]
//! and the runtime ban overlay, both guarded by mutual exclusion.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

// ── AccessPolicy ─────────────────────────────────────────────────

/// Admission rules read on every connection attempt.
#[derive(Debug, Clone)]
pub struct AccessPolicy {
    /// Empty means allow all.
    pub allowed: Vec<IpAddr>,
    /// Addresses to never allow.
    pub banned: Vec<IpAddr>,
    /// Maximum concurrent sessions.
    pub max_sessions: usize,
    /// Failures within the lockout window before an address is blocked.
    pub max_failed_attempts: usize,
    /// Sliding-window duration for counting failures.
    pub lockout: Duration,
}

impl Default for AccessPolicy {
    fn default() -> Self {
        Self {
            allowed: Vec::new(),
            banned: Vec::new(),
            max_sessions: 5,
            max_failed_attempts: 5,
            lockout: Duration::from_secs(300),
        }
    }
}

// ── AccessDecision ───────────────────────────────────────────────

/// Outcome of evaluating a source address against the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    /// Proceed to the handshake.
    Allowed,
    /// On the static or runtime ban list. Close without a prompt.
    Banned,
    /// Allow-list is non-empty and excludes this address.
    NotAllowed,
    /// Too many recent failures. Close without a prompt.
    LockedOut,
}

// ── FailedAttemptLog ─────────────────────────────────────────────

/// Sliding-window record of failed authentication attempts per
/// source address. Entries older than the window are pruned on every
/// check; a successful authentication clears the address entirely.
#[derive(Debug, Default)]
pub struct FailedAttemptLog {
    attempts: HashMap<IpAddr, Vec<Instant>>,
}

impl FailedAttemptLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prune entries older than `window` and report whether `ip` has
    /// accumulated `max` or more failures inside it.
    pub fn is_locked_out(&mut self, ip: IpAddr, max: usize, window: Duration) -> bool {
        self.is_locked_out_at(ip, max, window, Instant::now())
    }

    /// Record a failure for `ip`. Returns the count now inside the window.
    pub fn record_failure(&mut self, ip: IpAddr) -> usize {
        self.record_failure_at(ip, Instant::now())
    }

    /// Forget all failures for `ip` (successful authentication).
    pub fn clear(&mut self, ip: IpAddr) {
        self.attempts.remove(&ip);
    }

    // Explicit-instant variants keep the sliding window testable
    // without sleeping through real lockout durations.

    pub(crate) fn is_locked_out_at(
        &mut self,
        ip: IpAddr,
        max: usize,
        window: Duration,
        now: Instant,
    ) -> bool {
        let Some(entries) = self.attempts.get_mut(&ip) else {
            return false;
        };
        entries.retain(|t| now.duration_since(*t) < window);
        if entries.is_empty() {
            self.attempts.remove(&ip);
            return false;
        }
        entries.len() >= max
    }

    pub(crate) fn record_failure_at(&mut self, ip: IpAddr, now: Instant) -> usize {
        let entries = self.attempts.entry(ip).or_default();
        entries.push(now);
        entries.len()
    }
}

// ── AccessController ─────────────────────────────────────────────

/// Owns the policy snapshot, the failure log, and the runtime ban
/// overlay. Shared across connection handlers; all read-modify-write
/// happens under one lock acquisition.
#[derive(Debug)]
pub struct AccessController {
    policy: AccessPolicy,
    failures: Mutex<FailedAttemptLog>,
    runtime_bans: Mutex<HashSet<IpAddr>>,
}

impl AccessController {
    pub fn new(policy: AccessPolicy) -> Self {
        Self {
            policy,
            failures: Mutex::new(FailedAttemptLog::new()),
            runtime_bans: Mutex::new(HashSet::new()),
        }
    }

    /// The immutable policy snapshot.
    pub fn policy(&self) -> &AccessPolicy {
        &self.policy
    }

    /// Evaluate a source address before any prompt is sent.
    pub fn check(&self, ip: IpAddr) -> AccessDecision {
        if self.policy.banned.contains(&ip)
            || self.runtime_bans.lock().expect("ban set poisoned").contains(&ip)
        {
            return AccessDecision::Banned;
        }

        if !self.policy.allowed.is_empty() && !self.policy.allowed.contains(&ip) {
            return AccessDecision::NotAllowed;
        }

        let locked = self
            .failures
            .lock()
            .expect("failure log poisoned")
            .is_locked_out(ip, self.policy.max_failed_attempts, self.policy.lockout);
        if locked {
            return AccessDecision::LockedOut;
        }

        AccessDecision::Allowed
    }

    /// Record a failed password attempt against `ip`.
    pub fn record_failure(&self, ip: IpAddr) {
        let count = self
            .failures
            .lock()
            .expect("failure log poisoned")
            .record_failure(ip);
        tracing::warn!(
            %ip,
            count,
            max = self.policy.max_failed_attempts,
            "failed authentication attempt"
        );
    }

    /// Clear failure history after a successful authentication.
    pub fn record_success(&self, ip: IpAddr) {
        self.failures.lock().expect("failure log poisoned").clear(ip);
    }

    /// Administratively ban an address for the rest of this server run.
    pub fn ban(&self, ip: IpAddr) {
        tracing::info!(%ip, "address banned by operator");
        self.runtime_bans.lock().expect("ban set poisoned").insert(ip);
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(last: u8) -> IpAddr {
        IpAddr::from([10, 0, 0, last])
    }

    #[test]
    fn banned_and_allow_lists() {
        let ctrl = AccessController::new(AccessPolicy {
            allowed: vec![ip(1), ip(2)],
            banned: vec![ip(2)],
            ..AccessPolicy::default()
        });

        assert_eq!(ctrl.check(ip(1)), AccessDecision::Allowed);
        // Ban list wins over allow list.
        assert_eq!(ctrl.check(ip(2)), AccessDecision::Banned);
        assert_eq!(ctrl.check(ip(3)), AccessDecision::NotAllowed);
    }

    #[test]
    fn empty_allow_list_admits_everyone() {
        let ctrl = AccessController::new(AccessPolicy::default());
        assert_eq!(ctrl.check(ip(42)), AccessDecision::Allowed);
    }

    #[test]
    fn runtime_ban_takes_effect() {
        let ctrl = AccessController::new(AccessPolicy::default());
        assert_eq!(ctrl.check(ip(7)), AccessDecision::Allowed);
        ctrl.ban(ip(7));
        assert_eq!(ctrl.check(ip(7)), AccessDecision::Banned);
    }

    #[test]
    fn lockout_after_exactly_max_failures() {
        let ctrl = AccessController::new(AccessPolicy {
            max_failed_attempts: 5,
            ..AccessPolicy::default()
        });

        // 4 prior failures: still admitted.
        for _ in 0..4 {
            ctrl.record_failure(ip(9));
        }
        assert_eq!(ctrl.check(ip(9)), AccessDecision::Allowed);

        // 5th failure locks the address out.
        ctrl.record_failure(ip(9));
        assert_eq!(ctrl.check(ip(9)), AccessDecision::LockedOut);
    }

    #[test]
    fn success_clears_history() {
        let ctrl = AccessController::new(AccessPolicy {
            max_failed_attempts: 2,
            ..AccessPolicy::default()
        });
        ctrl.record_failure(ip(5));
        ctrl.record_failure(ip(5));
        assert_eq!(ctrl.check(ip(5)), AccessDecision::LockedOut);

        ctrl.record_success(ip(5));
        assert_eq!(ctrl.check(ip(5)), AccessDecision::Allowed);
    }

    #[test]
    fn window_expiry_readmits() {
        let mut log = FailedAttemptLog::new();
        let window = Duration::from_secs(300);
        let start = Instant::now();

        for i in 0..5 {
            log.record_failure_at(ip(1), start + Duration::from_secs(i));
        }
        assert!(log.is_locked_out_at(ip(1), 5, window, start + Duration::from_secs(10)));

        // After the lockout window elapses with no further failures,
        // the same address is accepted again.
        assert!(!log.is_locked_out_at(ip(1), 5, window, start + Duration::from_secs(306)));
    }

    #[test]
    fn pruning_is_sliding_not_absolute() {
        let mut log = FailedAttemptLog::new();
        let window = Duration::from_secs(300);
        let start = Instant::now();

        // Three old failures, two fresh ones: only the fresh pair counts.
        for _ in 0..3 {
            log.record_failure_at(ip(2), start);
        }
        for _ in 0..2 {
            log.record_failure_at(ip(2), start + Duration::from_secs(400));
        }
        assert!(!log.is_locked_out_at(ip(2), 5, window, start + Duration::from_secs(401)));
    }
}
