//! One-time-password challenge sessions.
//!
//! One session corresponds to one in-flight login attempt. A session is
//! terminal once validated (single use), invalidated (explicitly or by
//! exhausting its attempt cap) or expired; no terminal session ever validates
//! again. Expired sessions are garbage-collected opportunistically via
//! [`ChallengeSessionStore::purge_expired`], not on a timer.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tracing::{info, warn};
use uuid::Uuid;

use crate::clock::Clock;

/// Default challenge lifetime: 10 minutes.
const DEFAULT_TTL_SECONDS: u64 = 600;
/// Incorrect submissions allowed before the session is invalidated.
const MAX_ATTEMPTS: u32 = 3;
/// How long expired sessions are kept around before purging removes them.
pub const DEFAULT_PURGE_GRACE_SECONDS: u64 = 86_400;

/// A single OTP challenge tied to one login attempt.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChallengeSession {
    pub id: Uuid,
    pub identity: String,
    code: String,
    pub created_at: u64,
    pub expires_at: u64,
    pub source_address: String,
    pub client_descriptor: String,
    pub validated: bool,
    pub validated_at: Option<u64>,
    pub invalidated: bool,
    pub invalidated_at: Option<u64>,
    pub attempts: u32,
}

/// Outcome of a validation attempt. Like rate-limit decisions these are
/// results, never errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Validated,
    InvalidSession,
    AlreadyUsed,
    Expired,
    AttemptsExhausted,
    Mismatch { remaining: u32 },
}

impl Verdict {
    #[must_use]
    pub fn is_validated(&self) -> bool {
        matches!(self, Self::Validated)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validated => write!(f, "OTP validated successfully"),
            Self::InvalidSession => write!(f, "Invalid session"),
            Self::AlreadyUsed => write!(f, "OTP has already been used"),
            Self::Expired => write!(f, "OTP has expired"),
            Self::AttemptsExhausted => {
                write!(f, "Too many incorrect attempts. Please request a new OTP.")
            }
            Self::Mismatch { remaining } => {
                write!(f, "Invalid OTP. {remaining} attempts remaining.")
            }
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    sessions: HashMap<Uuid, ChallengeSession>,
    // Secondary index so the active-session query is a lookup, not a scan.
    by_identity: HashMap<String, Vec<Uuid>>,
}

/// In-memory store for challenge sessions with an optional durable snapshot.
///
/// One mutex guards both maps so read-increment-write during validation is
/// atomic with respect to concurrent submissions for the same session.
pub struct ChallengeSessionStore {
    clock: Arc<dyn Clock>,
    ttl: u64,
    inner: Mutex<Inner>,
}

impl ChallengeSessionStore {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            ttl: DEFAULT_TTL_SECONDS,
            inner: Mutex::new(Inner::default()),
        }
    }

    #[must_use]
    pub fn with_ttl_seconds(mut self, seconds: u64) -> Self {
        self.ttl = seconds;
        self
    }

    /// Create a session for `identity` carrying `code`; returns the session id.
    ///
    /// Ids are v4 UUIDs and are never reused across the process lifetime.
    pub fn create(
        &self,
        identity: &str,
        code: &str,
        source_address: &str,
        client_descriptor: &str,
    ) -> Uuid {
        let now = self.clock.now();
        let session = ChallengeSession {
            id: Uuid::new_v4(),
            identity: identity.to_string(),
            code: code.to_string(),
            created_at: now,
            expires_at: now + self.ttl,
            source_address: source_address.to_string(),
            client_descriptor: client_descriptor.to_string(),
            validated: false,
            validated_at: None,
            invalidated: false,
            invalidated_at: None,
            attempts: 0,
        };
        let id = session.id;

        let mut inner = self.lock();
        inner
            .by_identity
            .entry(identity.to_string())
            .or_default()
            .push(id);
        inner.sessions.insert(id, session);
        id
    }

    /// Validate `submitted_code` against the session.
    ///
    /// Every non-terminal submission burns an attempt; the attempt that pushes
    /// the count past the cap invalidates the session. Codes are compared as
    /// opaque bytes in constant time.
    pub fn validate(&self, session_id: Uuid, submitted_code: &str) -> Verdict {
        let now = self.clock.now();
        let mut inner = self.lock();
        let Some(session) = inner.sessions.get_mut(&session_id) else {
            return Verdict::InvalidSession;
        };

        if session.validated {
            return Verdict::AlreadyUsed;
        }
        if session.invalidated {
            // Terminal either way; exhausted sessions keep saying so.
            return if session.attempts > MAX_ATTEMPTS {
                Verdict::AttemptsExhausted
            } else {
                Verdict::InvalidSession
            };
        }
        if now > session.expires_at {
            return Verdict::Expired;
        }

        session.attempts += 1;
        if session.attempts > MAX_ATTEMPTS {
            session.invalidated = true;
            session.invalidated_at = Some(now);
            return Verdict::AttemptsExhausted;
        }

        if codes_match(&session.code, submitted_code) {
            session.validated = true;
            session.validated_at = Some(now);
            Verdict::Validated
        } else {
            Verdict::Mismatch {
                remaining: MAX_ATTEMPTS - session.attempts,
            }
        }
    }

    /// Idempotently mark a session invalidated. Missing or already-terminal
    /// sessions are a no-op, not an error.
    pub fn invalidate(&self, session_id: Uuid) {
        let now = self.clock.now();
        let mut inner = self.lock();
        if let Some(session) = inner.sessions.get_mut(&session_id) {
            if !session.invalidated {
                session.invalidated = true;
                session.invalidated_at = Some(now);
            }
        }
    }

    /// First non-invalidated, unexpired session for `identity`, if any.
    ///
    /// Uniqueness of the active session is the orchestration layer's job; this
    /// only reports existence.
    pub fn find_active_for_identity(&self, identity: &str) -> Option<Uuid> {
        let now = self.clock.now();
        let inner = self.lock();
        let ids = inner.by_identity.get(identity)?;
        ids.iter()
            .filter_map(|id| inner.sessions.get(id))
            .find(|session| !session.invalidated && now <= session.expires_at)
            .map(|session| session.id)
    }

    /// Identity a session belongs to, for audit events.
    pub fn identity_of(&self, session_id: Uuid) -> Option<String> {
        let inner = self.lock();
        inner
            .sessions
            .get(&session_id)
            .map(|session| session.identity.clone())
    }

    /// Drop sessions whose expiry plus `grace_seconds` has passed; returns the
    /// number removed. Safe to run at process start or on any timer.
    pub fn purge_expired(&self, grace_seconds: u64) -> usize {
        let now = self.clock.now();
        let mut inner = self.lock();
        let Inner {
            sessions,
            by_identity,
        } = &mut *inner;
        let before = sessions.len();
        sessions.retain(|_, session| session.expires_at + grace_seconds >= now);
        by_identity.retain(|_, ids| {
            ids.retain(|id| sessions.contains_key(id));
            !ids.is_empty()
        });
        let removed = before - sessions.len();
        if removed > 0 {
            info!(removed, "purged expired challenge sessions");
        }
        removed
    }

    /// Write every session to `path` as JSON lines.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created or written.
    pub fn snapshot(&self, path: &Path) -> Result<usize> {
        let sessions: Vec<ChallengeSession> = {
            let inner = self.lock();
            inner.sessions.values().cloned().collect()
        };
        let mut file = fs::File::create(path)
            .with_context(|| format!("Failed to create snapshot {}", path.display()))?;
        for session in &sessions {
            let line = serde_json::to_string(session).context("Failed to encode session")?;
            writeln!(file, "{line}").context("Failed to write snapshot")?;
        }
        Ok(sessions.len())
    }

    /// Load sessions from a JSON-lines snapshot, replacing nothing already in
    /// memory. Malformed lines are discarded with a warning, never fatal.
    ///
    /// # Errors
    /// Returns an error only if the file itself cannot be opened or read.
    pub fn restore(&self, path: &Path) -> Result<usize> {
        let file = fs::File::open(path)
            .with_context(|| format!("Failed to open snapshot {}", path.display()))?;
        let mut restored = 0;
        let mut inner = self.lock();
        for line in BufReader::new(file).lines() {
            let line = line.context("Failed to read snapshot")?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ChallengeSession>(&line) {
                Ok(session) => {
                    if inner.sessions.contains_key(&session.id) {
                        continue;
                    }
                    inner
                        .by_identity
                        .entry(session.identity.clone())
                        .or_default()
                        .push(session.id);
                    inner.sessions.insert(session.id, session);
                    restored += 1;
                }
                Err(err) => {
                    warn!("Discarding malformed session record: {err}");
                }
            }
        }
        Ok(restored)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Constant-time, exact-match comparison of submitted and stored codes.
fn codes_match(stored: &str, submitted: &str) -> bool {
    stored.as_bytes().ct_eq(submitted.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn store(clock: Arc<ManualClock>) -> ChallengeSessionStore {
        ChallengeSessionStore::new(clock)
    }

    fn issue(store: &ChallengeSessionStore, identity: &str, code: &str) -> Uuid {
        store.create(identity, code, "1.2.3.4", "test-agent")
    }

    #[test]
    fn correct_code_validates_once() {
        let clock = Arc::new(ManualClock::new(1_000));
        let store = store(clock);
        let id = issue(&store, "alice", "482913");

        assert_eq!(store.validate(id, "482913"), Verdict::Validated);
        assert_eq!(store.validate(id, "482913"), Verdict::AlreadyUsed);
    }

    #[test]
    fn unknown_session_is_invalid() {
        let clock = Arc::new(ManualClock::new(0));
        let store = store(clock);
        assert_eq!(store.validate(Uuid::new_v4(), "000000"), Verdict::InvalidSession);
    }

    #[test]
    fn validates_just_before_expiry_and_rejects_after() {
        let clock = Arc::new(ManualClock::new(1_000));
        let store = store(Arc::clone(&clock));

        let late = issue(&store, "alice", "111111");
        clock.set(1_000 + 601);
        assert_eq!(store.validate(late, "111111"), Verdict::Expired);

        clock.set(1_000);
        let fresh = issue(&store, "bob", "222222");
        clock.set(1_000 + 599);
        assert_eq!(store.validate(fresh, "222222"), Verdict::Validated);
    }

    #[test]
    fn fourth_attempt_exhausts_and_terminates() {
        let clock = Arc::new(ManualClock::new(0));
        let store = store(clock);
        let id = issue(&store, "alice", "482913");

        assert_eq!(store.validate(id, "000001"), Verdict::Mismatch { remaining: 2 });
        assert_eq!(store.validate(id, "000002"), Verdict::Mismatch { remaining: 1 });
        assert_eq!(store.validate(id, "000003"), Verdict::Mismatch { remaining: 0 });
        // Fourth attempt exhausts even with the correct code.
        assert_eq!(store.validate(id, "482913"), Verdict::AttemptsExhausted);
        // Fifth attempt stays terminal.
        assert_eq!(store.validate(id, "482913"), Verdict::AttemptsExhausted);
    }

    #[test]
    fn invalidate_is_idempotent() {
        let clock = Arc::new(ManualClock::new(50));
        let store = store(Arc::clone(&clock));
        let id = issue(&store, "alice", "482913");

        store.invalidate(id);
        clock.advance(10);
        store.invalidate(id);
        // Still a no-op for a missing session.
        store.invalidate(Uuid::new_v4());

        assert_eq!(store.validate(id, "482913"), Verdict::InvalidSession);
        assert_eq!(store.find_active_for_identity("alice"), None);
    }

    #[test]
    fn active_session_query_skips_terminal_and_expired() {
        let clock = Arc::new(ManualClock::new(0));
        let store = store(Arc::clone(&clock));

        let first = issue(&store, "alice", "111111");
        assert_eq!(store.find_active_for_identity("alice"), Some(first));
        assert_eq!(store.find_active_for_identity("bob"), None);

        store.invalidate(first);
        assert_eq!(store.find_active_for_identity("alice"), None);

        let second = issue(&store, "alice", "222222");
        clock.advance(700);
        assert_eq!(store.find_active_for_identity("alice"), None);
        // Expired passively; validation agrees.
        assert_eq!(store.validate(second, "222222"), Verdict::Expired);
    }

    #[test]
    fn purge_respects_grace_period() {
        let clock = Arc::new(ManualClock::new(0));
        let store = store(Arc::clone(&clock));
        let id = issue(&store, "alice", "111111");

        // Expired but inside the grace period.
        clock.set(600 + 100);
        assert_eq!(store.purge_expired(DEFAULT_PURGE_GRACE_SECONDS), 0);
        assert!(store.identity_of(id).is_some());

        clock.set(600 + DEFAULT_PURGE_GRACE_SECONDS + 1);
        assert_eq!(store.purge_expired(DEFAULT_PURGE_GRACE_SECONDS), 1);
        assert!(store.identity_of(id).is_none());
        assert_eq!(store.find_active_for_identity("alice"), None);
    }

    #[test]
    fn snapshot_round_trips_and_discards_malformed_records() {
        let clock = Arc::new(ManualClock::new(0));
        let store = store(Arc::clone(&clock));
        let id = issue(&store, "alice", "482913");
        issue(&store, "bob", "111111");

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("sessions.jsonl");
        assert_eq!(store.snapshot(&path).expect("snapshot"), 2);

        // Corrupt the file with a bogus record between the real ones.
        let contents = fs::read_to_string(&path).expect("read snapshot");
        let mut lines: Vec<&str> = contents.lines().collect();
        lines.insert(1, "{not json");
        fs::write(&path, lines.join("\n")).expect("write snapshot");

        let restored = ChallengeSessionStore::new(Arc::clone(&clock) as Arc<dyn Clock>);
        assert_eq!(restored.restore(&path).expect("restore"), 2);
        assert_eq!(restored.validate(id, "482913"), Verdict::Validated);
        assert!(restored.find_active_for_identity("bob").is_some());
    }

    #[test]
    fn verdict_messages_match_the_flow() {
        assert_eq!(
            Verdict::Mismatch { remaining: 2 }.to_string(),
            "Invalid OTP. 2 attempts remaining."
        );
        assert_eq!(Verdict::Expired.to_string(), "OTP has expired");
        assert!(Verdict::Validated.is_validated());
    }
}
