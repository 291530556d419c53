//! Sliding-window rate limiting with escalating lockouts for auth flows.
//!
//! Each `(key, action class)` pair is tracked in an attempt ledger; exceeding
//! the class limit installs a lockout whose duration grows with the number of
//! breaches recorded for that key over the last 24 hours. The violation ledger
//! is deliberately separate from the attempt ledger: a short lockout can be
//! waited out, but repeat offenders keep escalating for a full day.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::clock::Clock;

const VIOLATION_WINDOW_SECONDS: u64 = 86_400;
const VIOLATION_KEY_SUFFIX: &str = "_violations";

const SHORT_LOCKOUT_SECONDS: u64 = 300;
const MEDIUM_LOCKOUT_SECONDS: u64 = 1_800;
const LONG_LOCKOUT_SECONDS: u64 = 7_200;

// Fixed pair for unrecognized action classes, unaffected by overrides.
const FALLBACK_LIMIT: (u32, u64) = (5, 300);

/// Action classes with recognized limit/window pairs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ActionClass {
    Login,
    OtpVerify,
    Notify,
    /// Anything else; uses the fixed fallback limits.
    Other,
}

impl ActionClass {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::OtpVerify => "otp-verify",
            Self::Notify => "notify",
            Self::Other => "other",
        }
    }
}

/// Per-class limits. Defaults match the production policy; `with_*` overrides
/// exist for tests and tuning.
#[derive(Clone, Copy, Debug)]
pub struct RateLimitConfig {
    login: (u32, u64),
    otp_verify: (u32, u64),
    notify: (u32, u64),
}

impl RateLimitConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            login: (5, 300),
            otp_verify: (3, 600),
            notify: (3, 1_800),
        }
    }

    #[must_use]
    pub fn with_login(mut self, limit: u32, window_seconds: u64) -> Self {
        self.login = (limit, window_seconds);
        self
    }

    #[must_use]
    pub fn with_otp_verify(mut self, limit: u32, window_seconds: u64) -> Self {
        self.otp_verify = (limit, window_seconds);
        self
    }

    #[must_use]
    pub fn with_notify(mut self, limit: u32, window_seconds: u64) -> Self {
        self.notify = (limit, window_seconds);
        self
    }

    /// Limit and window for an action class; unrecognized classes always get
    /// the fixed fallback pair.
    #[must_use]
    pub fn limit_for(&self, action: ActionClass) -> (u32, u64) {
        match action {
            ActionClass::Login => self.login,
            ActionClass::OtpVerify => self.otp_verify,
            ActionClass::Notify => self.notify,
            ActionClass::Other => FALLBACK_LIMIT,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of a rate-limit check. Denials are results, not errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    /// The key is serving an earlier lockout.
    Locked { retry_after: u64 },
    /// This call breached the limit and installed a lockout.
    LimitExceeded { retry_after: u64 },
}

impl Decision {
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    /// Seconds until the caller may retry; zero when allowed.
    #[must_use]
    pub fn retry_after(&self) -> u64 {
        match self {
            Self::Allowed => 0,
            Self::Locked { retry_after } | Self::LimitExceeded { retry_after } => *retry_after,
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allowed => write!(f, "Action allowed"),
            Self::Locked { retry_after } => write!(
                f,
                "Too many attempts. Please try again in {retry_after} seconds."
            ),
            Self::LimitExceeded { retry_after } => {
                write!(f, "Rate limit exceeded. Try again in {retry_after} seconds.")
            }
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct Entry {
    at: u64,
    weight: u32,
}

#[derive(Clone, Copy, Debug)]
struct Lockout {
    start: u64,
    duration: u64,
}

#[derive(Debug, Default)]
struct Ledgers {
    // Violation entries live in the same map under `<key>_violations`.
    attempts: HashMap<String, Vec<Entry>>,
    lockouts: HashMap<String, Lockout>,
}

/// Sliding-window rate limiter with per-key escalating lockouts.
///
/// All state sits behind one mutex so check-then-record is atomic with respect
/// to concurrent callers on the same key. Pruning is lazy, on read; ledgers
/// only ever hold unexpired entries plus whatever arrived since the last read.
pub struct RateLimiter {
    clock: Arc<dyn Clock>,
    config: RateLimitConfig,
    ledgers: Mutex<Ledgers>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, config: RateLimitConfig) -> Self {
        Self {
            clock,
            config,
            ledgers: Mutex::new(Ledgers::default()),
        }
    }

    /// Check whether `key` may perform `action` now, recording the attempt if
    /// allowed.
    ///
    /// A breach records one violation for the key, sizes a lockout from the
    /// number of violations in the last 24 hours and installs it immediately.
    /// Calls made during an active lockout touch neither ledger.
    pub fn check_and_record(&self, key: &str, action: ActionClass) -> Decision {
        let now = self.clock.now();
        let (limit, window) = self.config.limit_for(action);

        let mut ledgers = match self.ledgers.lock() {
            Ok(guard) => guard,
            // A poisoned ledger still holds consistent counts; failing open
            // here would defeat the limiter.
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(lockout) = ledgers.lockouts.get(key).copied() {
            let until = lockout.start + lockout.duration;
            if now < until {
                return Decision::Locked {
                    retry_after: until - now,
                };
            }
            ledgers.lockouts.remove(key);
        }

        let count = count_in_window(&mut ledgers.attempts, key, window, now);
        if count >= u64::from(limit) {
            let violations_key = format!("{key}{VIOLATION_KEY_SUFFIX}");
            record(&mut ledgers.attempts, &violations_key, now);
            let violations =
                count_in_window(&mut ledgers.attempts, &violations_key, VIOLATION_WINDOW_SECONDS, now);
            let duration = lockout_duration(violations);
            ledgers.lockouts.insert(
                key.to_string(),
                Lockout {
                    start: now,
                    duration,
                },
            );
            warn!(
                key,
                action = action.as_str(),
                violations,
                lockout_seconds = duration,
                "rate limit breached, lockout installed"
            );
            return Decision::LimitExceeded {
                retry_after: duration,
            };
        }

        record(&mut ledgers.attempts, key, now);
        Decision::Allowed
    }
}

/// Lockout tier for the number of 24h violations, the just-recorded one
/// included.
fn lockout_duration(violations: u64) -> u64 {
    if violations <= 2 {
        SHORT_LOCKOUT_SECONDS
    } else if violations <= 5 {
        MEDIUM_LOCKOUT_SECONDS
    } else {
        LONG_LOCKOUT_SECONDS
    }
}

/// Prune entries older than `window` and sum the weights of what remains.
fn count_in_window(
    attempts: &mut HashMap<String, Vec<Entry>>,
    key: &str,
    window: u64,
    now: u64,
) -> u64 {
    let Some(entries) = attempts.get_mut(key) else {
        return 0;
    };
    entries.retain(|entry| now.saturating_sub(entry.at) < window);
    let count = entries.iter().map(|entry| u64::from(entry.weight)).sum();
    if count == 0 {
        attempts.remove(key);
    }
    count
}

fn record(attempts: &mut HashMap<String, Vec<Entry>>, key: &str, now: u64) {
    attempts
        .entry(key.to_string())
        .or_default()
        .push(Entry { at: now, weight: 1 });
}
