//! Credential storage and the flat per-identity failure lockout.
//!
//! The lockout here is deliberately simpler than the rate limiter's tiered
//! scheme: five consecutive failures lock an identity for a flat 30 minutes,
//! and a successful check resets everything. The two mechanisms stay separate;
//! merging them would change observed behavior.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use argon2::{
    password_hash::SaltString, Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
};
use rand::rngs::OsRng;
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::clock::Clock;

/// Consecutive failures before an identity is locked.
const MAX_CONSECUTIVE_FAILURES: u32 = 5;
/// Flat lock duration: 30 minutes.
const LOCK_SECONDS: u64 = 1_800;

/// External collaborator contract for password checks and contact lookup.
pub trait CredentialStore: Send + Sync {
    /// Whether `secret` matches the stored credential for `identity`.
    fn verify(&self, identity: &str, secret: &SecretString) -> bool;

    /// Delivery address for OTP notifications, if the identity exists.
    fn get_contact(&self, identity: &str) -> Option<String>;
}

impl<T: CredentialStore + ?Sized> CredentialStore for Arc<T> {
    fn verify(&self, identity: &str, secret: &SecretString) -> bool {
        (**self).verify(identity, secret)
    }

    fn get_contact(&self, identity: &str) -> Option<String> {
        (**self).get_contact(identity)
    }
}

/// Account creation seam, kept separate from [`CredentialStore`] so read-only
/// stores don't have to pretend to support it.
pub trait CredentialRegistrar: Send + Sync {
    /// Create a new identity, enforcing the contact and password policies.
    ///
    /// # Errors
    /// Returns an error naming the violated policy or duplicate field.
    fn register(&self, identity: &str, password: &SecretString, contact: &str) -> Result<()>;
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct CredentialRecord {
    password_hash: String,
    contact: String,
}

/// In-memory credential store over flat records, loadable from a JSON file.
/// A store loaded from a file writes new registrations back to it.
#[derive(Debug, Default)]
pub struct Credentials {
    records: Mutex<HashMap<String, CredentialRecord>>,
    path: Option<PathBuf>,
}

impl Credentials {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load records from a JSON object of `identity -> {password_hash, contact}`.
    /// Malformed entries are skipped with a warning, never fatal.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or is not a JSON object.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read users file {}", path.display()))?;
        let entries: HashMap<String, serde_json::Value> =
            serde_json::from_str(&raw).context("Users file is not a JSON object")?;

        let mut records = HashMap::new();
        for (identity, value) in entries {
            match serde_json::from_value::<CredentialRecord>(value) {
                Ok(record) => {
                    records.insert(identity, record);
                }
                Err(err) => {
                    warn!(identity = %identity, "Discarding malformed user record: {err}");
                }
            }
        }
        Ok(Self {
            records: Mutex::new(records),
            path: Some(path.to_path_buf()),
        })
    }
}

impl CredentialRegistrar for Credentials {
    /// Identities must be unique and so must contacts; a store loaded from a
    /// file persists the new record before reporting success.
    fn register(&self, identity: &str, password: &SecretString, contact: &str) -> Result<()> {
        if identity.len() < 3 {
            return Err(anyhow!("Username must be at least 3 characters long."));
        }
        if !valid_contact(contact) {
            return Err(anyhow!("Invalid contact address format."));
        }
        if let Some(violation) = password_policy_violation(password.expose_secret()) {
            return Err(anyhow!(violation));
        }

        let salt = SaltString::generate(&mut OsRng);
        let password_hash = Argon2::default()
            .hash_password(password.expose_secret().as_bytes(), &salt)
            .map_err(|err| anyhow!("Failed to hash password: {err}"))?
            .to_string();

        let mut records = lock(&self.records);
        if records.contains_key(identity) {
            return Err(anyhow!("Username already exists."));
        }
        if records.values().any(|record| record.contact == contact) {
            return Err(anyhow!("Email address is already registered."));
        }
        records.insert(
            identity.to_string(),
            CredentialRecord {
                password_hash,
                contact: contact.to_string(),
            },
        );

        if let Some(path) = &self.path {
            if let Err(err) = persist(path, &records) {
                // Keep memory and file consistent.
                records.remove(identity);
                return Err(err);
            }
        }
        Ok(())
    }
}

fn persist(path: &Path, records: &HashMap<String, CredentialRecord>) -> Result<()> {
    let serialized =
        serde_json::to_string_pretty(records).context("Failed to encode user records")?;
    fs::write(path, serialized)
        .with_context(|| format!("Failed to write users file {}", path.display()))
}

impl CredentialStore for Credentials {
    fn verify(&self, identity: &str, secret: &SecretString) -> bool {
        let stored = {
            let records = lock(&self.records);
            records.get(identity).map(|record| record.password_hash.clone())
        };
        let Some(stored) = stored else {
            return false;
        };
        PasswordHash::new(&stored).is_ok_and(|parsed| {
            Argon2::default()
                .verify_password(secret.expose_secret().as_bytes(), &parsed)
                .is_ok()
        })
    }

    fn get_contact(&self, identity: &str) -> Option<String> {
        let records = lock(&self.records);
        records.get(identity).map(|record| record.contact.clone())
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct FailureState {
    failures: u32,
    locked_until: u64,
}

/// Wrap a credential store with the consecutive-failure lockout policy.
///
/// While an identity is locked, checks short-circuit to failure without
/// hashing the input, which also keeps timing flat for locked identities.
pub struct GuardedCredentials<S> {
    inner: S,
    clock: Arc<dyn Clock>,
    state: Mutex<HashMap<String, FailureState>>,
}

impl<S: CredentialStore> GuardedCredentials<S> {
    #[must_use]
    pub fn new(inner: S, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner,
            clock,
            state: Mutex::new(HashMap::new()),
        }
    }
}

impl<S: CredentialStore> CredentialStore for GuardedCredentials<S> {
    fn verify(&self, identity: &str, secret: &SecretString) -> bool {
        let now = self.clock.now();
        {
            let mut state = lock(&self.state);
            if let Some(entry) = state.get(identity).copied() {
                if entry.locked_until > now {
                    return false;
                }
                if entry.locked_until != 0 {
                    // Lock served out; start the counter fresh.
                    state.remove(identity);
                }
            }
        }

        if self.inner.verify(identity, secret) {
            lock(&self.state).remove(identity);
            return true;
        }

        let mut state = lock(&self.state);
        let entry = state.entry(identity.to_string()).or_default();
        entry.failures += 1;
        if entry.failures >= MAX_CONSECUTIVE_FAILURES {
            entry.locked_until = now + LOCK_SECONDS;
            warn!(identity, lock_seconds = LOCK_SECONDS, "identity locked after repeated failures");
        }
        false
    }

    fn get_contact(&self, identity: &str) -> Option<String> {
        self.inner.get_contact(identity)
    }
}

/// Basic format check for contact addresses.
#[must_use]
pub fn valid_contact(contact: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(contact))
}

/// First violated password rule, if any.
#[must_use]
pub fn password_policy_violation(password: &str) -> Option<&'static str> {
    const SPECIAL: &str = "!@#$%^&*()-+?_=,<>/";
    if password.len() < 8 {
        return Some("Password must be at least 8 characters long.");
    }
    if !password.chars().any(|c| c.is_ascii_uppercase()) {
        return Some("Password must include at least one uppercase letter.");
    }
    if !password.chars().any(|c| c.is_ascii_lowercase()) {
        return Some("Password must include at least one lowercase letter.");
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Some("Password must include at least one number.");
    }
    if !password.chars().any(|c| SPECIAL.contains(c)) {
        return Some("Password must include at least one special character.");
    }
    None
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
