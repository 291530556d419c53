//! Login orchestration: the only caller of both the rate limiter and the
//! challenge session store.
//!
//! A login request runs source and identity rate checks, the credential check,
//! the notify rate check, then issues exactly one challenge session and hands
//! the code to the notifier. A verification request runs the otp-verify rate
//! check and validates against the store. Every decision emits a structured
//! audit event; rendering denials to users is the caller's job.

use std::sync::Arc;

use secrecy::SecretString;
use tracing::{info, warn};
use uuid::Uuid;

use crate::challenge::{ChallengeSessionStore, Verdict};
use crate::credentials::{CredentialRegistrar, CredentialStore};
use crate::notify::Notifier;
use crate::otp;
use crate::rate_limit::{ActionClass, Decision, RateLimiter};

/// Result of a login request, up to challenge issuance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoginOutcome {
    /// Password accepted, code delivered; verification may proceed.
    ChallengeIssued { session_id: Uuid },
    RateLimited { retry_after: u64, message: String },
    BadCredentials,
    /// Identity exists but carries no delivery address.
    ContactMissing,
    /// The notifier gave up; the challenge session was abandoned.
    DeliveryFailed { message: String },
}

/// Result of a code-verification request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VerifyOutcome {
    Verified { identity: String },
    RateLimited { retry_after: u64, message: String },
    Rejected { verdict: Verdict },
}

/// Result of an account-registration request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegisterOutcome {
    Registered,
    RateLimited { retry_after: u64, message: String },
    /// A policy or uniqueness check failed; the message names it.
    Rejected { message: String },
    /// The flow was wired without a registrar; the store is read-only.
    Unsupported,
}

/// The multi-factor login flow over injected collaborators.
pub struct AuthFlow {
    limiter: RateLimiter,
    sessions: ChallengeSessionStore,
    credentials: Arc<dyn CredentialStore>,
    notifier: Arc<dyn Notifier>,
    registrar: Option<Arc<dyn CredentialRegistrar>>,
}

impl AuthFlow {
    #[must_use]
    pub fn new(
        limiter: RateLimiter,
        sessions: ChallengeSessionStore,
        credentials: Arc<dyn CredentialStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            limiter,
            sessions,
            credentials,
            notifier,
            registrar: None,
        }
    }

    /// Enable account registration through `registrar`. Without one the flow
    /// treats the credential store as read-only.
    #[must_use]
    pub fn with_registrar(mut self, registrar: Arc<dyn CredentialRegistrar>) -> Self {
        self.registrar = Some(registrar);
        self
    }

    /// The session store, for startup restore and opportunistic purging.
    #[must_use]
    pub fn sessions(&self) -> &ChallengeSessionStore {
        &self.sessions
    }

    /// First factor: rate checks, credential check, challenge issuance and
    /// code delivery.
    pub fn begin_login(
        &self,
        identity: &str,
        secret: &SecretString,
        source_address: &str,
        client_descriptor: &str,
    ) -> LoginOutcome {
        if let Some(outcome) = self.denied(
            &format!("login_{source_address}"),
            ActionClass::Login,
            identity,
            source_address,
        ) {
            return outcome;
        }
        if let Some(outcome) = self.denied(
            &format!("login_user_{identity}"),
            ActionClass::Login,
            identity,
            source_address,
        ) {
            return outcome;
        }

        if !self.credentials.verify(identity, secret) {
            warn!(
                identity = %identity,
                source = %source_address,
                "login failed: invalid credentials"
            );
            return LoginOutcome::BadCredentials;
        }

        // One active challenge per identity: supersede anything in flight.
        if let Some(prior) = self.sessions.find_active_for_identity(identity) {
            self.sessions.invalidate(prior);
            warn!(
                identity = %identity,
                source = %source_address,
                session = %prior,
                "session invalidated: new login while challenge active"
            );
        }

        let Some(contact) = self.credentials.get_contact(identity) else {
            warn!(identity = %identity, "login failed: no delivery address on record");
            return LoginOutcome::ContactMissing;
        };

        if let Some(outcome) = self.denied(
            &format!("notify_{contact}"),
            ActionClass::Notify,
            identity,
            source_address,
        ) {
            return outcome;
        }

        let code = otp::generate_code();
        let session_id = self
            .sessions
            .create(identity, &code, source_address, client_descriptor);

        let delivery = self.notifier.deliver(&contact, &code, identity);
        if !delivery.delivered {
            // Undeliverable code: the challenge can never be answered.
            self.sessions.invalidate(session_id);
            warn!(
                identity = %identity,
                session = %session_id,
                "challenge abandoned: {}",
                delivery.message
            );
            return LoginOutcome::DeliveryFailed {
                message: delivery.message,
            };
        }

        info!(
            identity = %identity,
            source = %source_address,
            session = %session_id,
            "password accepted, proceeding to OTP verification"
        );
        LoginOutcome::ChallengeIssued { session_id }
    }

    /// Account creation: rate check, then policy and uniqueness enforcement
    /// by the registrar. Registration shares the login budget but under its
    /// own key, so signup storms never lock out logins from the same address.
    pub fn register_account(
        &self,
        identity: &str,
        secret: &SecretString,
        contact: &str,
        source_address: &str,
    ) -> RegisterOutcome {
        let key = format!("reg_{source_address}");
        let decision = self.limiter.check_and_record(&key, ActionClass::Login);
        if !decision.is_allowed() {
            warn!(
                identity = %identity,
                source = %source_address,
                "registration rate limited"
            );
            return RegisterOutcome::RateLimited {
                retry_after: decision.retry_after(),
                message: decision.to_string(),
            };
        }

        let Some(registrar) = &self.registrar else {
            return RegisterOutcome::Unsupported;
        };
        match registrar.register(identity, secret, contact) {
            Ok(()) => {
                info!(identity = %identity, source = %source_address, "account registered");
                RegisterOutcome::Registered
            }
            Err(err) => {
                warn!(
                    identity = %identity,
                    source = %source_address,
                    "registration rejected: {err}"
                );
                RegisterOutcome::Rejected {
                    message: err.to_string(),
                }
            }
        }
    }

    /// Second factor: rate check and code validation. A validated session is
    /// consumed immediately.
    pub fn verify_code(
        &self,
        session_id: Uuid,
        submitted_code: &str,
        source_address: &str,
    ) -> VerifyOutcome {
        let key = format!("otp_{source_address}");
        let decision = self.limiter.check_and_record(&key, ActionClass::OtpVerify);
        if !decision.is_allowed() {
            warn!(
                source = %source_address,
                session = %session_id,
                "otp verification rate limited"
            );
            return VerifyOutcome::RateLimited {
                retry_after: decision.retry_after(),
                message: decision.to_string(),
            };
        }

        let identity = self.sessions.identity_of(session_id);
        let verdict = self.sessions.validate(session_id, submitted_code);

        // Success requires a known identity; a validated verdict without one
        // cannot happen, but the match keeps that structural.
        match (verdict, identity) {
            (Verdict::Validated, Some(identity)) => {
                // Single use: consume the session on success.
                self.sessions.invalidate(session_id);
                info!(
                    identity = %identity,
                    session = %session_id,
                    source = %source_address,
                    "otp validated"
                );
                VerifyOutcome::Verified { identity }
            }
            (verdict, identity) => {
                warn!(
                    identity = %identity.as_deref().unwrap_or("unknown"),
                    session = %session_id,
                    source = %source_address,
                    verdict = %verdict,
                    "otp validation failed"
                );
                VerifyOutcome::Rejected { verdict }
            }
        }
    }

    fn denied(
        &self,
        key: &str,
        action: ActionClass,
        identity: &str,
        source_address: &str,
    ) -> Option<LoginOutcome> {
        let decision = self.limiter.check_and_record(key, action);
        match decision {
            Decision::Allowed => None,
            denied => {
                warn!(
                    identity = %identity,
                    source = %source_address,
                    key = %key,
                    "rate limit triggered: {denied}"
                );
                Some(LoginOutcome::RateLimited {
                    retry_after: denied.retry_after(),
                    message: denied.to_string(),
                })
            }
        }
    }
}
