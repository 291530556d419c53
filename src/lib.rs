//! # Sentinela (Multi-factor Login Core)
//!
//! `sentinela` implements multi-factor login: a password check followed by a
//! one-time-password (OTP) challenge delivered out of band, with protections
//! against credential stuffing and OTP brute force.
//!
//! ## Core engines
//!
//! - **Rate limiting** (`rate_limit`): per-key sliding windows for the login,
//!   otp-verify and notify action classes. Breaching a window installs a
//!   lockout whose duration escalates with the number of breaches recorded for
//!   that key over the last 24 hours.
//! - **Challenge sessions** (`challenge`): one OTP challenge per in-flight
//!   login attempt, with an attempt cap, a 10-minute expiry, single use, and
//!   an active-session query per identity.
//!
//! Both engines are pure state over an injected [`clock::Clock`] and are
//! composed only by the orchestration layer in `flow`.
//!
//! ## Collaborators
//!
//! Credential checks (`credentials`), code delivery (`notify`) and the HTTP
//! surface (`api`) are thin glue around the core: trait seams with in-memory
//! and logging implementations. A separate flat 30-minute lockout guards the
//! credential store after five consecutive failures; it is intentionally not
//! merged with the rate limiter's tiered scheme.

pub mod api;
pub mod challenge;
pub mod cli;
pub mod clock;
pub mod credentials;
pub mod flow;
pub mod notify;
pub mod otp;
pub mod rate_limit;
