//! End-to-end scenarios over the login flow with a controlled clock.

use std::sync::{Arc, Mutex};

use secrecy::SecretString;
use sentinela::challenge::{ChallengeSessionStore, Verdict};
use sentinela::clock::{Clock, ManualClock};
use sentinela::credentials::{CredentialRegistrar, CredentialStore, Credentials, GuardedCredentials};
use sentinela::flow::{AuthFlow, LoginOutcome, RegisterOutcome, VerifyOutcome};
use sentinela::notify::{DeliveryOutcome, Notifier};
use sentinela::rate_limit::{RateLimitConfig, RateLimiter};
use uuid::Uuid;

/// Notifier that captures delivered codes so tests can submit them.
#[derive(Default)]
struct CapturingNotifier {
    sent: Mutex<Vec<(String, String)>>,
}

impl CapturingNotifier {
    fn last_code(&self) -> String {
        let sent = self.sent.lock().expect("notifier lock");
        sent.last().map(|(_, code)| code.clone()).expect("no code sent")
    }

    fn deliveries(&self) -> usize {
        self.sent.lock().expect("notifier lock").len()
    }
}

impl Notifier for CapturingNotifier {
    fn deliver(&self, address: &str, code: &str, _identity: &str) -> DeliveryOutcome {
        self.sent
            .lock()
            .expect("notifier lock")
            .push((address.to_string(), code.to_string()));
        DeliveryOutcome::success()
    }
}

struct Harness {
    clock: Arc<ManualClock>,
    notifier: Arc<CapturingNotifier>,
    flow: AuthFlow,
}

fn harness() -> Harness {
    let clock = Arc::new(ManualClock::new(1_700_000_000));
    let shared = Arc::clone(&clock) as Arc<dyn Clock>;

    let store = Arc::new(Credentials::new());
    store
        .register("alice", &password(), "alice@example.com")
        .expect("register alice");
    let credentials: Arc<dyn CredentialStore> = Arc::new(GuardedCredentials::new(
        Arc::clone(&store),
        Arc::clone(&shared),
    ));

    let notifier = Arc::new(CapturingNotifier::default());
    let flow = AuthFlow::new(
        RateLimiter::new(Arc::clone(&shared), RateLimitConfig::new()),
        ChallengeSessionStore::new(Arc::clone(&shared)),
        credentials,
        Arc::clone(&notifier) as Arc<dyn Notifier>,
    )
    .with_registrar(store);

    Harness {
        clock,
        notifier,
        flow,
    }
}

fn password() -> SecretString {
    SecretString::from("Correct1!".to_string())
}

fn challenge(outcome: LoginOutcome) -> Uuid {
    match outcome {
        LoginOutcome::ChallengeIssued { session_id } => session_id,
        other => panic!("expected challenge, got {other:?}"),
    }
}

#[test]
fn full_round_trip_validates_once() {
    let h = harness();

    let session = challenge(h.flow.begin_login("alice", &password(), "1.2.3.4", "ua"));
    let code = h.notifier.last_code();

    // Just inside the 10-minute expiry.
    h.clock.advance(599);
    assert_eq!(
        h.flow.verify_code(session, &code, "1.2.3.4"),
        VerifyOutcome::Verified {
            identity: "alice".to_string()
        }
    );

    // The session was consumed; replaying the code fails.
    assert_eq!(
        h.flow.verify_code(session, &code, "1.2.3.4"),
        VerifyOutcome::Rejected {
            verdict: Verdict::AlreadyUsed
        }
    );
}

#[test]
fn expired_challenge_is_rejected() {
    let h = harness();

    let session = challenge(h.flow.begin_login("alice", &password(), "1.2.3.4", "ua"));
    let code = h.notifier.last_code();

    h.clock.advance(601);
    assert_eq!(
        h.flow.verify_code(session, &code, "1.2.3.4"),
        VerifyOutcome::Rejected {
            verdict: Verdict::Expired
        }
    );
}

#[test]
fn identity_key_limits_across_sources() {
    let h = harness();
    let wrong = SecretString::from("Wrong1!aa".to_string());

    // Five attempts from five addresses all consume the identity budget.
    for n in 0..5 {
        let outcome = h
            .flow
            .begin_login("alice", &wrong, &format!("10.0.0.{n}"), "ua");
        assert_eq!(outcome, LoginOutcome::BadCredentials);
    }
    let outcome = h.flow.begin_login("alice", &password(), "10.0.0.99", "ua");
    assert!(
        matches!(outcome, LoginOutcome::RateLimited { retry_after: 300, .. }),
        "expected first-tier lockout, got {outcome:?}"
    );
}

#[test]
fn notify_budget_caps_challenges_per_contact() {
    let h = harness();

    // Three challenges within 30 minutes exhaust the notify budget for the
    // contact address; each new login supersedes the previous challenge.
    for n in 0..3 {
        challenge(h.flow.begin_login("alice", &password(), &format!("10.0.1.{n}"), "ua"));
    }
    assert_eq!(h.notifier.deliveries(), 3);

    let outcome = h.flow.begin_login("alice", &password(), "10.0.1.9", "ua");
    assert!(
        matches!(outcome, LoginOutcome::RateLimited { .. }),
        "expected notify rate limit, got {outcome:?}"
    );
    assert_eq!(h.notifier.deliveries(), 3);
}

#[test]
fn superseded_challenge_is_terminal() {
    let h = harness();

    let first = challenge(h.flow.begin_login("alice", &password(), "1.2.3.4", "ua"));
    let first_code = h.notifier.last_code();
    let second = challenge(h.flow.begin_login("alice", &password(), "1.2.3.4", "ua"));

    assert_ne!(first, second);
    assert_eq!(
        h.flow.sessions().find_active_for_identity("alice"),
        Some(second)
    );
    assert_eq!(
        h.flow.verify_code(first, &first_code, "1.2.3.4"),
        VerifyOutcome::Rejected {
            verdict: Verdict::InvalidSession
        }
    );
}

#[test]
fn wrong_codes_exhaust_the_challenge() {
    let h = harness();

    let session = challenge(h.flow.begin_login("alice", &password(), "1.2.3.4", "ua"));
    let code = h.notifier.last_code();
    let wrong = if code == "111111" { "222222" } else { "111111" };

    // Spread submissions across sources so the per-source otp-verify budget
    // (3 per 10 minutes) does not mask the session's own attempt cap.
    for (n, remaining) in (0..3).map(|n| (n, 2 - n)) {
        assert_eq!(
            h.flow.verify_code(session, wrong, &format!("10.0.2.{n}")),
            VerifyOutcome::Rejected {
                verdict: Verdict::Mismatch { remaining }
            }
        );
    }
    assert_eq!(
        h.flow.verify_code(session, &code, "10.0.2.9"),
        VerifyOutcome::Rejected {
            verdict: Verdict::AttemptsExhausted
        }
    );
    // Terminal: even further attempts never validate.
    assert_eq!(
        h.flow.verify_code(session, &code, "10.0.2.10"),
        VerifyOutcome::Rejected {
            verdict: Verdict::AttemptsExhausted
        }
    );
}

#[test]
fn registered_account_completes_the_full_flow() {
    let h = harness();

    assert_eq!(
        h.flow
            .register_account("bob", &password(), "bob@example.com", "7.7.7.7"),
        RegisterOutcome::Registered
    );
    // Contacts are unique across identities.
    assert_eq!(
        h.flow
            .register_account("carol", &password(), "bob@example.com", "7.7.7.7"),
        RegisterOutcome::Rejected {
            message: "Email address is already registered.".to_string()
        }
    );

    let session = challenge(h.flow.begin_login("bob", &password(), "7.7.7.7", "ua"));
    let code = h.notifier.last_code();
    assert_eq!(
        h.flow.verify_code(session, &code, "7.7.7.7"),
        VerifyOutcome::Verified {
            identity: "bob".to_string()
        }
    );
}

#[test]
fn otp_submissions_are_rate_limited_per_source() {
    let h = harness();

    let session = challenge(h.flow.begin_login("alice", &password(), "1.2.3.4", "ua"));

    for _ in 0..3 {
        assert!(matches!(
            h.flow.verify_code(session, "000000", "6.6.6.6"),
            VerifyOutcome::Rejected { .. }
        ));
    }
    assert!(matches!(
        h.flow.verify_code(session, "000000", "6.6.6.6"),
        VerifyOutcome::RateLimited { .. }
    ));
}
