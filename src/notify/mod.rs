//! Out-of-band delivery of challenge codes.
//!
//! Delivery (SMTP, SMS gateway, push) is an external concern; implementations
//! handle their own retries and report only the final outcome. The core reacts
//! to that outcome and nothing else.

use std::fmt;

use tracing::info;

/// Final result of a delivery attempt, retries included.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveryOutcome {
    pub delivered: bool,
    pub message: String,
}

impl DeliveryOutcome {
    #[must_use]
    pub fn success() -> Self {
        Self {
            delivered: true,
            message: "OTP sent successfully".to_string(),
        }
    }

    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            delivered: false,
            message: message.into(),
        }
    }
}

impl fmt::Display for DeliveryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Notification delivery abstraction used by the login flow.
pub trait Notifier: Send + Sync {
    /// Deliver `code` to `address` for `identity`.
    fn deliver(&self, address: &str, code: &str, identity: &str) -> DeliveryOutcome;
}

/// Local dev notifier that logs the code instead of sending anything.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn deliver(&self, address: &str, code: &str, identity: &str) -> DeliveryOutcome {
        info!(
            address = %address,
            identity = %identity,
            code = %code,
            "notification send stub"
        );
        DeliveryOutcome::success()
    }
}
