//! One-time-password code generation.

use rand::{rngs::OsRng, Rng};

/// Number of digits in a generated code.
pub const CODE_LENGTH: usize = 6;

/// Generate a 6-digit code from the OS RNG.
///
/// The leading digit is never zero so the code survives any decimal
/// round-trip a collaborator might apply.
#[must_use]
pub fn generate_code() -> String {
    let code: u32 = OsRng.gen_range(100_000..1_000_000);
    code.to_string()
}
