//! Salted-verifier credential check.
//!
//! The store never holds the raw key: it keeps a random salt and
//! `SHA-256(salt ‖ SHA-256("NAME:KEY"))`. Names and keys pass through an
//! uppercase-only-Latin transform first so lookups and checks are
//! case-insensitive without touching non-ASCII bytes.

use rand::RngCore;
use sha2::{Digest, Sha256};

pub const SALT_LENGTH: usize = 32;
pub const VERIFIER_LENGTH: usize = 32;

/// Uppercase ASCII letters only; everything else passes through untouched.
pub fn upper_only_latin(input: &str) -> String {
    input
        .chars()
        .map(|c| if c.is_ascii() { c.to_ascii_uppercase() } else { c })
        .collect()
}

pub fn generate_salt() -> [u8; SALT_LENGTH] {
    let mut salt = [0u8; SALT_LENGTH];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

/// Derive the stored verifier for a name/key pair under the given salt.
pub fn compute_verifier(name: &str, key: &str, salt: &[u8; SALT_LENGTH]) -> [u8; VERIFIER_LENGTH] {
    let identity = format!(
        "{}:{}",
        upper_only_latin(name),
        upper_only_latin(key)
    );
    let inner = Sha256::digest(identity.as_bytes());

    let mut outer = Sha256::new();
    outer.update(salt);
    outer.update(inner);
    outer.finalize().into()
}

/// Check a supplied name/key pair against the stored salt and verifier.
pub fn check_login(
    name: &str,
    key: &str,
    salt: &[u8; SALT_LENGTH],
    verifier: &[u8; VERIFIER_LENGTH],
) -> bool {
    compute_verifier(name, key, salt) == *verifier
}
