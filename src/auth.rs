//! Password hashing and verification.
//!
//! Passwords are hashed with Argon2id into PHC-formatted strings; the salt
//! and parameters travel inside the hash, so verification needs no extra
//! state.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use rand_core::OsRng;

use crate::{Error, Result};

/// Hash a plaintext password into a PHC string.
pub fn hash_password(plain: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| Error::PasswordHash(e.to_string()))?;
    Ok(hash.to_string())
}

/// Verify a plaintext password against a stored PHC hash.
///
/// A malformed stored hash verifies as false rather than erroring; the caller
/// only ever needs a pass/fail answer.
pub fn verify_password(plain: &str, stored: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored) else {
        return false;
    };
    Argon2::default()
        .verify_password(plain.as_bytes(), &parsed)
        .is_ok()
}
