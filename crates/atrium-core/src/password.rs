//! Password hashing and generation.
//!
//! Passwords are hashed with Argon2id and a per-password random salt, stored
//! as PHC strings. A stored hash that fails to parse verifies as a mismatch.
//! Argon2 runs on the blocking pool so request handlers never stall the runtime.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use rand::Rng;
use rand_core::OsRng;

use crate::error::PasswordError;

/// Length of passwords generated by the recovery flow.
pub const GENERATED_PASSWORD_LEN: usize = 12;

/// Unambiguous alphabet for generated passwords (no `0/O`, `1/l/I`).
const GENERATED_CHARSET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnpqrstuvwxyz23456789";

/// Hash `password` into an Argon2id PHC string on the blocking pool.
///
/// # Errors
///
/// Returns [`PasswordError::Hash`] if Argon2 rejects the input.
pub async fn hash_password(password: &str) -> Result<String, PasswordError> {
    let password = password.to_owned();
    blocking(move || hash_blocking(&password)).await?
}

/// Check `password` against a stored PHC string on the blocking pool.
///
/// # Errors
///
/// Returns [`PasswordError::Task`] if the hashing task does not complete.
pub async fn verify_password(password: &str, stored: &str) -> Result<bool, PasswordError> {
    let password = password.to_owned();
    let stored = stored.to_owned();
    blocking(move || verify_blocking(&password, &stored)).await
}

async fn blocking<T, F>(op: F) -> Result<T, PasswordError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    tokio::task::spawn_blocking(op)
        .await
        .map_err(|e| PasswordError::Task {
            reason: e.to_string(),
        })
}

fn hash_blocking(password: &str) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| PasswordError::Hash {
            reason: e.to_string(),
        })
}

fn verify_blocking(password: &str, stored: &str) -> bool {
    PasswordHash::new(stored)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

/// Generate a random password from an unambiguous alphabet.
#[must_use]
pub fn generate_password() -> String {
    let mut rng = rand::thread_rng();
    (0..GENERATED_PASSWORD_LEN)
        .map(|_| char::from(GENERATED_CHARSET[rng.gen_range(0..GENERATED_CHARSET.len())]))
        .collect()
}
