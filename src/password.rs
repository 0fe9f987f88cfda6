//! Password and invitation-token hashing.

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use sha2::{Digest, Sha256};
use std::sync::LazyLock;
use uuid::Uuid;

use crate::error::AppError;

/// Hash a plaintext password into an Argon2id PHC string with a fresh salt.
pub fn hash_password(plaintext: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(plaintext.as_bytes(), &salt)
        .map_err(|e| AppError::internal(format!("hash password: {e}")))?;
    Ok(hash.to_string())
}

/// Verify a plaintext password against a stored PHC string.
///
/// Verification uses the parameters embedded in the hash itself.
pub fn verify_password(plaintext: &str, hash: &str) -> Result<bool, AppError> {
    let parsed = PasswordHash::new(hash).map_err(|e| AppError::internal(format!("parse password hash: {e}")))?;
    Ok(Argon2::default()
        .verify_password(plaintext.as_bytes(), &parsed)
        .is_ok())
}

/// Stands in for the stored hash when no account matches, so an unknown email
/// costs the same verification as a known one. `None` if hashing failed at init.
static UNKNOWN_ACCOUNT_HASH: LazyLock<Option<String>> =
    LazyLock::new(|| hash_password("gopher-social-unknown-account").ok());

/// Runs `hash_password` on the blocking pool.
pub async fn spawn_hash_password(plaintext: String) -> Result<String, AppError> {
    tokio::task::spawn_blocking(move || hash_password(&plaintext))
        .await
        .map_err(|e| AppError::internal(format!("spawn password hashing task: {e}")))?
}

/// spawn_verify_password
///
/// Runs `verify_password` on the blocking pool. With `stored_hash = None` the
/// plaintext is checked against a fixed hash instead and the result is always
/// `false`.
pub async fn spawn_verify_password(plaintext: String, stored_hash: Option<String>) -> Result<bool, AppError> {
    tokio::task::spawn_blocking(move || match stored_hash {
        Some(hash) => verify_password(&plaintext, &hash),
        None => {
            if let Some(hash) = UNKNOWN_ACCOUNT_HASH.as_deref() {
                let _ = verify_password(&plaintext, hash);
            }
            Ok(false)
        }
    })
    .await
    .map_err(|e| AppError::internal(format!("spawn password verification task: {e}")))?
}

/// Opaque one-time invitation token. Returned to the caller once, never stored.
pub fn generate_invitation_token() -> String {
    Uuid::new_v4().to_string()
}

/// Hex SHA-256 of an invitation token; this is what the store keeps.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}
