use argon2::{password_hash::SaltString, Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use rand::rngs::OsRng;
use tracing::error;

use crate::error::{Result, StoreError};

/// Hash a plaintext password into an argon2id PHC string. The cost
/// parameters are the crate defaults and do not vary per call.
pub fn hash_password(plain: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| {
            error!(error = %e, "argon2 hash_password error");
            StoreError::Hash(e.to_string())
        })?
        .to_string();
    Ok(hash)
}

/// Check `plain` against a PHC hash string. A malformed hash is an error,
/// a wrong password is `Ok(false)`.
pub fn verify_password(plain: &str, hash: &str) -> Result<bool> {
    let parsed = PasswordHash::new(hash).map_err(|e| {
        error!(error = %e, "argon2 parse hash error");
        StoreError::Hash(e.to_string())
    })?;
    Ok(Argon2::default()
        .verify_password(plain.as_bytes(), &parsed)
        .is_ok())
}
