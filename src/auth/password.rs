//! Password hashing and verification
//!
//! Uses bcrypt for secure password hashing. `bcrypt::verify` compares the
//! derived hash in constant time.

use crate::error::AppError;
use bcrypt::{hash, verify, DEFAULT_COST};
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Hash a password using bcrypt
pub fn hash_password(password: &str) -> Result<String, AppError> {
    hash(password, DEFAULT_COST)
        .map_err(|e| AppError::Internal(format!("Failed to hash password: {}", e)))
}

/// Verify a password against a hash
pub fn verify_password(password: &str, hash: &str) -> Result<bool, AppError> {
    verify(password, hash)
        .map_err(|e| AppError::Internal(format!("Failed to verify password: {}", e)))
}

/// 256 bits from the OS-seeded CSPRNG, hex encoded
pub fn random_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Digest under which a reset token is stored
pub fn hash_reset_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}
