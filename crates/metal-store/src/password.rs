//! Argon2id password hashing.
//!
//! Parameters are recorded in the encoded hash string, so verification keeps
//! working if they are ever raised. Current cost: 64 MiB memory, 3
//! iterations, parallelism 2, 16-byte salt, 32-byte output.

use argon2::password_hash::{PasswordHash, SaltString};
use rand::rngs::OsRng;
use argon2::{Algorithm, Argon2, Params, PasswordHasher, PasswordVerifier, Version};

use crate::error::{StoreError, StoreResult};

const COST_M_KIB: u32 = 64 * 1024;
const COST_T: u32 = 3;
const COST_P: u32 = 2;
const OUTPUT_LEN: usize = 32;

fn argon() -> StoreResult<Argon2<'static>> {
    let params = Params::new(COST_M_KIB, COST_T, COST_P, Some(OUTPUT_LEN))
        .map_err(|e| StoreError::Password(e.to_string()))?;
    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

/// Hash a cleartext password into an encoded `$argon2id$…` string.
pub fn hash(password: &str) -> StoreResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = argon()?
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| StoreError::Password(e.to_string()))?;
    Ok(hash.to_string())
}

/// Verify a cleartext password against an encoded hash string.
///
/// Returns `Ok(false)` on mismatch; `Err` only for malformed hashes.
pub fn verify(password: &str, encoded: &str) -> StoreResult<bool> {
    let parsed = PasswordHash::new(encoded).map_err(|e| StoreError::Password(e.to_string()))?;
    match argon()?.verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(StoreError::Password(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify() {
        let encoded = hash("correct horse battery staple").expect("hash");
        assert!(encoded.starts_with("$argon2id$"));
        assert!(encoded.contains("m=65536,t=3,p=2"));
        assert!(verify("correct horse battery staple", &encoded).expect("verify"));
        assert!(!verify("wrong password", &encoded).expect("verify"));
    }

    #[test]
    fn same_password_distinct_salts() {
        let a = hash("secret").expect("hash");
        let b = hash("secret").expect("hash");
        assert_ne!(a, b);
    }

    #[test]
    fn malformed_hash_is_error() {
        assert!(verify("pw", "not-a-hash").is_err());
    }
}
