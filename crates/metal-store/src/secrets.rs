//! Token and keypair generation.

use rand::Rng;
use secrecy::ExposeSecret;

use crate::types::AgeKeypair;

/// Length of a generated API token.
pub const TOKEN_LENGTH: usize = 100;

const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Generate a uniformly random API token from the 62-character alphanumeric
/// alphabet.
#[must_use]
pub fn generate_token() -> String {
    let mut rng = rand::thread_rng();
    (0..TOKEN_LENGTH)
        .map(|_| {
            let idx = rng.gen_range(0..ALPHABET.len());
            char::from(ALPHABET[idx])
        })
        .collect()
}

/// Generate a fresh X25519 age keypair for a team.
#[must_use]
pub fn generate_age_keypair() -> AgeKeypair {
    let identity = age::x25519::Identity::generate();
    AgeKeypair {
        public_key: identity.to_public().to_string(),
        private_key: identity.to_string().expose_secret().clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_has_expected_shape() {
        let token = generate_token();
        assert_eq!(token.len(), TOKEN_LENGTH);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn tokens_are_unique() {
        assert_ne!(generate_token(), generate_token());
    }

    #[test]
    fn keypair_has_age_format() {
        let pair = generate_age_keypair();
        assert!(pair.public_key.starts_with("age1"));
        assert!(pair.private_key.starts_with("AGE-SECRET-KEY-1"));
    }
}
