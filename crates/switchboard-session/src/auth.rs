// SPDX-FileCopyrightText: 2026 Switchboard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Subscriber token generation and hashing.
//!
//! Tokens are 32 random bytes, hex-encoded. Only a peppered HMAC-SHA256
//! digest (64 hex chars) is ever stored; the raw token is returned exactly
//! once, at issuance.

use ring::hmac;
use ring::rand::{SecureRandom, SystemRandom};
use switchboard_core::SwitchboardError;

/// Generate a fresh random subscriber token (64 hex chars).
pub fn generate_token() -> Result<String, SwitchboardError> {
    let rng = SystemRandom::new();
    let mut bytes = [0u8; 32];
    rng.fill(&mut bytes)
        .map_err(|_| SwitchboardError::Internal("failed to generate random token".to_string()))?;
    Ok(hex::encode(bytes))
}

/// Digest a token with the configured pepper. The result is what lands in
/// `participants.ws_auth_token`.
pub fn hash_token(pepper: &str, token: &str) -> String {
    let key = hmac::Key::new(hmac::HMAC_SHA256, pepper.as_bytes());
    let tag = hmac::sign(&key, token.as_bytes());
    hex::encode(tag.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_tokens_are_distinct_hex() {
        let a = generate_token().unwrap();
        let b = generate_token().unwrap();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn digest_is_64_hex_chars_and_differs_from_token() {
        let token = generate_token().unwrap();
        let digest = hash_token("pepper", &token);
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(digest, token);
    }

    #[test]
    fn digest_is_deterministic_per_pepper() {
        let token = "aa".repeat(32);
        assert_eq!(hash_token("p1", &token), hash_token("p1", &token));
        assert_ne!(hash_token("p1", &token), hash_token("p2", &token));
    }
}
