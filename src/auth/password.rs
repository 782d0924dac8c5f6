//! Password hashing and verification.

use thiserror::Error;

/// bcrypt work factor used when none is configured.
pub const DEFAULT_COST: u32 = 12;

/// bcrypt only looks at the first 72 bytes of its input.
pub const MAX_PASSWORD_BYTES: usize = 72;

#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("failed to hash password")]
    Hash(#[source] bcrypt::BcryptError),

    #[error("stored password hash is malformed")]
    CorruptHash(#[source] bcrypt::BcryptError),
}

/// Derives and checks salted one-way password hashes.
///
/// Both operations are CPU bound; async callers should run them on the
/// blocking pool.
#[derive(Debug, Clone, Copy)]
pub struct CredentialVerifier {
    cost: u32,
}

impl CredentialVerifier {
    pub fn new(cost: u32) -> Self {
        Self { cost }
    }

    pub fn cost(&self) -> u32 {
        self.cost
    }

    /// Hash `plaintext` with a fresh salt.
    pub fn set_password(&self, plaintext: &str) -> Result<String, PasswordError> {
        bcrypt::hash(plaintext, self.cost).map_err(PasswordError::Hash)
    }

    /// `Ok(false)` is a legitimate mismatch; `Err` means the stored hash is unusable.
    pub fn matches(&self, plaintext: &str, stored_hash: &str) -> Result<bool, PasswordError> {
        bcrypt::verify(plaintext, stored_hash).map_err(PasswordError::CorruptHash)
    }
}

impl Default for CredentialVerifier {
    fn default() -> Self {
        Self::new(DEFAULT_COST)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Minimum bcrypt cost keeps the tests fast.
    fn verifier() -> CredentialVerifier {
        CredentialVerifier::new(4)
    }

    #[test]
    fn test_hash_then_match() {
        let verifier = verifier();
        let hash = verifier.set_password("pa55word").unwrap();
        assert!(hash.starts_with("$2"));
        assert!(!hash.contains("pa55word"));
        assert!(verifier.matches("pa55word", &hash).unwrap());
    }

    #[test]
    fn test_mismatch_is_not_an_error() {
        let verifier = verifier();
        let hash = verifier.set_password("pa55word").unwrap();
        assert!(!verifier.matches("wrong-password", &hash).unwrap());
    }

    #[test]
    fn test_hashes_are_salted() {
        let verifier = verifier();
        let first = verifier.set_password("pa55word").unwrap();
        let second = verifier.set_password("pa55word").unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_corrupt_hash_is_an_error() {
        let result = verifier().matches("pa55word", "not-a-bcrypt-hash");
        assert!(matches!(result, Err(PasswordError::CorruptHash(_))));
    }

    #[test]
    fn test_cost_is_embedded_in_hash() {
        let hash = CredentialVerifier::new(5).set_password("pa55word").unwrap();
        assert!(hash.contains("$05$"));
        assert_eq!(CredentialVerifier::default().cost(), DEFAULT_COST);
    }
}
