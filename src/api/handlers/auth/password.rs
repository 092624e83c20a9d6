//! Argon2id password hashing.
//!
//! Digests are PHC strings, so each one carries its own salt and cost
//! parameters. Verification reads the parameters from the digest; the
//! configured cost only applies to new hashes.

use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{
        Error as HashError, PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
        rand_core::OsRng,
    },
};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("invalid password hashing parameters: {0}")]
    Params(String),
    #[error("failed to hash password: {0}")]
    Hash(String),
    #[error("stored password digest is unreadable: {0}")]
    Digest(String),
}

/// Adaptive cost settings for new password hashes.
#[derive(Clone, Debug)]
pub struct PasswordCodec {
    params: Params,
}

impl Default for PasswordCodec {
    fn default() -> Self {
        Self {
            params: Params::default(),
        }
    }
}

impl PasswordCodec {
    /// # Errors
    /// Returns [`CodecError::Params`] when argon2 rejects the cost combination.
    pub fn new(memory_kib: u32, iterations: u32, parallelism: u32) -> Result<Self, CodecError> {
        let params = Params::new(memory_kib, iterations, parallelism, None)
            .map_err(|e| CodecError::Params(e.to_string()))?;
        Ok(Self { params })
    }

    #[must_use]
    pub fn memory_kib(&self) -> u32 {
        self.params.m_cost()
    }

    #[must_use]
    pub fn iterations(&self) -> u32 {
        self.params.t_cost()
    }

    #[must_use]
    pub fn parallelism(&self) -> u32 {
        self.params.p_cost()
    }

    fn hasher(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    /// Hash `plaintext` with a fresh random salt.
    ///
    /// # Errors
    /// Returns [`CodecError::Hash`] if argon2 fails.
    pub fn hash(&self, plaintext: &str) -> Result<String, CodecError> {
        let salt = SaltString::generate(&mut OsRng);
        self.hasher()
            .hash_password(plaintext.as_bytes(), &salt)
            .map(|digest| digest.to_string())
            .map_err(|e| CodecError::Hash(e.to_string()))
    }

    /// Check `plaintext` against a stored digest. A mismatch is `Ok(false)`.
    ///
    /// # Errors
    /// Returns [`CodecError::Digest`] if the digest cannot be parsed or verified.
    pub fn verify(&self, plaintext: &str, digest: &str) -> Result<bool, CodecError> {
        let parsed = PasswordHash::new(digest).map_err(|e| CodecError::Digest(e.to_string()))?;
        match self.hasher().verify_password(plaintext.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(HashError::Password) => Ok(false),
            Err(e) => Err(CodecError::Digest(e.to_string())),
        }
    }
}
