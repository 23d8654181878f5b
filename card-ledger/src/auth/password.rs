//! Password hashing capability
//!
//! The core never sees how hashes are produced; it consumes this trait. The
//! bcrypt implementation is the default wiring.

use bcrypt::{hash, verify, DEFAULT_COST};

use crate::error::{Error, Result};

/// Capability for producing and checking password hashes.
pub trait PasswordVerifier: Send + Sync {
    /// Hash a raw password into an opaque, storable form.
    fn hash(&self, raw: &str) -> Result<String>;

    /// Check a raw password against a stored hash.
    fn verify(&self, raw: &str, hash: &str) -> Result<bool>;
}

/// Bcrypt-backed verifier.
pub struct BcryptVerifier {
    cost: u32,
}

impl BcryptVerifier {
    pub fn new() -> Self {
        Self { cost: DEFAULT_COST }
    }

    /// Lower the work factor. Tests use this; production keeps the default.
    pub fn with_cost(cost: u32) -> Self {
        Self { cost }
    }
}

impl Default for BcryptVerifier {
    fn default() -> Self {
        Self::new()
    }
}

impl PasswordVerifier for BcryptVerifier {
    fn hash(&self, raw: &str) -> Result<String> {
        hash(raw, self.cost).map_err(|e| Error::Internal(format!("password hashing failed: {e}")))
    }

    fn verify(&self, raw: &str, hash: &str) -> Result<bool> {
        verify(raw, hash)
            .map_err(|e| Error::Internal(format!("password verification failed: {e}")))
    }
}
