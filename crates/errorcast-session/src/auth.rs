use sha2::{Digest, Sha256};
use std::fmt;
use subtle::ConstantTimeEq;

/// Verifies password attempts against the single shared access password.
///
/// Only the SHA-256 digest is kept; attempts are compared digest-to-digest in
/// constant time so neither length nor content leaks through timing.
#[derive(Clone)]
pub struct Authenticator {
    digest: [u8; 32],
}

impl Authenticator {
    /// Surrounding whitespace in `password` is ignored.
    pub fn new(password: &str) -> Self {
        Self {
            digest: Self::hash(password),
        }
    }

    pub fn verify(&self, attempt: &str) -> bool {
        Self::hash(attempt)[..].ct_eq(&self.digest[..]).into()
    }

    fn hash(value: &str) -> [u8; 32] {
        Sha256::digest(value.trim().as_bytes()).into()
    }
}

impl fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authenticator").finish_non_exhaustive()
    }
}
