//! Salted PBKDF2-HMAC-SHA256 password records.
//!
//! The iteration count travels with every record, so raising
//! [`DEFAULT_ITERATIONS`] later does not invalidate stored hashes.

use std::fmt;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use hmac::Hmac;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::{CryptoError, random_bytes};

pub const SALT_LEN: usize = 32;
pub const DIGEST_LEN: usize = 32;
pub const DEFAULT_ITERATIONS: u32 = 100_000;
/// Floor for newly created hashes.
pub const MIN_ITERATIONS: u32 = 100_000;

/// A stored password verifier: digest, salt and the work factor used.
#[derive(Clone, PartialEq, Eq)]
pub struct PasswordRecord {
    pub digest: Vec<u8>,
    pub salt: Vec<u8>,
    pub iterations: u32,
}

impl PasswordRecord {
    pub fn digest_base64(&self) -> String {
        BASE64.encode(&self.digest)
    }

    pub fn salt_base64(&self) -> String {
        BASE64.encode(&self.salt)
    }

    /// Rebuild a record from its stored base64 columns.
    pub fn from_base64(digest: &str, salt: &str, iterations: u32) -> Result<Self, CryptoError> {
        let digest = BASE64.decode(digest).map_err(|_| CryptoError::InvalidKey)?;
        let salt = BASE64.decode(salt).map_err(|_| CryptoError::InvalidKey)?;
        Ok(Self {
            digest,
            salt,
            iterations,
        })
    }
}

impl fmt::Debug for PasswordRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PasswordRecord")
            .field("digest", &"<redacted>")
            .field("salt_len", &self.salt.len())
            .field("iterations", &self.iterations)
            .finish()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PasswordHasher {
    iterations: u32,
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS,
        }
    }
}

impl PasswordHasher {
    /// Counts below [`MIN_ITERATIONS`] are raised to the floor.
    pub fn new(iterations: u32) -> Self {
        Self {
            iterations: iterations.max(MIN_ITERATIONS),
        }
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Hash with a fresh random salt. Never reuses a salt across calls.
    pub fn hash(&self, password: &str) -> Result<PasswordRecord, CryptoError> {
        let salt = random_bytes::<SALT_LEN>()?;
        let digest = derive(password.as_bytes(), &salt, self.iterations)?;
        Ok(PasswordRecord {
            digest: digest.to_vec(),
            salt: salt.to_vec(),
            iterations: self.iterations,
        })
    }

    /// Re-derive with the record's own salt and iteration count and compare
    /// in constant time.
    pub fn verify(password: &str, record: &PasswordRecord) -> bool {
        if record.iterations == 0 || record.digest.len() != DIGEST_LEN {
            return false;
        }
        match derive(password.as_bytes(), &record.salt, record.iterations) {
            Ok(candidate) => candidate.as_slice().ct_eq(&record.digest).into(),
            Err(_) => false,
        }
    }

    /// True when the record predates the current work factor.
    pub fn needs_rehash(&self, record: &PasswordRecord) -> bool {
        record.iterations < self.iterations
    }
}

fn derive(
    password: &[u8],
    salt: &[u8],
    iterations: u32,
) -> Result<Zeroizing<[u8; DIGEST_LEN]>, CryptoError> {
    let mut out = Zeroizing::new([0u8; DIGEST_LEN]);
    pbkdf2::pbkdf2::<Hmac<Sha256>>(password, salt, iterations, &mut out[..])
        .map_err(|_| CryptoError::KeyDerivation)?;
    Ok(out)
}
