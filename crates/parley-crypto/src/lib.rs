/// Parley Crypto Library
///
/// - PBKDF2-HMAC-SHA256 password records with a stored iteration count
/// - RSA-2048 identity keypairs, PEM encoded at rest
/// - Hybrid envelopes: one-time AES-256-GCM key per message, wrapped with
///   RSA-OAEP(SHA-256) for exactly one recipient

pub mod error;
#[cfg(feature = "client")]
pub mod hybrid;
pub mod keys;
pub mod password;
pub mod symmetric;

pub use error::CryptoError;
pub use keys::{KeyManager, PublicKey};
pub use password::{PasswordHasher, PasswordRecord};

use rand_core::{OsRng, RngCore};

/// Fill a fixed-size array from the OS CSPRNG.
pub fn random_bytes<const N: usize>() -> Result<[u8; N], CryptoError> {
    let mut bytes = [0u8; N];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|_| CryptoError::Rng)?;
    Ok(bytes)
}
