use thiserror::Error;

/// Crypto failures. Messages stay vague on purpose; in particular every
/// decryption sub-step collapses into [`CryptoError::DecryptionFailed`].
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("random number generator failure")]
    Rng,

    #[error("key generation failed")]
    KeyGeneration,

    #[error("invalid key material")]
    InvalidKey,

    #[error("key derivation failed")]
    KeyDerivation,

    #[error("encryption failed")]
    EncryptionFailed,

    #[error("decryption failed")]
    DecryptionFailed,

    #[error("key storage error: {0}")]
    Io(#[from] std::io::Error),
}
