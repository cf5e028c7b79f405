//! Envelope encryption for direct messages.
//!
//! Each call to [`encrypt`] draws a one-time AES-256 key, seals the payload
//! with AES-256-GCM, and wraps the key with RSA-OAEP(SHA-256) for a single
//! recipient. The resulting [`Envelope`] travels as base64 text inside the
//! wire `content` field.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use rand_core::OsRng;
use rsa::Oaep;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::CryptoError;
use crate::keys::{KeyManager, PublicKey};
use crate::symmetric::{self, KEY_LEN, NONCE_LEN};

/// Wrapped key plus nonce-prefixed ciphertext. Single recipient, single use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    wrapped_key: Vec<u8>,
    message: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct EnvelopeJson {
    key: String,
    message: String,
}

impl Envelope {
    /// `base64(json{"key": b64, "message": b64})`.
    pub fn to_base64(&self) -> Result<String, CryptoError> {
        let json = serde_json::to_vec(&EnvelopeJson {
            key: BASE64.encode(&self.wrapped_key),
            message: BASE64.encode(&self.message),
        })
        .map_err(|_| CryptoError::EncryptionFailed)?;
        Ok(BASE64.encode(json))
    }

    /// Any structural problem is reported as `DecryptionFailed`.
    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        let json = BASE64
            .decode(encoded.trim())
            .map_err(|_| CryptoError::DecryptionFailed)?;
        let parsed: EnvelopeJson =
            serde_json::from_slice(&json).map_err(|_| CryptoError::DecryptionFailed)?;
        let wrapped_key = BASE64
            .decode(parsed.key)
            .map_err(|_| CryptoError::DecryptionFailed)?;
        let message = BASE64
            .decode(parsed.message)
            .map_err(|_| CryptoError::DecryptionFailed)?;
        Ok(Self {
            wrapped_key,
            message,
        })
    }

    pub fn nonce(&self) -> Option<&[u8]> {
        self.message.get(..NONCE_LEN)
    }
}

/// Seal `plaintext` for the holder of `recipient`'s private key.
pub fn encrypt(plaintext: &[u8], recipient: &PublicKey) -> Result<Envelope, CryptoError> {
    let key = symmetric::generate_key()?;
    let message = symmetric::seal(&key, plaintext)?;

    let wrapped_key = recipient
        .as_rsa()
        .encrypt(&mut OsRng, Oaep::new::<Sha256>(), key.as_slice())
        .map_err(|_| CryptoError::EncryptionFailed)?;

    Ok(Envelope {
        wrapped_key,
        message,
    })
}

/// Unwrap the one-time key with our private key and authenticate-decrypt.
pub fn decrypt(envelope: &Envelope, keys: &KeyManager) -> Result<Vec<u8>, CryptoError> {
    let unwrapped = Zeroizing::new(
        keys.private_key()
            .decrypt(Oaep::new::<Sha256>(), &envelope.wrapped_key)
            .map_err(|_| CryptoError::DecryptionFailed)?,
    );
    let key: &[u8; KEY_LEN] = unwrapped
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::DecryptionFailed)?;

    symmetric::open(key, &envelope.message)
}

/// Text convenience: seal a UTF-8 message into its base64 wire form.
pub fn seal_text(plaintext: &str, recipient: &PublicKey) -> Result<String, CryptoError> {
    encrypt(plaintext.as_bytes(), recipient)?.to_base64()
}

/// Text convenience: open a base64 envelope produced by [`seal_text`].
pub fn open_text(encoded: &str, keys: &KeyManager) -> Result<String, CryptoError> {
    let envelope = Envelope::from_base64(encoded)?;
    let plaintext = decrypt(&envelope, keys)?;
    String::from_utf8(plaintext).map_err(|_| CryptoError::DecryptionFailed)
}
