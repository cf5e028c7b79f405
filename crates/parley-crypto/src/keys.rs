use std::fmt;
use std::fs;
use std::path::Path;

use rand_core::OsRng;
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey, EncodeRsaPrivateKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePublicKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use tracing::info;
use zeroize::Zeroizing;

use crate::CryptoError;

pub const RSA_KEY_BITS: usize = 2048;

const PRIVATE_KEY_FILE: &str = "private.pem";
const PUBLIC_KEY_FILE: &str = "public.pem";

/// A recipient's RSA public key, safe to distribute and cache.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey(RsaPublicKey);

impl PublicKey {
    /// Parse an SPKI (`PUBLIC KEY`) or PKCS#1 (`RSA PUBLIC KEY`) PEM.
    /// Keys shorter than [`RSA_KEY_BITS`] are rejected.
    pub fn from_pem(pem: &str) -> Result<Self, CryptoError> {
        let key = RsaPublicKey::from_public_key_pem(pem)
            .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
            .map_err(|_| CryptoError::InvalidKey)?;
        if key.size() * 8 < RSA_KEY_BITS {
            return Err(CryptoError::InvalidKey);
        }
        Ok(Self(key))
    }

    /// SPKI PEM, the form uploaded to the server.
    pub fn to_pem(&self) -> Result<String, CryptoError> {
        self.0
            .to_public_key_pem(LineEnding::LF)
            .map_err(|_| CryptoError::InvalidKey)
    }

    pub fn bits(&self) -> usize {
        self.0.size() * 8
    }

    pub(crate) fn as_rsa(&self) -> &RsaPublicKey {
        &self.0
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey(rsa-{})", self.bits())
    }
}

/// Owns this client's RSA keypair. The private half never leaves this type;
/// callers get the public key or ask it to unwrap an envelope key.
pub struct KeyManager {
    private: RsaPrivateKey,
    public: PublicKey,
}

impl KeyManager {
    pub fn generate() -> Result<Self, CryptoError> {
        let private =
            RsaPrivateKey::new(&mut OsRng, RSA_KEY_BITS).map_err(|_| CryptoError::KeyGeneration)?;
        Ok(Self::from_private(private))
    }

    /// Load from PKCS#1 (`RSA PRIVATE KEY`) or PKCS#8 (`PRIVATE KEY`) PEM bytes.
    pub fn from_private_pem(pem: &[u8]) -> Result<Self, CryptoError> {
        let pem = std::str::from_utf8(pem).map_err(|_| CryptoError::InvalidKey)?;
        let private = RsaPrivateKey::from_pkcs1_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs8_pem(pem))
            .map_err(|_| CryptoError::InvalidKey)?;
        private.validate().map_err(|_| CryptoError::InvalidKey)?;
        if private.size() * 8 < RSA_KEY_BITS {
            return Err(CryptoError::InvalidKey);
        }
        Ok(Self::from_private(private))
    }

    fn from_private(private: RsaPrivateKey) -> Self {
        let public = PublicKey(private.to_public_key());
        Self { private, public }
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    pub fn public_key_pem(&self) -> Result<String, CryptoError> {
        self.public.to_pem()
    }

    /// PKCS#1 PEM of the private key, zeroed on drop.
    pub fn private_key_pem(&self) -> Result<Zeroizing<String>, CryptoError> {
        self.private
            .to_pkcs1_pem(LineEnding::LF)
            .map_err(|_| CryptoError::InvalidKey)
    }

    pub(crate) fn private_key(&self) -> &RsaPrivateKey {
        &self.private
    }

    // -- Filesystem --

    /// Load `private.pem` from `dir`.
    pub fn load(dir: &Path) -> Result<Self, CryptoError> {
        let pem = Zeroizing::new(fs::read(dir.join(PRIVATE_KEY_FILE))?);
        Self::from_private_pem(&pem)
    }

    /// Write `private.pem` (owner-only on unix) and `public.pem` into `dir`.
    pub fn save(&self, dir: &Path) -> Result<(), CryptoError> {
        fs::create_dir_all(dir)?;
        write_private(&dir.join(PRIVATE_KEY_FILE), self.private_key_pem()?.as_bytes())?;
        fs::write(dir.join(PUBLIC_KEY_FILE), self.public_key_pem()?)?;
        Ok(())
    }

    /// Load the keypair from `dir`, generating and saving one on first use.
    pub fn load_or_generate(dir: &Path) -> Result<Self, CryptoError> {
        if dir.join(PRIVATE_KEY_FILE).exists() {
            return Self::load(dir);
        }
        let keys = Self::generate()?;
        keys.save(dir)?;
        info!("Generated new RSA-{} keypair in {}", RSA_KEY_BITS, dir.display());
        Ok(keys)
    }
}

impl fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyManager")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

#[cfg(unix)]
fn write_private(path: &Path, data: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(data)
}

#[cfg(not(unix))]
fn write_private(path: &Path, data: &[u8]) -> std::io::Result<()> {
    fs::write(path, data)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::OnceLock;

    /// RSA generation is slow; share two keypairs across the crate's tests.
    pub(crate) fn alice() -> &'static KeyManager {
        static KEYS: OnceLock<KeyManager> = OnceLock::new();
        KEYS.get_or_init(|| KeyManager::generate().unwrap())
    }

    pub(crate) fn bob() -> &'static KeyManager {
        static KEYS: OnceLock<KeyManager> = OnceLock::new();
        KEYS.get_or_init(|| KeyManager::generate().unwrap())
    }

    #[test]
    fn generated_key_is_2048_bits() {
        assert_eq!(alice().public_key().bits(), RSA_KEY_BITS);
    }

    #[test]
    fn private_pem_round_trip() {
        let pem = alice().private_key_pem().unwrap();
        let restored = KeyManager::from_private_pem(pem.as_bytes()).unwrap();
        assert_eq!(restored.public_key(), alice().public_key());
    }

    #[test]
    fn public_pem_round_trip() {
        let pem = alice().public_key_pem().unwrap();
        assert!(pem.starts_with("-----BEGIN PUBLIC KEY-----"));
        assert_eq!(&PublicKey::from_pem(&pem).unwrap(), alice().public_key());
    }

    #[test]
    fn garbage_pem_rejected() {
        assert!(matches!(
            PublicKey::from_pem("-----BEGIN PUBLIC KEY-----\nAAAA\n-----END PUBLIC KEY-----"),
            Err(CryptoError::InvalidKey)
        ));
        assert!(KeyManager::from_private_pem(b"not a key").is_err());
    }

    #[test]
    fn load_or_generate_persists() {
        let dir = tempfile::tempdir().unwrap();
        let first = KeyManager::load_or_generate(dir.path()).unwrap();
        assert!(dir.path().join(PUBLIC_KEY_FILE).exists());

        let second = KeyManager::load_or_generate(dir.path()).unwrap();
        assert_eq!(first.public_key(), second.public_key());
    }

    #[cfg(unix)]
    #[test]
    fn private_key_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        alice().save(dir.path()).unwrap();
        let mode = fs::metadata(dir.path().join(PRIVATE_KEY_FILE))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
