use std::fs;
use std::path::{Path, PathBuf};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey, LineEnding};
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey};
use rsa::rand_core::OsRng;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use secrecy::SecretString;
use sha2::Sha256;

use crate::{KeyError, KeyManager};

/// Private key file name inside the key directory (PKCS#1 PEM)
pub const PRIVATE_KEY_FILE: &str = "private_key.pem";

/// Public key file name inside the key directory (SPKI PEM)
pub const PUBLIC_KEY_FILE: &str = "public_key.pem";

/// Modulus size used when a key directory has no keypair yet
pub const DEFAULT_KEY_BITS: usize = 2048;

/// RSA-OAEP (SHA-256) key manager
///
/// Ciphertext is the standard base64 encoding of the raw OAEP block.
pub struct RsaKeyManager {
    private_key: RsaPrivateKey,
    public_key: RsaPublicKey,
}

impl RsaKeyManager {
    /// Load the keypair stored in `dir`, generating and persisting one if absent
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created, existing key files
    /// cannot be decoded, or a fresh keypair cannot be written
    pub fn open_or_create(dir: &Path) -> Result<Self, KeyError> {
        let private_path = dir.join(PRIVATE_KEY_FILE);
        let public_path = dir.join(PUBLIC_KEY_FILE);

        if private_path.exists() && public_path.exists() {
            let private_pem = read(&private_path)?;
            let public_pem = read(&public_path)?;
            let manager = Self::from_pem(&private_pem, &public_pem).map_err(|e| match e {
                KeyError::InvalidKey { reason, .. } => KeyError::InvalidKey {
                    path: dir.to_path_buf(),
                    reason,
                },
                other => other,
            })?;

            tracing::debug!(dir = %dir.display(), "loaded credential keypair");
            return Ok(manager);
        }

        tracing::info!(dir = %dir.display(), bits = DEFAULT_KEY_BITS, "generating credential keypair");

        let manager = Self::generate(DEFAULT_KEY_BITS)?;
        manager.persist(dir)?;

        Ok(manager)
    }

    /// Build a key manager from PEM-encoded key material
    ///
    /// # Errors
    ///
    /// Returns an error if either PEM block cannot be decoded
    pub fn from_pem(private_pem: &str, public_pem: &str) -> Result<Self, KeyError> {
        let private_key = RsaPrivateKey::from_pkcs1_pem(private_pem).map_err(|e| KeyError::InvalidKey {
            path: PathBuf::from(PRIVATE_KEY_FILE),
            reason: e.to_string(),
        })?;
        let public_key = RsaPublicKey::from_public_key_pem(public_pem).map_err(|e| KeyError::InvalidKey {
            path: PathBuf::from(PUBLIC_KEY_FILE),
            reason: e.to_string(),
        })?;

        Ok(Self {
            private_key,
            public_key,
        })
    }

    /// Generate an in-memory keypair with the given modulus size
    ///
    /// # Errors
    ///
    /// Returns an error if the system RNG fails or the size is unsupported
    pub fn generate(bits: usize) -> Result<Self, KeyError> {
        let private_key = RsaPrivateKey::new(&mut OsRng, bits).map_err(|e| KeyError::Generate(e.to_string()))?;
        let public_key = RsaPublicKey::from(&private_key);

        Ok(Self {
            private_key,
            public_key,
        })
    }

    /// Write the keypair into `dir`
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or either key file cannot be written
    pub fn persist(&self, dir: &Path) -> Result<(), KeyError> {
        fs::create_dir_all(dir).map_err(|source| KeyError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let private_pem = self
            .private_key
            .to_pkcs1_pem(LineEnding::LF)
            .map_err(|e| KeyError::Generate(e.to_string()))?;
        let public_pem = self
            .public_key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| KeyError::Generate(e.to_string()))?;

        let private_path = dir.join(PRIVATE_KEY_FILE);
        write(&private_path, private_pem.as_bytes())?;
        restrict_permissions(&private_path)?;

        write(&dir.join(PUBLIC_KEY_FILE), public_pem.as_bytes())
    }
}

impl KeyManager for RsaKeyManager {
    fn encrypt(&self, plaintext: &str) -> Result<String, KeyError> {
        let block = self
            .public_key
            .encrypt(&mut OsRng, Oaep::new::<Sha256>(), plaintext.as_bytes())
            .map_err(|e| KeyError::Encrypt(e.to_string()))?;

        Ok(STANDARD.encode(block))
    }

    fn decrypt(&self, ciphertext: &str) -> Result<SecretString, KeyError> {
        let block = STANDARD
            .decode(ciphertext.trim())
            .map_err(|e| KeyError::MalformedCiphertext(e.to_string()))?;

        let plaintext = self
            .private_key
            .decrypt(Oaep::new::<Sha256>(), &block)
            .map_err(|e| KeyError::Decrypt(e.to_string()))?;

        String::from_utf8(plaintext)
            .map(SecretString::from)
            .map_err(|_| KeyError::InvalidUtf8)
    }
}

fn read(path: &Path) -> Result<String, KeyError> {
    fs::read_to_string(path).map_err(|source| KeyError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn write(path: &Path, contents: &[u8]) -> Result<(), KeyError> {
    fs::write(path, contents).map_err(|source| KeyError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<(), KeyError> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|source| KeyError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(not(unix))]
#[allow(clippy::unnecessary_wraps)]
fn restrict_permissions(_path: &Path) -> Result<(), KeyError> {
    Ok(())
}
