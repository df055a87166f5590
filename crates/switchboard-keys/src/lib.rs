//! Key management for credential secrets
//!
//! Credential files store provider secrets as ciphertext. A [`KeyManager`]
//! turns operator-supplied plaintext into that ciphertext and recovers it
//! when a credential is resolved.

mod error;
mod oaep;

use secrecy::SecretString;

pub use error::KeyError;
pub use oaep::{DEFAULT_KEY_BITS, PRIVATE_KEY_FILE, PUBLIC_KEY_FILE, RsaKeyManager};

/// Encrypts and decrypts credential secrets
pub trait KeyManager: Send + Sync {
    /// Encrypt a plaintext secret into its at-rest representation
    ///
    /// # Errors
    ///
    /// Returns an error if the plaintext cannot be encrypted with the current key
    fn encrypt(&self, plaintext: &str) -> Result<String, KeyError>;

    /// Decrypt an at-rest secret
    ///
    /// # Errors
    ///
    /// Returns an error if the ciphertext is malformed or was produced by a different key
    fn decrypt(&self, ciphertext: &str) -> Result<SecretString, KeyError>;
}
