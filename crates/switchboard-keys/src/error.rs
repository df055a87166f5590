use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by key management
#[derive(Debug, Error)]
pub enum KeyError {
    /// Key material could not be read or written
    #[error("key file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Key material exists but cannot be decoded
    #[error("invalid key material in {path}: {reason}")]
    InvalidKey { path: PathBuf, reason: String },

    /// A new keypair could not be generated
    #[error("key generation failed: {0}")]
    Generate(String),

    /// Plaintext could not be encrypted (usually too long for the key size)
    #[error("encryption failed: {0}")]
    Encrypt(String),

    /// Ciphertext is not valid base64
    #[error("malformed ciphertext: {0}")]
    MalformedCiphertext(String),

    /// Ciphertext does not decrypt under the current key
    #[error("decryption failed: {0}")]
    Decrypt(String),

    /// Decrypted bytes are not UTF-8
    #[error("decrypted value is not valid UTF-8")]
    InvalidUtf8,
}
