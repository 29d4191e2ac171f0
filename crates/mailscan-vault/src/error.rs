//! Vault error types.

use thiserror::Error;

/// Errors from credential encryption and decryption.
#[derive(Debug, Error)]
pub enum VaultError {
    /// Key material is absent or not exactly 32 bytes.
    #[error("invalid encryption key: expected {expected} bytes, got {actual}")]
    InvalidKey {
        /// Required key length.
        expected: usize,
        /// Length actually provided.
        actual: usize,
    },

    /// Key material was not valid base64.
    #[error("encryption key is not valid base64: {0}")]
    KeyEncoding(String),

    /// Encryption failed.
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// Decryption failed (wrong key, tampered data, or malformed layout).
    #[error("decryption failed: {0}")]
    Decryption(String),
}

/// Result type alias for vault operations.
pub type Result<T> = std::result::Result<T, VaultError>;
