//! Credential encryption using ChaCha20-Poly1305 AEAD.
//!
//! Provides encryption and decryption of credential strings (OAuth refresh
//! tokens) with a process-wide 256-bit key.
//!
//! # Security Properties
//!
//! - **Confidentiality**: `ChaCha20` stream cipher
//! - **Authenticity**: `Poly1305` MAC, verified before any plaintext is
//!   returned; decryption fails closed
//! - **Nonce**: 96-bit random nonce per encryption
//! - **Key**: 256-bit process secret, zeroized on drop

use crate::error::{Result, VaultError};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chacha20poly1305::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    ChaCha20Poly1305, Nonce,
};
use zeroize::Zeroizing;

/// Length of the encryption key in bytes (256 bits).
pub const KEY_LENGTH: usize = 32;

/// Length of the nonce in bytes (96 bits for ChaCha20-Poly1305).
pub const NONCE_LENGTH: usize = 12;

/// Length of the Poly1305 authentication tag in bytes.
pub const TAG_LENGTH: usize = 16;

/// AEAD cipher for credential strings.
///
/// Construction validates the key size up front; a misconfigured key is a
/// startup failure, never a silent downgrade.
pub struct TokenCipher {
    key: Zeroizing<[u8; KEY_LENGTH]>,
}

impl TokenCipher {
    /// Create a cipher from raw 32-byte key material.
    #[must_use]
    pub fn new(key: [u8; KEY_LENGTH]) -> Self {
        Self {
            key: Zeroizing::new(key),
        }
    }

    /// Create a cipher from a base64-encoded key.
    ///
    /// # Errors
    /// Returns `VaultError::KeyEncoding` for invalid base64 and
    /// `VaultError::InvalidKey` when the decoded key is not 32 bytes.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let raw = BASE64
            .decode(encoded.trim())
            .map_err(|e| VaultError::KeyEncoding(e.to_string()))?;
        let raw = Zeroizing::new(raw);

        let key: [u8; KEY_LENGTH] =
            raw.as_slice()
                .try_into()
                .map_err(|_| VaultError::InvalidKey {
                    expected: KEY_LENGTH,
                    actual: raw.len(),
                })?;

        Ok(Self::new(key))
    }

    /// Encrypt a credential string.
    ///
    /// Returns the persisted form: `base64(nonce || tag || ciphertext)`.
    ///
    /// # Errors
    /// Returns `VaultError::Encryption` if the AEAD operation fails.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let cipher = ChaCha20Poly1305::new((&*self.key).into());
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);

        // The aead crate returns ciphertext || tag; storage wants the tag
        // between the nonce and the ciphertext.
        let sealed = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| VaultError::Encryption(e.to_string()))?;
        let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_LENGTH);

        let mut out = Vec::with_capacity(NONCE_LENGTH + sealed.len());
        out.extend_from_slice(nonce.as_slice());
        out.extend_from_slice(tag);
        out.extend_from_slice(ciphertext);

        Ok(BASE64.encode(out))
    }

    /// Decrypt a stored credential string.
    ///
    /// # Errors
    /// Returns `VaultError::Decryption` when the payload is malformed, the
    /// key is wrong, or any byte of nonce/tag/ciphertext was altered.
    pub fn decrypt(&self, stored: &str) -> Result<String> {
        let raw = BASE64
            .decode(stored)
            .map_err(|e| VaultError::Decryption(format!("invalid base64: {e}")))?;

        if raw.len() < NONCE_LENGTH + TAG_LENGTH {
            return Err(VaultError::Decryption(format!(
                "payload too short: {} bytes",
                raw.len()
            )));
        }

        let (nonce, rest) = raw.split_at(NONCE_LENGTH);
        let (tag, ciphertext) = rest.split_at(TAG_LENGTH);

        let mut sealed = Vec::with_capacity(ciphertext.len() + TAG_LENGTH);
        sealed.extend_from_slice(ciphertext);
        sealed.extend_from_slice(tag);

        let cipher = ChaCha20Poly1305::new((&*self.key).into());
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), sealed.as_ref())
            .map_err(|_| VaultError::Decryption("authentication failed".to_string()))?;

        String::from_utf8(plaintext)
            .map_err(|e| VaultError::Decryption(format!("invalid utf-8: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cipher() -> TokenCipher {
        TokenCipher::new([0x42; KEY_LENGTH])
    }

    #[test]
    fn test_encrypt_decrypt_round_trip() {
        let cipher = test_cipher();
        let token = "1//0gRefreshTokenMaterial-abc123";

        let stored = cipher.encrypt(token).expect("encrypt");
        let decrypted = cipher.decrypt(&stored).expect("decrypt");

        assert_eq!(decrypted, token);
    }

    #[test]
    fn test_empty_and_unicode_plaintexts() {
        let cipher = test_cipher();
        for token in ["", "Hello 世界 🌍"] {
            let stored = cipher.encrypt(token).expect("encrypt");
            assert_eq!(cipher.decrypt(&stored).expect("decrypt"), token);
        }
    }

    #[test]
    fn test_fresh_nonce_per_encryption() {
        let cipher = test_cipher();
        let a = cipher.encrypt("same-token").expect("encrypt a");
        let b = cipher.encrypt("same-token").expect("encrypt b");
        assert_ne!(a, b);
        assert_eq!(cipher.decrypt(&a).expect("decrypt a"), "same-token");
        assert_eq!(cipher.decrypt(&b).expect("decrypt b"), "same-token");
    }

    #[test]
    fn test_wrong_key_fails_closed() {
        let stored = test_cipher().encrypt("secret").expect("encrypt");
        let other = TokenCipher::new([0x43; KEY_LENGTH]);

        let result = other.decrypt(&stored);
        assert!(matches!(result, Err(VaultError::Decryption(_))));
    }

    #[test]
    fn test_any_corrupted_byte_fails_closed() {
        let cipher = test_cipher();
        let stored = cipher.encrypt("secret").expect("encrypt");
        let raw = BASE64.decode(&stored).expect("decode");

        // Flip one byte in the nonce, the tag, and the ciphertext regions.
        for index in [0, NONCE_LENGTH, raw.len() - 1] {
            let mut tampered = raw.clone();
            tampered[index] ^= 0xFF;
            let result = cipher.decrypt(&BASE64.encode(&tampered));
            assert!(
                matches!(result, Err(VaultError::Decryption(_))),
                "byte {index} corruption must not decrypt"
            );
        }
    }

    #[test]
    fn test_malformed_payloads_rejected() {
        let cipher = test_cipher();
        assert!(matches!(
            cipher.decrypt("not base64 at all!!"),
            Err(VaultError::Decryption(_))
        ));
        // Valid base64 but shorter than nonce + tag.
        assert!(matches!(
            cipher.decrypt(&BASE64.encode([0u8; 10])),
            Err(VaultError::Decryption(_))
        ));
    }

    #[test]
    fn test_key_sizing_is_enforced() {
        let short = BASE64.encode([0u8; 16]);
        assert!(matches!(
            TokenCipher::from_base64(&short),
            Err(VaultError::InvalidKey {
                expected: KEY_LENGTH,
                actual: 16
            })
        ));

        assert!(matches!(
            TokenCipher::from_base64("!!not-base64!!"),
            Err(VaultError::KeyEncoding(_))
        ));

        let good = BASE64.encode([7u8; KEY_LENGTH]);
        assert!(TokenCipher::from_base64(&good).is_ok());
    }
}
