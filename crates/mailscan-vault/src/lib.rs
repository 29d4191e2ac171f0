//! Mailscan Vault - at-rest protection for mail credentials.
//!
//! Refresh tokens are authenticated-encrypted before they reach the
//! database. There is no fallback to plaintext: a ciphertext that fails
//! authentication is an error, and a process without a well-formed
//! 32-byte key refuses to construct a cipher at all.
//!
//! # Storage layout
//!
//! `base64(nonce(12) || tag(16) || ciphertext)`. Each encryption draws a
//! fresh random nonce, so equal plaintexts never produce equal ciphertexts.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod cipher;
pub mod error;

pub use cipher::{TokenCipher, KEY_LENGTH, NONCE_LENGTH, TAG_LENGTH};
pub use error::{Result, VaultError};
