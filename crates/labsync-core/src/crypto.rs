//! Encryption layer using ChaCha20-Poly1305 AEAD
//!
//! Values written to the local store are sealed with a single store key
//! supplied by the platform. The key never leaves this module.

use crate::error::SyncError;
use base64::Engine as _;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::RngCore;

/// Nonce size for ChaCha20-Poly1305 (12 bytes)
pub const NONCE_SIZE: usize = 12;

/// Authentication tag size appended by the AEAD
pub const TAG_SIZE: usize = 16;

/// Symmetric encryption for stored values.
///
/// # Wire Format
///
/// Encrypted data format: `[nonce (12 bytes)] + [ciphertext + auth_tag (16 bytes)]`
///
/// # Example
///
/// ```
/// use labsync_core::crypto::StoreCrypto;
///
/// let key = StoreCrypto::generate_key();
/// let crypto = StoreCrypto::new(&key);
///
/// let sealed = crypto.encrypt(b"specimen 42").unwrap();
/// assert_eq!(crypto.decrypt(&sealed).unwrap(), b"specimen 42");
/// ```
#[derive(Clone)]
pub struct StoreCrypto {
    cipher: ChaCha20Poly1305,
}

impl std::fmt::Debug for StoreCrypto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StoreCrypto { .. }")
    }
}

impl StoreCrypto {
    /// Create a new instance with the given 32-byte key.
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(key.into()),
        }
    }

    /// Generate a new random 32-byte encryption key.
    pub fn generate_key() -> [u8; 32] {
        let mut key = [0u8; 32];
        rand::rng().fill_bytes(&mut key);
        key
    }

    /// Decode a base64 (standard alphabet) 32-byte key.
    pub fn key_from_base64(encoded: &str) -> Result<[u8; 32], SyncError> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| SyncError::Config(format!("Invalid encryption key encoding: {}", e)))?;
        if bytes.len() != 32 {
            return Err(SyncError::Config(format!(
                "Encryption key must be 32 bytes (got {})",
                bytes.len()
            )));
        }
        let mut key = [0u8; 32];
        key.copy_from_slice(&bytes);
        Ok(key)
    }

    /// Encode a key as base64 for configuration files.
    pub fn key_to_base64(key: &[u8; 32]) -> String {
        base64::engine::general_purpose::STANDARD.encode(key)
    }

    /// Encrypt data. A fresh random nonce is prepended to the output.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, SyncError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| SyncError::Crypto(format!("Encryption failed: {}", e)))?;

        let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        result.extend_from_slice(&nonce_bytes);
        result.extend_from_slice(&ciphertext);
        Ok(result)
    }

    /// Decrypt data produced by [`StoreCrypto::encrypt`].
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, SyncError> {
        if ciphertext.len() < NONCE_SIZE + TAG_SIZE {
            return Err(SyncError::DecryptionFailed(
                "Data too short to contain nonce and tag".to_string(),
            ));
        }

        let (nonce, encrypted) = ciphertext.split_at(NONCE_SIZE);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), encrypted)
            .map_err(|e| SyncError::DecryptionFailed(e.to_string()))
    }
}
