//! Stored value framing: optional zstd compression, then optional
//! ChaCha20-Poly1305 encryption.
//!
//! ## Frame Format
//!
//! ```text
//! +----------+--------+---------------------------------------+
//! | version  | flags  | payload                               |
//! | (1 byte) | (1)    | (json | zstd(json) | sealed(...))     |
//! +----------+--------+---------------------------------------+
//! ```
//!
//! Compression runs before encryption; ciphertext does not compress.

use crate::crypto::StoreCrypto;
use crate::error::SyncError;

/// Current frame format version
pub const FRAME_VERSION: u8 = 1;

const FLAG_COMPRESSED: u8 = 0b0000_0001;
const FLAG_ENCRYPTED: u8 = 0b0000_0010;
const HEADER_LEN: usize = 2;

/// zstd level 3 = fast with good compression
const ZSTD_LEVEL: i32 = 3;

/// Encodes and decodes stored values according to the platform's
/// encryption key and compression threshold.
#[derive(Debug, Clone)]
pub struct ValueCodec {
    crypto: Option<StoreCrypto>,
    compression_threshold: Option<usize>,
}

impl ValueCodec {
    pub fn new(encryption_key: Option<&[u8; 32]>, compression_threshold: Option<usize>) -> Self {
        Self {
            crypto: encryption_key.map(StoreCrypto::new),
            compression_threshold,
        }
    }

    /// Codec that stores plain JSON
    pub fn plain() -> Self {
        Self::new(None, None)
    }

    pub fn is_encrypting(&self) -> bool {
        self.crypto.is_some()
    }

    pub fn encode(&self, plaintext: &[u8]) -> Result<Vec<u8>, SyncError> {
        let mut flags = 0u8;
        let mut payload = plaintext.to_vec();

        if let Some(threshold) = self.compression_threshold {
            if payload.len() >= threshold {
                let compressed = zstd::encode_all(&payload[..], ZSTD_LEVEL)
                    .map_err(|e| SyncError::Serialization(format!("Compression failed: {}", e)))?;
                // Keep the smaller representation
                if compressed.len() < payload.len() {
                    payload = compressed;
                    flags |= FLAG_COMPRESSED;
                }
            }
        }

        if let Some(crypto) = &self.crypto {
            payload = crypto.encrypt(&payload)?;
            flags |= FLAG_ENCRYPTED;
        }

        let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
        frame.push(FRAME_VERSION);
        frame.push(flags);
        frame.extend_from_slice(&payload);
        Ok(frame)
    }

    pub fn decode(&self, frame: &[u8]) -> Result<Vec<u8>, SyncError> {
        if frame.len() < HEADER_LEN {
            return Err(SyncError::Serialization(
                "Stored value shorter than frame header".to_string(),
            ));
        }
        let version = frame[0];
        if version != FRAME_VERSION {
            return Err(SyncError::FrameVersionUnsupported(version));
        }
        let flags = frame[1];
        let mut payload = frame[HEADER_LEN..].to_vec();

        if flags & FLAG_ENCRYPTED != 0 {
            let crypto = self.crypto.as_ref().ok_or_else(|| {
                SyncError::Crypto("Value is encrypted but no store key is configured".to_string())
            })?;
            payload = crypto.decrypt(&payload)?;
        }

        if flags & FLAG_COMPRESSED != 0 {
            payload = zstd::decode_all(&payload[..])
                .map_err(|e| SyncError::Serialization(format!("Decompression failed: {}", e)))?;
        }

        Ok(payload)
    }
}
