//! Secret encryption using AES-256-GCM
//!
//! Every secret stored by the service (user API keys, OAuth access and refresh
//! tokens) passes through this module. Ciphertext and IV are stored separately;
//! additional authenticated data (AAD) binds a ciphertext to its owner so a row
//! copied between users fails to decrypt.

#![allow(deprecated)]

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

const KEY_LEN: usize = 32;
const KEY_HEX_LEN: usize = KEY_LEN * 2;
const IV_LEN: usize = 12;

/// Crypto error types
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    /// The master key is unusable. This is a configuration problem, not bad data.
    #[error("invalid master key: {0}")]
    InvalidKey(String),
    #[error("encryption failed")]
    EncryptionFailed,
    /// Decryption failed for any reason. The cause is deliberately opaque.
    #[error("not found or invalid")]
    Invalid,
}

/// 32-byte AES-256 master key, zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterKey(Vec<u8>);

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterKey([REDACTED])")
    }
}

impl MasterKey {
    /// Create a key from raw bytes
    pub fn new(bytes: Vec<u8>) -> Result<Self, CryptoError> {
        if bytes.len() != KEY_LEN {
            return Err(CryptoError::InvalidKey(format!(
                "expected {KEY_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        Ok(MasterKey(bytes))
    }

    /// Parse a key from exactly 64 hexadecimal characters.
    pub fn from_hex(value: &str) -> Result<Self, CryptoError> {
        let value = value.trim();
        if value.len() != KEY_HEX_LEN {
            return Err(CryptoError::InvalidKey(format!(
                "expected {KEY_HEX_LEN} hex characters, got {}",
                value.len()
            )));
        }
        let bytes = hex::decode(value)
            .map_err(|_| CryptoError::InvalidKey("value is not hexadecimal".to_string()))?;
        Self::new(bytes)
    }

    fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Ciphertext (with GCM tag) and the IV it was produced with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub ciphertext: Vec<u8>,
    pub iv: Vec<u8>,
}

/// Encrypt bytes with a fresh random 96-bit IV
pub fn encrypt(key: &MasterKey, aad: &[u8], plaintext: &[u8]) -> Result<Sealed, CryptoError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(
            &nonce,
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| CryptoError::EncryptionFailed)?;

    Ok(Sealed {
        ciphertext,
        iv: nonce.to_vec(),
    })
}

/// Decrypt bytes produced by [`encrypt`]
pub fn decrypt(
    key: &MasterKey,
    aad: &[u8],
    ciphertext: &[u8],
    iv: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if iv.len() != IV_LEN || ciphertext.is_empty() {
        return Err(CryptoError::Invalid);
    }

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    cipher
        .decrypt(
            Nonce::from_slice(iv),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| CryptoError::Invalid)
}

/// Encrypt a UTF-8 string.
pub fn encrypt_str(key: &MasterKey, aad: &[u8], plaintext: &str) -> Result<Sealed, CryptoError> {
    encrypt(key, aad, plaintext.as_bytes())
}

/// Decrypt into a UTF-8 string; invalid UTF-8 is reported as [`CryptoError::Invalid`].
pub fn decrypt_str(
    key: &MasterKey,
    aad: &[u8],
    ciphertext: &[u8],
    iv: &[u8],
) -> Result<String, CryptoError> {
    let bytes = decrypt(key, aad, ciphertext, iv)?;
    String::from_utf8(bytes).map_err(|_| CryptoError::Invalid)
}
