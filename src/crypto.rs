//! # Cryptographic Operations
//!
//! Symmetric encryption of environment payloads with AES-256 in CFB mode.
//!
//! ## Algorithm
//!
//! - **Cipher**: AES-256, full-block CFB (128-bit segments)
//! - **Key size**: 256 bits (32 bytes), derived from the project key record
//! - **IV size**: 128 bits (16 bytes), fresh from the OS random number generator
//! - **Authentication**: none; see [`crate::sync`] for wrong-key detection
//!
//! ## Key Derivation
//!
//! The AES key is the first 32 characters of the lowercase hex SHA-256 digest
//! of the record's Base-64 material, used as raw bytes. Existing ciphertexts
//! depend on this exact derivation.
//!
//! ## Encrypted Data Format
//!
//! ```text
//! url-safe-base64( [16-byte IV][CFB(plaintext)] )
//! ```
//!
//! The decoded ciphertext is always exactly 16 bytes longer than the plaintext.

use crate::error::CipherError;
use crate::key::KeyRecord;
use aes::cipher::{AsyncStreamCipher, KeyIvInit};
use base64::{engine::general_purpose::URL_SAFE, Engine};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

pub const KEY_SIZE: usize = 32; // 256 bits
pub const IV_SIZE: usize = 16; // one AES block

type Aes256CfbEnc = cfb_mode::Encryptor<aes::Aes256>;
type Aes256CfbDec = cfb_mode::Decryptor<aes::Aes256>;

#[derive(Clone)]
pub struct CryptoKey {
    key: [u8; KEY_SIZE],
}

impl CryptoKey {
    /// Derive the AES key from Base-64 key material
    pub fn derive(material: &str) -> Self {
        let digest = hex::encode(Sha256::digest(material.as_bytes()));
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(&digest.as_bytes()[..KEY_SIZE]);
        Self { key }
    }

    /// Create a key from existing bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CipherError> {
        if bytes.len() != KEY_SIZE {
            return Err(CipherError::InvalidKey(format!(
                "expected {KEY_SIZE} bytes, got {}",
                bytes.len()
            )));
        }
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(bytes);
        Ok(Self { key })
    }

    /// Get the key as bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.key
    }

    /// Encrypt data, returning url-safe Base-64 of `IV || ciphertext`
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String, CipherError> {
        let mut iv = [0u8; IV_SIZE];
        OsRng
            .try_fill_bytes(&mut iv)
            .map_err(|e| CipherError::Entropy(e.to_string()))?;
        self.encrypt_with_iv(&iv, plaintext)
    }

    fn encrypt_with_iv(&self, iv: &[u8; IV_SIZE], plaintext: &[u8]) -> Result<String, CipherError> {
        let mut buf = Vec::with_capacity(IV_SIZE + plaintext.len());
        buf.extend_from_slice(iv);
        buf.extend_from_slice(plaintext);

        Aes256CfbEnc::new_from_slices(&self.key, iv)
            .map_err(|e| CipherError::InvalidKey(e.to_string()))?
            .encrypt(&mut buf[IV_SIZE..]);

        Ok(URL_SAFE.encode(&buf))
    }

    /// Decrypt url-safe Base-64 of `IV || ciphertext`
    ///
    /// A wrong key is not detected here: CFB decrypts anything to *some* bytes.
    pub fn decrypt(&self, ciphertext: &str) -> Result<Vec<u8>, CipherError> {
        let mut data = URL_SAFE
            .decode(ciphertext.trim())
            .map_err(|e| CipherError::Malformed(e.to_string()))?;

        if data.len() < IV_SIZE {
            return Err(CipherError::Malformed(format!(
                "ciphertext is {} bytes, shorter than the {IV_SIZE}-byte IV",
                data.len()
            )));
        }

        let (iv, body) = data.split_at_mut(IV_SIZE);
        Aes256CfbDec::new_from_slices(&self.key, iv)
            .map_err(|e| CipherError::InvalidKey(e.to_string()))?
            .decrypt(body);

        Ok(data.split_off(IV_SIZE))
    }
}

/// Encrypt a payload under a project key record
pub fn encrypt(plaintext: &str, record: &KeyRecord) -> Result<String, CipherError> {
    record.crypto_key().encrypt(plaintext.as_bytes())
}

/// Decrypt a payload produced by [`encrypt`]
pub fn decrypt(ciphertext: &str, record: &KeyRecord) -> Result<Vec<u8>, CipherError> {
    record.crypto_key().decrypt(ciphertext)
}
