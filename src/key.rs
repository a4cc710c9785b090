//! # Key Records and Key Files
//!
//! A [`KeyRecord`] is the project-scoped symmetric key: a server-assigned id
//! plus 256 characters of Base-64 key material.
//!
//! ## Key Files
//!
//! Local key files are named `.hxkey` and hold the record as JSON:
//!
//! ```json
//! { "secret_key_id": 1718000000, "secret_key": "<256 base64 chars>" }
//! ```
//!
//! - **Lookup**: the current directory and every ancestor, closest first,
//!   then the user's home directory
//! - **Permissions**: 0644, like the rest of the workspace files
//! - **Monorepos**: a key file at the repository root is shared by every
//!   app below it
//!
//! ## Key Material
//!
//! 256 bytes from the OS random number generator, Base-64 encoded and cut to
//! exactly [`MATERIAL_LEN`] characters. Locally minted records use the current
//! unix time as a provisional id until the key service assigns one.

use crate::crypto::CryptoKey;
use crate::error::{CipherError, KeyStoreError};
use crate::fsutil;
use base64::{engine::general_purpose::STANDARD, Engine};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

pub const KEY_FILE: &str = ".hxkey";
pub const MATERIAL_LEN: usize = 256;
const RANDOM_BYTES: usize = 256;

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRecord {
    #[serde(rename = "secret_key_id")]
    key_id: i64,
    #[serde(rename = "secret_key")]
    material: String,
}

impl KeyRecord {
    pub fn new(key_id: i64, material: impl Into<String>) -> Result<Self, KeyStoreError> {
        let record = Self {
            key_id,
            material: material.into(),
        };
        record.validate()?;
        Ok(record)
    }

    /// Mint a fresh record with a provisional, time-based id
    pub fn generate() -> Result<Self, CipherError> {
        let mut secret = [0u8; RANDOM_BYTES];
        OsRng
            .try_fill_bytes(&mut secret)
            .map_err(|e| CipherError::Entropy(e.to_string()))?;

        let mut material = STANDARD.encode(secret);
        material.truncate(MATERIAL_LEN);

        Ok(Self {
            key_id: chrono::Utc::now().timestamp(),
            material,
        })
    }

    pub fn validate(&self) -> Result<(), KeyStoreError> {
        if self.material.len() != MATERIAL_LEN {
            return Err(KeyStoreError::InvalidRecord(format!(
                "key material must be {MATERIAL_LEN} characters, got {}",
                self.material.len()
            )));
        }
        Ok(())
    }

    pub fn key_id(&self) -> i64 {
        self.key_id
    }

    pub fn material(&self) -> &str {
        &self.material
    }

    /// Same material under a different id, e.g. after the key service renumbers it
    pub fn with_key_id(mut self, key_id: i64) -> Self {
        self.key_id = key_id;
        self
    }

    pub fn crypto_key(&self) -> CryptoKey {
        CryptoKey::derive(&self.material)
    }
}

impl fmt::Debug for KeyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyRecord")
            .field("key_id", &self.key_id)
            .field("material", &"<redacted>")
            .finish()
    }
}

/// Find the closest `.hxkey` at or above `start`
pub fn find_key_file(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(KEY_FILE))
        .find(|candidate| candidate.is_file())
}

/// Load a key record from a `.hxkey` file
pub fn load_key_file(path: &Path) -> Result<KeyRecord, KeyStoreError> {
    let bytes = fs::read(path)?;
    let record: KeyRecord =
        serde_json::from_slice(&bytes).map_err(|e| KeyStoreError::InvalidKeyFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    record
        .validate()
        .map_err(|e| KeyStoreError::InvalidKeyFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    Ok(record)
}

/// Save a key record to a `.hxkey` file, replacing it atomically
pub fn save_key_file(path: &Path, record: &KeyRecord) -> Result<(), KeyStoreError> {
    let json = serde_json::to_vec_pretty(record)
        .map_err(|e| KeyStoreError::CannotPersist(e.to_string()))?;
    fsutil::write_atomic(path, &json, fsutil::FILE_MODE)?;
    Ok(())
}
