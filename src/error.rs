use std::path::PathBuf;
use thiserror::Error;

/// Failures of the symmetric cipher itself.
#[derive(Error, Debug)]
pub enum CipherError {
    #[error("Malformed ciphertext: {0}")]
    Malformed(String),

    #[error("Failed to read from the system entropy source: {0}")]
    Entropy(String),

    #[error("Invalid key material: {0}")]
    InvalidKey(String),
}

/// A user supplied environment name that cannot be canonicalised.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error(
    "Invalid environment name '{input}'. A valid name only contains lowercase letters, numbers, \
     hyphens and underscores, and starts and ends with a letter or number. Suggested valid name: {suggestion}"
)]
pub struct EnvNameError {
    pub input: String,
    pub suggestion: String,
}

/// Remote failures, classified from transport errors and status codes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("unauthorized: please authenticate and try again")]
    Unauthenticated,

    #[error("forbidden: you don't have permission to perform this action")]
    Forbidden,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("bad request: {0}")]
    KeyIdMismatch(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("rate limit exceeded: please try again later")]
    RateLimited,

    #[error("server error (status {status}): {message}")]
    Transient { status: u16, message: String },

    #[error("request failed: {0}")]
    Transport(String),

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("unexpected response (status {status}): {message}")]
    Unexpected { status: u16, message: String },
}

impl ApiError {
    /// Whether repeating the same idempotent request may succeed.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            ApiError::Transient { .. } | ApiError::RateLimited | ApiError::Transport(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound(_))
    }
}

#[derive(Error, Debug)]
pub enum KeyStoreError {
    #[error("No secret key found for {0}")]
    NotFound(String),

    #[error("Failed to persist secret key: {0}")]
    CannotPersist(String),

    #[error("Key service unavailable: {0}")]
    Transport(#[source] ApiError),

    #[error("Invalid key file {path}: {reason}")]
    InvalidKeyFile { path: PathBuf, reason: String },

    #[error("Invalid key record: {0}")]
    InvalidRecord(String),

    #[error(transparent)]
    Cipher(#[from] CipherError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache {} is locked by another hx-env process", path.display())]
    Locked { path: PathBuf },

    #[error("Cache {} is corrupt: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    #[error("I/O error on cache: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-environment failures. A sync run collects these and carries on.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Environment '{name}' does not exist in this project")]
    UnknownEnvironment { name: String },

    #[error(transparent)]
    InvalidName(#[from] EnvNameError),

    #[error("Pushing the default environment is not supported; select a named environment")]
    DefaultUnsupported,

    #[error("Secret key {key_id} is unknown and could not be fetched")]
    UnknownKey { key_id: i64 },

    #[error("Decrypted '{name}' with key {key_id} but the result is not a valid env file; wrong key?")]
    WrongKey { name: String, key_id: i64 },

    #[error(
        "Cloud '{name}' is at version {cloud_version} but the local copy is from version {local_version}. \
         Pull the latest version and push again"
    )]
    CloudAhead {
        name: String,
        cloud_version: u64,
        local_version: u64,
    },

    #[error("Local '{name}' environment has been modified. Use --force to overwrite")]
    LocalModified { name: String },

    #[error("Remote request failed: {0}")]
    Transport(#[from] ApiError),

    #[error(transparent)]
    Cipher(#[from] CipherError),

    #[error(transparent)]
    KeyStore(#[from] KeyStoreError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum RotationError {
    #[error("Environment '{name}' was updated by another writer during rotation; pull and retry")]
    Raced { name: String },

    #[error("Key rotation failed talking to the remote: {0}")]
    Transport(#[source] ApiError),

    #[error("Key rotation aborted: {0}")]
    Aborted(String),
}

#[derive(Error, Debug)]
pub enum HxError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Cipher(#[from] CipherError),

    #[error(transparent)]
    EnvName(#[from] EnvNameError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    KeyStore(#[from] KeyStoreError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Rotation(#[from] RotationError),

    #[error("{failed} environment(s) could not be synchronised")]
    Incomplete { failed: usize },

    #[error("Interrupted")]
    Cancelled,
}

impl From<config::ConfigError> for HxError {
    fn from(err: config::ConfigError) -> Self {
        HxError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, HxError>;
