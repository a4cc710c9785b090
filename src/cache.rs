//! # Local Cache
//!
//! Plaintext hash and version of every environment this machine has synced,
//! stored in the `database` subtree of the user-level `~/.hx` file:
//!
//! ```json
//! {
//!   "organization_id": "...",
//!   "database": {
//!     "secrets": { "<project>": { "<app>": { "<env>": { "version": 3, "hash": "<sha256 hex>" } } } },
//!     "rotations": { "<project>": { "key": { ... }, "previous": { ... }, "rotated": { "<app>": { "<env>": 4 } } } }
//!   }
//! }
//! ```
//!
//! Every other field of the file is preserved on rewrite. The file is kept at
//! mode 0600 because a pending rotation holds key material. Writers take an
//! advisory lock on `<file>.lock` for the duration of one read-modify-write
//! and replace the file atomically, so readers never need the lock.

use crate::envfile::{content_hash, EnvName};
use crate::error::CacheError;
use crate::fsutil;
use crate::key::KeyRecord;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

pub const CONFIG_FILE: &str = ".hx";
const DATABASE_FIELD: &str = "database";
const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(2);
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub version: u64,
    pub hash: String,
}

impl CacheEntry {
    pub fn new(plaintext: &str, version: u64) -> Self {
        Self {
            version,
            hash: content_hash(plaintext),
        }
    }

    pub fn matches(&self, plaintext_hash: &str) -> bool {
        self.hash == plaintext_hash
    }
}

/// A key rotation whose new key is published but not yet applied to every environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRotation {
    /// The new key, with the id the key store assigned it
    pub key: KeyRecord,
    /// The key being replaced; a local key file no longer holds it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous: Option<KeyRecord>,
    /// app -> env -> version written under `key`
    #[serde(default)]
    pub rotated: BTreeMap<String, BTreeMap<String, u64>>,
}

impl PendingRotation {
    pub fn rotated_version(&self, app: &str, env: &EnvName) -> Option<u64> {
        self.rotated.get(app)?.get(env.as_str()).copied()
    }
}

type SecretTree = BTreeMap<String, BTreeMap<String, BTreeMap<String, CacheEntry>>>;

#[derive(Debug, Default, Serialize, Deserialize)]
struct Database {
    #[serde(default)]
    secrets: SecretTree,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    rotations: BTreeMap<String, PendingRotation>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

/// Held while a writer owns the cache; released on drop.
struct LockGuard {
    file: File,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[derive(Debug, Clone)]
pub struct LocalCache {
    path: PathBuf,
    lock_timeout: Duration,
}

impl LocalCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// The cache inside `<home>/.hx`
    pub fn in_home(home: &Path) -> Self {
        Self::new(home.join(CONFIG_FILE))
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(
        &self,
        project: &str,
        app: &str,
        env: &EnvName,
    ) -> Result<Option<CacheEntry>, CacheError> {
        let (_, db) = self.load()?;
        Ok(db
            .secrets
            .get(project)
            .and_then(|apps| apps.get(app))
            .and_then(|envs| envs.get(env.as_str()))
            .cloned())
    }

    /// Record the plaintext hash and accepted version of one environment
    pub fn put(
        &self,
        project: &str,
        app: &str,
        env: &EnvName,
        plaintext: &str,
        version: u64,
    ) -> Result<CacheEntry, CacheError> {
        let entry = CacheEntry::new(plaintext, version);
        let stored = entry.clone();
        self.update(|db| {
            db.secrets
                .entry(project.to_string())
                .or_default()
                .entry(app.to_string())
                .or_default()
                .insert(env.as_str().to_string(), stored);
        })?;
        debug!(project, app, env = %env, version, "cache updated");
        Ok(entry)
    }

    pub fn pending_rotation(&self, project: &str) -> Result<Option<PendingRotation>, CacheError> {
        let (_, db) = self.load()?;
        Ok(db.rotations.get(project).cloned())
    }

    /// Record the published key before anything is written under it
    pub fn begin_rotation(
        &self,
        project: &str,
        key: &KeyRecord,
        previous: Option<&KeyRecord>,
    ) -> Result<(), CacheError> {
        let pending = PendingRotation {
            key: key.clone(),
            previous: previous.cloned(),
            rotated: BTreeMap::new(),
        };
        self.update(|db| {
            db.rotations.insert(project.to_string(), pending);
        })
    }

    pub fn mark_rotated(
        &self,
        project: &str,
        app: &str,
        env: &EnvName,
        version: u64,
    ) -> Result<(), CacheError> {
        self.update(|db| {
            if let Some(pending) = db.rotations.get_mut(project) {
                pending
                    .rotated
                    .entry(app.to_string())
                    .or_default()
                    .insert(env.as_str().to_string(), version);
            }
        })
    }

    pub fn finish_rotation(&self, project: &str) -> Result<(), CacheError> {
        self.update(|db| {
            db.rotations.remove(project);
        })
    }

    fn update(&self, mutate: impl FnOnce(&mut Database)) -> Result<(), CacheError> {
        let _guard = self.lock()?;
        let (mut root, mut db) = self.load()?;
        mutate(&mut db);

        let db = serde_json::to_value(&db).map_err(|e| self.corrupt(e))?;
        root.insert(DATABASE_FIELD.to_string(), db);
        let json = serde_json::to_vec_pretty(&Value::Object(root)).map_err(|e| self.corrupt(e))?;
        fsutil::write_atomic(&self.path, &json, fsutil::PRIVATE_MODE)?;
        Ok(())
    }

    fn load(&self) -> Result<(Map<String, Value>, Database), CacheError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok((Map::new(), Database::default()));
        }

        let mut root = match serde_json::from_slice::<Value>(&bytes).map_err(|e| self.corrupt(e))? {
            Value::Object(root) => root,
            _ => {
                return Err(CacheError::Corrupt {
                    path: self.path.clone(),
                    reason: "top level is not a JSON object".into(),
                })
            }
        };

        let db = match root.remove(DATABASE_FIELD) {
            None | Some(Value::Null) => Database::default(),
            Some(value) => serde_json::from_value(value).map_err(|e| self.corrupt(e))?,
        };
        Ok((root, db))
    }

    fn lock(&self) -> Result<LockGuard, CacheError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let lock_path = self.lock_path();
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)?;

        let deadline = Instant::now() + self.lock_timeout;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(LockGuard { file }),
                Err(_) if Instant::now() < deadline => thread::sleep(LOCK_POLL_INTERVAL),
                Err(_) => {
                    return Err(CacheError::Locked {
                        path: self.path.clone(),
                    })
                }
            }
        }
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(".lock");
        PathBuf::from(name)
    }

    fn corrupt(&self, err: serde_json::Error) -> CacheError {
        CacheError::Corrupt {
            path: self.path.clone(),
            reason: err.to_string(),
        }
    }
}
