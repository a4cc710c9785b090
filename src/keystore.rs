//! # Key Store
//!
//! Resolves the project key through an ordered list of [`KeyProvider`]s. The
//! first provider that knows a key wins:
//!
//! 1. [`RemoteKeyProvider`], the project key service
//! 2. [`FileKeyProvider`], the closest `.hxkey` at or above the workspace,
//!    then `~/.hxkey`
//!
//! When no provider has a key, a new record is minted and persisted through
//! the first provider. An unreachable key service never leads to minting:
//! if a later provider has no key either, the transport error is surfaced.
//!
//! Resolved records are cached in memory for the life of the store, both as
//! the project's current key and by id.

use crate::api::KeyService;
use crate::error::{ApiError, KeyStoreError};
use crate::git::GitRepo;
use crate::key::{self, KeyRecord, KEY_FILE};
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, info, warn};

pub trait KeyProvider {
    fn name(&self) -> &'static str;

    /// The project's current key, `None` if this provider has none
    fn current(&self, org: &str, project: &str) -> Result<Option<KeyRecord>, KeyStoreError>;

    fn by_id(&self, org: &str, project: &str, key_id: i64)
        -> Result<Option<KeyRecord>, KeyStoreError>;

    /// Persist `record`; the returned record is canonical and may carry a new id
    fn put(&self, org: &str, project: &str, record: &KeyRecord)
        -> Result<KeyRecord, KeyStoreError>;
}

pub struct RemoteKeyProvider {
    service: Box<dyn KeyService>,
}

impl RemoteKeyProvider {
    pub fn new(service: Box<dyn KeyService>) -> Self {
        Self { service }
    }

    fn lookup(result: Result<KeyRecord, ApiError>) -> Result<Option<KeyRecord>, KeyStoreError> {
        match result {
            Ok(record) => Ok(Some(record)),
            Err(ApiError::NotFound(_)) => Ok(None),
            Err(e) => Err(KeyStoreError::Transport(e)),
        }
    }
}

impl KeyProvider for RemoteKeyProvider {
    fn name(&self) -> &'static str {
        "key service"
    }

    fn current(&self, org: &str, project: &str) -> Result<Option<KeyRecord>, KeyStoreError> {
        Self::lookup(self.service.get_key(org, project))
    }

    fn by_id(
        &self,
        org: &str,
        project: &str,
        key_id: i64,
    ) -> Result<Option<KeyRecord>, KeyStoreError> {
        Self::lookup(self.service.get_key_by_id(org, project, key_id))
    }

    fn put(
        &self,
        org: &str,
        project: &str,
        record: &KeyRecord,
    ) -> Result<KeyRecord, KeyStoreError> {
        self.service
            .save_key(org, project, record)
            .map_err(|e| KeyStoreError::CannotPersist(e.to_string()))
    }
}

/// `.hxkey` files on disk.
pub struct FileKeyProvider {
    start_dir: PathBuf,
    home_dir: Option<PathBuf>,
    write_path: PathBuf,
}

impl FileKeyProvider {
    /// Look up from `start_dir` upwards, then in `home_dir`; write new keys
    /// into `start_dir`.
    pub fn new(start_dir: impl Into<PathBuf>, home_dir: Option<PathBuf>) -> Self {
        let start_dir = start_dir.into();
        Self {
            write_path: start_dir.join(KEY_FILE),
            start_dir,
            home_dir,
        }
    }

    fn locate(&self) -> Option<PathBuf> {
        key::find_key_file(&self.start_dir).or_else(|| {
            self.home_dir
                .as_ref()
                .map(|home| home.join(KEY_FILE))
                .filter(|path| path.is_file())
        })
    }
}

impl KeyProvider for FileKeyProvider {
    fn name(&self) -> &'static str {
        "key file"
    }

    fn current(&self, _org: &str, _project: &str) -> Result<Option<KeyRecord>, KeyStoreError> {
        match self.locate() {
            Some(path) => {
                debug!(path = %path.display(), "using key file");
                key::load_key_file(&path).map(Some)
            }
            None => Ok(None),
        }
    }

    fn by_id(
        &self,
        org: &str,
        project: &str,
        key_id: i64,
    ) -> Result<Option<KeyRecord>, KeyStoreError> {
        Ok(self
            .current(org, project)?
            .filter(|record| record.key_id() == key_id))
    }

    fn put(
        &self,
        _org: &str,
        _project: &str,
        record: &KeyRecord,
    ) -> Result<KeyRecord, KeyStoreError> {
        key::save_key_file(&self.write_path, record)?;
        info!(path = %self.write_path.display(), key_id = record.key_id(), "wrote key file");

        let dir = self.write_path.parent().unwrap_or(&self.start_dir);
        if let Some(repo) = GitRepo::discover(dir) {
            if let Err(e) = repo.ensure_ignored(KEY_FILE) {
                warn!(error = %e, "could not add {KEY_FILE} to .gitignore");
            }
        }
        Ok(record.clone())
    }
}

type ProjectKey = (String, String);

pub struct KeyStore {
    providers: Vec<Box<dyn KeyProvider>>,
    current: RefCell<HashMap<ProjectKey, KeyRecord>>,
    known: RefCell<HashMap<ProjectKey, HashMap<i64, KeyRecord>>>,
}

impl KeyStore {
    /// A first-match resolver over `providers`, in order
    pub fn new(providers: Vec<Box<dyn KeyProvider>>) -> Self {
        Self {
            providers,
            current: RefCell::new(HashMap::new()),
            known: RefCell::new(HashMap::new()),
        }
    }

    /// The project's current key, minting one if no provider has it
    pub fn current(&self, org: &str, project: &str) -> Result<KeyRecord, KeyStoreError> {
        if let Some(record) = self.current.borrow().get(&project_key(org, project)) {
            return Ok(record.clone());
        }
        match self.resolve(org, project)? {
            Some(record) => Ok(record),
            None => self.mint(org, project),
        }
    }

    /// Forget the cached current key and resolve it again
    pub fn refresh(&self, org: &str, project: &str) -> Result<KeyRecord, KeyStoreError> {
        self.current.borrow_mut().remove(&project_key(org, project));
        self.resolve(org, project)?
            .ok_or_else(|| KeyStoreError::NotFound(format!("project {project}")))
    }

    /// A key by id, for ciphertexts written under a key other than the current one
    pub fn by_id(&self, org: &str, project: &str, key_id: i64) -> Result<KeyRecord, KeyStoreError> {
        let pk = project_key(org, project);
        if let Some(record) = self.known.borrow().get(&pk).and_then(|ids| ids.get(&key_id)) {
            return Ok(record.clone());
        }
        if let Some(record) = self
            .current
            .borrow()
            .get(&pk)
            .filter(|record| record.key_id() == key_id)
        {
            return Ok(record.clone());
        }

        let mut unreachable = None;
        for provider in &self.providers {
            match provider.by_id(org, project, key_id) {
                Ok(Some(record)) => {
                    self.remember(org, project, &record);
                    return Ok(record);
                }
                Ok(None) => {}
                Err(KeyStoreError::Transport(e)) => {
                    warn!(provider = provider.name(), key_id, error = %e, "key lookup failed");
                    unreachable = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        match unreachable {
            Some(e) => Err(KeyStoreError::Transport(e)),
            None => Err(KeyStoreError::NotFound(format!("key id {key_id}"))),
        }
    }

    /// Persist `record` as the project's current key through the first provider
    pub fn put(
        &self,
        org: &str,
        project: &str,
        record: &KeyRecord,
    ) -> Result<KeyRecord, KeyStoreError> {
        let provider = self
            .providers
            .first()
            .ok_or_else(|| KeyStoreError::CannotPersist("no key provider configured".into()))?;
        let canonical = provider.put(org, project, record)?;
        canonical.validate()?;
        debug!(
            provider = provider.name(),
            key_id = canonical.key_id(),
            "key persisted"
        );

        self.current
            .borrow_mut()
            .insert(project_key(org, project), canonical.clone());
        self.remember(org, project, &canonical);
        Ok(canonical)
    }

    /// Make `record` resolvable by id without making it current
    pub fn remember(&self, org: &str, project: &str, record: &KeyRecord) {
        self.known
            .borrow_mut()
            .entry(project_key(org, project))
            .or_default()
            .insert(record.key_id(), record.clone());
    }

    fn mint(&self, org: &str, project: &str) -> Result<KeyRecord, KeyStoreError> {
        let record = KeyRecord::generate()?;
        info!(project, "no project key found, minting a new one");
        self.put(org, project, &record)
    }

    fn resolve(&self, org: &str, project: &str) -> Result<Option<KeyRecord>, KeyStoreError> {
        let mut unreachable = None;
        for provider in &self.providers {
            match provider.current(org, project) {
                Ok(Some(record)) => {
                    debug!(provider = provider.name(), key_id = record.key_id(), "resolved project key");
                    self.current
                        .borrow_mut()
                        .insert(project_key(org, project), record.clone());
                    self.remember(org, project, &record);
                    return Ok(Some(record));
                }
                Ok(None) => {}
                Err(KeyStoreError::Transport(e)) => {
                    warn!(provider = provider.name(), error = %e, "key provider unavailable");
                    unreachable = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        match unreachable {
            Some(e) => Err(KeyStoreError::Transport(e)),
            None => Ok(None),
        }
    }
}

fn project_key(org: &str, project: &str) -> ProjectKey {
    (org.to_string(), project.to_string())
}
