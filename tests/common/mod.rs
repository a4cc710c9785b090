#![allow(dead_code)]

use assert_cmd::{cargo::cargo_bin_cmd, Command};
use fs2::FileExt;
use hx_env::api::models::{EnvPayload, Environment, EnvironmentReference, Page, PageRequest};
use hx_env::api::{EnvClient, KeyService};
use hx_env::cache::LocalCache;
use hx_env::crypto;
use hx_env::envfile::{EnvFile, EnvName};
use hx_env::error::ApiError;
use hx_env::key::{KeyRecord, MATERIAL_LEN};
use hx_env::keystore::{FileKeyProvider, KeyProvider, KeyStore, RemoteKeyProvider};
use hx_env::sync::{SyncTarget, Synchroniser};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;
use tempfile::TempDir;

pub const ORG: &str = "org_test";
pub const PROJECT: &str = "proj_test";
pub const APP: &str = "app_test";

/// 256 characters of key material made of one repeated character.
pub fn material(c: char) -> String {
    std::iter::repeat(c).take(MATERIAL_LEN).collect()
}

pub fn test_key(key_id: i64, c: char) -> KeyRecord {
    KeyRecord::new(key_id, material(c)).expect("valid key record")
}

/// A payload as another client would have pushed it.
pub fn sealed(plaintext: &str, key: &KeyRecord, version: u64) -> EnvPayload {
    let file = EnvFile::new(plaintext);
    EnvPayload {
        data: crypto::encrypt(plaintext, key).expect("encryption failed"),
        count_variables: file.count_variables(),
        size: file.size(),
        version: Some(version),
        secret_key_id: Some(key.key_id()),
        ..Default::default()
    }
}

/// Decrypt a stored payload with `key`.
pub fn open(payload: &EnvPayload, key: &KeyRecord) -> String {
    let bytes = crypto::decrypt(&payload.data, key).expect("decryption failed");
    String::from_utf8(bytes).expect("plaintext is not UTF-8")
}

/// One `put_env` call as the remote received it.
#[derive(Debug, Clone)]
pub struct PutCall {
    pub app: String,
    pub env: EnvName,
    pub secret_key_id: i64,
    pub payload: EnvPayload,
}

#[derive(Default)]
struct RemoteState {
    environments: Vec<Environment>,
    /// Every stored version per (app, env), oldest first
    payloads: BTreeMap<(String, String), Vec<EnvPayload>>,
    key: Option<KeyRecord>,
    keys_by_id: HashMap<i64, KeyRecord>,
    puts: Vec<PutCall>,
    conflict_once: HashSet<(String, String)>,
    key_mismatch_once: Option<KeyRecord>,
    /// Ids the key service hands out on save, instead of keeping the client's
    next_key_id: Option<i64>,
}

/// In-memory stand-in for the environment store and the key service.
#[derive(Default)]
pub struct FakeRemote {
    state: RefCell<RemoteState>,
}

impl FakeRemote {
    pub fn new(environments: &[&str]) -> Rc<Self> {
        let remote = Self::default();
        remote.state.borrow_mut().environments =
            environments.iter().map(|name| Environment::new(*name)).collect();
        Rc::new(remote)
    }

    pub fn set_key(&self, key: &KeyRecord) {
        let mut state = self.state.borrow_mut();
        state.keys_by_id.insert(key.key_id(), key.clone());
        state.key = Some(key.clone());
    }

    /// Make a key resolvable by id without making it current
    pub fn add_old_key(&self, key: &KeyRecord) {
        self.state
            .borrow_mut()
            .keys_by_id
            .insert(key.key_id(), key.clone());
    }

    pub fn current_key(&self) -> Option<KeyRecord> {
        self.state.borrow().key.clone()
    }

    /// Store a payload as if another client had pushed it
    pub fn store(&self, app: &str, env: &EnvName, mut payload: EnvPayload) {
        let mut state = self.state.borrow_mut();
        payload.environment = environment_ref(&state.environments, env);
        let slot = (app.to_string(), env.as_str().to_string());
        let versions = state.payloads.entry(slot).or_default();
        payload.id = Some(format!("env_{}_{}", env, versions.len() + 1));
        versions.push(payload);
    }

    pub fn latest(&self, app: &str, env: &EnvName) -> Option<EnvPayload> {
        self.state
            .borrow()
            .payloads
            .get(&(app.to_string(), env.as_str().to_string()))
            .and_then(|versions| versions.last().cloned())
    }

    pub fn puts(&self) -> Vec<PutCall> {
        self.state.borrow().puts.clone()
    }

    pub fn clear_puts(&self) {
        self.state.borrow_mut().puts.clear();
    }

    /// The next `put_env` for `env` is rejected with a conflict
    pub fn conflict_once(&self, app: &str, env: &str) {
        self.state
            .borrow_mut()
            .conflict_once
            .insert((app.to_string(), env.to_string()));
    }

    /// The next `put_env` is rejected for its key id and the project key becomes `key`
    pub fn key_mismatch_once(&self, key: &KeyRecord) {
        self.state.borrow_mut().key_mismatch_once = Some(key.clone());
    }

    /// Saved keys get server-assigned ids, counting up from `first`
    pub fn assign_key_ids_from(&self, first: i64) {
        self.state.borrow_mut().next_key_id = Some(first);
    }
}

fn environment_ref(environments: &[Environment], env: &EnvName) -> Option<EnvironmentReference> {
    match env {
        EnvName::Default => None,
        EnvName::Named(name) => Some(
            environments
                .iter()
                .find(|e| &e.alternate_id == name)
                .map(EnvironmentReference::from)
                .unwrap_or_else(|| EnvironmentReference::from(&Environment::new(name.as_str()))),
        ),
    }
}

fn paginate<T: Clone>(items: &[T], page: PageRequest) -> Page<T> {
    let start = ((page.page_num.max(1) - 1) * page.page_size) as usize;
    let end = (start + page.page_size as usize).min(items.len());
    Page {
        data: items.get(start..end).map(<[T]>::to_vec).unwrap_or_default(),
        total_count: items.len() as u64,
        page_num: page.page_num,
        page_size: page.page_size,
    }
}

impl EnvClient for FakeRemote {
    fn list_environments(
        &self,
        _org: &str,
        _project: &str,
        page: PageRequest,
    ) -> Result<Page<Environment>, ApiError> {
        Ok(paginate(&self.state.borrow().environments, page))
    }

    fn get_environment(
        &self,
        _org: &str,
        _project: &str,
        name: &str,
    ) -> Result<Option<Environment>, ApiError> {
        Ok(self
            .state
            .borrow()
            .environments
            .iter()
            .find(|e| e.alternate_id == name)
            .cloned())
    }

    fn get_env(
        &self,
        _org: &str,
        app: &str,
        env: &EnvName,
        _key_id: Option<i64>,
        version: Option<u64>,
    ) -> Result<EnvPayload, ApiError> {
        let state = self.state.borrow();
        let versions = state
            .payloads
            .get(&(app.to_string(), env.as_str().to_string()))
            .ok_or_else(|| ApiError::NotFound(format!("env {env}")))?;
        let found = match version {
            Some(v) => versions.iter().find(|p| p.version() == v),
            None => versions.last(),
        };
        found
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("env {env} version {version:?}")))
    }

    fn list_envs(
        &self,
        _org: &str,
        app: &str,
        page: PageRequest,
    ) -> Result<Page<EnvPayload>, ApiError> {
        let latest: Vec<EnvPayload> = self
            .state
            .borrow()
            .payloads
            .iter()
            .filter(|((a, _), _)| a == app)
            .filter_map(|(_, versions)| versions.last().cloned())
            .collect();
        Ok(paginate(&latest, page))
    }

    fn list_env_versions(
        &self,
        _org: &str,
        app: &str,
        env: &EnvName,
        page: PageRequest,
    ) -> Result<Page<EnvPayload>, ApiError> {
        let mut versions = self
            .state
            .borrow()
            .payloads
            .get(&(app.to_string(), env.as_str().to_string()))
            .cloned()
            .unwrap_or_default();
        versions.reverse();
        Ok(paginate(&versions, page))
    }

    fn put_env(
        &self,
        _org: &str,
        app: &str,
        env: &EnvName,
        secret_key_id: i64,
        payload: &EnvPayload,
    ) -> Result<(), ApiError> {
        {
            let mut state = self.state.borrow_mut();
            state.puts.push(PutCall {
                app: app.to_string(),
                env: env.clone(),
                secret_key_id,
                payload: payload.clone(),
            });

            if state
                .conflict_once
                .remove(&(app.to_string(), env.as_str().to_string()))
            {
                return Err(ApiError::Conflict("version already exists".into()));
            }
            if let Some(key) = state.key_mismatch_once.take() {
                state.keys_by_id.insert(key.key_id(), key.clone());
                state.key = Some(key);
                return Err(ApiError::KeyIdMismatch("secretKeyId does not match".into()));
            }

            let latest = state
                .payloads
                .get(&(app.to_string(), env.as_str().to_string()))
                .and_then(|versions| versions.last())
                .map_or(0, EnvPayload::version);
            if payload.version() <= latest {
                return Err(ApiError::Conflict(format!("version {latest} exists")));
            }
        }

        let mut stored = payload.clone();
        stored.secret_key_id = Some(secret_key_id);
        self.store(app, env, stored);
        Ok(())
    }
}

impl KeyService for FakeRemote {
    fn get_key(&self, _org: &str, _project: &str) -> Result<KeyRecord, ApiError> {
        self.state
            .borrow()
            .key
            .clone()
            .ok_or_else(|| ApiError::NotFound("key".into()))
    }

    fn get_key_by_id(&self, _org: &str, _project: &str, key_id: i64) -> Result<KeyRecord, ApiError> {
        self.state
            .borrow()
            .keys_by_id
            .get(&key_id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("key {key_id}")))
    }

    fn save_key(&self, _org: &str, _project: &str, key: &KeyRecord) -> Result<KeyRecord, ApiError> {
        let assigned = {
            let mut state = self.state.borrow_mut();
            let id = state.next_key_id;
            state.next_key_id = id.map(|id| id + 1);
            id
        };
        let saved = match assigned {
            Some(id) => key.clone().with_key_id(id),
            None => key.clone(),
        };
        self.set_key(&saved);
        Ok(saved)
    }
}

/// A workspace and home directory wired to a [`FakeRemote`].
pub struct Workspace {
    pub dir: TempDir,
    pub home: TempDir,
    pub remote: Rc<FakeRemote>,
    pub keys: KeyStore,
    pub cache: LocalCache,
}

impl Workspace {
    pub fn new(remote: Rc<FakeRemote>) -> Self {
        let dir = TempDir::new().expect("failed to create workspace dir");
        let home = TempDir::new().expect("failed to create home dir");
        let providers: Vec<Box<dyn KeyProvider>> = vec![
            Box::new(RemoteKeyProvider::new(Box::new(remote.clone()))),
            Box::new(FileKeyProvider::new(
                dir.path(),
                Some(home.path().to_path_buf()),
            )),
        ];
        let cache = LocalCache::in_home(home.path());
        Self {
            dir,
            home,
            remote,
            keys: KeyStore::new(providers),
            cache,
        }
    }

    pub fn target(&self) -> SyncTarget {
        SyncTarget {
            org: ORG.to_string(),
            project: PROJECT.to_string(),
            app: APP.to_string(),
            dir: self.dir.path().to_path_buf(),
        }
    }

    pub fn sync(&self) -> Synchroniser<'_> {
        Synchroniser::new(&*self.remote, &self.keys, &self.cache)
    }

    pub fn env_path(&self, env: &str) -> PathBuf {
        EnvName::parse(env)
            .expect("valid env name")
            .path_in(self.dir.path())
    }

    pub fn write_env(&self, env: &str, contents: &str) {
        fs::write(self.env_path(env), contents).expect("failed to write env file");
    }

    pub fn read_env(&self, env: &str) -> String {
        fs::read_to_string(self.env_path(env)).expect("failed to read env file")
    }

    pub fn named(env: &str) -> EnvName {
        EnvName::parse(env).expect("valid env name")
    }
}

/// Take the cache's writer lock as another process would; released on drop.
pub fn hold_cache_lock(cache: &LocalCache) -> fs::File {
    let mut path = cache.path().as_os_str().to_os_string();
    path.push(".lock");
    let file = fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(PathBuf::from(path))
        .expect("failed to open cache lock");
    file.lock_exclusive().expect("failed to lock cache");
    file
}

/// Spawn the hx-env binary via assert_cmd.
pub fn hx_env_cmd() -> Command {
    cargo_bin_cmd!("hx-env")
}

/// Absolute path to the hx-env test binary.
pub fn hx_env_bin() -> &'static str {
    env!("CARGO_BIN_EXE_hx-env")
}
