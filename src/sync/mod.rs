//! # Synchroniser
//!
//! Reconciles the workspace's `.env` files with the remote store.
//!
//! ## Push
//!
//! For each selected environment, in [`EnvName`](crate::envfile::EnvName) order:
//!
//! ```text
//! read → hash → compare with cache ─ equal ─→ Skipped(NoLocalChange)
//!                     │
//!                     └─ differs → fetch cloud payload ─ newer than cache ─→ CloudAhead
//!                                        │
//!                                        └─ encrypt → put_env → cache
//! ```
//!
//! The payload is written under the key the cloud copy already uses, or the
//! current project key for a first push. A `put_env` rejected for an unknown
//! key id is retried exactly once with the refreshed project key.
//!
//! ## Pull
//!
//! Each payload is decrypted with the key it names and checked to be a
//! well-formed env file, then written over the local file unless that file
//! was edited since the last sync (override with `force`).
//!
//! ## Failures
//!
//! Per-environment failures are collected in the [`SyncSummary`] and the run
//! carries on. Failures of the key store or the local cache abort the run.

mod plan;
mod pull;
mod push;

pub use plan::{
    filter_envs_by_current_environments, find_missing_environments, resolve_environment,
    Direction, PlanItem, PlanReason, SyncPlan,
};
pub use pull::{PullOptions, PullSelection, PulledEnv};
pub use push::PushSelection;

use crate::api::models::{Environment, PageRequest};
use crate::api::{fetch_all, EnvClient};
use crate::cache::LocalCache;
use crate::error::{ApiError, KeyStoreError, SyncError};
use crate::keystore::KeyStore;
use crate::key::KeyRecord;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One app of one project, rooted at a workspace directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncTarget {
    pub org: String,
    pub project: String,
    pub app: String,
    pub dir: PathBuf,
}

/// Cooperative cancellation, checked between environments.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoLocalChange,
    AlreadyRotated,
    Cancelled,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SkipReason::NoLocalChange => "no change",
            SkipReason::AlreadyRotated => "already on the new key",
            SkipReason::Cancelled => "cancelled",
        })
    }
}

#[derive(Debug)]
pub enum EnvOutcome {
    Synced { version: u64 },
    /// An empty local file was created for an environment with no cloud payload
    Created,
    Skipped(SkipReason),
    Failed(SyncError),
}

#[derive(Debug)]
pub struct EnvReport {
    /// Environment name, or the offending file name when it could not be parsed
    pub name: String,
    pub outcome: EnvOutcome,
}

impl EnvReport {
    pub fn new(name: impl Into<String>, outcome: EnvOutcome) -> Self {
        Self {
            name: name.into(),
            outcome,
        }
    }
}

#[derive(Debug, Default)]
pub struct SyncSummary {
    pub reports: Vec<EnvReport>,
}

pub type PushResult = SyncSummary;
pub type PullResult = SyncSummary;

impl SyncSummary {
    fn record(&mut self, name: impl Into<String>, outcome: EnvOutcome) {
        self.reports.push(EnvReport::new(name, outcome));
    }

    pub fn synced(&self) -> usize {
        self.count(|o| matches!(o, EnvOutcome::Synced { .. } | EnvOutcome::Created))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, EnvOutcome::Skipped(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, EnvOutcome::Failed(_)))
    }

    pub fn was_cancelled(&self) -> bool {
        self.reports
            .iter()
            .any(|r| matches!(r.outcome, EnvOutcome::Skipped(SkipReason::Cancelled)))
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0 && !self.was_cancelled()
    }

    pub fn get(&self, name: &str) -> Option<&EnvOutcome> {
        self.reports.iter().find(|r| r.name == name).map(|r| &r.outcome)
    }

    pub fn errors(&self) -> impl Iterator<Item = (&str, &SyncError)> {
        self.reports.iter().filter_map(|r| match &r.outcome {
            EnvOutcome::Failed(e) => Some((r.name.as_str(), e)),
            _ => None,
        })
    }

    fn count(&self, pred: impl Fn(&EnvOutcome) -> bool) -> usize {
        self.reports.iter().filter(|r| pred(&r.outcome)).count()
    }
}

pub struct Synchroniser<'a> {
    client: &'a dyn EnvClient,
    keys: &'a KeyStore,
    cache: &'a LocalCache,
    cancel: CancelToken,
}

impl<'a> Synchroniser<'a> {
    pub fn new(client: &'a dyn EnvClient, keys: &'a KeyStore, cache: &'a LocalCache) -> Self {
        Self {
            client,
            keys,
            cache,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn client(&self) -> &'a dyn EnvClient {
        self.client
    }

    pub fn keys(&self) -> &'a KeyStore {
        self.keys
    }

    pub fn cache(&self) -> &'a LocalCache {
        self.cache
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    fn project_environments(&self, target: &SyncTarget) -> Result<Vec<Environment>, ApiError> {
        fetch_all(PageRequest::DEFAULT_SIZE, |page| {
            self.client
                .list_environments(&target.org, &target.project, page)
        })
    }

    fn current_key(&self, target: &SyncTarget) -> Result<KeyRecord, SyncError> {
        Ok(self.keys.current(&target.org, &target.project)?)
    }

    /// The key a stored ciphertext was written with
    fn key_for(&self, target: &SyncTarget, key_id: i64) -> Result<KeyRecord, SyncError> {
        match self.keys.by_id(&target.org, &target.project, key_id) {
            Ok(record) => Ok(record),
            Err(KeyStoreError::NotFound(_)) => Err(SyncError::UnknownKey { key_id }),
            Err(e) => Err(e.into()),
        }
    }
}

/// Errors that make every remaining environment fail the same way.
fn aborts_run(err: &SyncError) -> bool {
    match err {
        SyncError::Cache(_) => true,
        SyncError::KeyStore(e) => !matches!(e, KeyStoreError::NotFound(_)),
        _ => false,
    }
}

fn fetch_optional<T>(result: Result<T, ApiError>) -> Result<Option<T>, ApiError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(ApiError::NotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}
