//! # Key Rotation
//!
//! Re-encrypts every environment of a project under a freshly minted key.
//!
//! 1. Pull every environment of every app, overwriting local files
//! 2. Mint the new key and publish it through the key store, which settles
//!    its id, then record it as a pending rotation in the local cache
//! 3. Rewrite each environment under the new key as the next version
//! 4. Clear the pending rotation
//!
//! The key service may assign its own id on publish, so nothing is written
//! under the new key before that id is known. Every stored payload names a
//! key the key store can return by id.
//!
//! Rotation is not atomic at the remote. If another writer updates an
//! environment mid-rotation the run stops with [`RotationError::Raced`];
//! environments already rewritten stay on the new key and the rest stay
//! readable under the old one. Running it again reuses the pending key and
//! skips environments already written under it.

use crate::api::models::EnvPayload;
use crate::crypto;
use crate::envfile::EnvName;
use crate::error::{ApiError, KeyStoreError, RotationError};
use crate::key::KeyRecord;
use crate::sync::{
    EnvOutcome, PullOptions, PullSelection, PulledEnv, SkipReason, SyncTarget, Synchroniser,
};
use tracing::{debug, info};

#[derive(Debug)]
pub struct RotatedEnv {
    pub app: String,
    pub env: EnvName,
    pub outcome: EnvOutcome,
}

#[derive(Debug)]
pub struct RotationReport {
    pub key_id: i64,
    pub resumed: bool,
    pub envs: Vec<RotatedEnv>,
}

impl RotationReport {
    pub fn rewritten(&self) -> usize {
        self.envs
            .iter()
            .filter(|e| matches!(e.outcome, EnvOutcome::Synced { .. }))
            .count()
    }
}

pub struct RotationCoordinator<'s, 'a> {
    sync: &'s Synchroniser<'a>,
}

fn aborted(err: impl std::fmt::Display) -> RotationError {
    RotationError::Aborted(err.to_string())
}

fn key_store_failure(err: KeyStoreError) -> RotationError {
    match err {
        KeyStoreError::Transport(api) => RotationError::Transport(api),
        e => aborted(e),
    }
}

impl<'s, 'a> RotationCoordinator<'s, 'a> {
    pub fn new(sync: &'s Synchroniser<'a>) -> Self {
        Self { sync }
    }

    /// Rotate the key shared by `targets`, which must all belong to one project
    pub fn rotate(&self, targets: &[SyncTarget]) -> Result<RotationReport, RotationError> {
        let first = targets
            .first()
            .ok_or_else(|| RotationError::Aborted("no apps to rotate".into()))?;
        let (org, project) = (first.org.as_str(), first.project.as_str());
        if let Some(other) = targets.iter().find(|t| t.org != org || t.project != project) {
            return Err(RotationError::Aborted(format!(
                "app {} belongs to a different project",
                other.app
            )));
        }

        let cache = self.sync.cache();
        let keys = self.sync.keys();

        let pending = cache.pending_rotation(project).map_err(aborted)?;
        if let Some(pending) = &pending {
            info!(key_id = pending.key.key_id(), "resuming interrupted key rotation");
            keys.remember(org, project, &pending.key);
            if let Some(previous) = &pending.previous {
                keys.remember(org, project, previous);
            }
        }

        let mut pulled = Vec::with_capacity(targets.len());
        for target in targets {
            pulled.push((target, self.refresh(target)?));
        }

        let new_key = match &pending {
            Some(pending) => pending.key.clone(),
            None => self.publish_new_key(org, project)?,
        };

        let mut report = RotationReport {
            key_id: new_key.key_id(),
            resumed: pending.is_some(),
            envs: Vec::new(),
        };

        for (target, envs) in pulled {
            for env in envs {
                if self.sync.cancel_token().is_cancelled() {
                    return Err(RotationError::Aborted(format!(
                        "interrupted before {}; run again to resume",
                        env.env
                    )));
                }

                let already = env.key_id == Some(new_key.key_id())
                    || pending
                        .as_ref()
                        .and_then(|p| p.rotated_version(&target.app, &env.env))
                        == Some(env.version);
                let outcome = if already {
                    EnvOutcome::Skipped(SkipReason::AlreadyRotated)
                } else {
                    self.rewrite(target, &env, &new_key)?
                };
                report.envs.push(RotatedEnv {
                    app: target.app.clone(),
                    env: env.env,
                    outcome,
                });
            }
        }

        cache.finish_rotation(project).map_err(aborted)?;
        info!(key_id = new_key.key_id(), rewritten = report.rewritten(), "key rotation complete");
        Ok(report)
    }

    /// Mint a key, publish it and record it as pending; the returned record
    /// carries the id the key store assigned.
    fn publish_new_key(&self, org: &str, project: &str) -> Result<KeyRecord, RotationError> {
        let keys = self.sync.keys();
        let previous = match keys.refresh(org, project) {
            Ok(record) => Some(record),
            Err(KeyStoreError::NotFound(_)) => None,
            Err(e) => return Err(key_store_failure(e)),
        };

        let minted = KeyRecord::generate().map_err(aborted)?;
        let published = keys.put(org, project, &minted).map_err(key_store_failure)?;
        if published.key_id() != minted.key_id() {
            debug!(
                minted = minted.key_id(),
                assigned = published.key_id(),
                "key store assigned the new key's id"
            );
        }

        self.sync
            .cache()
            .begin_rotation(project, &published, previous.as_ref())
            .map_err(aborted)?;
        info!(key_id = published.key_id(), "published new project key");
        Ok(published)
    }

    /// Pull every environment of `target`, failing on any per-environment error
    fn refresh(&self, target: &SyncTarget) -> Result<Vec<PulledEnv>, RotationError> {
        let options = PullOptions {
            force: true,
            version: None,
        };
        let (summary, pulled) = self
            .sync
            .pull_detailed(target, &PullSelection::All, options)
            .map_err(aborted)?;

        if let Some((name, err)) = summary.errors().next() {
            return Err(RotationError::Aborted(format!(
                "pulling {name} for app {} failed: {err}",
                target.app
            )));
        }
        if summary.was_cancelled() {
            return Err(RotationError::Aborted("interrupted while pulling".into()));
        }
        Ok(pulled)
    }

    fn rewrite(
        &self,
        target: &SyncTarget,
        env: &PulledEnv,
        key: &KeyRecord,
    ) -> Result<EnvOutcome, RotationError> {
        let version = env.version + 1;
        let payload = EnvPayload {
            data: crypto::encrypt(env.contents.as_str(), key).map_err(aborted)?,
            count_variables: env.contents.count_variables(),
            size: env.contents.size(),
            version: Some(version),
            secret_key_id: Some(key.key_id()),
            ..Default::default()
        };

        match self
            .sync
            .client()
            .put_env(&target.org, &target.app, &env.env, key.key_id(), &payload)
        {
            Ok(()) => {}
            Err(ApiError::Conflict(_)) => {
                return Err(RotationError::Raced {
                    name: env.env.to_string(),
                })
            }
            Err(e) => return Err(RotationError::Transport(e)),
        }

        let cache = self.sync.cache();
        cache
            .put(&target.project, &target.app, &env.env, env.contents.as_str(), version)
            .map_err(aborted)?;
        cache
            .mark_rotated(&target.project, &target.app, &env.env, version)
            .map_err(aborted)?;
        info!(app = %target.app, env = %env.env, version, "re-encrypted under the new key");
        Ok(EnvOutcome::Synced { version })
    }
}
