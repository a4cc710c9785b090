use super::{
    aborts_run, filter_envs_by_current_environments, find_missing_environments, Direction,
    EnvOutcome, PlanReason, PullResult, SkipReason, SyncPlan, SyncSummary, SyncTarget,
    Synchroniser,
};
use crate::api::fetch_all;
use crate::api::models::{EnvPayload, PageRequest};
use crate::crypto;
use crate::envfile::{EnvFile, EnvName};
use crate::error::{ApiError, Result, SyncError};
use crate::fsutil;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Which cloud environments a pull fetches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullSelection {
    Single(String),
    /// Every payload of the app whose environment still exists
    All,
    DefaultOnly,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PullOptions {
    /// Overwrite local files even if edited since the last sync
    pub force: bool,
    /// Fetch this stored version instead of the latest (single environment only)
    pub version: Option<u64>,
}

/// Plaintext of one environment as written to disk by a pull.
#[derive(Debug, Clone)]
pub struct PulledEnv {
    pub env: EnvName,
    pub contents: EnvFile,
    pub version: u64,
    pub key_id: Option<i64>,
}

impl Synchroniser<'_> {
    pub fn pull(
        &self,
        target: &SyncTarget,
        selection: &PullSelection,
        options: PullOptions,
    ) -> Result<PullResult> {
        self.pull_detailed(target, selection, options)
            .map(|(summary, _)| summary)
    }

    /// Like [`pull`](Self::pull), also returning the plaintext of every
    /// environment written.
    pub fn pull_detailed(
        &self,
        target: &SyncTarget,
        selection: &PullSelection,
        options: PullOptions,
    ) -> Result<(PullResult, Vec<PulledEnv>)> {
        let mut summary = SyncSummary::default();
        let mut pulled = Vec::new();
        let mut payloads = Vec::new();
        let mut missing = Vec::new();

        match selection {
            PullSelection::Single(input) => match EnvName::parse(input) {
                Ok(env) => self.select_single(target, &env, options.version, &mut payloads, &mut summary)?,
                Err(e) => summary.record(input.as_str(), EnvOutcome::Failed(e.into())),
            },
            PullSelection::DefaultOnly => self.select_single(
                target,
                &EnvName::Default,
                options.version,
                &mut payloads,
                &mut summary,
            )?,
            PullSelection::All => {
                let listed = fetch_all(PageRequest::DEFAULT_SIZE, |page| {
                    self.client.list_envs(&target.org, &target.app, page)
                })?;
                let environments = self.project_environments(target)?;
                payloads = filter_envs_by_current_environments(listed, &environments);
                missing = find_missing_environments(&environments, &payloads);
            }
        }

        let mut plan = SyncPlan::new();
        let mut by_name: HashMap<EnvName, EnvPayload> = HashMap::new();
        for payload in payloads {
            let env = match payload.env_name() {
                Ok(env) => env,
                Err(e) => {
                    warn!(env = %e.input, "refusing environment name from the remote");
                    summary.record(e.input.clone(), EnvOutcome::Failed(e.into()));
                    continue;
                }
            };
            if by_name.contains_key(&env) {
                debug!(env = %env, "ignoring repeated payload");
                continue;
            }
            plan.add(env.clone(), Direction::Pull, PlanReason::CloudPayload);
            by_name.insert(env, payload);
        }
        for environment in missing {
            match EnvName::from_remote(&environment.alternate_id) {
                Ok(env) => plan.add(env, Direction::Pull, PlanReason::MissingLocally),
                Err(e) => {
                    warn!(env = %e.input, "refusing environment name from the remote");
                    summary.record(e.input.clone(), EnvOutcome::Failed(e.into()));
                }
            }
        }

        let mut items = plan.finalize().into_iter();
        while let Some(item) = items.next() {
            if self.cancel.is_cancelled() {
                warn!("interrupted, skipping remaining environments");
                summary.record(item.env.as_str(), EnvOutcome::Skipped(SkipReason::Cancelled));
                for rest in items.by_ref() {
                    summary.record(rest.env.as_str(), EnvOutcome::Skipped(SkipReason::Cancelled));
                }
                break;
            }

            let result = match by_name.remove(&item.env) {
                Some(payload) => self.pull_one(target, &item.env, &payload, options.force).map(|env| {
                    let version = env.version;
                    pulled.push(env);
                    Some(EnvOutcome::Synced { version })
                }),
                None => self.create_empty(target, &item.env),
            };

            match result {
                Ok(Some(outcome)) => summary.record(item.env.as_str(), outcome),
                Ok(None) => {}
                Err(e) if aborts_run(&e) => return Err(e.into()),
                Err(e) => {
                    warn!(env = %item.env, error = %e, "pull failed");
                    summary.record(item.env.as_str(), EnvOutcome::Failed(e));
                }
            }
        }
        Ok((summary, pulled))
    }

    fn select_single(
        &self,
        target: &SyncTarget,
        env: &EnvName,
        version: Option<u64>,
        payloads: &mut Vec<EnvPayload>,
        summary: &mut SyncSummary,
    ) -> Result<()> {
        match self.fetch_single(target, env, version) {
            Ok(payload) => payloads.push(payload),
            Err(e) if aborts_run(&e) => return Err(e.into()),
            Err(e) => summary.record(env.as_str(), EnvOutcome::Failed(e)),
        }
        Ok(())
    }

    fn fetch_single(
        &self,
        target: &SyncTarget,
        env: &EnvName,
        version: Option<u64>,
    ) -> std::result::Result<EnvPayload, SyncError> {
        if let EnvName::Named(name) = env {
            if self
                .client
                .get_environment(&target.org, &target.project, name)?
                .is_none()
            {
                return Err(SyncError::UnknownEnvironment { name: name.clone() });
            }
        }

        let Some(version) = version else {
            return Ok(self.client.get_env(&target.org, &target.app, env, None, None)?);
        };
        match self
            .client
            .get_env(&target.org, &target.app, env, None, Some(version))
        {
            Ok(payload) => Ok(payload),
            Err(ApiError::NotFound(_)) => {
                warn!(env = %env, version, "version not found, pulling the latest instead");
                Ok(self.client.get_env(&target.org, &target.app, env, None, None)?)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn pull_one(
        &self,
        target: &SyncTarget,
        env: &EnvName,
        payload: &EnvPayload,
        force: bool,
    ) -> std::result::Result<PulledEnv, SyncError> {
        let record = match payload.secret_key_id {
            Some(key_id) => self.key_for(target, key_id)?,
            None => self.current_key(target)?,
        };

        let plaintext = crypto::decrypt(&payload.data, &record)?;
        let contents = EnvFile::from_decrypted(plaintext).ok_or_else(|| SyncError::WrongKey {
            name: env.to_string(),
            key_id: record.key_id(),
        })?;

        let path = env.path_in(&target.dir);
        if !force {
            if let Some(local) = EnvFile::read_optional(&path)? {
                if local != contents {
                    let cached = self.cache.get(&target.project, &target.app, env)?;
                    if !cached.is_some_and(|entry| entry.matches(&local.hash())) {
                        return Err(SyncError::LocalModified {
                            name: env.to_string(),
                        });
                    }
                }
            }
        }

        fsutil::write_atomic(&path, contents.as_str().as_bytes(), fsutil::FILE_MODE)?;
        self.cache.put(
            &target.project,
            &target.app,
            env,
            contents.as_str(),
            payload.version(),
        )?;
        info!(env = %env, version = payload.version(), "pulled");

        Ok(PulledEnv {
            env: env.clone(),
            contents,
            version: payload.version(),
            key_id: payload.secret_key_id,
        })
    }

    /// Create an empty file for an environment nothing has been pushed to yet
    fn create_empty(
        &self,
        target: &SyncTarget,
        env: &EnvName,
    ) -> std::result::Result<Option<EnvOutcome>, SyncError> {
        let path = env.path_in(&target.dir);
        if path.exists() {
            return Ok(None);
        }
        fsutil::write_atomic(&path, b"", fsutil::FILE_MODE)?;
        info!(env = %env, "created empty env file");
        Ok(Some(EnvOutcome::Created))
    }
}
