use super::{
    aborts_run, fetch_optional, resolve_environment, Direction, EnvOutcome, PlanReason,
    PushResult, SkipReason, SyncPlan, SyncSummary, SyncTarget, Synchroniser,
};
use crate::api::models::EnvPayload;
use crate::crypto;
use crate::envfile::{self, EnvFile, EnvName};
use crate::error::{ApiError, Result, SyncError};
use crate::key::KeyRecord;
use tracing::{debug, info, warn};

/// Which local environments a push sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushSelection {
    /// One environment, by user supplied name
    Single(String),
    /// Every `.env.<name>` file in the workspace
    AllLocal,
    /// The plain `.env` file
    DefaultOnly,
}

impl Synchroniser<'_> {
    pub fn push(&self, target: &SyncTarget, selection: &PushSelection) -> Result<PushResult> {
        let mut summary = SyncSummary::default();

        let requested = self.push_selection(target, selection, &mut summary)?;
        if requested.is_empty() {
            return Ok(summary);
        }

        let environments = self.project_environments(target)?;

        let mut plan = SyncPlan::new();
        for (env, reason) in requested {
            if resolve_environment(&env, &environments).is_none() {
                summary.record(
                    env.as_str(),
                    EnvOutcome::Failed(SyncError::UnknownEnvironment {
                        name: env.to_string(),
                    }),
                );
                continue;
            }
            plan.add(env, Direction::Push, reason);
        }
        let plan = plan.finalize();
        if plan.is_empty() {
            return Ok(summary);
        }

        // Resolve (or mint) the project key up front; without it nothing can be pushed.
        self.current_key(target)?;

        let mut items = plan.into_iter();
        while let Some(item) = items.next() {
            if self.cancel.is_cancelled() {
                warn!("interrupted, skipping remaining environments");
                summary.record(item.env.as_str(), EnvOutcome::Skipped(SkipReason::Cancelled));
                for rest in items.by_ref() {
                    summary.record(rest.env.as_str(), EnvOutcome::Skipped(SkipReason::Cancelled));
                }
                break;
            }

            match self.push_one(target, &item.env) {
                Ok(outcome) => summary.record(item.env.as_str(), outcome),
                Err(e) if aborts_run(&e) => return Err(e.into()),
                Err(e) => {
                    warn!(env = %item.env, error = %e, "push failed");
                    summary.record(item.env.as_str(), EnvOutcome::Failed(e));
                }
            }
        }
        Ok(summary)
    }

    fn push_selection(
        &self,
        target: &SyncTarget,
        selection: &PushSelection,
        summary: &mut SyncSummary,
    ) -> Result<Vec<(EnvName, PlanReason)>> {
        let mut requested = Vec::new();
        match selection {
            PushSelection::Single(input) => match EnvName::parse(input) {
                Ok(EnvName::Default) => summary.record(
                    EnvName::Default.as_str(),
                    EnvOutcome::Failed(SyncError::DefaultUnsupported),
                ),
                Ok(env) => requested.push((env, PlanReason::Requested)),
                Err(e) => summary.record(input.as_str(), EnvOutcome::Failed(e.into())),
            },
            PushSelection::AllLocal => {
                for found in envfile::discover(&target.dir)? {
                    match found.name {
                        Ok(EnvName::Default) => {
                            debug!("not pushing {} without an explicit request", found.file_name)
                        }
                        Ok(env) => requested.push((env, PlanReason::LocalFile)),
                        Err(e) => summary.record(found.file_name, EnvOutcome::Failed(e.into())),
                    }
                }
            }
            PushSelection::DefaultOnly => summary.record(
                EnvName::Default.as_str(),
                EnvOutcome::Failed(SyncError::DefaultUnsupported),
            ),
        }
        Ok(requested)
    }

    fn push_one(&self, target: &SyncTarget, env: &EnvName) -> std::result::Result<EnvOutcome, SyncError> {
        let file = EnvFile::read(&env.path_in(&target.dir))?;
        let hash = file.hash();

        let cached = self.cache.get(&target.project, &target.app, env)?;
        if cached.as_ref().is_some_and(|entry| entry.matches(&hash)) {
            debug!(env = %env, "no local changes");
            return Ok(EnvOutcome::Skipped(SkipReason::NoLocalChange));
        }
        let prior = cached.as_ref().map_or(0, |entry| entry.version);

        let current = self.current_key(target)?;
        let hint = cached.as_ref().map(|_| current.key_id());
        let cloud = fetch_optional(self.client.get_env(&target.org, &target.app, env, hint, None))?;

        if let Some(cloud) = &cloud {
            if cloud.version() > prior {
                return Err(SyncError::CloudAhead {
                    name: env.to_string(),
                    cloud_version: cloud.version(),
                    local_version: prior,
                });
            }
        }

        let write_key = match cloud.as_ref().and_then(|c| c.secret_key_id) {
            Some(key_id) if key_id != current.key_id() => self.key_for(target, key_id)?,
            _ => current,
        };

        let version = prior + 1;
        let mut payload = EnvPayload {
            data: crypto::encrypt(file.as_str(), &write_key)?,
            count_variables: file.count_variables(),
            size: file.size(),
            version: Some(version),
            secret_key_id: Some(write_key.key_id()),
            ..Default::default()
        };

        let conflict = |e: ApiError| match e {
            ApiError::Conflict(_) => SyncError::CloudAhead {
                name: env.to_string(),
                cloud_version: version,
                local_version: prior,
            },
            e => SyncError::Transport(e),
        };

        match self
            .client
            .put_env(&target.org, &target.app, env, write_key.key_id(), &payload)
        {
            Ok(()) => {}
            Err(ApiError::KeyIdMismatch(message)) => {
                let refreshed = self.keys.refresh(&target.org, &target.project)?;
                info!(
                    env = %env,
                    rejected = write_key.key_id(),
                    key_id = refreshed.key_id(),
                    %message,
                    "key id rejected, retrying with the refreshed project key"
                );
                self.reseal(&mut payload, &file, &write_key, &refreshed)?;
                self.client
                    .put_env(&target.org, &target.app, env, refreshed.key_id(), &payload)
                    .map_err(conflict)?;
            }
            Err(e) => return Err(conflict(e)),
        }

        self.cache
            .put(&target.project, &target.app, env, file.as_str(), version)?;
        info!(env = %env, version, "pushed");
        Ok(EnvOutcome::Synced { version })
    }

    /// Point `payload` at `refreshed`, re-encrypting only if the key material changed
    fn reseal(
        &self,
        payload: &mut EnvPayload,
        file: &EnvFile,
        sealed_with: &KeyRecord,
        refreshed: &KeyRecord,
    ) -> std::result::Result<(), SyncError> {
        if refreshed.material() != sealed_with.material() {
            payload.data = crypto::encrypt(file.as_str(), refreshed)?;
        }
        payload.secret_key_id = Some(refreshed.key_id());
        Ok(())
    }
}
