use crate::api::models::{EnvPayload, Environment, EnvironmentRef};
use crate::envfile::EnvName;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Push,
    Pull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanReason {
    /// Named on the command line
    Requested,
    /// Found as a local `.env` file
    LocalFile,
    /// Listed by the remote for this app
    CloudPayload,
    /// A project environment with nothing stored yet
    MissingLocally,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanItem {
    pub env: EnvName,
    pub direction: Direction,
    pub reason: PlanReason,
}

/// The environments one push or pull will touch, in processing order.
#[derive(Debug, Default)]
pub struct SyncPlan {
    items: Vec<PlanItem>,
}

impl SyncPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, env: EnvName, direction: Direction, reason: PlanReason) {
        self.items.push(PlanItem {
            env,
            direction,
            reason,
        });
    }

    /// Sort into processing order and drop repeated environments, keeping the first
    pub fn finalize(mut self) -> Self {
        let mut seen = HashSet::new();
        self.items.retain(|item| seen.insert(item.env.clone()));
        self.items.sort_by(|a, b| a.env.cmp(&b.env));
        self
    }

    pub fn items(&self) -> &[PlanItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl IntoIterator for SyncPlan {
    type Item = PlanItem;
    type IntoIter = std::vec::IntoIter<PlanItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

/// Resolve a name against the project's environments; `default` always resolves.
pub fn resolve_environment(env: &EnvName, environments: &[Environment]) -> Option<EnvironmentRef> {
    match env {
        EnvName::Default => Some(EnvironmentRef::Default),
        EnvName::Named(name) => environments
            .iter()
            .find(|candidate| &candidate.alternate_id == name)
            .cloned()
            .map(EnvironmentRef::Named),
    }
}

/// Keep payloads whose environment still exists in the project.
///
/// Payloads without an environment reference belong to `default` and are
/// always kept. Input order is preserved.
pub fn filter_envs_by_current_environments(
    payloads: Vec<EnvPayload>,
    environments: &[Environment],
) -> Vec<EnvPayload> {
    let current: HashSet<&str> = environments
        .iter()
        .map(|env| env.alternate_id.as_str())
        .collect();

    payloads
        .into_iter()
        .filter(|payload| match &payload.environment {
            None => true,
            Some(env) => current.contains(env.alternate_id.as_str()),
        })
        .collect()
}

/// Project environments that have no stored payload for this app.
pub fn find_missing_environments(
    environments: &[Environment],
    payloads: &[EnvPayload],
) -> Vec<Environment> {
    let stored: HashSet<&str> = payloads
        .iter()
        .filter_map(|payload| payload.environment.as_ref())
        .map(|env| env.alternate_id.as_str())
        .collect();
    environments
        .iter()
        .filter(|env| !stored.contains(env.alternate_id.as_str()))
        .cloned()
        .collect()
}
