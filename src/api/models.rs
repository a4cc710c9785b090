//! Wire types of the remote store, in its camelCase JSON shape.

use crate::envfile::EnvName;
use crate::error::EnvNameError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectReference {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub alternate_id: String,
    #[serde(default)]
    pub name: String,
}

/// Project-level environment descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    pub id: String,
    pub alternate_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<ProjectReference>,
}

impl Environment {
    pub fn new(alternate_id: impl Into<String>) -> Self {
        let alternate_id = alternate_id.into();
        Self {
            id: format!("pe_{alternate_id}"),
            name: alternate_id.clone(),
            alternate_id,
            project: None,
        }
    }
}

/// Back-pointer from a payload to the environment it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentReference {
    pub id: String,
    pub alternate_id: String,
    #[serde(default)]
    pub name: String,
}

impl From<&Environment> for EnvironmentReference {
    fn from(env: &Environment) -> Self {
        Self {
            id: env.id.clone(),
            alternate_id: env.alternate_id.clone(),
            name: env.name.clone(),
        }
    }
}

/// An environment as the synchroniser addresses it.
///
/// `Default` has no project descriptor on the remote but is always present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvironmentRef {
    Default,
    Named(Environment),
}

impl EnvironmentRef {
    pub fn name(&self) -> EnvName {
        match self {
            EnvironmentRef::Default => EnvName::Default,
            EnvironmentRef::Named(env) => EnvName::Named(env.alternate_id.clone()),
        }
    }
}

/// Encrypted contents of one environment of one app.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvPayload {
    pub data: String,
    pub count_variables: u32,
    pub size: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(
        default,
        rename = "projectEnvironment",
        skip_serializing_if = "Option::is_none"
    )]
    pub environment: Option<EnvironmentReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key_id: Option<i64>,
    #[serde(
        default,
        alias = "publishedAt",
        skip_serializing_if = "Option::is_none"
    )]
    pub published: Option<DateTime<Utc>>,
}

impl EnvPayload {
    /// The environment this payload belongs to; no back-pointer means `default`
    pub fn env_name(&self) -> Result<EnvName, EnvNameError> {
        match &self.environment {
            None => Ok(EnvName::Default),
            Some(env) => EnvName::from_remote(&env.alternate_id),
        }
    }

    pub fn version(&self) -> u64 {
        self.version.unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub data: Vec<T>,
    #[serde(default, alias = "total")]
    pub total_count: u64,
    #[serde(default)]
    pub page_num: u32,
    #[serde(default)]
    pub page_size: u32,
}

impl<T> Page<T> {
    /// Whether pages after this one may hold more items
    pub fn has_more(&self) -> bool {
        let seen = u64::from(self.page_num.max(1)) * u64::from(self.page_size);
        !self.data.is_empty() && self.page_size > 0 && seen < self.total_count
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page_num: u32,
    pub page_size: u32,
}

impl PageRequest {
    pub const DEFAULT_SIZE: u32 = 100;

    pub fn first(page_size: u32) -> Self {
        Self {
            page_num: 1,
            page_size,
        }
    }

    pub fn next(self) -> Self {
        Self {
            page_num: self.page_num + 1,
            ..self
        }
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::first(Self::DEFAULT_SIZE)
    }
}
