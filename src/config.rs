//! Workspace configuration.
//!
//! Settings come from the user-level `~/.hx` overlaid by the workspace `.hx`,
//! both JSON, then from `HX_*` environment variables.

use crate::cache::CONFIG_FILE;
use crate::error::{HxError, Result};
use config::{Config, File, FileFormat};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "https://api.hyphen.ai";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const ENV_PREFIX: &str = "HX_";

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorkspaceConfig {
    pub organization_id: Option<String>,
    pub project_id: Option<String>,
    pub project_alternate_id: Option<String>,
    pub project_name: Option<String>,
    pub app_id: Option<String>,
    pub app_alternate_id: Option<String>,
    pub app_name: Option<String>,
    pub hyphen_api_key: Option<String>,
    pub hyphen_access_token: Option<String>,
    pub api_url: Option<String>,
    pub timeout_secs: Option<u64>,
    pub is_monorepo: Option<bool>,
    pub project: Option<MonorepoProject>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct MonorepoProject {
    #[serde(rename = "app", default)]
    pub apps: Vec<String>,
}

/// How requests to the remote are authenticated
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    ApiKey(String),
    Bearer(String),
    Anonymous,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiSettings {
    pub base_url: String,
    pub timeout: Duration,
    pub credentials: Credentials,
}

impl ApiSettings {
    /// Base URL of the key service
    pub fn key_service_url(&self) -> String {
        format!("{}/api/vinz", self.base_url.trim_end_matches('/'))
    }
}

impl WorkspaceConfig {
    /// Load `<home>/.hx` then `<workspace>/.hx`, then apply `HX_*` overrides
    pub fn load(workspace: &Path, home: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        let mut sources: Vec<PathBuf> = Vec::new();
        if let Some(home) = home {
            sources.push(home.join(CONFIG_FILE));
        }
        let local = workspace.join(CONFIG_FILE);
        if !sources.contains(&local) {
            sources.push(local);
        }

        for path in sources.iter().filter(|p| p.is_file()) {
            let name = path
                .to_str()
                .ok_or_else(|| HxError::Config(format!("Invalid config path: {}", path.display())))?;
            builder = builder.add_source(File::new(name, FileFormat::Json));
        }

        let mut cfg: WorkspaceConfig = builder
            .build()
            .map_err(|err| HxError::Config(format!("Failed to load config file: {err}")))?
            .try_deserialize()
            .map_err(|err| HxError::Config(format!("Failed to parse config file: {err}")))?;

        cfg.apply_env_overrides();
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) {
        let var = |name: &str| env::var(format!("{ENV_PREFIX}{name}")).ok().filter(|v| !v.is_empty());

        if let Some(org) = var("ORGANIZATION_ID") {
            self.organization_id = Some(org);
        }
        if let Some(project) = var("PROJECT_ID") {
            self.project_id = Some(project);
        }
        if let Some(app) = var("APP_ID") {
            self.app_id = Some(app);
        }
        if let Some(key) = var("API_KEY") {
            self.hyphen_api_key = Some(key);
        }
        if let Some(token) = var("ACCESS_TOKEN") {
            self.hyphen_access_token = Some(token);
        }
        if let Some(url) = var("API_URL") {
            self.api_url = Some(url);
        }
        if let Some(secs) = var("TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.timeout_secs = Some(secs);
        }
    }

    pub fn organization_id(&self) -> Result<&str> {
        required(&self.organization_id, "organization_id", "ORGANIZATION_ID")
    }

    pub fn project_id(&self) -> Result<&str> {
        required(&self.project_id, "project_id", "PROJECT_ID")
    }

    pub fn app_id(&self) -> Result<&str> {
        required(&self.app_id, "app_id", "APP_ID")
    }

    /// App directories of a monorepo workspace, relative to its root
    pub fn monorepo_apps(&self) -> Option<&[String]> {
        if self.is_monorepo != Some(true) {
            return None;
        }
        self.project.as_ref().map(|p| p.apps.as_slice())
    }

    pub fn api_settings(&self) -> ApiSettings {
        let credentials = match (&self.hyphen_api_key, &self.hyphen_access_token) {
            (Some(key), _) => Credentials::ApiKey(key.clone()),
            (None, Some(token)) => Credentials::Bearer(token.clone()),
            (None, None) => Credentials::Anonymous,
        };
        ApiSettings {
            base_url: self
                .api_url
                .clone()
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            timeout: self
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_TIMEOUT),
            credentials,
        }
    }
}

fn required<'a>(value: &'a Option<String>, field: &str, var: &str) -> Result<&'a str> {
    value.as_deref().filter(|v| !v.is_empty()).ok_or_else(|| {
        HxError::Config(format!(
            "Missing {field}: set it in {CONFIG_FILE} or export {ENV_PREFIX}{var}"
        ))
    })
}

/// The user's home directory
pub fn home_dir() -> Option<PathBuf> {
    dirs::home_dir()
}
