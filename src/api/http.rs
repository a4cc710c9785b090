//! HTTPS implementations of [`EnvClient`] and [`KeyService`].
//!
//! One blocking `reqwest` client per process with a per-request deadline.
//! Reads go through [`with_backoff`]; writes are sent exactly once.

use super::models::{EnvPayload, Environment, Page, PageRequest};
use super::retry::{with_backoff, RetryPolicy};
use super::{EnvClient, KeyService};
use crate::config::{ApiSettings, Credentials};
use crate::envfile::EnvName;
use crate::error::ApiError;
use crate::key::KeyRecord;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

const KEY_ID_MISMATCH: &str = "secretKeyId must be >= 1";
const USER_AGENT: &str = concat!("hx-env/", env!("CARGO_PKG_VERSION"));

type Query = Vec<(&'static str, String)>;

#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    credentials: Credentials,
    retry: RetryPolicy,
}

impl HttpClient {
    pub fn new(settings: &ApiSettings) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            credentials: settings.credentials.clone(),
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.credentials {
            Credentials::ApiKey(key) => request.header("x-api-key", key),
            Credentials::Bearer(token) => request.bearer_auth(token),
            Credentials::Anonymous => request,
        }
    }

    /// GET with retries on transient failures
    fn get_json<T: DeserializeOwned>(&self, url: &str, query: &Query) -> Result<T, ApiError> {
        with_backoff(&self.retry, url, || {
            debug!(%url, "GET");
            let response = self
                .authorize(self.client.get(url).query(query))
                .send()
                .map_err(transport)?;
            decode(check(response)?)
        })
    }

    fn send_json<B: Serialize>(
        &self,
        request: RequestBuilder,
        body: &B,
    ) -> Result<Response, ApiError> {
        let response = self
            .authorize(request.json(body))
            .send()
            .map_err(transport)?;
        check(response)
    }
}

fn transport(err: reqwest::Error) -> ApiError {
    ApiError::Transport(err.to_string())
}

fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let bytes = response.bytes().map_err(transport)?;
    serde_json::from_slice(&bytes).map_err(|e| ApiError::Decode(e.to_string()))
}

fn check(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    Err(classify(status, &body))
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

/// Map a failed response to an [`ApiError`]
pub fn classify(status: StatusCode, body: &str) -> ApiError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.message)
        .unwrap_or_else(|| body.trim().to_string());

    match status {
        StatusCode::BAD_REQUEST if body.contains(KEY_ID_MISMATCH) => ApiError::KeyIdMismatch(message),
        StatusCode::BAD_REQUEST => ApiError::BadRequest(message),
        StatusCode::UNAUTHORIZED => ApiError::Unauthenticated,
        StatusCode::FORBIDDEN => ApiError::Forbidden,
        StatusCode::NOT_FOUND => ApiError::NotFound(message),
        StatusCode::CONFLICT => ApiError::Conflict(message),
        StatusCode::TOO_MANY_REQUESTS => ApiError::RateLimited,
        s if s.is_server_error() => ApiError::Transient {
            status: s.as_u16(),
            message,
        },
        s => ApiError::Unexpected {
            status: s.as_u16(),
            message,
        },
    }
}

fn page_query(page: PageRequest) -> Query {
    vec![
        ("pageNum", page.page_num.to_string()),
        ("pageSize", page.page_size.to_string()),
    ]
}

/// Environment store under `<base>/api/organizations`
pub struct HttpEnvClient {
    http: HttpClient,
    base_url: String,
}

impl HttpEnvClient {
    pub fn new(http: HttpClient, settings: &ApiSettings) -> Self {
        Self {
            http,
            base_url: format!("{}/api/organizations", settings.base_url.trim_end_matches('/')),
        }
    }

    fn environments_url(&self, org: &str, project: &str) -> String {
        format!("{}/{org}/projects/{project}/environments/", self.base_url)
    }

    fn envs_url(&self, org: &str, app: &str) -> String {
        format!("{}/{org}/apps/{app}/envs/", self.base_url)
    }

    fn env_url(&self, org: &str, app: &str, env: &EnvName) -> String {
        format!("{}/{org}/apps/{app}/envs/{env}", self.base_url)
    }
}

impl EnvClient for HttpEnvClient {
    fn list_environments(
        &self,
        org: &str,
        project: &str,
        page: PageRequest,
    ) -> Result<Page<Environment>, ApiError> {
        self.http
            .get_json(&self.environments_url(org, project), &page_query(page))
    }

    fn get_environment(
        &self,
        org: &str,
        project: &str,
        name: &str,
    ) -> Result<Option<Environment>, ApiError> {
        let url = format!("{}{name}", self.environments_url(org, project));
        match self.http.get_json(&url, &Vec::new()) {
            Ok(env) => Ok(Some(env)),
            Err(ApiError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn get_env(
        &self,
        org: &str,
        app: &str,
        env: &EnvName,
        key_id: Option<i64>,
        version: Option<u64>,
    ) -> Result<EnvPayload, ApiError> {
        let mut query = Query::new();
        if let Some(key_id) = key_id {
            query.push(("secretKeyId", key_id.to_string()));
        }
        if let Some(version) = version {
            query.push(("version", version.to_string()));
        }
        self.http.get_json(&self.env_url(org, app, env), &query)
    }

    fn list_envs(
        &self,
        org: &str,
        app: &str,
        page: PageRequest,
    ) -> Result<Page<EnvPayload>, ApiError> {
        self.http.get_json(&self.envs_url(org, app), &page_query(page))
    }

    fn list_env_versions(
        &self,
        org: &str,
        app: &str,
        env: &EnvName,
        page: PageRequest,
    ) -> Result<Page<EnvPayload>, ApiError> {
        let url = format!("{}/versions/", self.env_url(org, app, env));
        self.http.get_json(&url, &page_query(page))
    }

    fn put_env(
        &self,
        org: &str,
        app: &str,
        env: &EnvName,
        secret_key_id: i64,
        payload: &EnvPayload,
    ) -> Result<(), ApiError> {
        let url = self.env_url(org, app, env);
        debug!(%url, version = ?payload.version, key_id = secret_key_id, "PUT");
        let request = self
            .http
            .client
            .put(&url)
            .query(&[("secretKeyId", secret_key_id.to_string())]);
        self.http.send_json(request, payload).map(|_| ())
    }
}

#[derive(Deserialize)]
struct KeyResponse {
    key: KeyRecord,
}

/// Project key service under `<base>/api/vinz`
pub struct HttpKeyService {
    http: HttpClient,
    base_url: String,
}

impl HttpKeyService {
    pub fn new(http: HttpClient, settings: &ApiSettings) -> Self {
        Self {
            http,
            base_url: settings.key_service_url(),
        }
    }

    fn key_url(&self, org: &str, project: &str) -> String {
        format!("{}/{org}/{project}/key", self.base_url)
    }

    fn validated(record: KeyRecord) -> Result<KeyRecord, ApiError> {
        record
            .validate()
            .map_err(|e| ApiError::Decode(e.to_string()))?;
        Ok(record)
    }
}

impl KeyService for HttpKeyService {
    fn get_key(&self, org: &str, project: &str) -> Result<KeyRecord, ApiError> {
        let response: KeyResponse = self.http.get_json(&self.key_url(org, project), &Vec::new())?;
        Self::validated(response.key)
    }

    fn get_key_by_id(&self, org: &str, project: &str, key_id: i64) -> Result<KeyRecord, ApiError> {
        let query = vec![("secretKeyId", key_id.to_string())];
        let response: KeyResponse = self.http.get_json(&self.key_url(org, project), &query)?;
        Self::validated(response.key)
    }

    fn save_key(&self, org: &str, project: &str, key: &KeyRecord) -> Result<KeyRecord, ApiError> {
        let request = self.http.client.put(self.key_url(org, project));
        let response = self.http.send_json(request, key)?;
        let saved: KeyResponse = decode(response)?;
        Self::validated(saved.key)
    }
}
