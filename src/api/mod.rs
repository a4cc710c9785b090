//! Remote store and key service.
//!
//! [`EnvClient`] and [`KeyService`] are the seams the synchroniser talks
//! through; [`http`] implements them over HTTPS. Implementations are
//! stateless apart from connection reuse.

pub mod http;
pub mod models;
pub mod retry;

use crate::envfile::EnvName;
use crate::error::ApiError;
use crate::key::KeyRecord;
use models::{EnvPayload, Environment, Page, PageRequest};
use std::rc::Rc;

/// Safety net against a server that never reports the last page.
const MAX_PAGES: u32 = 1000;

pub trait EnvClient {
    fn list_environments(
        &self,
        org: &str,
        project: &str,
        page: PageRequest,
    ) -> Result<Page<Environment>, ApiError>;

    /// Look up one project environment by alternate id
    fn get_environment(
        &self,
        org: &str,
        project: &str,
        name: &str,
    ) -> Result<Option<Environment>, ApiError>;

    fn get_env(
        &self,
        org: &str,
        app: &str,
        env: &EnvName,
        key_id: Option<i64>,
        version: Option<u64>,
    ) -> Result<EnvPayload, ApiError>;

    fn list_envs(&self, org: &str, app: &str, page: PageRequest)
        -> Result<Page<EnvPayload>, ApiError>;

    fn list_env_versions(
        &self,
        org: &str,
        app: &str,
        env: &EnvName,
        page: PageRequest,
    ) -> Result<Page<EnvPayload>, ApiError>;

    /// Store `payload` as the next version. Never retried automatically.
    fn put_env(
        &self,
        org: &str,
        app: &str,
        env: &EnvName,
        secret_key_id: i64,
        payload: &EnvPayload,
    ) -> Result<(), ApiError>;
}

pub trait KeyService {
    fn get_key(&self, org: &str, project: &str) -> Result<KeyRecord, ApiError>;

    fn get_key_by_id(&self, org: &str, project: &str, key_id: i64) -> Result<KeyRecord, ApiError>;

    /// Upload a key; the returned record carries the server-assigned id
    fn save_key(&self, org: &str, project: &str, key: &KeyRecord) -> Result<KeyRecord, ApiError>;
}

impl<T: EnvClient + ?Sized> EnvClient for Rc<T> {
    fn list_environments(
        &self,
        org: &str,
        project: &str,
        page: PageRequest,
    ) -> Result<Page<Environment>, ApiError> {
        (**self).list_environments(org, project, page)
    }

    fn get_environment(
        &self,
        org: &str,
        project: &str,
        name: &str,
    ) -> Result<Option<Environment>, ApiError> {
        (**self).get_environment(org, project, name)
    }

    fn get_env(
        &self,
        org: &str,
        app: &str,
        env: &EnvName,
        key_id: Option<i64>,
        version: Option<u64>,
    ) -> Result<EnvPayload, ApiError> {
        (**self).get_env(org, app, env, key_id, version)
    }

    fn list_envs(
        &self,
        org: &str,
        app: &str,
        page: PageRequest,
    ) -> Result<Page<EnvPayload>, ApiError> {
        (**self).list_envs(org, app, page)
    }

    fn list_env_versions(
        &self,
        org: &str,
        app: &str,
        env: &EnvName,
        page: PageRequest,
    ) -> Result<Page<EnvPayload>, ApiError> {
        (**self).list_env_versions(org, app, env, page)
    }

    fn put_env(
        &self,
        org: &str,
        app: &str,
        env: &EnvName,
        secret_key_id: i64,
        payload: &EnvPayload,
    ) -> Result<(), ApiError> {
        (**self).put_env(org, app, env, secret_key_id, payload)
    }
}

impl<T: KeyService + ?Sized> KeyService for Rc<T> {
    fn get_key(&self, org: &str, project: &str) -> Result<KeyRecord, ApiError> {
        (**self).get_key(org, project)
    }

    fn get_key_by_id(&self, org: &str, project: &str, key_id: i64) -> Result<KeyRecord, ApiError> {
        (**self).get_key_by_id(org, project, key_id)
    }

    fn save_key(&self, org: &str, project: &str, key: &KeyRecord) -> Result<KeyRecord, ApiError> {
        (**self).save_key(org, project, key)
    }
}

/// Follow pagination until the last page
pub fn fetch_all<T, F>(page_size: u32, mut fetch: F) -> Result<Vec<T>, ApiError>
where
    F: FnMut(PageRequest) -> Result<Page<T>, ApiError>,
{
    let mut request = PageRequest::first(page_size);
    let mut items = Vec::new();
    loop {
        let page = fetch(request)?;
        let more = page.has_more();
        items.extend(page.data);
        if !more || request.page_num >= MAX_PAGES {
            return Ok(items);
        }
        request = request.next();
    }
}
