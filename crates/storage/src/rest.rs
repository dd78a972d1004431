//! HTTP clients for a hosted backend exposing a storage REST API under `/storage/v1` and a
//! PostgREST-style table API under `/rest/v1`.

use crate::{validate_object_path, ObjectStore, RecordStore, StorageError};
use doc_model::{BackendConfig, CaseRecord, NewCaseRecord, Slug, ViewLog};
use serde::Deserialize;
use std::time::Duration;
use uuid::Uuid;

const CASES_TABLE: &str = "cases";
const VIEW_LOGS_TABLE: &str = "view_logs";
const INCREMENT_VIEWS_FN: &str = "increment_views";
const TIMEOUT: Duration = Duration::from_secs(120);

fn agent() -> ureq::Agent {
    ureq::AgentBuilder::new().timeout(TIMEOUT).build()
}

fn trim_base(url: &str) -> String {
    url.trim_end_matches('/').to_owned()
}

pub fn object_url(base: &str, bucket: &str, path: &str) -> String {
    format!("{}/storage/v1/object/{bucket}/{path}", trim_base(base))
}

pub fn public_object_url(base: &str, bucket: &str, path: &str) -> String {
    format!("{}/storage/v1/object/public/{bucket}/{path}", trim_base(base))
}

fn read_body(response: ureq::Response) -> Result<String, StorageError> {
    response.into_string().map_err(|err| StorageError::Transport(err.to_string()))
}

/// Maps a ureq failure: transport problems stay transient, status codes are classified.
fn classify(err: ureq::Error) -> StorageError {
    match err {
        ureq::Error::Status(status, response) => {
            let body = response.into_string().unwrap_or_default();
            StorageError::from_status(status, body)
        }
        ureq::Error::Transport(transport) => StorageError::Transport(transport.to_string()),
    }
}

/// Single authenticated POST against the storage API using the anonymous key.
#[derive(Debug, Clone)]
pub struct RawUploadClient {
    base_url: String,
    anon_key: String,
    agent: ureq::Agent,
}

impl RawUploadClient {
    pub fn new(base_url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        Self { base_url: trim_base(&base_url.into()), anon_key: anon_key.into(), agent: agent() }
    }
}

impl ObjectStore for RawUploadClient {
    fn put(
        &self,
        bucket: &str,
        path: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<String, StorageError> {
        validate_object_path(path)?;

        self.agent
            .post(&object_url(&self.base_url, bucket, path))
            .set("Authorization", &format!("Bearer {}", self.anon_key))
            .set("x-upsert", "true")
            .set("Content-Type", content_type)
            .send_bytes(bytes)
            .map_err(classify)?;

        Ok(public_object_url(&self.base_url, bucket, path))
    }
}

/// Hosted backend client for both objects and case records.
#[derive(Debug, Clone)]
pub struct RestBackend {
    base_url: String,
    anon_key: String,
    access_token: Option<String>,
    agent: ureq::Agent,
}

#[derive(Debug, Deserialize)]
struct ViewsRow {
    views: Option<u64>,
}

impl RestBackend {
    pub fn new(base_url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        Self {
            base_url: trim_base(&base_url.into()),
            anon_key: anon_key.into(),
            access_token: None,
            agent: agent(),
        }
    }

    pub fn from_config(config: &BackendConfig) -> Option<Self> {
        if !config.is_configured() {
            return None;
        }
        let url = config.url.as_deref()?;
        let key = config.anon_key.as_deref()?;
        let backend = Self::new(url, key);
        match config.access_token.as_deref() {
            Some(token) if !token.trim().is_empty() => Some(backend.with_access_token(token)),
            _ => Some(backend),
        }
    }

    /// Authenticates requests as a signed-in staff member instead of the anonymous role.
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn anon_key(&self) -> &str {
        &self.anon_key
    }

    /// Fallback client that shares this backend's URL and anonymous key.
    pub fn raw_client(&self) -> RawUploadClient {
        RawUploadClient::new(self.base_url.clone(), self.anon_key.clone())
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token.as_deref().unwrap_or(&self.anon_key))
    }

    fn table_url(&self, table: &str, query: &str) -> String {
        if query.is_empty() {
            format!("{}/rest/v1/{table}", self.base_url)
        } else {
            format!("{}/rest/v1/{table}?{query}", self.base_url)
        }
    }

    fn request(&self, method: &str, url: &str) -> ureq::Request {
        self.agent
            .request(method, url)
            .set("apikey", &self.anon_key)
            .set("Authorization", &self.bearer())
            .set("Accept", "application/json")
    }

    fn send_json(
        &self,
        method: &str,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<String, StorageError> {
        let payload = serde_json::to_vec(body)?;
        let response = self
            .request(method, url)
            .set("Content-Type", "application/json")
            .set("Prefer", "return=representation")
            .send_bytes(&payload)
            .map_err(classify)?;
        read_body(response)
    }

    fn get(&self, url: &str) -> Result<String, StorageError> {
        let response = self.request("GET", url).call().map_err(classify)?;
        read_body(response)
    }

    fn rpc_url(&self, function: &str) -> String {
        format!("{}/rest/v1/rpc/{function}", self.base_url)
    }

    /// Calls the server-side `increment_views` function. `Ok(None)` means the function is not
    /// deployed on this backend. A function returning void is followed by a read of the counter.
    fn rpc_increment_views(&self, id: Uuid) -> Result<Option<u64>, StorageError> {
        let payload = serde_json::to_vec(&serde_json::json!({ "row_id": id }))?;
        let response = match self
            .request("POST", &self.rpc_url(INCREMENT_VIEWS_FN))
            .set("Content-Type", "application/json")
            .send_bytes(&payload)
        {
            Ok(response) => response,
            Err(ureq::Error::Status(404, _)) => return Ok(None),
            Err(err) => return Err(classify(err)),
        };

        let body = read_body(response)?;
        let returned = match body.trim() {
            "" => None,
            text => serde_json::from_str::<Option<u64>>(text)?,
        };
        match returned {
            Some(views) => Ok(Some(views)),
            None => self.fetch_views(id).map(Some),
        }
    }

    fn fetch_views(&self, id: Uuid) -> Result<u64, StorageError> {
        let body = self.get(&self.table_url(CASES_TABLE, &format!("id=eq.{id}&select=views")))?;
        let rows: Vec<ViewsRow> = serde_json::from_str(&body)?;
        let row = rows.into_iter().next().ok_or(StorageError::NotFound(id))?;
        Ok(row.views.unwrap_or(0))
    }
}

impl ObjectStore for RestBackend {
    fn put(
        &self,
        bucket: &str,
        path: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<String, StorageError> {
        validate_object_path(path)?;

        self.agent
            .post(&object_url(&self.base_url, bucket, path))
            .set("apikey", &self.anon_key)
            .set("Authorization", &self.bearer())
            .set("x-upsert", "true")
            .set("Content-Type", content_type)
            .send_bytes(bytes)
            .map_err(classify)?;

        Ok(public_object_url(&self.base_url, bucket, path))
    }
}

impl RecordStore for RestBackend {
    fn insert(&self, record: NewCaseRecord) -> Result<CaseRecord, StorageError> {
        let body = serde_json::to_value(&record)?;
        let text = self.send_json("POST", &self.table_url(CASES_TABLE, ""), &body)?;

        let rows: Vec<CaseRecord> = serde_json::from_str(&text)?;
        rows.into_iter()
            .next()
            .ok_or_else(|| StorageError::InvalidResponse("insert returned no rows".to_owned()))
    }

    fn find_by_slug(&self, slug: &Slug) -> Result<Option<CaseRecord>, StorageError> {
        let body = self.get(&self.table_url(CASES_TABLE, &format!("slug=eq.{slug}&select=*")))?;
        let rows: Vec<CaseRecord> = serde_json::from_str(&body)?;
        Ok(rows.into_iter().next())
    }

    fn list(&self) -> Result<Vec<CaseRecord>, StorageError> {
        let body = self.get(&self.table_url(CASES_TABLE, "select=*&order=created_at.desc"))?;
        Ok(serde_json::from_str(&body)?)
    }

    fn update_views(&self, id: Uuid, views: u64) -> Result<(), StorageError> {
        let text = self.send_json(
            "PATCH",
            &self.table_url(CASES_TABLE, &format!("id=eq.{id}")),
            &serde_json::json!({ "views": views }),
        )?;

        let rows: Vec<serde_json::Value> = serde_json::from_str(&text)?;
        if rows.is_empty() {
            return Err(StorageError::NotFound(id));
        }
        Ok(())
    }

    fn increment_views(&self, id: Uuid) -> Result<u64, StorageError> {
        if let Some(views) = self.rpc_increment_views(id)? {
            return Ok(views);
        }

        // Read-then-write; concurrent viewers can lose an increment.
        log::debug!("{INCREMENT_VIEWS_FN} is not deployed, updating the counter directly");
        let next = self.fetch_views(id)? + 1;
        self.update_views(id, next)?;
        Ok(next)
    }

    fn delete(&self, id: Uuid) -> Result<bool, StorageError> {
        let response = self
            .request("DELETE", &self.table_url(CASES_TABLE, &format!("id=eq.{id}")))
            .set("Prefer", "return=representation")
            .call()
            .map_err(classify)?;

        let rows: Vec<serde_json::Value> = serde_json::from_str(&read_body(response)?)?;
        Ok(!rows.is_empty())
    }

    fn insert_view_log(&self, log: &ViewLog) -> Result<(), StorageError> {
        let body = serde_json::to_value(log)?;
        self.send_json("POST", &self.table_url(VIEW_LOGS_TABLE, ""), &body)?;
        Ok(())
    }

    fn view_logs(&self, slug: &Slug) -> Result<Vec<ViewLog>, StorageError> {
        let body = self.get(
            &self.table_url(VIEW_LOGS_TABLE, &format!("slug=eq.{slug}&select=*&order=viewed_at.desc")),
        )?;
        Ok(serde_json::from_str(&body)?)
    }
}
