use crate::{config, validate_object_path, ObjectStore, RecordStore, StorageError};
use chrono::Utc;
use doc_model::{CaseRecord, NewCaseRecord, Slug, ViewLog};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

const RECORDS_SCHEMA_VERSION: u32 = 1;

/// Filesystem-backed object and record store for single-machine deployments and tests.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RecordsEnvelope {
    version: u32,
    #[serde(default)]
    cases: Vec<CaseRecord>,
    #[serde(default)]
    view_logs: Vec<ViewLog>,
}

impl LocalStore {
    pub fn from_default_project() -> Result<Self, StorageError> {
        let dirs = config::project_dirs().ok_or(StorageError::NoDataDirectory)?;

        Ok(Self { root: dirs.data_local_dir().to_path_buf() })
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn object_path(&self, bucket: &str, path: &str) -> Result<PathBuf, StorageError> {
        validate_object_path(bucket)?;
        validate_object_path(path)?;

        Ok(self.root.join("objects").join(bucket).join(path))
    }

    fn records_path(&self) -> PathBuf {
        self.root.join("records.json")
    }

    fn load(&self) -> Result<RecordsEnvelope, StorageError> {
        let path = self.records_path();
        if !path.exists() {
            return Ok(RecordsEnvelope { version: RECORDS_SCHEMA_VERSION, ..Default::default() });
        }

        let bytes = fs::read(path)?;
        let envelope: RecordsEnvelope = serde_json::from_slice(&bytes)?;
        if envelope.version != RECORDS_SCHEMA_VERSION {
            return Err(StorageError::UnsupportedVersion(envelope.version));
        }

        Ok(envelope)
    }

    fn save(&self, envelope: &RecordsEnvelope) -> Result<(), StorageError> {
        fs::create_dir_all(&self.root)?;

        let bytes = serde_json::to_vec_pretty(envelope)?;
        fs::write(self.records_path(), bytes)?;
        Ok(())
    }

    fn update<T>(
        &self,
        apply: impl FnOnce(&mut RecordsEnvelope) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let mut envelope = self.load()?;
        let result = apply(&mut envelope)?;
        envelope.version = RECORDS_SCHEMA_VERSION;
        self.save(&envelope)?;
        Ok(result)
    }
}

fn file_url(path: &Path) -> String {
    let text = path.to_string_lossy().replace('\\', "/");
    if text.starts_with('/') {
        format!("file://{text}")
    } else {
        format!("file:///{text}")
    }
}

impl ObjectStore for LocalStore {
    fn put(
        &self,
        bucket: &str,
        path: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<String, StorageError> {
        let target = self.object_path(bucket, path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, bytes)?;

        log::debug!("stored {bucket}/{path} ({} bytes, {content_type})", bytes.len());
        Ok(file_url(&target))
    }
}

impl RecordStore for LocalStore {
    fn insert(&self, record: NewCaseRecord) -> Result<CaseRecord, StorageError> {
        self.update(|envelope| {
            if envelope.cases.iter().any(|case| case.slug == record.slug) {
                return Err(StorageError::Conflict(record.slug));
            }

            let case = CaseRecord::from_new(record, Uuid::new_v4(), Utc::now());
            envelope.cases.push(case.clone());
            Ok(case)
        })
    }

    fn find_by_slug(&self, slug: &Slug) -> Result<Option<CaseRecord>, StorageError> {
        Ok(self.load()?.cases.into_iter().find(|case| &case.slug == slug))
    }

    fn list(&self) -> Result<Vec<CaseRecord>, StorageError> {
        let mut cases = self.load()?.cases;
        cases.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(cases)
    }

    fn update_views(&self, id: Uuid, views: u64) -> Result<(), StorageError> {
        self.update(|envelope| {
            let case = envelope
                .cases
                .iter_mut()
                .find(|case| case.id == id)
                .ok_or(StorageError::NotFound(id))?;
            case.views = views;
            Ok(())
        })
    }

    fn increment_views(&self, id: Uuid) -> Result<u64, StorageError> {
        self.update(|envelope| {
            let case = envelope
                .cases
                .iter_mut()
                .find(|case| case.id == id)
                .ok_or(StorageError::NotFound(id))?;
            case.views += 1;
            Ok(case.views)
        })
    }

    fn delete(&self, id: Uuid) -> Result<bool, StorageError> {
        self.update(|envelope| {
            let before = envelope.cases.len();
            envelope.cases.retain(|case| case.id != id);
            Ok(envelope.cases.len() != before)
        })
    }

    fn insert_view_log(&self, log: &ViewLog) -> Result<(), StorageError> {
        self.update(|envelope| {
            envelope.view_logs.push(log.clone());
            Ok(())
        })
    }

    fn view_logs(&self, slug: &Slug) -> Result<Vec<ViewLog>, StorageError> {
        let mut logs: Vec<ViewLog> =
            self.load()?.view_logs.into_iter().filter(|log| &log.slug == slug).collect();
        logs.sort_by(|a, b| b.viewed_at.cmp(&a.viewed_at));
        Ok(logs)
    }
}
