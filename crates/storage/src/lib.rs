use doc_model::{CaseRecord, NewCaseRecord, Slug, ViewLog};
use uuid::Uuid;

pub mod config;
pub mod fallback;
pub mod local;
pub mod rest;

#[cfg(any(test, feature = "test-support"))]
pub mod memory;

pub use config::{load_config, load_with_env, save_config, ConfigError};
pub use fallback::FallbackObjectStore;
pub use local::LocalStore;
pub use rest::{RawUploadClient, RestBackend};

/// Marker the hosted storage API puts in the body when a payload is over its size limit.
pub const QUOTA_MARKER: &str = "exceeded the maximum allowed size";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("unable to resolve local data directory")]
    NoDataDirectory,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("invalid object path '{0}'")]
    InvalidPath(String),
    #[error("network error: {0}")]
    Transport(String),
    #[error("the file is larger than the storage backend allows: {0}")]
    Quota(String),
    #[error("backend rejected the request ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("a case with slug {0} already exists")]
    Conflict(Slug),
    #[error("no case with id {0}")]
    NotFound(Uuid),
    #[error("unexpected backend response: {0}")]
    InvalidResponse(String),
    #[error("unsupported records file version {0}")]
    UnsupportedVersion(u32),
}

impl StorageError {
    /// Failures at the transport level, the only kind a fallback upload is attempted for.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    pub fn is_quota(&self) -> bool {
        matches!(self, Self::Quota(_))
    }

    /// Classifies a non-2xx response from the storage API.
    pub fn from_status(status: u16, body: String) -> Self {
        if status == 413 || body.contains(QUOTA_MARKER) {
            Self::Quota(body)
        } else {
            Self::Rejected { status, body }
        }
    }
}

/// Public-URL object storage with upsert semantics.
pub trait ObjectStore {
    fn put(
        &self,
        bucket: &str,
        path: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<String, StorageError>;
}

/// Case records and their view logs.
pub trait RecordStore {
    fn insert(&self, record: NewCaseRecord) -> Result<CaseRecord, StorageError>;
    fn find_by_slug(&self, slug: &Slug) -> Result<Option<CaseRecord>, StorageError>;
    /// Newest first.
    fn list(&self) -> Result<Vec<CaseRecord>, StorageError>;
    fn update_views(&self, id: Uuid, views: u64) -> Result<(), StorageError>;
    fn increment_views(&self, id: Uuid) -> Result<u64, StorageError>;
    /// Returns `false` when nothing matched `id`.
    fn delete(&self, id: Uuid) -> Result<bool, StorageError>;
    fn insert_view_log(&self, log: &ViewLog) -> Result<(), StorageError>;
    /// Newest first.
    fn view_logs(&self, slug: &Slug) -> Result<Vec<ViewLog>, StorageError>;
}

/// Rejects empty segments, `..`, and absolute paths in caller-chosen object paths.
pub fn validate_object_path(path: &str) -> Result<(), StorageError> {
    let valid = !path.is_empty()
        && !path.starts_with('/')
        && !path.contains('\\')
        && path.split('/').all(|segment| !segment.is_empty() && segment != "." && segment != "..");

    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidPath(path.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_is_detected_from_status_or_body() {
        assert!(StorageError::from_status(413, String::new()).is_quota());
        assert!(StorageError::from_status(
            400,
            r#"{"error":"Payload too large","message":"The object exceeded the maximum allowed size"}"#
                .to_owned()
        )
        .is_quota());

        let other = StorageError::from_status(403, "forbidden".to_owned());
        assert!(matches!(other, StorageError::Rejected { status: 403, .. }));
        assert!(!other.is_transient());
    }

    #[test]
    fn object_paths_are_validated() {
        assert!(validate_object_path("videos/AB12CD_video_1_2.mp4").is_ok());
        assert!(validate_object_path("documents/AB12CD_with_qr.pdf").is_ok());

        for bad in ["", "/etc/passwd", "videos/../secret", "videos//x", "./x", "a\\b"] {
            assert!(
                matches!(validate_object_path(bad), Err(StorageError::InvalidPath(_))),
                "{bad} should be rejected"
            );
        }
    }
}
