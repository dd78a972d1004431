//! In-process store with failure injection for tests of code built on the storage traits.

use crate::{ObjectStore, RecordStore, StorageError};
use chrono::Utc;
use doc_model::{CaseRecord, NewCaseRecord, Slug, ViewLog};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<(String, String), (Vec<u8>, String)>,
    cases: Vec<CaseRecord>,
    view_logs: Vec<ViewLog>,
    put_failures: VecDeque<StorageError>,
    insert_failures: VecDeque<StorageError>,
    log_failures: VecDeque<StorageError>,
    puts: Vec<String>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// The next `put` call fails with `err` instead of storing anything.
    pub fn fail_next_put(&self, err: StorageError) {
        self.lock().put_failures.push_back(err);
    }

    pub fn fail_next_insert(&self, err: StorageError) {
        self.lock().insert_failures.push_back(err);
    }

    pub fn fail_next_view_log(&self, err: StorageError) {
        self.lock().log_failures.push_back(err);
    }

    pub fn object(&self, bucket: &str, path: &str) -> Option<Vec<u8>> {
        self.lock()
            .objects
            .get(&(bucket.to_owned(), path.to_owned()))
            .map(|(bytes, _)| bytes.clone())
    }

    pub fn content_type(&self, bucket: &str, path: &str) -> Option<String> {
        self.lock()
            .objects
            .get(&(bucket.to_owned(), path.to_owned()))
            .map(|(_, content_type)| content_type.clone())
    }

    /// `bucket/path` of every attempted put, in call order.
    pub fn put_log(&self) -> Vec<String> {
        self.lock().puts.clone()
    }

    pub fn object_count(&self) -> usize {
        self.lock().objects.len()
    }

    pub fn all_view_logs(&self) -> Vec<ViewLog> {
        self.lock().view_logs.clone()
    }

    pub fn public_url(bucket: &str, path: &str) -> String {
        format!("memory://{bucket}/{path}")
    }
}

impl ObjectStore for MemoryStore {
    fn put(
        &self,
        bucket: &str,
        path: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<String, StorageError> {
        let mut state = self.lock();
        state.puts.push(format!("{bucket}/{path}"));
        if let Some(err) = state.put_failures.pop_front() {
            return Err(err);
        }

        state
            .objects
            .insert((bucket.to_owned(), path.to_owned()), (bytes.to_vec(), content_type.to_owned()));
        Ok(Self::public_url(bucket, path))
    }
}

impl RecordStore for MemoryStore {
    fn insert(&self, record: NewCaseRecord) -> Result<CaseRecord, StorageError> {
        let mut state = self.lock();
        if let Some(err) = state.insert_failures.pop_front() {
            return Err(err);
        }
        if state.cases.iter().any(|case| case.slug == record.slug) {
            return Err(StorageError::Conflict(record.slug));
        }

        let case = CaseRecord::from_new(record, Uuid::new_v4(), Utc::now());
        state.cases.push(case.clone());
        Ok(case)
    }

    fn find_by_slug(&self, slug: &Slug) -> Result<Option<CaseRecord>, StorageError> {
        Ok(self.lock().cases.iter().find(|case| &case.slug == slug).cloned())
    }

    fn list(&self) -> Result<Vec<CaseRecord>, StorageError> {
        let mut cases = self.lock().cases.clone();
        cases.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(cases)
    }

    fn update_views(&self, id: Uuid, views: u64) -> Result<(), StorageError> {
        let mut state = self.lock();
        let case =
            state.cases.iter_mut().find(|case| case.id == id).ok_or(StorageError::NotFound(id))?;
        case.views = views;
        Ok(())
    }

    fn increment_views(&self, id: Uuid) -> Result<u64, StorageError> {
        let mut state = self.lock();
        let case =
            state.cases.iter_mut().find(|case| case.id == id).ok_or(StorageError::NotFound(id))?;
        case.views += 1;
        Ok(case.views)
    }

    fn delete(&self, id: Uuid) -> Result<bool, StorageError> {
        let mut state = self.lock();
        let before = state.cases.len();
        state.cases.retain(|case| case.id != id);
        Ok(state.cases.len() != before)
    }

    fn insert_view_log(&self, log: &ViewLog) -> Result<(), StorageError> {
        let mut state = self.lock();
        if let Some(err) = state.log_failures.pop_front() {
            return Err(err);
        }
        state.view_logs.push(log.clone());
        Ok(())
    }

    fn view_logs(&self, slug: &Slug) -> Result<Vec<ViewLog>, StorageError> {
        let mut logs: Vec<ViewLog> =
            self.lock().view_logs.iter().filter(|log| &log.slug == slug).cloned().collect();
        logs.sort_by(|a, b| b.viewed_at.cmp(&a.viewed_at));
        Ok(logs)
    }
}
