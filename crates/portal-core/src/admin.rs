use doc_model::{landing_url, CaseRecord, PortalConfig, Slug, ViewLog};
use serde::Serialize;
use storage::{RecordStore, StorageError};
use uuid::Uuid;

pub const PAGE_SIZE: usize = 9;

/// One page of the case listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CasePage {
    pub cases: Vec<CaseRecord>,
    /// Matches across all pages.
    pub total: usize,
    pub page: usize,
    pub page_count: usize,
}

/// Staff-side case management.
pub struct CaseAdmin<'a> {
    config: &'a PortalConfig,
    records: &'a dyn RecordStore,
}

impl<'a> CaseAdmin<'a> {
    pub fn new(config: &'a PortalConfig, records: &'a dyn RecordStore) -> Self {
        Self { config, records }
    }

    /// All cases, newest first.
    pub fn list(&self) -> Result<Vec<CaseRecord>, StorageError> {
        self.records.list()
    }

    /// Case-insensitive match on case number or title, paged `PAGE_SIZE` at a time from page 1.
    pub fn search(&self, query: Option<&str>, page: usize) -> Result<CasePage, StorageError> {
        let needle = query.map(str::trim).filter(|q| !q.is_empty()).map(str::to_lowercase);

        let matches: Vec<CaseRecord> = self
            .records
            .list()?
            .into_iter()
            .filter(|case| match &needle {
                Some(needle) => {
                    case.case_number.to_lowercase().contains(needle)
                        || case.title.to_lowercase().contains(needle)
                }
                None => true,
            })
            .collect();

        let total = matches.len();
        let page = page.max(1);
        let skip = (page - 1).saturating_mul(PAGE_SIZE);
        let cases = matches.into_iter().skip(skip).take(PAGE_SIZE).collect();

        Ok(CasePage { cases, total, page, page_count: total.div_ceil(PAGE_SIZE) })
    }

    pub fn delete(&self, id: Uuid) -> Result<bool, StorageError> {
        let removed = self.records.delete(id)?;
        if removed {
            log::info!("deleted case {id}");
        } else {
            log::warn!("no case {id} to delete");
        }
        Ok(removed)
    }

    /// View log of one case, newest first.
    pub fn history(&self, slug: &Slug) -> Result<Vec<ViewLog>, StorageError> {
        self.records.view_logs(slug)
    }

    pub fn landing_url(&self, slug: &Slug) -> String {
        landing_url(self.config.viewer_origin(), slug)
    }
}
