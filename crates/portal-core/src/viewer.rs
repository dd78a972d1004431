use crate::access::verify_access_password;
use chrono::Utc;
use doc_model::{CaseRecord, Slug, ViewLog};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use storage::{RecordStore, StorageError};

pub const UNKNOWN: &str = "Unknown";

#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    #[error("no case found for this link")]
    NotFound,
    #[error("this case is protected; a password is required")]
    PasswordRequired,
    #[error("incorrect password")]
    WrongPassword,
    #[error("could not load the case: {0}")]
    Store(#[from] StorageError),
}

/// Request metadata of the client opening a viewer link.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Visitor {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct GeoLocation {
    pub ip: Option<String>,
    pub city: Option<String>,
    pub region: Option<String>,
}

impl GeoLocation {
    /// `"City, Region"`, the city alone, or [`UNKNOWN`].
    pub fn describe(&self) -> String {
        match (self.city.as_deref(), self.region.as_deref()) {
            (Some(city), Some(region)) if !city.is_empty() && !region.is_empty() => {
                format!("{city}, {region}")
            }
            (Some(city), _) if !city.is_empty() => city.to_owned(),
            _ => UNKNOWN.to_owned(),
        }
    }
}

/// Best-effort IP geolocation. `None` means the lookup was unavailable.
pub trait GeoLookup {
    fn locate(&self, visitor: &Visitor) -> Option<GeoLocation>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoGeoLookup;

impl GeoLookup for NoGeoLookup {
    fn locate(&self, _visitor: &Visitor) -> Option<GeoLocation> {
        None
    }
}

/// Looks visitors up against an ipapi.co-compatible JSON endpoint.
#[derive(Debug, Clone)]
pub struct IpApiLookup {
    base_url: String,
    agent: ureq::Agent,
}

impl Default for IpApiLookup {
    fn default() -> Self {
        Self::new("https://ipapi.co")
    }
}

impl IpApiLookup {
    pub fn new(base_url: impl Into<String>) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(Duration::from_secs(5)).build();
        Self { base_url: base_url.into().trim_end_matches('/').to_owned(), agent }
    }

    fn url_for(&self, visitor: &Visitor) -> String {
        match visitor.ip.as_deref() {
            Some(ip) => format!("{}/{ip}/json/", self.base_url),
            None => format!("{}/json/", self.base_url),
        }
    }
}

impl GeoLookup for IpApiLookup {
    fn locate(&self, visitor: &Visitor) -> Option<GeoLocation> {
        let body = self
            .agent
            .get(&self.url_for(visitor))
            .call()
            .map_err(|err| err.to_string())
            .and_then(|response| response.into_string().map_err(|err| err.to_string()))
            .and_then(|body| {
                serde_json::from_str::<GeoLocation>(&body).map_err(|err| err.to_string())
            });

        match body {
            Ok(location) => Some(location),
            Err(err) => {
                log::warn!("geolocation lookup failed: {err}");
                None
            }
        }
    }
}

/// What the client-facing page shows once access is granted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViewerPage {
    pub slug: Slug,
    pub title: String,
    pub case_number: String,
    pub video_url: String,
    pub pdf_url: String,
    pub views: u64,
}

impl ViewerPage {
    fn from_record(record: CaseRecord, views: u64) -> Self {
        Self {
            slug: record.slug,
            title: record.title,
            case_number: record.case_number,
            video_url: record.video_url,
            pdf_url: record.pdf_url,
            views,
        }
    }
}

/// Server-side access check for viewer links.
pub struct ViewerService<'a> {
    records: &'a dyn RecordStore,
    geo: &'a dyn GeoLookup,
}

impl<'a> ViewerService<'a> {
    pub fn new(records: &'a dyn RecordStore, geo: &'a dyn GeoLookup) -> Self {
        Self { records, geo }
    }

    /// Whether the case behind `slug` needs a password, without recording a view.
    pub fn requires_password(&self, slug: &str) -> Result<bool, AccessError> {
        Ok(self.lookup(slug)?.is_protected())
    }

    pub fn open(
        &self,
        slug: &str,
        password: Option<&str>,
        visitor: &Visitor,
    ) -> Result<ViewerPage, AccessError> {
        let record = self.lookup(slug)?;

        if let Some(stored) = record.access_password_hash.as_deref() {
            let candidate = password.filter(|candidate| !candidate.is_empty());
            let Some(candidate) = candidate else {
                return Err(AccessError::PasswordRequired);
            };
            if !verify_access_password(&record.slug, candidate, stored) {
                log::info!("wrong password for case {}", record.slug);
                return Err(AccessError::WrongPassword);
            }
        }

        let views = self.record_view(&record, visitor);
        Ok(ViewerPage::from_record(record, views))
    }

    fn lookup(&self, slug: &str) -> Result<CaseRecord, AccessError> {
        let slug: Slug = slug.trim().parse().map_err(|_| AccessError::NotFound)?;
        self.records.find_by_slug(&slug)?.ok_or(AccessError::NotFound)
    }

    /// Logs the view and bumps the counter. Failures are logged and never deny access.
    fn record_view(&self, record: &CaseRecord, visitor: &Visitor) -> u64 {
        let location = self.geo.locate(visitor);
        let ip = visitor.ip.clone().or_else(|| location.as_ref().and_then(|loc| loc.ip.clone()));

        let entry = ViewLog {
            slug: record.slug.clone(),
            ip,
            location: location.map(|loc| loc.describe()).unwrap_or_else(|| UNKNOWN.to_owned()),
            device: visitor
                .user_agent
                .clone()
                .filter(|agent| !agent.is_empty())
                .unwrap_or_else(|| UNKNOWN.to_owned()),
            viewed_at: Utc::now(),
        };

        if let Err(err) = self.records.insert_view_log(&entry) {
            log::warn!("could not record view log for {}: {err}", record.slug);
        }

        match self.records.increment_views(record.id) {
            Ok(views) => views,
            Err(err) => {
                log::warn!("could not increment views for {}: {err}", record.slug);
                record.views
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_description_degrades() {
        let full = GeoLocation {
            ip: None,
            city: Some("Campinas".to_owned()),
            region: Some("São Paulo".to_owned()),
        };
        assert_eq!(full.describe(), "Campinas, São Paulo");

        let city_only = GeoLocation { city: Some("Campinas".to_owned()), ..GeoLocation::default() };
        assert_eq!(city_only.describe(), "Campinas");

        assert_eq!(GeoLocation::default().describe(), UNKNOWN);
    }

    #[test]
    fn ip_api_urls() {
        let lookup = IpApiLookup::new("https://ipapi.co/");

        assert_eq!(lookup.url_for(&Visitor::default()), "https://ipapi.co/json/");
        assert_eq!(
            lookup.url_for(&Visitor { ip: Some("203.0.113.7".to_owned()), user_agent: None }),
            "https://ipapi.co/203.0.113.7/json/"
        );
    }

    #[test]
    fn geo_response_parses_partial_fields() {
        let parsed: GeoLocation =
            serde_json::from_str(r#"{"ip":"203.0.113.7","city":"Recife","country":"BR"}"#)
                .expect("json should parse");

        assert_eq!(parsed.ip.as_deref(), Some("203.0.113.7"));
        assert_eq!(parsed.describe(), "Recife");
    }
}
