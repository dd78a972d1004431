use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod config;

pub use config::{
    BackendConfig, Branding, BucketConfig, LimitConfig, PlacementSettings, PortalConfig,
};

/// Side length of the QR image drawn into the document, in native units.
pub const DEFAULT_QR_SIZE: f32 = 80.0;

/// Lowest native y allowed for the QR anchor so the caption and link stay on the page.
pub const MIN_NATIVE_Y: f32 = 40.0;

pub const SLUG_LEN: usize = 6;
pub const SLUG_ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// First page as shown in the placement preview, next to its native geometry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RenderedPage {
    pub rendered_width: f32,
    pub rendered_height: f32,
    pub native_width: f32,
    pub native_height: f32,
}

impl RenderedPage {
    pub fn new(
        rendered_width: f32,
        rendered_height: f32,
        native_width: f32,
        native_height: f32,
    ) -> Self {
        Self { rendered_width, rendered_height, native_width, native_height }
    }

    pub fn scale_x(&self) -> f32 {
        self.native_width / self.rendered_width
    }

    pub fn scale_y(&self) -> f32 {
        self.native_height / self.rendered_height
    }

    /// Overlay position that puts a `size`-square overlay at the visual center.
    pub fn centered_overlay(&self, size: f32) -> OverlayPosition {
        OverlayPosition {
            x: self.rendered_width / 2.0 - size / 2.0,
            y: self.rendered_height / 2.0 - size / 2.0,
        }
    }
}

/// Top-left corner of the QR overlay in render space (origin top-left, y down).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct OverlayPosition {
    pub x: f32,
    pub y: f32,
}

impl OverlayPosition {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Bottom-left corner of the QR image in document space (origin bottom-left, y up).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NativePosition {
    pub x: f32,
    pub y: f32,
}

impl NativePosition {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationTarget {
    pub position: NativePosition,
    pub qr_size: f32,
    pub url: String,
    pub display_text: String,
}

impl AnnotationTarget {
    pub fn new(position: NativePosition, url: impl Into<String>) -> Self {
        Self::with_qr_size(position, DEFAULT_QR_SIZE, url)
    }

    pub fn with_qr_size(position: NativePosition, qr_size: f32, url: impl Into<String>) -> Self {
        let url = url.into();
        let display_text = display_text(&url);
        Self { position, qr_size, url, display_text }
    }

    pub fn x(&self) -> f32 {
        self.position.x
    }

    pub fn y(&self) -> f32 {
        self.position.y
    }
}

/// Strips a leading `http://`/`https://` scheme and then a leading `www.`.
pub fn display_text(url: &str) -> String {
    let without_scheme = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url);

    without_scheme.strip_prefix("www.").unwrap_or(without_scheme).to_owned()
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Slug(String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid slug '{0}': expected 6 characters from [0-9A-Z]")]
pub struct InvalidSlug(pub String);

impl Slug {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn from_indices(indices: [usize; SLUG_LEN]) -> Self {
        let text =
            indices.iter().map(|index| SLUG_ALPHABET[index % SLUG_ALPHABET.len()] as char).collect();
        Self(text)
    }
}

impl FromStr for Slug {
    type Err = InvalidSlug;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let valid = value.len() == SLUG_LEN
            && value.bytes().all(|byte| SLUG_ALPHABET.contains(&byte));

        if valid {
            Ok(Self(value.to_owned()))
        } else {
            Err(InvalidSlug(value.to_owned()))
        }
    }
}

impl TryFrom<String> for Slug {
    type Error = InvalidSlug;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Slug> for String {
    fn from(value: Slug) -> Self {
        value.0
    }
}

impl fmt::Display for Slug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Client-facing viewer link for a case, `origin?v=<slug>`.
pub fn landing_url(origin: &str, slug: &Slug) -> String {
    format!("{origin}?v={slug}")
}

pub const DEFAULT_TITLE: &str = "Legal Document";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCaseRecord {
    pub slug: Slug,
    pub case_number: String,
    pub title: String,
    pub video_url: String,
    pub pdf_url: String,
    pub access_password_hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseRecord {
    pub id: uuid::Uuid,
    pub slug: Slug,
    pub case_number: String,
    pub title: String,
    pub video_url: String,
    pub pdf_url: String,
    pub access_password_hash: Option<String>,
    #[serde(default)]
    pub views: u64,
    pub created_at: DateTime<Utc>,
}

impl CaseRecord {
    pub fn from_new(record: NewCaseRecord, id: uuid::Uuid, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            slug: record.slug,
            case_number: record.case_number,
            title: record.title,
            video_url: record.video_url,
            pdf_url: record.pdf_url,
            access_password_hash: record.access_password_hash,
            views: 0,
            created_at,
        }
    }

    pub fn is_protected(&self) -> bool {
        self.access_password_hash.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewLog {
    pub slug: Slug,
    pub ip: Option<String>,
    pub location: String,
    pub device: String,
    pub viewed_at: DateTime<Utc>,
}
