//! Portal configuration injected at startup.
//!
//! Every field has a default so partial JSON files are accepted.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalConfig {
    pub branding: Branding,
    pub backend: BackendConfig,
    pub buckets: BucketConfig,
    pub viewer_origin: ViewerOrigin,
    pub limits: LimitConfig,
    pub placement: PlacementSettings,
}

impl PortalConfig {
    pub fn viewer_origin(&self) -> &str {
        &self.viewer_origin.0
    }

    pub fn set_viewer_origin(&mut self, origin: impl Into<String>) {
        self.viewer_origin = ViewerOrigin(origin.into());
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ViewerOrigin(pub String);

impl Default for ViewerOrigin {
    fn default() -> Self {
        Self("http://localhost:5173/".to_owned())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Branding {
    pub office_name: String,
    pub system_name: String,
    pub footer_text: String,
    pub logo_text: String,
    pub qr_caption: String,
}

impl Default for Branding {
    fn default() -> Self {
        Self {
            office_name: "Your Law Office".to_owned(),
            system_name: "Digital Legal Portal".to_owned(),
            footer_text: "Secure Digital Documents".to_owned(),
            logo_text: "LAW".to_owned(),
            qr_caption: "Access the video:".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub url: Option<String>,
    pub anon_key: Option<String>,
    /// Staff session token; requests fall back to the anonymous key without it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

impl BackendConfig {
    pub fn is_configured(&self) -> bool {
        matches!((&self.url, &self.anon_key), (Some(url), Some(key)) if !url.is_empty() && !key.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BucketConfig {
    pub videos: String,
    pub documents: String,
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self { videos: "videos".to_owned(), documents: "documents".to_owned() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitConfig {
    pub max_video_bytes: u64,
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self { max_video_bytes: 50 * 1024 * 1024 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlacementSettings {
    pub max_preview_width: u32,
    pub viewport_margin: u32,
    pub qr_size: f32,
    pub bottom_margin: f32,
}

impl Default for PlacementSettings {
    fn default() -> Self {
        Self {
            max_preview_width: 600,
            viewport_margin: 40,
            qr_size: crate::DEFAULT_QR_SIZE,
            bottom_margin: crate::MIN_NATIVE_Y,
        }
    }
}

impl PlacementSettings {
    /// Preview width for a viewport: `min(viewport - margin, max)`, at least one pixel.
    pub fn preview_width(&self, viewport_width: u32) -> u32 {
        viewport_width.saturating_sub(self.viewport_margin).min(self.max_preview_width).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: PortalConfig =
            serde_json::from_str(r#"{ "branding": { "office_name": "Silva & Souza" } }"#)
                .expect("config should parse");

        assert_eq!(config.branding.office_name, "Silva & Souza");
        assert_eq!(config.branding.qr_caption, "Access the video:");
        assert_eq!(config.limits.max_video_bytes, 52_428_800);
        assert_eq!(config.placement.qr_size, 80.0);
    }

    #[test]
    fn preview_width_is_capped_and_margin_aware() {
        let settings = PlacementSettings::default();

        assert_eq!(settings.preview_width(1920), 600);
        assert_eq!(settings.preview_width(400), 360);
        assert_eq!(settings.preview_width(10), 1);
    }

    #[test]
    fn backend_requires_url_and_key() {
        let mut backend = BackendConfig::default();
        assert!(!backend.is_configured());

        backend.url = Some("https://project.example.co".to_owned());
        assert!(!backend.is_configured());

        backend.anon_key = Some("anon".to_owned());
        assert!(backend.is_configured());
    }
}
