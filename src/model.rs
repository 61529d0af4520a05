//! Persisted entities: media artifacts, slides, and module links.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Fixed path tag stored on every module-slide link row.
pub const SLIDES_PATH: &str = "slides";

/// Default focal point stored on media records (percent of width / height).
pub const DEFAULT_FOCAL_POINT: u32 = 50;

/// Closed set of slide roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlideKind {
    #[default]
    Regular,
    Quiz,
    Video,
    Reference,
    Resources,
}

impl SlideKind {
    pub const ALL: [SlideKind; 5] = [
        SlideKind::Regular,
        SlideKind::Quiz,
        SlideKind::Video,
        SlideKind::Reference,
        SlideKind::Resources,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SlideKind::Regular => "regular",
            SlideKind::Quiz => "quiz",
            SlideKind::Video => "video",
            SlideKind::Reference => "reference",
            SlideKind::Resources => "resources",
        }
    }

    /// Case-insensitive parse; `None` for anything outside the closed set.
    pub fn parse(raw: &str) -> Option<Self> {
        let needle = raw.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|k| k.as_str() == needle)
    }

    /// Parse, coercing unknown values to `fallback`.
    pub fn parse_or(raw: &str, fallback: SlideKind) -> Self {
        Self::parse(raw).unwrap_or(fallback)
    }
}

impl fmt::Display for SlideKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata of one named derived size of a media artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeVariant {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub filename: String,
    pub filesize: u64,
    pub mime_type: String,
}

/// A persisted media artifact row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRecord {
    pub id: i64,
    /// Canonical filename; unique across the store.
    pub filename: String,
    /// `None` until the upload completed.
    pub url: Option<String>,
    pub width: u32,
    pub height: u32,
    pub filesize: u64,
    pub mime_type: String,
    pub focal_x: u32,
    pub focal_y: u32,
    pub variants: Vec<SizeVariant>,
}

impl MediaRecord {
    pub fn variant(&self, name: &str) -> Option<&SizeVariant> {
        self.variants.iter().find(|v| v.name == name)
    }
}

/// A persisted slide row. Always references exactly one media artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlideRecord {
    pub id: i64,
    pub title: String,
    /// Never empty.
    pub content: String,
    pub kind: SlideKind,
    pub media_id: i64,
    pub image_url: String,
    /// URLs found on the page, in reading order.
    #[serde(default)]
    pub links: Vec<String>,
}

/// Ordered many-slides-to-one-module relation row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleSlideLink {
    pub module_id: i64,
    pub slide_id: i64,
    /// 1-based; equals the source page index.
    pub order: usize,
    pub path: String,
}

/// Lightweight module listing row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleSummary {
    pub id: i64,
    pub title: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!(SlideKind::parse("Quiz"), Some(SlideKind::Quiz));
        assert_eq!(SlideKind::parse(" RESOURCES "), Some(SlideKind::Resources));
    }

    #[test]
    fn unknown_kinds_coerce_to_fallback() {
        assert_eq!(SlideKind::parse_or("title-slide", SlideKind::Regular), SlideKind::Regular);
        assert_eq!(SlideKind::parse_or("", SlideKind::Reference), SlideKind::Reference);
    }

    #[test]
    fn serde_uses_lowercase_names() {
        let json = serde_json::to_string(&SlideKind::Video).unwrap();
        assert_eq!(json, "\"video\"");
        let back: SlideKind = serde_json::from_str("\"reference\"").unwrap();
        assert_eq!(back, SlideKind::Reference);
    }
}
