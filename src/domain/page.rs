//! Assembled page snapshots held by the page cache.

use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};
use time::OffsetDateTime;

use super::components::ComponentKind;

/// Key of one page of one locale in the page cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct PageIdentifier {
    pub locale: String,
    pub slug: String,
}

impl PageIdentifier {
    pub fn new(locale: impl Into<String>, slug: impl Into<String>) -> Self {
        Self {
            locale: locale.into(),
            slug: slug.into(),
        }
    }
}

impl fmt::Display for PageIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.locale, self.slug)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PageType {
    /// Scroll-snapped, section-by-section navigation.
    Landing,
    Standard,
    Blog,
    Legal,
    Other(String),
}

impl PageType {
    pub fn parse(raw: Option<&str>) -> Self {
        let Some(raw) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
            return PageType::Standard;
        };

        match raw.to_ascii_lowercase().as_str() {
            "landing" | "landing_page" | "landingpage" => PageType::Landing,
            "standard" | "default" | "page" => PageType::Standard,
            "blog" => PageType::Blog,
            "legal" => PageType::Legal,
            _ => PageType::Other(raw.to_string()),
        }
    }

    pub fn is_landing(&self) -> bool {
        matches!(self, PageType::Landing)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageMetadata {
    pub id: String,
    pub slug: String,
    pub locale: String,
    pub title: Option<String>,
    pub page_type: PageType,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedComponent {
    pub id: String,
    pub kind: ComponentKind,
    pub data: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedSection {
    pub id: String,
    pub title: Option<String>,
    pub order: i64,
    pub background_image: Option<String>,
    pub background_type: Option<String>,
    pub components: Vec<ResolvedComponent>,
}

impl ResolvedSection {
    pub fn has_video(&self) -> bool {
        self.components
            .iter()
            .any(|component| component.kind.is_video())
    }
}

/// Immutable snapshot of one fully assembled page.
///
/// `sections` is always sorted ascending by `order`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CachedPage {
    pub page: PageMetadata,
    pub sections: Vec<ResolvedSection>,
    #[serde(with = "time::serde::rfc3339")]
    pub cached_at: OffsetDateTime,
}

impl CachedPage {
    /// Build a snapshot, re-establishing section order.
    pub fn new(page: PageMetadata, mut sections: Vec<ResolvedSection>) -> Self {
        sections.sort_by_key(|section| section.order);
        Self {
            page,
            sections,
            cached_at: OffsetDateTime::now_utc(),
        }
    }

    /// Default landing view rendered when the requested page cannot be loaded.
    pub fn fallback(locale: &str, slug: &str) -> Self {
        Self::new(
            PageMetadata {
                id: String::new(),
                slug: slug.to_string(),
                locale: locale.to_string(),
                title: None,
                page_type: PageType::Landing,
            },
            Vec::new(),
        )
    }

    pub fn identifier(&self) -> PageIdentifier {
        PageIdentifier::new(&self.page.locale, &self.page.slug)
    }

    /// Ids of sections holding at least one video component, in section order.
    pub fn video_section_ids(&self) -> Vec<String> {
        self.sections
            .iter()
            .filter(|section| section.has_video())
            .map(|section| section.id.clone())
            .collect()
    }
}
