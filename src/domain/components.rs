//! Canonical component kinds.
//!
//! The backend tags every component with a free-form `type` string whose
//! casing and plurality drift between content editors ("benefit", "Benefits",
//! "call-to-action"). Every call site goes through [`normalize_component_type`]
//! so the synonym table lives in exactly one place.

use std::fmt;

use serde::{Serialize, Serializer};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    Header,
    Hero,
    Benefit,
    Feature,
    Testimonial,
    Pricing,
    Faq,
    CallToAction,
    Gallery,
    Video,
    Image,
    Text,
    Stats,
    Team,
    Contact,
    Form,
    BlogList,
    Footer,
    /// A type the runtime does not know, kept as the capitalized raw tag.
    Unknown(String),
}

impl ComponentKind {
    pub fn as_str(&self) -> &str {
        match self {
            ComponentKind::Header => "Header",
            ComponentKind::Hero => "Hero",
            ComponentKind::Benefit => "Benefit",
            ComponentKind::Feature => "Feature",
            ComponentKind::Testimonial => "Testimonial",
            ComponentKind::Pricing => "Pricing",
            ComponentKind::Faq => "Faq",
            ComponentKind::CallToAction => "CallToAction",
            ComponentKind::Gallery => "Gallery",
            ComponentKind::Video => "Video",
            ComponentKind::Image => "Image",
            ComponentKind::Text => "Text",
            ComponentKind::Stats => "Stats",
            ComponentKind::Team => "Team",
            ComponentKind::Contact => "Contact",
            ComponentKind::Form => "Form",
            ComponentKind::BlogList => "BlogList",
            ComponentKind::Footer => "Footer",
            ComponentKind::Unknown(raw) => raw,
        }
    }

    pub fn is_video(&self) -> bool {
        matches!(self, ComponentKind::Video)
    }

    pub fn is_header(&self) -> bool {
        matches!(self, ComponentKind::Header)
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ComponentKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Map a raw backend type tag to its canonical kind.
///
/// Matching ignores case and the separators `-`, `_` and space. Unknown tags
/// fall back to [`ComponentKind::Unknown`] with the first character
/// uppercased and the rest left as-is.
pub fn normalize_component_type(raw: &str) -> ComponentKind {
    let folded: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, '-' | '_' | ' '))
        .flat_map(char::to_lowercase)
        .collect();

    match folded.as_str() {
        "header" | "navbar" | "navigation" | "nav" | "menu" => ComponentKind::Header,
        "hero" | "herobanner" | "banner" => ComponentKind::Hero,
        "benefit" | "benefits" => ComponentKind::Benefit,
        "feature" | "features" => ComponentKind::Feature,
        "testimonial" | "testimonials" | "review" | "reviews" => ComponentKind::Testimonial,
        "pricing" | "price" | "prices" | "pricingtable" => ComponentKind::Pricing,
        "faq" | "faqs" => ComponentKind::Faq,
        "cta" | "calltoaction" => ComponentKind::CallToAction,
        "gallery" | "galleries" => ComponentKind::Gallery,
        "video" | "videos" | "videoplayer" => ComponentKind::Video,
        "image" | "images" | "picture" => ComponentKind::Image,
        "text" | "richtext" | "paragraph" => ComponentKind::Text,
        "stats" | "stat" | "statistics" => ComponentKind::Stats,
        "team" | "teams" | "teammembers" => ComponentKind::Team,
        "contact" | "contacts" | "contactinfo" => ComponentKind::Contact,
        "form" | "forms" | "contactform" => ComponentKind::Form,
        "bloglist" | "blog" | "blogposts" | "posts" => ComponentKind::BlogList,
        "footer" => ComponentKind::Footer,
        _ => ComponentKind::Unknown(capitalize(raw.trim())),
    }
}

fn capitalize(raw: &str) -> String {
    let mut chars = raw.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
