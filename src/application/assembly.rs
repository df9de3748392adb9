//! Turning backend payloads into cached page snapshots.
//!
//! Pure functions only; the caching and fetching around them lives in
//! [`PageService`](super::page::PageService).

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;
use time::OffsetDateTime;
use tracing::warn;
use vitrine_api_types::{
    ComponentPayload, MenuPayload, PageMetadataPayload, PagePayload, SectionComponentsPayload,
    SectionMetadataPayload, SectionPayload,
};

use crate::domain::components::normalize_component_type;
use crate::domain::error::DomainError;
use crate::domain::page::{CachedPage, PageMetadata, PageType, ResolvedComponent, ResolvedSection};

const MENU_ID_FIELD: &str = "menuId";
const MENU_FIELD: &str = "menu";

/// Resolved content of one section as stored in the query cache.
#[derive(Debug, Clone, PartialEq)]
pub struct SectionContent {
    pub components: Vec<ResolvedComponent>,
    pub last_updated: Option<OffsetDateTime>,
}

impl From<SectionComponentsPayload> for SectionContent {
    fn from(payload: SectionComponentsPayload) -> Self {
        Self {
            components: resolve_components(payload.components),
            last_updated: payload.last_updated,
        }
    }
}

impl From<SectionPayload> for SectionContent {
    fn from(payload: SectionPayload) -> Self {
        Self {
            components: resolve_components(payload.components),
            last_updated: None,
        }
    }
}

pub fn resolve_components(payloads: Vec<ComponentPayload>) -> Vec<ResolvedComponent> {
    payloads
        .into_iter()
        .map(|payload| ResolvedComponent {
            kind: normalize_component_type(&payload.component_type),
            id: payload.id,
            data: payload.data,
        })
        .collect()
}

pub fn page_metadata(payload: &PageMetadataPayload) -> PageMetadata {
    PageMetadata {
        id: payload.id.clone(),
        slug: payload.slug.clone(),
        locale: payload.locale.clone(),
        title: payload.title.clone(),
        page_type: PageType::parse(payload.page_type.as_deref()),
    }
}

pub fn resolved_section(
    metadata: SectionMetadataPayload,
    components: Vec<ResolvedComponent>,
) -> ResolvedSection {
    ResolvedSection {
        id: metadata.id,
        title: metadata.title,
        order: metadata.order,
        background_image: metadata.background_image,
        background_type: metadata.background_type,
        components,
    }
}

/// Pair each section's metadata with its positional component payload.
///
/// Missing trailing payloads yield empty sections; surplus payloads mean the
/// two lists no longer describe the same page.
pub fn align_sections(
    slug: &str,
    payload: PagePayload,
) -> Result<Vec<(SectionMetadataPayload, SectionPayload)>, DomainError> {
    let metadata = payload.page.sections;
    let mut contents = payload.sections;

    if contents.len() > metadata.len() {
        return Err(DomainError::SectionMismatch {
            slug: slug.to_string(),
            metadata: metadata.len(),
            payload: contents.len(),
        });
    }
    if contents.len() < metadata.len() {
        warn!(
            slug,
            metadata = metadata.len(),
            payload = contents.len(),
            "page carries fewer section payloads than sections; padding with empty sections"
        );
        contents.resize_with(metadata.len(), SectionPayload::default);
    }

    if let Some(section) = metadata.iter().find(|section| section.id.is_empty()) {
        warn!(slug, order = section.order, "section without id");
        return Err(DomainError::missing_field(slug, "sections.id"));
    }

    Ok(metadata.into_iter().zip(contents).collect())
}

/// Check the identifying fields of a loaded page.
pub fn validate_page(slug: &str, payload: &PagePayload) -> Result<(), DomainError> {
    if payload.page.id.trim().is_empty() {
        return Err(DomainError::missing_field(slug, "page.id"));
    }
    if payload.page.slug.trim().is_empty() {
        return Err(DomainError::missing_field(slug, "page.slug"));
    }
    Ok(())
}

fn menu_id(data: &serde_json::Map<String, Value>) -> Option<String> {
    match data.get(MENU_ID_FIELD)? {
        Value::String(id) if !id.is_empty() => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

fn references_menu(component: &ResolvedComponent) -> bool {
    component.kind.is_header() && menu_id(&component.data).is_some()
}

fn needs_menu(component: &ResolvedComponent) -> bool {
    references_menu(component)
        && !matches!(component.data.get(MENU_FIELD), Some(Value::Object(_)))
}

/// Whether any header component still lacks its resolved menu.
pub fn has_unresolved_menus(sections: &[ResolvedSection]) -> bool {
    sections
        .iter()
        .flat_map(|section| &section.components)
        .any(needs_menu)
}

/// Whether any header component points at a menu by id, resolved or not.
pub fn has_menu_references(sections: &[ResolvedSection]) -> bool {
    sections
        .iter()
        .flat_map(|section| &section.components)
        .any(references_menu)
}

/// Attach menu data to header components that only carry a `menuId`.
///
/// Returns the number of components patched. Headers whose menu is not in
/// `menus` are left untouched.
pub fn patch_header_menus(sections: &mut [ResolvedSection], menus: &[MenuPayload]) -> usize {
    attach_menus(sections, menus, needs_menu)
}

/// Overwrite the menu of every header that references one found in `menus`.
pub fn refresh_header_menus(sections: &mut [ResolvedSection], menus: &[MenuPayload]) -> usize {
    attach_menus(sections, menus, references_menu)
}

fn attach_menus(
    sections: &mut [ResolvedSection],
    menus: &[MenuPayload],
    select: fn(&ResolvedComponent) -> bool,
) -> usize {
    let mut patched = 0;
    for component in sections
        .iter_mut()
        .flat_map(|section| section.components.iter_mut())
    {
        if !select(component) {
            continue;
        }
        let Some(id) = menu_id(&component.data) else {
            continue;
        };
        let Some(menu) = menus.iter().find(|menu| menu.id == id) else {
            warn!(component_id = %component.id, menu_id = %id, "header references unknown menu");
            continue;
        };
        match serde_json::to_value(menu) {
            Ok(value) => {
                component.data.insert(MENU_FIELD.to_string(), value);
                patched += 1;
            }
            Err(err) => {
                warn!(component_id = %component.id, error = %err, "failed to encode menu");
            }
        }
    }
    patched
}

/// Ids of sections containing video, across `pages`, deduplicated.
///
/// Pages are visited in locale/slug order and sections in display order.
pub fn video_section_ids(pages: &[Arc<CachedPage>]) -> Vec<String> {
    let mut ordered: Vec<&Arc<CachedPage>> = pages.iter().collect();
    ordered.sort_by(|a, b| {
        (&a.page.locale, &a.page.slug).cmp(&(&b.page.locale, &b.page.slug))
    });

    let mut seen = HashSet::new();
    ordered
        .into_iter()
        .flat_map(|page| page.video_section_ids())
        .filter(|id| seen.insert(id.clone()))
        .collect()
}
