//! Process-wide store of assembled pages.
//!
//! Entries carry no TTL: a page is replaced wholesale when it is fetched
//! again or rebuilt after an edit, and otherwise lives as long as the runtime.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use metrics::counter;

use crate::domain::page::{CachedPage, PageIdentifier, PageMetadata, ResolvedSection};

use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::page";

const METRIC_HIT: &str = "vitrine_page_cache_hit_total";
const METRIC_MISS: &str = "vitrine_page_cache_miss_total";

#[derive(Default)]
pub struct PageCache {
    pages: RwLock<HashMap<PageIdentifier, Arc<CachedPage>>>,
    // Enumerated page lists, keyed by locale.
    index: RwLock<HashMap<String, Arc<Vec<PageIdentifier>>>>,
}

impl PageCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, locale: &str, slug: &str) -> Option<Arc<CachedPage>> {
        let page = rw_read(&self.pages, SOURCE, "get")
            .get(&PageIdentifier::new(locale, slug))
            .cloned();
        let metric = if page.is_some() { METRIC_HIT } else { METRIC_MISS };
        counter!(metric).increment(1);
        page
    }

    pub fn has(&self, locale: &str, slug: &str) -> bool {
        rw_read(&self.pages, SOURCE, "has").contains_key(&PageIdentifier::new(locale, slug))
    }

    /// Replace the page stored under `locale`/`slug`.
    ///
    /// Sections are sorted by `order` here regardless of how the caller
    /// ordered them.
    pub fn put(
        &self,
        locale: &str,
        slug: &str,
        page: PageMetadata,
        sections: Vec<ResolvedSection>,
    ) -> Arc<CachedPage> {
        let snapshot = Arc::new(CachedPage::new(page, sections));
        rw_write(&self.pages, SOURCE, "put")
            .insert(PageIdentifier::new(locale, slug), Arc::clone(&snapshot));
        snapshot
    }

    /// Cached pages for which `predicate` holds, with the key each is stored under.
    pub fn matching<F>(&self, predicate: F) -> Vec<(PageIdentifier, Arc<CachedPage>)>
    where
        F: Fn(&CachedPage) -> bool,
    {
        rw_read(&self.pages, SOURCE, "matching")
            .iter()
            .filter(|(_, page)| predicate(page))
            .map(|(identifier, page)| (identifier.clone(), Arc::clone(page)))
            .collect()
    }

    /// Swap in a rebuilt snapshot, but only while `current` is still the one
    /// stored under `identifier`.
    ///
    /// Returns `None` when the page was replaced or removed in the meantime.
    pub fn replace(
        &self,
        identifier: &PageIdentifier,
        current: &Arc<CachedPage>,
        page: PageMetadata,
        sections: Vec<ResolvedSection>,
    ) -> Option<Arc<CachedPage>> {
        let mut pages = rw_write(&self.pages, SOURCE, "replace");
        let slot = pages.get_mut(identifier)?;
        if !Arc::ptr_eq(slot, current) {
            return None;
        }
        let snapshot = Arc::new(CachedPage::new(page, sections));
        *slot = Arc::clone(&snapshot);
        Some(snapshot)
    }

    /// Drop `current` unless it was replaced in the meantime.
    pub fn evict(&self, identifier: &PageIdentifier, current: &Arc<CachedPage>) -> bool {
        let mut pages = rw_write(&self.pages, SOURCE, "evict");
        let stale = pages
            .get(identifier)
            .is_some_and(|stored| Arc::ptr_eq(stored, current));
        if stale {
            pages.remove(identifier);
        }
        stale
    }

    /// Snapshot of every cached page, in no particular order.
    pub fn pages(&self) -> Vec<Arc<CachedPage>> {
        rw_read(&self.pages, SOURCE, "pages")
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        rw_read(&self.pages, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn page_index(&self, locale: &str) -> Option<Arc<Vec<PageIdentifier>>> {
        rw_read(&self.index, SOURCE, "page_index")
            .get(locale)
            .cloned()
    }

    pub fn set_page_index(
        &self,
        locale: &str,
        pages: Vec<PageIdentifier>,
    ) -> Arc<Vec<PageIdentifier>> {
        let pages = Arc::new(pages);
        rw_write(&self.index, SOURCE, "set_page_index")
            .insert(locale.to_string(), Arc::clone(&pages));
        pages
    }

    pub fn clear(&self) {
        rw_write(&self.pages, SOURCE, "clear.pages").clear();
        rw_write(&self.index, SOURCE, "clear.index").clear();
    }
}
