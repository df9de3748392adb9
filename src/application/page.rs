//! The on-demand page path and the rebuilds that follow content edits.
//!
//! Concurrent loads of one page, whether from a mount or from the prefetch
//! orchestrator, share a single backend fetch.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tracing::{Instrument, debug, info_span, warn};
use vitrine_api_types::{MenuPayload, PagePayload};

use crate::application::assembly::{
    self, SectionContent, has_menu_references, has_unresolved_menus, patch_header_menus,
    refresh_header_menus,
};
use crate::application::error::{PageLoadError, QueryError, SourceError};
use crate::application::ports::ContentSource;
use crate::cache::{CacheConfig, CacheTag, FetchOptions, PageCache, QueryCache};
use crate::domain::error::DomainError;
use crate::domain::page::{CachedPage, PageIdentifier, PageMetadata, ResolvedSection};

const MENUS_KEY: &str = "menus";

type SharedLoad = Shared<BoxFuture<'static, Result<Arc<CachedPage>, PageLoadError>>>;

/// Outcome of rendering a page: either the real page or the default landing
/// view plus a message for the error state.
#[derive(Debug, Clone)]
pub enum PageView {
    Ready(Arc<CachedPage>),
    Fallback {
        page: CachedPage,
        message: &'static str,
    },
}

impl PageView {
    pub fn page(&self) -> &CachedPage {
        match self {
            PageView::Ready(page) => page,
            PageView::Fallback { page, .. } => page,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, PageView::Fallback { .. })
    }
}

#[derive(Default)]
struct InFlightLoads {
    slots: DashMap<PageIdentifier, (u64, SharedLoad)>,
    generation: AtomicU64,
}

/// Loads pages through the page cache and the query cache.
#[derive(Clone)]
pub struct PageService {
    source: Arc<dyn ContentSource>,
    pages: Arc<PageCache>,
    sections: QueryCache<SectionContent>,
    menus: QueryCache<Vec<MenuPayload>>,
    config: CacheConfig,
    loads: Arc<InFlightLoads>,
}

impl PageService {
    pub fn new(
        source: Arc<dyn ContentSource>,
        pages: Arc<PageCache>,
        sections: QueryCache<SectionContent>,
        menus: QueryCache<Vec<MenuPayload>>,
        config: CacheConfig,
    ) -> Self {
        Self {
            source,
            pages,
            sections,
            menus,
            config,
            loads: Arc::default(),
        }
    }

    /// Return the page from the page cache, fetching and storing it on a miss.
    pub async fn load(&self, locale: &str, slug: &str) -> Result<Arc<CachedPage>, PageLoadError> {
        if let Some(page) = self.pages.get(locale, slug) {
            debug!(locale, slug, "page served from cache");
            return Ok(page);
        }
        self.join_or_start(PageIdentifier::new(locale, slug), true).await
    }

    /// Like [`load`](Self::load), but failures yield the default landing view.
    pub async fn load_or_fallback(&self, locale: &str, slug: &str) -> PageView {
        match self.load(locale, slug).await {
            Ok(page) => PageView::Ready(page),
            Err(err) => {
                warn!(
                    locale,
                    slug,
                    error = %err,
                    chain = ?err.report(),
                    "rendering fallback page"
                );
                PageView::Fallback {
                    page: CachedPage::fallback(locale, slug),
                    message: err.public_message(),
                }
            }
        }
    }

    /// Fetch the page from the backend, assemble it and replace the cached copy.
    ///
    /// Joins a load of the same page that is already running.
    pub async fn fetch_and_store(
        &self,
        locale: &str,
        slug: &str,
    ) -> Result<Arc<CachedPage>, PageLoadError> {
        self.join_or_start(PageIdentifier::new(locale, slug), false).await
    }

    /// Components of one section, through the query cache.
    pub async fn resolve_section(
        &self,
        section_id: &str,
    ) -> Result<Arc<SectionContent>, SourceError> {
        let source = Arc::clone(&self.source);
        let id = section_id.to_string();
        let value = self
            .sections
            .get_or_fetch(
                &section_key(section_id),
                move || async move {
                    source
                        .fetch_section_components(&id)
                        .await
                        .map(SectionContent::from)
                        .map_err(SourceError::into_query)
                },
                self.section_options(section_id),
            )
            .await?;
        Ok(value)
    }

    /// Rebuild every cached page embedding `section_id` around the section's
    /// current content. Returns the number of pages rebuilt.
    ///
    /// Pages are swapped wholesale. When the section cannot be fetched the
    /// affected pages are evicted so the next load goes to the backend.
    pub async fn refresh_section(&self, section_id: &str) -> usize {
        let affected = self
            .pages
            .matching(|page| page.sections.iter().any(|section| section.id == section_id));
        if affected.is_empty() {
            return 0;
        }

        let content = match self.resolve_section(section_id).await {
            Ok(content) => content,
            Err(err) => {
                warn!(
                    section_id,
                    pages = affected.len(),
                    error = %err,
                    "section refresh failed; evicting pages"
                );
                self.evict(&affected);
                return 0;
            }
        };

        let mut rebuilt = 0;
        for (identifier, current) in affected {
            let mut sections = current.sections.clone();
            for section in sections.iter_mut().filter(|section| section.id == section_id) {
                section.components = content.components.clone();
            }
            self.patch_menus(&identifier.slug, &mut sections).await;
            if self
                .pages
                .replace(&identifier, &current, current.page.clone(), sections)
                .is_some()
            {
                rebuilt += 1;
            }
        }
        rebuilt
    }

    /// Re-attach menus to every cached page whose headers reference one.
    /// Returns the number of pages rebuilt.
    pub async fn refresh_menus(&self) -> usize {
        let affected = self.pages.matching(|page| has_menu_references(&page.sections));
        if affected.is_empty() {
            return 0;
        }

        let menus = match self.resolve_menus().await {
            Ok(menus) => menus,
            Err(err) => {
                warn!(
                    pages = affected.len(),
                    error = %err,
                    "menu refresh failed; evicting pages"
                );
                self.evict(&affected);
                return 0;
            }
        };

        let mut rebuilt = 0;
        for (identifier, current) in affected {
            let mut sections = current.sections.clone();
            refresh_header_menus(&mut sections, &menus);
            if self
                .pages
                .replace(&identifier, &current, current.page.clone(), sections)
                .is_some()
            {
                rebuilt += 1;
            }
        }
        rebuilt
    }

    async fn join_or_start(
        &self,
        identifier: PageIdentifier,
        reuse_cached: bool,
    ) -> Result<Arc<CachedPage>, PageLoadError> {
        let shared = match self.loads.slots.entry(identifier) {
            Entry::Occupied(occupied) => {
                debug!(page = %occupied.key(), "joined in-flight page load");
                occupied.get().1.clone()
            }
            Entry::Vacant(vacant) => {
                // A load may have stored the page between the cache lookup
                // and claiming the slot.
                if reuse_cached
                    && let Some(page) = self.pages.get(&vacant.key().locale, &vacant.key().slug)
                {
                    return Ok(page);
                }
                let generation = self.loads.generation.fetch_add(1, Ordering::Relaxed);
                let shared = self.spawn_load(vacant.key().clone(), generation);
                vacant.insert((generation, shared.clone()));
                shared
            }
        };

        shared.await
    }

    fn spawn_load(&self, identifier: PageIdentifier, generation: u64) -> SharedLoad {
        let service = self.clone();
        let target = identifier.clone();
        let handle = tokio::spawn(async move {
            let guard = LoadGuard {
                loads: Arc::clone(&service.loads),
                identifier,
                generation,
            };
            let result = service
                .fetch_page(&guard.identifier.locale, &guard.identifier.slug)
                .await;
            drop(guard);
            result
        });

        async move {
            handle.await.unwrap_or_else(|err| {
                Err(PageLoadError::from_source(
                    &target.locale,
                    &target.slug,
                    QueryError::Aborted(err.to_string()).into(),
                ))
            })
        }
        .boxed()
        .shared()
    }

    async fn fetch_page(&self, locale: &str, slug: &str) -> Result<Arc<CachedPage>, PageLoadError> {
        let span = info_span!("load_page", locale, slug);
        async {
            let payload = self
                .source
                .load_page(locale, slug)
                .await
                .map_err(|err| PageLoadError::from_source(locale, slug, err))?;

            let (page, sections) =
                self.assemble(slug, payload)
                    .await
                    .map_err(|source| PageLoadError::Assembly {
                        locale: locale.to_string(),
                        slug: slug.to_string(),
                        source,
                    })?;

            Ok(self.pages.put(locale, slug, page, sections))
        }
        .instrument(span)
        .await
    }

    async fn assemble(
        &self,
        slug: &str,
        payload: PagePayload,
    ) -> Result<(PageMetadata, Vec<ResolvedSection>), DomainError> {
        assembly::validate_page(slug, &payload)?;
        let page = assembly::page_metadata(&payload.page);

        let mut sections = Vec::with_capacity(payload.page.sections.len());
        for (metadata, content) in assembly::align_sections(slug, payload)? {
            let content = SectionContent::from(content);
            let resolved = self
                .sections
                .get_or_fetch(
                    &section_key(&metadata.id),
                    move || async move { Ok(content) },
                    self.section_options(&metadata.id),
                )
                .await
                .map_err(|err| DomainError::validation(err.to_string()))?;
            sections.push(assembly::resolved_section(
                metadata,
                resolved.components.clone(),
            ));
        }

        self.patch_menus(slug, &mut sections).await;
        Ok((page, sections))
    }

    async fn patch_menus(&self, slug: &str, sections: &mut [ResolvedSection]) {
        if !has_unresolved_menus(sections) {
            return;
        }
        match self.resolve_menus().await {
            Ok(menus) => {
                patch_header_menus(sections, &menus);
            }
            Err(err) => {
                warn!(slug, error = %err, "menus unavailable; headers left unresolved");
            }
        }
    }

    async fn resolve_menus(&self) -> Result<Arc<Vec<MenuPayload>>, SourceError> {
        let source = Arc::clone(&self.source);
        let menus = self
            .menus
            .get_or_fetch(
                MENUS_KEY,
                move || async move { source.fetch_menus().await.map_err(SourceError::into_query) },
                FetchOptions::new(self.config.menu_ttl()).tag(CacheTag::Menus),
            )
            .await?;
        Ok(menus)
    }

    fn evict(&self, affected: &[(PageIdentifier, Arc<CachedPage>)]) {
        for (identifier, current) in affected {
            self.pages.evict(identifier, current);
        }
    }

    fn section_options(&self, section_id: &str) -> FetchOptions {
        FetchOptions::new(self.config.section_ttl()).tag(CacheTag::section(section_id))
    }
}

/// Frees the in-flight slot of one page load, even if the load panics.
struct LoadGuard {
    loads: Arc<InFlightLoads>,
    identifier: PageIdentifier,
    generation: u64,
}

impl Drop for LoadGuard {
    fn drop(&mut self) {
        let generation = self.generation;
        self.loads
            .slots
            .remove_if(&self.identifier, |_, (current, _)| *current == generation);
    }
}

pub(crate) fn section_key(section_id: &str) -> String {
    CacheTag::section(section_id).to_string()
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::{Map, json};
    use vitrine_api_types::{
        ComponentPayload, MenuItemPayload, PageListItem, PageMetadataPayload,
        SectionComponentsPayload, SectionMetadataPayload, SectionPayload,
    };

    use crate::application::error::QueryError;

    use super::*;

    #[derive(Default)]
    struct StubSource {
        loads: AtomicUsize,
        section_fetches: AtomicUsize,
        menu_fetches: AtomicUsize,
        missing: bool,
        fail_menus: bool,
        fail_sections: bool,
        headline: Mutex<String>,
    }

    fn object(value: serde_json::Value) -> Map<String, serde_json::Value> {
        match value {
            serde_json::Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[async_trait]
    impl ContentSource for StubSource {
        async fn list_pages(
            &self,
            _tenant: &str,
            _locale: &str,
        ) -> Result<Vec<PageListItem>, SourceError> {
            Ok(Vec::new())
        }

        async fn load_page(&self, locale: &str, slug: &str) -> Result<PagePayload, SourceError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if self.missing {
                return Err(SourceError::NotFound {
                    slug: slug.to_string(),
                });
            }
            let section = |id: &str, order| SectionMetadataPayload {
                id: id.to_string(),
                title: None,
                order,
                background_image: None,
                background_type: None,
            };
            Ok(PagePayload {
                page: PageMetadataPayload {
                    id: format!("id-{slug}"),
                    slug: slug.to_string(),
                    locale: locale.to_string(),
                    title: Some("Home".to_string()),
                    page_type: Some("landing".to_string()),
                    sections: vec![section("header", 0), section("hero", 2), section("faq", 1)],
                },
                sections: vec![
                    SectionPayload {
                        components: vec![ComponentPayload {
                            id: "nav".to_string(),
                            component_type: "navigation".to_string(),
                            data: object(json!({ "menuId": "main" })),
                        }],
                    },
                    SectionPayload {
                        components: vec![ComponentPayload {
                            id: "hero-1".to_string(),
                            component_type: "hero".to_string(),
                            data: object(json!({ "headline": self.headline.lock().expect("headline").clone() })),
                        }],
                    },
                    SectionPayload::default(),
                ],
            })
        }

        async fn fetch_section_components(
            &self,
            section_id: &str,
        ) -> Result<SectionComponentsPayload, SourceError> {
            self.section_fetches.fetch_add(1, Ordering::SeqCst);
            if self.fail_sections {
                return Err(QueryError::transport("sections down").into());
            }
            Ok(SectionComponentsPayload {
                components: vec![ComponentPayload {
                    id: format!("{section_id}-c"),
                    component_type: "text".to_string(),
                    data: Map::new(),
                }],
                last_updated: None,
            })
        }

        async fn fetch_menus(&self) -> Result<Vec<MenuPayload>, SourceError> {
            let earlier = self.menu_fetches.fetch_add(1, Ordering::SeqCst);
            if self.fail_menus {
                return Err(QueryError::transport("menus down").into());
            }
            let label = if earlier == 0 { "Pricing" } else { "Plans" };
            Ok(vec![MenuPayload {
                id: "main".to_string(),
                name: None,
                items: vec![MenuItemPayload {
                    label: label.to_string(),
                    href: Some("/pricing".to_string()),
                    children: Vec::new(),
                }],
            }])
        }

        async fn preload_media(&self, _section_ids: &[String]) -> Result<(), SourceError> {
            Ok(())
        }
    }

    fn service(source: &Arc<StubSource>) -> PageService {
        PageService::new(
            Arc::clone(source) as Arc<dyn ContentSource>,
            Arc::new(PageCache::new()),
            QueryCache::new("sections"),
            QueryCache::new("menus"),
            CacheConfig::default(),
        )
    }

    #[tokio::test]
    async fn load_assembles_sorted_page_and_caches_it() {
        let source = Arc::new(StubSource::default());
        let service = service(&source);

        let page = service.load("en", "home").await.expect("page");
        let ids: Vec<&str> = page.sections.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["header", "faq", "hero"]);
        assert!(page.page.page_type.is_landing());

        service.load("en", "home").await.expect("cached page");
        assert_eq!(source.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn header_menu_is_patched_in() {
        let source = Arc::new(StubSource::default());
        let service = service(&source);

        let page = service.load("en", "home").await.expect("page");
        let header = &page.sections[0].components[0];
        assert_eq!(header.data["menu"]["items"][0]["label"], "Pricing");

        service.fetch_and_store("en", "other").await.expect("page");
        assert_eq!(source.menu_fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn menu_failure_does_not_fail_the_page() {
        let source = Arc::new(StubSource {
            fail_menus: true,
            ..Default::default()
        });
        let service = service(&source);

        let page = service.load("en", "home").await.expect("page");
        assert!(page.sections[0].components[0].data.get("menu").is_none());
    }

    #[tokio::test]
    async fn missing_page_renders_fallback() {
        let source = Arc::new(StubSource {
            missing: true,
            ..Default::default()
        });
        let service = service(&source);

        let view = service.load_or_fallback("en", "ghost").await;
        assert!(view.is_fallback());
        assert!(view.page().page.page_type.is_landing());
        assert!(view.page().sections.is_empty());
        match view {
            PageView::Fallback { message, .. } => assert_eq!(message, "This page does not exist."),
            PageView::Ready(_) => panic!("expected fallback"),
        }
    }

    #[tokio::test]
    async fn sections_resolve_from_seeded_cache() {
        let source = Arc::new(StubSource::default());
        let service = service(&source);
        service.load("en", "home").await.expect("page");

        let hero = service.resolve_section("hero").await.expect("hero");
        assert_eq!(hero.components[0].id, "hero-1");
        assert_eq!(source.section_fetches.load(Ordering::SeqCst), 0);

        let other = service.resolve_section("pricing").await.expect("pricing");
        assert_eq!(other.components[0].id, "pricing-c");
        assert_eq!(source.section_fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalidated_section_is_refetched() {
        let source = Arc::new(StubSource::default());
        let service = service(&source);
        service.load("en", "home").await.expect("page");

        service.sections.invalidate(&CacheTag::section("hero"));
        let hero = service.resolve_section("hero").await.expect("hero");

        assert_eq!(hero.components[0].id, "hero-c");
        assert_eq!(source.section_fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn refetched_page_picks_up_new_section_content_after_invalidation() {
        let source = Arc::new(StubSource::default());
        *source.headline.lock().expect("headline") = "old".to_string();
        let service = service(&source);
        service.load("en", "home").await.expect("page");

        *source.headline.lock().expect("headline") = "new".to_string();
        service.sections.invalidate(&CacheTag::section("hero"));
        let page = service.fetch_and_store("en", "home").await.expect("page");

        let hero = page.sections.iter().find(|s| s.id == "hero").expect("hero");
        assert_eq!(hero.components[0].data["headline"], "new");
    }

    #[tokio::test]
    async fn concurrent_loads_of_one_page_share_a_fetch() {
        let source = Arc::new(StubSource::default());
        let service = service(&source);

        let (a, b, c) = tokio::join!(
            service.load("en", "home"),
            service.load("en", "home"),
            service.fetch_and_store("en", "home"),
        );

        let a = a.expect("a");
        assert!(Arc::ptr_eq(&a, &b.expect("b")));
        assert!(Arc::ptr_eq(&a, &c.expect("c")));
        assert_eq!(source.loads.load(Ordering::SeqCst), 1);
        assert_eq!(service.loads.slots.len(), 0);
    }

    #[tokio::test]
    async fn failed_load_is_shared_and_not_remembered() {
        let source = Arc::new(StubSource {
            missing: true,
            ..Default::default()
        });
        let service = service(&source);

        let (a, b) = tokio::join!(service.load("en", "ghost"), service.load("en", "ghost"));
        assert!(matches!(a, Err(PageLoadError::NotFound { .. })));
        assert!(matches!(b, Err(PageLoadError::NotFound { .. })));
        assert_eq!(source.loads.load(Ordering::SeqCst), 1);

        service.load("en", "ghost").await.expect_err("still missing");
        assert_eq!(source.loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn section_refresh_rebuilds_every_page_embedding_it() {
        let source = Arc::new(StubSource::default());
        let service = service(&source);
        let home = service.load("en", "home").await.expect("home");
        service.load("en", "other").await.expect("other");

        service.sections.invalidate(&CacheTag::section("hero"));
        assert_eq!(service.refresh_section("hero").await, 2);

        for slug in ["home", "other"] {
            let page = service.load("en", slug).await.expect("page");
            let hero = page.sections.iter().find(|s| s.id == "hero").expect("hero");
            assert_eq!(hero.components[0].id, "hero-c");
            assert_eq!(page.sections[0].components[0].data["menu"]["id"], "main");
        }
        let old_hero = home.sections.iter().find(|s| s.id == "hero").expect("hero");
        assert_eq!(old_hero.components[0].id, "hero-1");
        assert_eq!(source.section_fetches.load(Ordering::SeqCst), 1);
        assert_eq!(source.loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn refreshing_an_unused_section_fetches_nothing() {
        let source = Arc::new(StubSource::default());
        let service = service(&source);
        service.load("en", "home").await.expect("home");

        assert_eq!(service.refresh_section("pricing").await, 0);
        assert_eq!(source.section_fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_section_refresh_evicts_stale_pages() {
        let source = Arc::new(StubSource {
            fail_sections: true,
            ..Default::default()
        });
        let service = service(&source);
        service.load("en", "home").await.expect("home");

        service.sections.invalidate(&CacheTag::section("hero"));
        assert_eq!(service.refresh_section("hero").await, 0);

        assert!(!service.pages.has("en", "home"));
        service.load("en", "home").await.expect("reloaded");
        assert_eq!(source.loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn menu_refresh_reattaches_header_menus() {
        let source = Arc::new(StubSource::default());
        let service = service(&source);
        service.load("en", "home").await.expect("home");

        service.menus.invalidate(&CacheTag::Menus);
        assert_eq!(service.refresh_menus().await, 1);

        let page = service.load("en", "home").await.expect("home");
        let header = &page.sections[0].components[0];
        assert_eq!(header.data["menu"]["items"][0]["label"], "Plans");
        assert_eq!(source.menu_fetches.load(Ordering::SeqCst), 2);
        assert_eq!(source.loads.load(Ordering::SeqCst), 1);
    }
}
