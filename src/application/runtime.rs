use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use vitrine_api_types::MenuPayload;

use crate::application::assembly::SectionContent;
use crate::application::error::PageLoadError;
use crate::application::page::{PageService, PageView};
use crate::application::ports::ContentSource;
use crate::application::prefetch::{PrefetchConfig, PrefetchOrchestrator, PrefetchReport};
use crate::application::scroll::{ScrollConfig, SectionScrollController};
use crate::cache::{CacheConfig, CacheTag, PageCache, PrefetchProgress, ProgressTracker, QueryCache};
use crate::domain::page::CachedPage;

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub tenant: String,
    pub locale: String,
    pub cache: CacheConfig,
    pub prefetch: PrefetchConfig,
    pub scroll: ScrollConfig,
}

impl From<&crate::config::Settings> for RuntimeConfig {
    fn from(settings: &crate::config::Settings) -> Self {
        Self {
            tenant: settings.backend.tenant.clone(),
            locale: settings.backend.locale.clone(),
            cache: CacheConfig::from(settings),
            prefetch: PrefetchConfig::from(settings),
            scroll: ScrollConfig::from(settings),
        }
    }
}

/// Process-wide owner of the caches and the prefetch lifecycle.
///
/// Build one per process and share it; every page mount goes through it.
pub struct ContentRuntime {
    config: RuntimeConfig,
    source: Arc<dyn ContentSource>,
    pages: Arc<PageCache>,
    sections: QueryCache<SectionContent>,
    menus: QueryCache<Vec<MenuPayload>>,
    progress: Arc<ProgressTracker>,
    service: PageService,
    prefetch_started: AtomicBool,
    cancel: CancellationToken,
}

impl ContentRuntime {
    pub fn new(config: RuntimeConfig, source: Arc<dyn ContentSource>) -> Self {
        let pages = Arc::new(PageCache::new());
        let sections = QueryCache::new("sections");
        let menus = QueryCache::new("menus");
        let service = PageService::new(
            Arc::clone(&source),
            Arc::clone(&pages),
            sections.clone(),
            menus.clone(),
            config.cache.clone(),
        );

        Self {
            config,
            source,
            pages,
            sections,
            menus,
            progress: Arc::new(ProgressTracker::new()),
            service,
            prefetch_started: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    pub fn orchestrator(&self) -> PrefetchOrchestrator {
        PrefetchOrchestrator::new(
            self.config.tenant.clone(),
            self.config.locale.clone(),
            Arc::clone(&self.source),
            Arc::clone(&self.pages),
            self.service.clone(),
            Arc::clone(&self.progress),
            self.config.prefetch.clone(),
        )
    }

    /// Start the background prefetch unless it already ran in this process.
    ///
    /// Returns the handle of the spawned run, or `None` when prefetching is
    /// disabled or was started before.
    pub fn ensure_prefetch(&self) -> Option<JoinHandle<PrefetchReport>> {
        if !self.config.prefetch.enabled {
            debug!("prefetch disabled");
            return None;
        }
        if self.prefetch_started.swap(true, Ordering::AcqRel) {
            return None;
        }

        let orchestrator = self.orchestrator();
        let cancel = self.cancel.clone();
        Some(tokio::spawn(async move { orchestrator.run(&cancel).await }))
    }

    /// Entry point for rendering `slug`: kicks off prefetching, then loads
    /// the page itself.
    pub async fn mount(&self, slug: &str) -> PageView {
        self.ensure_prefetch();
        self.service.load_or_fallback(&self.config.locale, slug).await
    }

    pub async fn load_page(&self, slug: &str) -> Result<Arc<CachedPage>, PageLoadError> {
        self.service.load(&self.config.locale, slug).await
    }

    /// Scroll controller for a rendered page; `None` unless it is a landing page.
    pub fn scroll_controller(&self, page: &CachedPage) -> Option<SectionScrollController> {
        SectionScrollController::attach(page, self.config.scroll)
    }

    /// Mutation hook for an edited section: drops its cached content and
    /// rebuilds every cached page embedding it. Returns the pages rebuilt.
    pub async fn section_updated(&self, section_id: &str) -> usize {
        let removed = self.sections.invalidate(&CacheTag::section(section_id));
        let rebuilt = self.service.refresh_section(section_id).await;
        info!(section_id, removed, rebuilt, "section invalidated");
        rebuilt
    }

    /// Mutation hook for edited menus; rebuilds pages whose headers use one.
    pub async fn menus_updated(&self) -> usize {
        let removed = self.menus.invalidate(&CacheTag::Menus);
        let rebuilt = self.service.refresh_menus().await;
        info!(removed, rebuilt, "menus invalidated");
        rebuilt
    }

    pub fn progress(&self) -> PrefetchProgress {
        self.progress.snapshot()
    }

    pub fn subscribe_progress(&self) -> watch::Receiver<PrefetchProgress> {
        self.progress.subscribe()
    }

    pub fn locale(&self) -> &str {
        &self.config.locale
    }

    pub fn pages(&self) -> &Arc<PageCache> {
        &self.pages
    }

    pub fn page_service(&self) -> &PageService {
        &self.service
    }

    /// Stop a running prefetch after its current batch.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for ContentRuntime {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
